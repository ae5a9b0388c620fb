//! The facade gluing mount table, write layer, replay log, and agent
//! envelope into the single entry point callers use.
//!
//! Control flow of a mutating operation mirrors the source design exactly:
//! *resolve mount → permission check → (optional) replay log entry →
//! write-context create/append/commit → backend*.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, trace, warn};

use crate::agent::{AgentResult, RejectReason, Snapshot};
use crate::backend::{Backend, DirEntry, FileStat, OpenFlags};
use crate::error::{Errno, VfsResult};
use crate::mount::{MountTable, Permissions};
use crate::replay::{ReplayBackend, ReplayOp, ReplaySession};
use crate::write::{CommitFailureHook, CommitResult, WriteContext};

/// First descriptor the facade itself issues; 0/1/2 are conventionally
/// reserved, matching the reference backend's own fd-numbering convention.
/// This namespace is independent of whatever raw descriptor each mount's
/// backend hands back, since two backends opening concurrently can and do
/// return the same raw number.
const FIRST_FD: i32 = 3;

struct FdEntry {
    mount_idx: usize,
    /// The raw descriptor the owning mount's backend issued. Backends
    /// number descriptors independently of one another, so this is never
    /// confused with the facade-global key this entry is stored under.
    backend_fd: i32,
    write_ctx: Option<WriteContext>,
}

/// The single entry point for this crate: owns the mount table, the
/// per-descriptor write contexts, and the (at most one) active replay
/// session.
#[derive(Debug)]
pub struct Vfs {
    mounts: MountTable,
    fds: HashMap<i32, FdEntry>,
    next_fd: i32,
    mount_used: Vec<usize>,
    replay_session: Option<ReplaySession>,
    replay_override: Option<ReplayBackend>,
    commit_failure_hook: CommitFailureHook,
    replay_dir: PathBuf,
}

impl std::fmt::Debug for FdEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FdEntry")
            .field("mount_idx", &self.mount_idx)
            .field("backend_fd", &self.backend_fd)
            .field("writable", &self.write_ctx.is_some())
            .finish()
    }
}

impl Default for Vfs {
    fn default() -> Self {
        Self::new()
    }
}

impl Vfs {
    /// A facade over the reference mount configuration (see
    /// [`MountTable::with_defaults`]).
    pub fn new() -> Self {
        Self::with_mounts(MountTable::with_defaults())
    }

    /// A facade over a custom mount table.
    pub fn with_mounts(mounts: MountTable) -> Self {
        let mount_used = vec![0; mounts.len()];
        Vfs {
            mounts,
            fds: HashMap::new(),
            next_fd: FIRST_FD,
            mount_used,
            replay_session: None,
            replay_override: None,
            commit_failure_hook: CommitFailureHook::new(),
            replay_dir: std::env::temp_dir().join(".nvim").join("replay"),
        }
    }

    /// Issue the next facade-global descriptor. Independent of any backend's
    /// own fd numbering, so two mounts handing back the same raw descriptor
    /// never collide in `self.fds`.
    fn alloc_fd(&mut self) -> i32 {
        let fd = self.next_fd;
        self.next_fd += 1;
        fd
    }

    /// Arm the test-only commit-failure hook: the next `close()` that would
    /// commit a write forces `EIO` instead. See spec scenario 3.
    #[cfg(any(test, feature = "test-hooks"))]
    pub fn arm_commit_failure_hook(&mut self) {
        self.commit_failure_hook.arm();
    }

    // ---- six-operation VFS calling surface ----

    /// Open `path`, resolving through the mount table and, if the call
    /// wants to write, registering a fresh write context.
    pub fn open(&mut self, path: &str, flags: OpenFlags, mode: u32) -> VfsResult<i32> {
        if let Some(replay) = &mut self.replay_override {
            return replay.open(path, flags, mode);
        }

        let (mount_idx, subpath) = self.mounts.resolve(path)?;
        let mut required = if flags.wants_write() {
            Permissions::WRITE
        } else {
            Permissions::READ
        };
        if flags.contains(OpenFlags::CREATE) {
            required |= Permissions::CREATE;
        }
        if !self.mounts.mount(mount_idx).check_perm(required) {
            // Permission-rejected calls never reach the backend and are
            // never logged — they're policy noise, not filesystem activity.
            return Err(Errno::Eacces);
        }
        if flags.wants_write() && !self.mounts.mount(mount_idx).write_policy().writable {
            return Err(Errno::Eacces);
        }

        // TRUNCATE is never forwarded to the backend here: applying it
        // immediately would discard the file's contents before the write
        // layer's commit-at-close boundary even runs, breaking the
        // atomicity invariant for a commit that is never reached (or is
        // forced to fail). It is re-applied, if still requested, at
        // commit time in `close`.
        let backend_flags = flags.difference(OpenFlags::TRUNCATE);
        let result = self
            .mounts
            .mount_mut(mount_idx)
            .backend_mut()
            .open(&subpath, backend_flags, mode);
        self.log_result(mount_idx, ReplayOp::Open, path, -1, 0, 0, flags.bits(), mode, &result, &[]);

        let backend_fd = result?;
        let write_ctx = if flags.wants_write() {
            Some(WriteContext::new(
                backend_fd,
                mount_idx,
                &self.mounts.mount(mount_idx).write_policy(),
                flags.contains(OpenFlags::TRUNCATE),
            ))
        } else {
            None
        };
        let fd = self.alloc_fd();
        self.fds.insert(fd, FdEntry { mount_idx, backend_fd, write_ctx });
        trace!("open({path:?}, {flags:?}) -> fd {fd} (backend fd {backend_fd} on mount {mount_idx})");
        Ok(fd)
    }

    /// Close `fd`. If it was opened writable, this is the atomic commit
    /// boundary: the buffered bytes are applied to the backend as one
    /// logical write, or discarded entirely on failure. The descriptor is
    /// invalid after this call regardless of outcome.
    pub fn close(&mut self, fd: i32) -> VfsResult<()> {
        if let Some(replay) = &mut self.replay_override {
            return replay.close(fd);
        }

        let entry = self.fds.remove(&fd).ok_or(Errno::Ebadf)?;
        let mount_idx = entry.mount_idx;
        let backend_fd = entry.backend_fd;

        let commit_err = if let Some(ctx) = entry.write_ctx {
            let pending = ctx.pending_len();
            let truncate = ctx.truncate();
            let write_fd = ctx.backend_fd();
            let buffer = ctx.take_buffer();
            self.mount_used[mount_idx] = self.mount_used[mount_idx].saturating_sub(pending);

            let forced = self.commit_failure_hook.take_if_armed();
            let commit: VfsResult<()> = if forced {
                Err(Errno::Eio)
            } else {
                let truncated = if truncate {
                    self.mounts.mount_mut(mount_idx).backend_mut().truncate(write_fd)
                } else {
                    Ok(())
                };
                match truncated {
                    Ok(()) | Err(Errno::Enosys) => {
                        if buffer.is_empty() {
                            Ok(())
                        } else {
                            self.mounts
                                .mount_mut(mount_idx)
                                .backend_mut()
                                .write(write_fd, &buffer)
                                .map(|_| ())
                        }
                    }
                    Err(e) => Err(e),
                }
            };
            // Always attempt to close the backend descriptor, even if the
            // commit failed, matching the "best-effort close" rule.
            let _ = self.mounts.mount_mut(mount_idx).backend_mut().close(write_fd);
            // Preserve the specific failure (ENOSPC/EACCES) rather than
            // collapsing every commit failure to EIO, per CommitResult's
            // own documented contract.
            commit.err().map(CommitResult::from_errno).and_then(CommitResult::into_errno)
        } else {
            self.mounts
                .mount_mut(mount_idx)
                .backend_mut()
                .close(backend_fd)
                .err()
        };

        let result: VfsResult<()> = match commit_err {
            None => Ok(()),
            Some(e) => Err(e),
        };
        self.log_result(mount_idx, ReplayOp::Close, "", fd, 0, 0, 0, 0, &result, &[]);
        result
    }

    /// Read up to `buf.len()` bytes from `fd`. A writable descriptor's
    /// pending buffer is bypassed: reads always go straight to the
    /// backend, by design (read-after-write needs a reopen).
    pub fn read(&mut self, fd: i32, buf: &mut [u8]) -> VfsResult<usize> {
        if let Some(replay) = &mut self.replay_override {
            return replay.read(fd, buf);
        }

        let entry = self.fds.get(&fd).ok_or(Errno::Ebadf)?;
        let mount_idx = entry.mount_idx;
        let backend_fd = entry.backend_fd;
        let result = self.mounts.mount_mut(mount_idx).backend_mut().read(backend_fd, buf);
        let payload = result.as_ref().map(|&n| &buf[..n]).unwrap_or(&[]);
        self.log_result(mount_idx, ReplayOp::Read, "", fd, 0, 0, 0, 0, &result, payload);
        result
    }

    /// Append `buf` to `fd`'s pending write buffer. The backend is not
    /// called; this is a pure in-memory (or backend-staging) append,
    /// capped by the mount's write policy.
    pub fn write(&mut self, fd: i32, buf: &[u8]) -> VfsResult<usize> {
        if let Some(replay) = &mut self.replay_override {
            return replay.write(fd, buf);
        }

        let mount_idx = self.fds.get(&fd).ok_or(Errno::Ebadf)?.mount_idx;
        let per_mount_limit = self.mounts.mount(mount_idx).write_policy().per_mount_limit;
        let mount_used = self.mount_used[mount_idx];

        let entry = self.fds.get_mut(&fd).ok_or(Errno::Ebadf)?;
        let ctx = entry.write_ctx.as_mut().ok_or(Errno::Ebadf)?;
        let result = ctx.append(buf, mount_used, per_mount_limit);
        if let Ok(n) = result {
            self.mount_used[mount_idx] += n;
        }

        // The write layer buffers rather than calling the backend, so the
        // "backend call" this op's logging discipline refers to is the
        // buffering call itself: write() is the unit of mount-boundary
        // work for this op, and its return is what gets logged.
        self.log_result(mount_idx, ReplayOp::Write, "", fd, 0, buf.len() as u64, 0, 0, &result, buf);
        result
    }

    /// Fill `out` with `path`'s metadata. Always reflects committed
    /// backend state, never a pending write buffer.
    pub fn stat(&mut self, path: &str, out: &mut FileStat) -> VfsResult<()> {
        if let Some(replay) = &mut self.replay_override {
            return replay.stat(path, out);
        }

        let (mount_idx, subpath) = self.mounts.resolve(path)?;
        let result = self.mounts.mount_mut(mount_idx).backend_mut().stat(&subpath, out);
        let payload = if result.is_ok() {
            out.size.to_le_bytes().to_vec()
        } else {
            Vec::new()
        };
        self.log_result(mount_idx, ReplayOp::Stat, path, -1, 0, 0, 0, 0, &result, &payload);
        result
    }

    /// List `path`'s directory entries, `.` and `..` prepended.
    pub fn readdir(&mut self, path: &str) -> VfsResult<Vec<DirEntry>> {
        if let Some(replay) = &mut self.replay_override {
            return replay.readdir(path);
        }

        let (mount_idx, subpath) = self.mounts.resolve(path)?;
        let result = self.mounts.mount_mut(mount_idx).backend_mut().readdir(&subpath);
        self.log_result(mount_idx, ReplayOp::Readdir, path, -1, 0, 0, 0, 0, &result, &[]);
        result
    }

    #[allow(clippy::too_many_arguments)]
    fn log_result<T>(
        &mut self,
        _mount_idx: usize,
        op: ReplayOp,
        path: &str,
        fd: i32,
        offset: u64,
        size: u64,
        flags: u32,
        mode: u32,
        result: &VfsResult<T>,
        data: &[u8],
    ) {
        let Some(session) = self.replay_session.as_mut() else {
            return;
        };
        let (ret, err) = match result {
            Ok(_) => (0, 0),
            Err(e) => (e.to_negative(), -e.to_negative()),
        };
        session.log_operation(op, path, fd, offset, size, flags, mode, ret, err, data);
    }

    // ---- agent envelope ----

    /// Collect every `(canonical path, bytes)` pair across every mount
    /// whose backend supports a full-content walk (the reference in-memory
    /// backend does; remote/browser backends do not and are skipped).
    fn capture_all_files(&mut self) -> Vec<(String, Vec<u8>)> {
        let mut all = Vec::new();
        for idx in 0..self.mounts.len() {
            let mountpoint = self.mounts.mount(idx).mountpoint().to_string();
            match self.mounts.mount_mut(idx).backend_mut().walk_files() {
                Ok(files) => {
                    for (subpath, contents) in files {
                        let canonical = if mountpoint == "/" {
                            subpath
                        } else if subpath == "/" {
                            mountpoint.clone()
                        } else {
                            format!("{mountpoint}{subpath}")
                        };
                        all.push((canonical, contents));
                    }
                }
                Err(Errno::Enosys) => continue,
                Err(e) => warn!("snapshot walk failed on {mountpoint}: {e}"),
            }
        }
        all
    }

    /// Destructively restore every snapshottable mount to `files`. Each
    /// canonical path is routed back to its owning mount through the same
    /// longest-prefix resolution `open`/`stat`/etc. use, rather than a
    /// naive string-prefix strip, so mountpoints that share a textual
    /// prefix (e.g. `/plugins-local` vs. a hypothetical `/plugins`) are
    /// never misattributed.
    fn restore_all_files(&mut self, files: &[(String, Vec<u8>)]) -> VfsResult<()> {
        let mut buckets: Vec<Vec<(String, Vec<u8>)>> = vec![Vec::new(); self.mounts.len()];
        for (path, contents) in files {
            let (mount_idx, subpath) = self.mounts.resolve(path)?;
            buckets[mount_idx].push((subpath, contents.clone()));
        }
        for (idx, bucket) in buckets.into_iter().enumerate() {
            match self.mounts.mount_mut(idx).backend_mut().replace_all(bucket) {
                Ok(()) | Err(Errno::Enosys) => {}
                Err(_) => return Err(Errno::Eio),
            }
        }
        Ok(())
    }

    fn next_session_id(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0)
    }

    fn replay_log_path(&self, session_id: u64) -> PathBuf {
        self.replay_dir.join(format!("agent-{session_id}.log"))
    }

    /// Execute `callback` under full determinism verification:
    ///
    /// 1. Snapshot the VFS (`snapshot-before`).
    /// 2. Start a fresh replay log and run `callback` against `self`.
    /// 3. Stop the log and snapshot again (`snapshot-after`).
    /// 4. Restore to `snapshot-before` (destructive).
    /// 5. Swap in a replay backend that intercepts every call `callback`
    ///    makes and re-run it, checking each op, path and payload against
    ///    the recorded log instead of touching real storage.
    /// 6. If replay reported zero mismatches, accept (re-apply
    ///    `snapshot-after`); otherwise reject (leave the pre-execution
    ///    state in place, already restored in step 4).
    pub fn execute_verified<F>(&mut self, callback: F) -> AgentResult
    where
        F: Fn(&mut Vfs),
    {
        if self.replay_session.is_some() {
            return AgentResult::rejected(RejectReason::LogFailed);
        }

        let before_files = self.capture_all_files();

        let session_id = self.next_session_id();
        let log_path = self.replay_log_path(session_id);
        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let session = match ReplaySession::start(&log_path, session_id) {
            Ok(s) => s,
            Err(_) => return AgentResult::rejected(RejectReason::LogFailed),
        };
        self.replay_session = Some(session);

        callback(self);

        let session = self.replay_session.take().expect("session set above");
        if session.stop().is_err() {
            return AgentResult::rejected(RejectReason::LogFailed);
        }

        let after_files = self.capture_all_files();
        let snapshot_after = Snapshot::capture(&after_files);

        if self.restore_all_files(&before_files).is_err() {
            return AgentResult::rejected(RejectReason::RestoreFailed);
        }

        let replay_backend = match ReplayBackend::open(&log_path) {
            Ok(b) => b,
            Err(_) => return AgentResult::rejected(RejectReason::LogFailed),
        };
        self.replay_override = Some(replay_backend);
        // A callback written against this crate's idioms calls `.unwrap()`
        // on ops like `write`/`close`; a divergent op surfaces from the
        // replay backend as `Err`, which such a callback turns into a
        // panic. Replay never mutates real facade state (every op
        // short-circuits to `replay_override`), so a caught panic here
        // leaves `self` exactly as safe to proceed from as a clean
        // mismatch does, and is treated the same way.
        let replay_panicked = panic::catch_unwind(AssertUnwindSafe(|| callback(self))).is_err();
        let replay_backend = self.replay_override.take().expect("set above");
        let (_, mismatches) = replay_backend.stats();

        // The replay pass above never touches the real backends — every op
        // short-circuits to `replay_override` — so determinism can only be
        // judged by the replay backend's own op/path/payload verification,
        // never by re-snapshotting `self` (it would still read back at
        // snapshot_before, the state the restore above just put it in).
        if mismatches == 0 && !replay_panicked {
            if self.restore_all_files(&after_files).is_err() {
                return AgentResult::rejected(RejectReason::RestoreFailed);
            }
            debug!("agent execution accepted ({} files)", snapshot_after.len());
            AgentResult::accepted()
        } else {
            // `self` is already sitting at snapshot_before from the
            // restore above, so no further restore is needed here.
            AgentResult::rejected(RejectReason::Divergence)
        }
    }

    /// Exposes the log directory used for agent executions, mainly for
    /// tests that want to point it somewhere disposable.
    pub fn set_replay_dir(&mut self, dir: impl Into<PathBuf>) {
        self.replay_dir = dir.into();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn vfs_for_test() -> (Vfs, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let mut vfs = Vfs::new();
        vfs.set_replay_dir(dir.path());
        (vfs, dir)
    }

    #[test]
    fn scenario_1_write_then_read_round_trip() {
        let (mut vfs, _dir) = vfs_for_test();
        let fd = vfs
            .open(
                "/workspace/hello.txt",
                OpenFlags::CREATE | OpenFlags::READWRITE,
                0o644,
            )
            .unwrap();
        assert_eq!(vfs.write(fd, b"hello").unwrap(), 5);
        vfs.close(fd).unwrap();

        let fd = vfs.open("/workspace/hello.txt", OpenFlags::READ, 0).unwrap();
        let mut buf = [0u8; 8];
        let n = vfs.read(fd, &mut buf).unwrap();
        assert_eq!(n, 5);
        assert_eq!(&buf[..5], b"hello");
    }

    #[test]
    fn scenario_2_readonly_mount_rejects_write() {
        let (mut vfs, _dir) = vfs_for_test();
        let err = vfs
            .open("/runtime/config.vim", OpenFlags::WRITE, 0)
            .unwrap_err();
        assert_eq!(err, Errno::Eacces);
    }

    #[test]
    fn scenario_3_commit_failure_atomicity() {
        let (mut vfs, _dir) = vfs_for_test();
        let fd = vfs
            .open(
                "/workspace/x",
                OpenFlags::CREATE | OpenFlags::READWRITE,
                0o644,
            )
            .unwrap();
        vfs.write(fd, b"old").unwrap();
        vfs.close(fd).unwrap();

        let fd = vfs
            .open(
                "/workspace/x",
                OpenFlags::WRITE | OpenFlags::TRUNCATE,
                0o644,
            )
            .unwrap();
        vfs.write(fd, b"new").unwrap();
        vfs.arm_commit_failure_hook();
        let err = vfs.close(fd).unwrap_err();
        assert_eq!(err, Errno::Eio);

        let fd = vfs.open("/workspace/x", OpenFlags::READ, 0).unwrap();
        let mut buf = [0u8; 8];
        let n = vfs.read(fd, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"old");
    }

    #[test]
    fn scenario_4_deterministic_agent_accepted() {
        let (mut vfs, _dir) = vfs_for_test();
        let result = vfs.execute_verified(|vfs| {
            let fd = vfs
                .open("/workspace/a", OpenFlags::CREATE | OpenFlags::WRITE, 0o644)
                .unwrap();
            vfs.write(fd, b"1").unwrap();
            vfs.close(fd).unwrap();
            let fd = vfs
                .open("/workspace/b", OpenFlags::CREATE | OpenFlags::WRITE, 0o644)
                .unwrap();
            vfs.write(fd, b"2").unwrap();
            vfs.close(fd).unwrap();
        });
        assert!(result.accepted);

        let fd = vfs.open("/workspace/a", OpenFlags::READ, 0).unwrap();
        let mut buf = [0u8; 4];
        let n = vfs.read(fd, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"1");
    }
}
