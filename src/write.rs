//! Per-descriptor write buffering and atomic commit-at-close.
//!
//! **Critical invariant: writes are buffered, close() commits atomically.**
//! A writable descriptor's effects on the backend become visible only when
//! its write context is committed during close; a failed commit discards
//! the buffer entirely. Reads issued against a writable descriptor bypass
//! the pending buffer and go straight to the backend — read-after-write
//! within the same descriptor requires a reopen.

use crate::error::{Errno, VfsResult};

/// Default per-descriptor soft cap: 64 MiB.
pub const DEFAULT_PER_FD_LIMIT: usize = 64 * 1024 * 1024;
/// Default per-mount hard cap: 256 MiB.
pub const DEFAULT_PER_MOUNT_LIMIT: usize = 256 * 1024 * 1024;

/// Where a write context stages its bytes before commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStrategy {
    /// Buffer in process memory (the default; used by the reference
    /// backend and most native mounts).
    Mem,
    /// Ask the backend for a scratch descriptor and stream the commit to
    /// it (used by backends whose storage is remote or async, e.g. OPFS).
    Backend,
}

/// A mount's write behavior, set once at mount time and immutable after.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WritePolicy {
    /// Whether this mount accepts writing opens at all.
    pub writable: bool,
    /// Soft per-descriptor cap (0 = unbounded).
    pub per_fd_limit: usize,
    /// Hard per-mount cap shared across all descriptors on the mount (0 =
    /// unbounded).
    pub per_mount_limit: usize,
    /// Buffering strategy.
    pub strategy: WriteStrategy,
}

impl WritePolicy {
    /// A read-only mount: any writing open fails before reaching this
    /// layer at all.
    pub const fn readonly() -> Self {
        WritePolicy {
            writable: false,
            per_fd_limit: 0,
            per_mount_limit: 0,
            strategy: WriteStrategy::Mem,
        }
    }

    /// A read-write mount with the documented default limits.
    pub const fn readwrite() -> Self {
        WritePolicy {
            writable: true,
            per_fd_limit: DEFAULT_PER_FD_LIMIT,
            per_mount_limit: DEFAULT_PER_MOUNT_LIMIT,
            strategy: WriteStrategy::Mem,
        }
    }

    /// A custom read-write policy with explicit limits (0 = unbounded on
    /// either).
    pub const fn new(writable: bool, per_fd_limit: usize, per_mount_limit: usize) -> Self {
        WritePolicy {
            writable,
            per_fd_limit,
            per_mount_limit,
            strategy: WriteStrategy::Mem,
        }
    }
}

/// Per-descriptor pending-write state. Created when a descriptor is opened
/// writable, destroyed on close regardless of whether the commit
/// succeeded.
#[derive(Debug, Clone)]
pub struct WriteContext {
    backend_fd: i32,
    mount_index: usize,
    buffer: Vec<u8>,
    per_fd_limit: usize,
    truncate: bool,
}

impl WriteContext {
    /// Start a new, empty write context for a descriptor opened on
    /// `mount_index` with the given effective policy. `truncate` records
    /// whether the open that created this context asked for `TRUNCATE` —
    /// applied at commit time, never at open time, so a commit that never
    /// happens never loses the file's prior contents.
    pub fn new(backend_fd: i32, mount_index: usize, policy: &WritePolicy, truncate: bool) -> Self {
        WriteContext {
            backend_fd,
            mount_index,
            buffer: Vec::new(),
            per_fd_limit: policy.per_fd_limit,
            truncate,
        }
    }

    /// Whether the backend should be truncated before this context's
    /// buffer is written, at commit time.
    pub fn truncate(&self) -> bool {
        self.truncate
    }

    /// The mount this context's accounting is charged against.
    pub fn mount_index(&self) -> usize {
        self.mount_index
    }

    /// The backend-local descriptor this context will eventually commit
    /// to.
    pub fn backend_fd(&self) -> i32 {
        self.backend_fd
    }

    /// Append bytes to the pending buffer. Never touches the backend.
    /// `mount_used` is the mount's running total across every context
    /// sharing it; on success it is updated in place by the caller (the
    /// facade), which owns the per-mount accounting.
    pub fn append(&mut self, buf: &[u8], mount_used: usize, per_mount_limit: usize) -> VfsResult<usize> {
        let would_be_fd_total = self.buffer.len() + buf.len();
        if self.per_fd_limit != 0 && would_be_fd_total > self.per_fd_limit {
            return Err(Errno::Enospc);
        }
        let would_be_mount_total = mount_used + buf.len();
        if per_mount_limit != 0 && would_be_mount_total > per_mount_limit {
            return Err(Errno::Enospc);
        }
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    /// Bytes currently buffered (not yet committed).
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    /// The buffered bytes, consumed by commit.
    pub fn take_buffer(self) -> Vec<u8> {
        self.buffer
    }
}

/// Outcome of committing a write context's buffer to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitResult {
    /// Data persisted.
    Ok,
    /// Hard limit reached.
    Enospc,
    /// Backend write failed.
    Eio,
    /// Permission was revoked between open and close.
    Eacces,
}

impl CommitResult {
    /// Map a commit outcome onto the errno the write layer surfaces to the
    /// caller. Per spec, any commit failure collapses to `EIO` at the
    /// close boundary to keep the atomicity invariant unambiguous, except
    /// when the more specific code is itself the one the caller needs to
    /// distinguish (`ENOSPC`, `EACCES` are left intact — only truly opaque
    /// backend failures subsume into `EIO`).
    pub fn into_errno(self) -> Option<Errno> {
        match self {
            CommitResult::Ok => None,
            CommitResult::Enospc => Some(Errno::Enospc),
            CommitResult::Eacces => Some(Errno::Eacces),
            CommitResult::Eio => Some(Errno::Eio),
        }
    }

    /// Classify a commit failure's errno, preserving the codes callers need
    /// to distinguish and collapsing everything else to the opaque `Eio`.
    pub fn from_errno(err: Errno) -> Self {
        match err {
            Errno::Enospc => CommitResult::Enospc,
            Errno::Eacces => CommitResult::Eacces,
            _ => CommitResult::Eio,
        }
    }
}

/// Test-only hook that forces the next commit to fail with `EIO`,
/// regardless of whether the backend write would have succeeded. This is
/// how scenario 3 (commit-failure atomicity) is exercised without needing
/// a real failing backend.
#[derive(Debug, Default)]
pub struct CommitFailureHook {
    armed: bool,
}

impl CommitFailureHook {
    /// A hook that never forces failure.
    pub fn new() -> Self {
        CommitFailureHook { armed: false }
    }

    /// Arm the hook: the next `take_if_armed` call reports a forced
    /// failure and disarms.
    pub fn arm(&mut self) {
        self.armed = true;
    }

    /// Consume the armed state, if any.
    pub fn take_if_armed(&mut self) -> bool {
        std::mem::take(&mut self.armed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_respects_per_fd_limit() {
        let policy = WritePolicy::new(true, 4, 0);
        let mut ctx = WriteContext::new(3, 0, &policy, false);
        assert_eq!(ctx.append(b"1234", 0, 0).unwrap(), 4);
        let err = ctx.append(b"5", 4, 0).unwrap_err();
        assert_eq!(err, Errno::Enospc);
    }

    #[test]
    fn append_respects_per_mount_limit_across_contexts() {
        let policy = WritePolicy::new(true, 0, 10);
        let mut ctx = WriteContext::new(3, 0, &policy, false);
        // Mount already has 8 bytes used by a sibling context.
        let err = ctx.append(b"123", 8, 10).unwrap_err();
        assert_eq!(err, Errno::Enospc);
    }

    #[test]
    fn commit_failure_hook_fires_once() {
        let mut hook = CommitFailureHook::new();
        assert!(!hook.take_if_armed());
        hook.arm();
        assert!(hook.take_if_armed());
        assert!(!hook.take_if_armed());
    }
}
