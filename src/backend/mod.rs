//! The pluggable storage interface every mount binds to.
//!
//! A [`Backend`] is a six-operation surface: open, close, read, write,
//! stat, readdir. Backends own their internal storage and must be
//! internally deterministic — for a fixed ordered sequence of calls against
//! a fresh instance, results are a pure function of arguments. That
//! determinism is what makes [`crate::replay`] equivalence meaningful.

pub mod memory;
pub mod opfs;
pub mod remote;

use crate::error::VfsResult;
use bitflags::bitflags;

bitflags! {
    /// Open-call flags, following POSIX semantics for the subset this
    /// substrate models.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        /// Open for reading.
        const READ = 1 << 0;
        /// Open for writing.
        const WRITE = 1 << 1;
        /// Create the file if it does not exist.
        const CREATE = 1 << 2;
        /// Combined with `CREATE`: fail with `EEXIST` if the file exists.
        const EXCLUSIVE = 1 << 3;
        /// Discard existing contents, position at zero.
        const TRUNCATE = 1 << 4;
        /// Position the descriptor at the file's end on open.
        const APPEND = 1 << 5;
        /// Shorthand for `READ | WRITE`.
        const READWRITE = Self::READ.bits() | Self::WRITE.bits();
    }
}

impl OpenFlags {
    /// Whether this flag combination requires write access to the mount.
    pub fn wants_write(self) -> bool {
        self.intersects(Self::WRITE | Self::READWRITE | Self::CREATE)
    }
}

/// What kind of node a path resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// A regular file.
    RegularFile,
    /// A directory.
    Directory,
}

/// The subset of `stat(2)` fields this substrate models.
///
/// Times are always zeroed: spec scope excludes full POSIX metadata
/// fidelity (no mtime/ctime semantics are promised).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileStat {
    /// Size in bytes (zero for directories).
    pub size: u64,
    /// Regular file vs. directory.
    pub kind: Option<FileKind>,
    /// Hard-link count; always 1 (no hard links in this substrate).
    pub nlink: u32,
}

/// One entry returned by [`Backend::readdir`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Entry name (not a full path); `.` and `..` are always present first.
    pub name: String,
    /// Regular file vs. directory.
    pub kind: FileKind,
}

/// A storage provider mountable into the VFS.
///
/// Implementors must be internally deterministic: the same ordered call
/// sequence against a fresh instance always produces the same results.
/// This is a correctness requirement, not just a style preference — the
/// agent envelope's replay-equivalence check is only meaningful if it
/// holds.
pub trait Backend: std::fmt::Debug + Send {
    /// Open `subpath` with the given flags/mode, returning a backend-local
    /// descriptor (≥ 3, per the reference backend's convention) or an
    /// error.
    fn open(&mut self, subpath: &str, flags: OpenFlags, mode: u32) -> VfsResult<i32>;

    /// Close a descriptor. The descriptor must not be used again regardless
    /// of the outcome.
    fn close(&mut self, fd: i32) -> VfsResult<()>;

    /// Read up to `buf.len()` bytes, advancing the descriptor's offset by
    /// the amount returned. Zero means EOF.
    fn read(&mut self, fd: i32, buf: &mut [u8]) -> VfsResult<usize>;

    /// Write `buf`, advancing the offset and growing the file as needed.
    fn write(&mut self, fd: i32, buf: &[u8]) -> VfsResult<usize>;

    /// Fill `out` with `subpath`'s metadata.
    fn stat(&mut self, subpath: &str, out: &mut FileStat) -> VfsResult<()>;

    /// List `subpath`'s directory entries, `.` and `..` prepended.
    fn readdir(&mut self, subpath: &str) -> VfsResult<Vec<DirEntry>>;

    /// Enumerate every regular file under this backend as `(path, bytes)`
    /// pairs, for the agent envelope's snapshot/restore machinery.
    ///
    /// Most backends have no meaningful notion of a full-content walk (a
    /// remote or browser backend's storage isn't this process's to
    /// enumerate); the default mirrors the rest of this trait's
    /// not-implemented convention and returns `ENOSYS`.
    fn walk_files(&mut self) -> VfsResult<Vec<(String, Vec<u8>)>> {
        Err(crate::error::Errno::Enosys)
    }

    /// Replace the entire backend's contents with `files`, used only to
    /// implement the agent envelope's destructive snapshot restore.
    fn replace_all(&mut self, _files: Vec<(String, Vec<u8>)>) -> VfsResult<()> {
        Err(crate::error::Errno::Enosys)
    }

    /// Discard `fd`'s existing contents, used at commit time by a writable
    /// descriptor opened with `TRUNCATE` — never applied at open time, so
    /// that a commit which never happens (or is forced to fail) never
    /// loses data. Backends with nothing meaningful to truncate return
    /// `ENOSYS`, which the write layer treats as a no-op.
    fn truncate(&mut self, _fd: i32) -> VfsResult<()> {
        Err(crate::error::Errno::Enosys)
    }
}
