//! The closed errno taxonomy used at every layer of the substrate.
//!
//! Internally every fallible call returns `VfsResult<T>` so that error kinds
//! stay a small sum type; conversion to a raw negative `c_int` happens only
//! at the external boundary (see [`crate::vfs::Vfs`]).

use std::fmt;

/// One of the fifteen errno kinds this substrate can surface.
///
/// The variant set is exactly the one named in the external interface: no
/// more, no fewer. Each variant maps onto the `libc` constant of the same
/// name so conversion to a raw `c_int` is a straight cast.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Errno {
    /// Caller gave a malformed path or unsupported flag combination.
    Einval = libc::EINVAL,
    /// No such file or directory.
    Enoent = libc::ENOENT,
    /// Expected a regular file, found a directory.
    Eisdir = libc::EISDIR,
    /// Expected a directory, found a regular file (or nothing walkable).
    Enotdir = libc::ENOTDIR,
    /// `O_CREAT | O_EXCL` on a path that already exists.
    Eexist = libc::EEXIST,
    /// Mount policy disallows the requested operation.
    Eacces = libc::EACCES,
    /// Descriptor is not open, or was already closed.
    Ebadf = libc::EBADF,
    /// Too many open descriptors.
    Emfile = libc::EMFILE,
    /// Backend or log stream failed.
    Eio = libc::EIO,
    /// Write policy limit or allocator exhausted.
    Enospc = libc::ENOSPC,
    /// Remote backend call did not complete within its deadline.
    Etimedout = libc::ETIMEDOUT,
    /// Replay-equivalence check failed (determinism divergence).
    Eproto = libc::EPROTO,
    /// Backend is registered but inert on this platform/build.
    Enosys = libc::ENOSYS,
    /// A replay session (or other single-owner resource) is already active.
    Ealready = libc::EALREADY,
    /// Snapshot or buffer allocation failed.
    Enomem = libc::ENOMEM,
}

impl Errno {
    /// The raw negative `c_int` this errno kind surfaces as at the VFS
    /// calling boundary, e.g. `open()`'s `-errno` return convention.
    pub const fn to_negative(self) -> i32 {
        -(self as i32)
    }

    /// Best-effort mapping from a raw positive errno value back to our
    /// closed taxonomy; anything outside the known set collapses to `Eio`,
    /// matching the write layer's "subsume specifics into EIO" policy.
    pub const fn from_raw(raw: i32) -> Self {
        match raw {
            libc::EINVAL => Errno::Einval,
            libc::ENOENT => Errno::Enoent,
            libc::EISDIR => Errno::Eisdir,
            libc::ENOTDIR => Errno::Enotdir,
            libc::EEXIST => Errno::Eexist,
            libc::EACCES => Errno::Eacces,
            libc::EBADF => Errno::Ebadf,
            libc::EMFILE => Errno::Emfile,
            libc::ENOSPC => Errno::Enospc,
            libc::ETIMEDOUT => Errno::Etimedout,
            libc::EPROTO => Errno::Eproto,
            libc::ENOSYS => Errno::Enosys,
            libc::EALREADY => Errno::Ealready,
            libc::ENOMEM => Errno::Enomem,
            _ => Errno::Eio,
        }
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Errno::Einval => "EINVAL",
            Errno::Enoent => "ENOENT",
            Errno::Eisdir => "EISDIR",
            Errno::Enotdir => "ENOTDIR",
            Errno::Eexist => "EEXIST",
            Errno::Eacces => "EACCES",
            Errno::Ebadf => "EBADF",
            Errno::Emfile => "EMFILE",
            Errno::Eio => "EIO",
            Errno::Enospc => "ENOSPC",
            Errno::Etimedout => "ETIMEDOUT",
            Errno::Eproto => "EPROTO",
            Errno::Enosys => "ENOSYS",
            Errno::Ealready => "EALREADY",
            Errno::Enomem => "ENOMEM",
        };
        f.write_str(name)
    }
}

impl std::error::Error for Errno {}

/// Shorthand for the result type used throughout the substrate's internals.
pub type VfsResult<T> = Result<T, Errno>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_conversion_round_trips() {
        assert_eq!(Errno::Enoent.to_negative(), -libc::ENOENT);
        assert_eq!(Errno::Eacces.to_negative(), -libc::EACCES);
    }

    #[test]
    fn unknown_raw_collapses_to_eio() {
        assert_eq!(Errno::from_raw(libc::ERANGE), Errno::Eio);
    }

    #[test]
    fn display_matches_symbol_name() {
        assert_eq!(Errno::Etimedout.to_string(), "ETIMEDOUT");
    }
}
