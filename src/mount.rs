//! The ordered, immutable-after-init binding of path prefixes to backends.
//!
//! Resolution is longest-prefix-match: the table is kept sorted by
//! mountpoint length descending so a single linear scan finds the right
//! mount. This is the only place paths are resolved and permissions are
//! checked — no backend is ever called before this layer has approved the
//! call.

use crate::backend::Backend;
use crate::error::{Errno, VfsResult};
use crate::write::WritePolicy;
use bitflags::bitflags;

bitflags! {
    /// What a mount allows, checked before any backend call.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Permissions: u32 {
        /// Reading is allowed.
        const READ = 1 << 0;
        /// Writing is allowed.
        const WRITE = 1 << 1;
        /// New files may be created.
        const CREATE = 1 << 2;
        /// Files may be deleted.
        const DELETE = 1 << 3;
        /// Execution (of plugin/runtime code) is allowed.
        const EXEC = 1 << 4;
        /// No permissions at all.
        const NONE = 0;
        /// Read-only convenience set: read + exec.
        const RO = Self::READ.bits() | Self::EXEC.bits();
        /// Read-write convenience set: all five bits.
        const RW = Self::READ.bits() | Self::WRITE.bits() | Self::CREATE.bits()
            | Self::DELETE.bits() | Self::EXEC.bits();
    }
}

/// A single binding of a mountpoint to a backend.
#[derive(Debug)]
pub struct Mount {
    mountpoint: String,
    backend: Box<dyn Backend>,
    perms: Permissions,
    write_policy: WritePolicy,
}

impl Mount {
    /// Construct a mount. Not exposed directly to callers outside this
    /// crate; go through [`MountTable::add`].
    pub(crate) fn new(
        mountpoint: impl Into<String>,
        backend: Box<dyn Backend>,
        perms: Permissions,
        write_policy: WritePolicy,
    ) -> Self {
        Mount {
            mountpoint: mountpoint.into(),
            backend,
            perms,
            write_policy,
        }
    }

    /// This mount's prefix.
    pub fn mountpoint(&self) -> &str {
        &self.mountpoint
    }

    /// Mutable access to the backend, for the facade to delegate calls to.
    pub fn backend_mut(&mut self) -> &mut dyn Backend {
        self.backend.as_mut()
    }

    /// This mount's permission bitset.
    pub fn permissions(&self) -> Permissions {
        self.perms
    }

    /// This mount's write policy.
    pub fn write_policy(&self) -> WritePolicy {
        self.write_policy
    }

    /// Whether `perm` is granted by this mount.
    pub fn check_perm(&self, perm: Permissions) -> bool {
        self.perms.contains(perm)
    }
}

/// The ordered list of mounts. Built from a declarative list at startup and
/// treated as immutable after that (nothing in this crate removes or
/// re-permissions a mount once added).
#[derive(Debug, Default)]
pub struct MountTable {
    mounts: Vec<Mount>,
}

impl MountTable {
    /// An empty table (no mounts, not even `/`). Prefer
    /// [`MountTable::with_defaults`] unless you are constructing a custom
    /// configuration.
    pub fn new() -> Self {
        MountTable { mounts: Vec::new() }
    }

    /// The reference mount configuration: `/` RW, `/runtime` RO,
    /// `/workspace` RW, and the dual-layer plugin overlay
    /// (`/plugins-readonly` RO, `/plugins-local` RW), each backed by a
    /// fresh [`crate::backend::memory::MemoryBackend`]. Registered in this
    /// exact order.
    pub fn with_defaults() -> Self {
        use crate::backend::memory::MemoryBackend;
        use crate::write::WritePolicy;

        let mut table = MountTable::new();
        let defaults: [(&str, Permissions, WritePolicy); 5] = [
            ("/", Permissions::RW, WritePolicy::readwrite()),
            ("/runtime", Permissions::RO, WritePolicy::readonly()),
            ("/workspace", Permissions::RW, WritePolicy::readwrite()),
            (
                "/plugins-readonly",
                Permissions::RO,
                WritePolicy::readonly(),
            ),
            ("/plugins-local", Permissions::RW, WritePolicy::readwrite()),
        ];
        for (mountpoint, perms, policy) in defaults {
            table
                .add(mountpoint, Box::new(MemoryBackend::new()), perms, policy)
                .expect("default mount configuration is internally consistent");
        }
        table
    }

    /// Register a mount, rejecting duplicate mountpoints. Re-sorts the
    /// whole table by mountpoint length descending after every insertion —
    /// the table is only ever populated at init, so this is not on any hot
    /// path; it simply mirrors the reference implementation's behavior
    /// exactly rather than special-casing it away.
    pub fn add(
        &mut self,
        mountpoint: impl Into<String>,
        backend: Box<dyn Backend>,
        perms: Permissions,
        write_policy: WritePolicy,
    ) -> VfsResult<()> {
        let mountpoint = mountpoint.into();
        if mountpoint.is_empty() || !mountpoint.starts_with('/') {
            return Err(Errno::Einval);
        }
        if self.mounts.iter().any(|m| m.mountpoint == mountpoint) {
            return Err(Errno::Eexist);
        }
        self.mounts
            .push(Mount::new(mountpoint, backend, perms, write_policy));
        self.mounts.sort_by_key(|m| std::cmp::Reverse(m.mountpoint().len()));
        Ok(())
    }

    /// Resolve an absolute path to `(mount index, subpath)`.
    ///
    /// Subpath derivation: if the winning mountpoint is `/`, the subpath is
    /// the whole original path; otherwise it is the path with the
    /// mountpoint prefix stripped, or `/` if the path equals the
    /// mountpoint exactly.
    pub fn resolve(&self, path: &str) -> VfsResult<(usize, String)> {
        if !path.starts_with('/') {
            return Err(Errno::Einval);
        }
        for (idx, mount) in self.mounts.iter().enumerate() {
            let mp = mount.mountpoint();
            if path.starts_with(mp)
                && (path.len() == mp.len() || path.as_bytes()[mp.len()] == b'/')
            {
                let subpath = if mp == "/" {
                    path.to_string()
                } else if path.len() == mp.len() {
                    "/".to_string()
                } else {
                    path[mp.len()..].to_string()
                };
                return Ok((idx, subpath));
            }
        }
        // Unreachable in a table that always carries "/", but kept as a
        // real error rather than a panic since a custom table could omit it.
        Err(Errno::Enoent)
    }

    /// Mutable access to a mount by index, as returned by [`Self::resolve`].
    pub fn mount_mut(&mut self, idx: usize) -> &mut Mount {
        &mut self.mounts[idx]
    }

    /// Shared access to a mount by index.
    pub fn mount(&self, idx: usize) -> &Mount {
        &self.mounts[idx]
    }

    /// Number of registered mounts.
    pub fn len(&self) -> usize {
        self.mounts.len()
    }

    /// Whether the table has no mounts at all.
    pub fn is_empty(&self) -> bool {
        self.mounts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;

    fn table_with(mountpoints: &[(&str, Permissions)]) -> MountTable {
        let mut table = MountTable::new();
        for (mp, perms) in mountpoints {
            let policy = if perms.contains(Permissions::WRITE) {
                WritePolicy::readwrite()
            } else {
                WritePolicy::readonly()
            };
            table
                .add(*mp, Box::new(MemoryBackend::new()), *perms, policy)
                .unwrap();
        }
        table
    }

    #[test]
    fn resolve_picks_longest_prefix() {
        let table = table_with(&[
            ("/", Permissions::RW),
            ("/workspace", Permissions::RW),
            ("/workspace/nested", Permissions::RO),
        ]);
        let (idx, subpath) = table.resolve("/workspace/nested/file.txt").unwrap();
        assert_eq!(table.mount(idx).mountpoint(), "/workspace/nested");
        assert_eq!(subpath, "/file.txt");
    }

    #[test]
    fn resolve_falls_back_to_root() {
        let table = table_with(&[("/", Permissions::RW), ("/runtime", Permissions::RO)]);
        let (idx, subpath) = table.resolve("/anything/else").unwrap();
        assert_eq!(table.mount(idx).mountpoint(), "/");
        assert_eq!(subpath, "/anything/else");
    }

    #[test]
    fn subpath_at_exact_mountpoint_is_root() {
        let table = table_with(&[("/", Permissions::RW), ("/workspace", Permissions::RW)]);
        let (idx, subpath) = table.resolve("/workspace").unwrap();
        assert_eq!(table.mount(idx).mountpoint(), "/workspace");
        assert_eq!(subpath, "/");
    }

    #[test]
    fn duplicate_mountpoint_rejected() {
        let mut table = MountTable::new();
        table
            .add(
                "/",
                Box::new(MemoryBackend::new()),
                Permissions::RW,
                WritePolicy::readwrite(),
            )
            .unwrap();
        let err = table
            .add(
                "/",
                Box::new(MemoryBackend::new()),
                Permissions::RW,
                WritePolicy::readwrite(),
            )
            .unwrap_err();
        assert_eq!(err, Errno::Eexist);
    }
}
