//! Agent-safety filesystem substrate.
//!
//! A mount-table VFS that sits between an agent (or any other caller) and
//! a set of pluggable storage backends. Every call is resolved through an
//! ordered set of mountpoints, checked against that mount's permission
//! bitset, buffered through a write layer that commits atomically at
//! `close()`, and optionally recorded to a deterministic replay log. The
//! [`agent`] module builds on top of all three to let a caller run a
//! computation, verify it was deterministic by replaying it against the
//! recorded log, and accept or reject its effects as one unit.

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub use crate::agent::{AgentResult, RejectReason, Snapshot};
pub use crate::backend::memory::MemoryBackend;
pub use crate::backend::opfs::OpfsBackend;
pub use crate::backend::remote::RemoteBackend;
pub use crate::backend::{Backend, DirEntry, FileKind, FileStat, OpenFlags};
pub use crate::collaborator::VfsClient;
pub use crate::error::{Errno, VfsResult};
pub use crate::mount::{Mount, MountTable, Permissions};
pub use crate::replay::{ReplayBackend, ReplayOp, ReplaySession};
pub use crate::vfs::Vfs;
pub use crate::write::{CommitFailureHook, CommitResult, WriteContext, WritePolicy, WriteStrategy};

mod agent;
mod backend;
mod collaborator;
mod error;
mod mount;
mod replay;
mod vfs;
mod write;
