//! Snapshot hashing and the outcome types for the agent execution envelope.
//!
//! The orchestration itself — snapshot, record, restore, replay, compare,
//! decide — lives on [`crate::vfs::Vfs::execute_verified`], since it needs
//! to drive the facade directly. This module holds the value types and the
//! pure hashing/comparison logic those steps are built from.

use sha2::{Digest, Sha256};

/// A sorted, hash-based summary of the VFS's content at a moment.
///
/// Equality is count, then per-index path and hash equality — never
/// iteration order of any internal map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    entries: Vec<(String, [u8; 32])>,
}

impl Snapshot {
    /// Hash every `(path, contents)` pair and sort by path.
    pub fn capture(files: &[(String, Vec<u8>)]) -> Self {
        let mut entries: Vec<(String, [u8; 32])> = files
            .iter()
            .map(|(path, contents)| (path.clone(), hash_contents(contents)))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Snapshot { entries }
    }

    /// Number of entries captured.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no entries were captured.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The sorted `(path, hash)` pairs.
    pub fn entries(&self) -> &[(String, [u8; 32])] {
        &self.entries
    }
}

fn hash_contents(contents: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(contents);
    hasher.finalize().into()
}

/// Why an agent callback was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Replaying the recorded log against the callback's second run hit an
    /// op, path, or payload that didn't match what was originally recorded,
    /// or the second run itself panicked partway through (treated the same
    /// way, since either means the computation wasn't deterministic).
    Divergence,
    /// Restoring the VFS to the pre-execution snapshot failed.
    RestoreFailed,
    /// Starting or stopping the replay log failed.
    LogFailed,
}

/// The outcome of [`crate::vfs::Vfs::execute_verified`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentResult {
    /// `true` if the computation was accepted (deterministic, mutations
    /// persisted); `false` if rejected (VFS restored to its pre-execution
    /// state).
    pub accepted: bool,
    /// Present only when `accepted` is `false`.
    pub reason: Option<RejectReason>,
}

impl AgentResult {
    pub(crate) fn accepted() -> Self {
        AgentResult {
            accepted: true,
            reason: None,
        }
    }

    pub(crate) fn rejected(reason: RejectReason) -> Self {
        AgentResult {
            accepted: false,
            reason: Some(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_files_produce_equal_snapshots() {
        let files = vec![("/a".to_string(), b"x".to_vec())];
        assert_eq!(Snapshot::capture(&files), Snapshot::capture(&files));
    }

    #[test]
    fn differing_contents_produce_different_snapshots() {
        let a = vec![("/a".to_string(), b"1".to_vec())];
        let b = vec![("/a".to_string(), b"2".to_vec())];
        assert_ne!(Snapshot::capture(&a), Snapshot::capture(&b));
    }

    #[test]
    fn snapshot_sorts_by_path_regardless_of_input_order() {
        let unsorted = vec![
            ("/b".to_string(), b"2".to_vec()),
            ("/a".to_string(), b"1".to_vec()),
        ];
        let sorted = vec![
            ("/a".to_string(), b"1".to_vec()),
            ("/b".to_string(), b"2".to_vec()),
        ];
        assert_eq!(Snapshot::capture(&unsorted), Snapshot::capture(&sorted));
    }
}
