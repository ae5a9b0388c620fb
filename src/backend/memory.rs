//! Reference in-memory tree backend.
//!
//! An arena of nodes addressed by index rather than owning pointers, so
//! teardown is a single `Vec` drop. Directories hold their children in
//! insertion order; files grow their byte buffer by doubling capacity.
//! Descriptors are slots in a flat table starting at 3 (0/1/2 are
//! conventionally reserved), matching the source backend's `VFS_MAX_FDS`
//! slot-array convention.

use super::{Backend, DirEntry, FileKind, FileStat, OpenFlags};
use crate::error::{Errno, VfsResult};

/// Longest single path component this backend accepts.
pub const MAX_FILENAME: usize = 255;

#[derive(Debug)]
enum NodeData {
    File(Vec<u8>),
    Dir(Vec<usize>),
}

#[derive(Debug)]
struct Node {
    name: String,
    parent: Option<usize>,
    data: NodeData,
}

#[derive(Debug, Clone, Copy)]
struct OpenFile {
    node: usize,
    offset: usize,
    flags: OpenFlags,
}

/// The reference backend: a pure in-memory file tree.
#[derive(Debug)]
pub struct MemoryBackend {
    nodes: Vec<Node>,
    fds: Vec<Option<OpenFile>>,
}

const ROOT: usize = 0;
const FIRST_FD: usize = 3;

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// A fresh backend containing only the root directory.
    pub fn new() -> Self {
        MemoryBackend {
            nodes: vec![Node {
                name: String::new(),
                parent: None,
                data: NodeData::Dir(Vec::new()),
            }],
            fds: Vec::new(),
        }
    }

    fn split_path(path: &str) -> VfsResult<Vec<&str>> {
        if !path.starts_with('/') {
            return Err(Errno::Einval);
        }
        let mut parts = Vec::new();
        for part in path.split('/') {
            if part.is_empty() {
                continue;
            }
            if part.len() > MAX_FILENAME {
                return Err(Errno::Einval);
            }
            parts.push(part);
        }
        Ok(parts)
    }

    fn child_named(&self, dir: usize, name: &str) -> Option<usize> {
        match &self.nodes[dir].data {
            NodeData::Dir(children) => children
                .iter()
                .copied()
                .find(|&c| self.nodes[c].name == name),
            NodeData::File(_) => None,
        }
    }

    fn find_node(&self, path: &str) -> VfsResult<Option<usize>> {
        let parts = Self::split_path(path)?;
        let mut cur = ROOT;
        for part in parts {
            match &self.nodes[cur].data {
                NodeData::Dir(_) => match self.child_named(cur, part) {
                    Some(next) => cur = next,
                    None => return Ok(None),
                },
                NodeData::File(_) => return Err(Errno::Enotdir),
            }
        }
        Ok(Some(cur))
    }

    fn alloc_node(&mut self, name: String, parent: usize, data: NodeData) -> usize {
        let idx = self.nodes.len();
        self.nodes.push(Node { name, parent, data });
        match &mut self.nodes[parent].data {
            NodeData::Dir(children) => children.push(idx),
            NodeData::File(_) => unreachable!("parent of a new node is always a directory"),
        }
        idx
    }

    /// Walk to the parent directory of `path`'s final component, creating
    /// intermediate directories as needed. Returns `(parent_node,
    /// final_component_name)`.
    fn find_or_create_parent_dir<'a>(
        &mut self,
        parts: &[&'a str],
    ) -> VfsResult<(usize, &'a str)> {
        let Some((&last, dirs)) = parts.split_last() else {
            return Err(Errno::Einval);
        };
        let mut cur = ROOT;
        for &part in dirs {
            cur = match self.child_named(cur, part) {
                Some(next) => {
                    if !matches!(self.nodes[next].data, NodeData::Dir(_)) {
                        return Err(Errno::Enotdir);
                    }
                    next
                }
                None => self.alloc_node(part.to_string(), cur, NodeData::Dir(Vec::new())),
            };
        }
        Ok((cur, last))
    }

    fn alloc_fd(&mut self, node: usize, offset: usize, flags: OpenFlags) -> i32 {
        for (i, slot) in self.fds.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(OpenFile { node, offset, flags });
                return (i + FIRST_FD) as i32;
            }
        }
        self.fds.push(Some(OpenFile { node, offset, flags }));
        (self.fds.len() - 1 + FIRST_FD) as i32
    }

    fn slot(&self, fd: i32) -> VfsResult<&OpenFile> {
        let idx = fd as isize - FIRST_FD as isize;
        if idx < 0 {
            return Err(Errno::Ebadf);
        }
        self.fds
            .get(idx as usize)
            .and_then(|s| s.as_ref())
            .ok_or(Errno::Ebadf)
    }

    fn slot_mut(&mut self, fd: i32) -> VfsResult<&mut OpenFile> {
        let idx = fd as isize - FIRST_FD as isize;
        if idx < 0 {
            return Err(Errno::Ebadf);
        }
        self.fds
            .get_mut(idx as usize)
            .and_then(|s| s.as_mut())
            .ok_or(Errno::Ebadf)
    }

    fn collect_paths(&self, node: usize, prefix: &str, out: &mut Vec<(String, Vec<u8>)>) {
        match &self.nodes[node].data {
            NodeData::File(bytes) => out.push((prefix.to_string(), bytes.clone())),
            NodeData::Dir(children) => {
                for &child in children {
                    let name = &self.nodes[child].name;
                    let child_path = if prefix == "/" {
                        format!("/{name}")
                    } else {
                        format!("{prefix}/{name}")
                    };
                    self.collect_paths(child, &child_path, out);
                }
            }
        }
    }
}

impl Backend for MemoryBackend {
    fn open(&mut self, subpath: &str, flags: OpenFlags, _mode: u32) -> VfsResult<i32> {
        let parts = Self::split_path(subpath)?;
        let existing = self.find_node(subpath)?;

        let node = match existing {
            Some(node) => {
                if flags.contains(OpenFlags::CREATE) && flags.contains(OpenFlags::EXCLUSIVE) {
                    return Err(Errno::Eexist);
                }
                if matches!(self.nodes[node].data, NodeData::Dir(_)) {
                    return Err(Errno::Eisdir);
                }
                node
            }
            None => {
                if !flags.contains(OpenFlags::CREATE) {
                    return Err(Errno::Enoent);
                }
                let (parent, name) = self.find_or_create_parent_dir(&parts)?;
                self.alloc_node(name.to_string(), parent, NodeData::File(Vec::new()))
            }
        };

        if flags.contains(OpenFlags::TRUNCATE) {
            if let NodeData::File(bytes) = &mut self.nodes[node].data {
                bytes.clear();
            }
        }

        let offset = if flags.contains(OpenFlags::APPEND) {
            match &self.nodes[node].data {
                NodeData::File(bytes) => bytes.len(),
                NodeData::Dir(_) => 0,
            }
        } else {
            0
        };

        Ok(self.alloc_fd(node, offset, flags))
    }

    fn close(&mut self, fd: i32) -> VfsResult<()> {
        let idx = fd as isize - FIRST_FD as isize;
        if idx < 0 {
            return Err(Errno::Ebadf);
        }
        match self.fds.get_mut(idx as usize) {
            Some(slot @ Some(_)) => {
                *slot = None;
                Ok(())
            }
            _ => Err(Errno::Ebadf),
        }
    }

    fn read(&mut self, fd: i32, buf: &mut [u8]) -> VfsResult<usize> {
        let slot = *self.slot(fd)?;
        let bytes = match &self.nodes[slot.node].data {
            NodeData::File(bytes) => bytes,
            NodeData::Dir(_) => return Err(Errno::Eisdir),
        };
        let available = bytes.len().saturating_sub(slot.offset);
        let n = available.min(buf.len());
        buf[..n].copy_from_slice(&bytes[slot.offset..slot.offset + n]);
        self.slot_mut(fd)?.offset += n;
        Ok(n)
    }

    fn write(&mut self, fd: i32, buf: &[u8]) -> VfsResult<usize> {
        let slot = *self.slot(fd)?;
        let bytes = match &mut self.nodes[slot.node].data {
            NodeData::File(bytes) => bytes,
            NodeData::Dir(_) => return Err(Errno::Eisdir),
        };
        let end = slot.offset + buf.len();
        if bytes.len() < end {
            bytes.resize(end, 0);
        }
        bytes[slot.offset..end].copy_from_slice(buf);
        self.slot_mut(fd)?.offset = end;
        Ok(buf.len())
    }

    fn stat(&mut self, subpath: &str, out: &mut FileStat) -> VfsResult<()> {
        let node = self.find_node(subpath)?.ok_or(Errno::Enoent)?;
        *out = match &self.nodes[node].data {
            NodeData::File(bytes) => FileStat {
                size: bytes.len() as u64,
                kind: Some(FileKind::RegularFile),
                nlink: 1,
            },
            NodeData::Dir(_) => FileStat {
                size: 0,
                kind: Some(FileKind::Directory),
                nlink: 1,
            },
        };
        Ok(())
    }

    fn readdir(&mut self, subpath: &str) -> VfsResult<Vec<DirEntry>> {
        let node = self.find_node(subpath)?.ok_or(Errno::Enoent)?;
        let children = match &self.nodes[node].data {
            NodeData::Dir(children) => children.clone(),
            NodeData::File(_) => return Err(Errno::Enotdir),
        };
        let mut entries = vec![
            DirEntry {
                name: ".".to_string(),
                kind: FileKind::Directory,
            },
            DirEntry {
                name: "..".to_string(),
                kind: FileKind::Directory,
            },
        ];
        for child in children {
            let kind = match &self.nodes[child].data {
                NodeData::File(_) => FileKind::RegularFile,
                NodeData::Dir(_) => FileKind::Directory,
            };
            entries.push(DirEntry {
                name: self.nodes[child].name.clone(),
                kind,
            });
        }
        Ok(entries)
    }

    fn walk_files(&mut self) -> VfsResult<Vec<(String, Vec<u8>)>> {
        let mut out = Vec::new();
        self.collect_paths(ROOT, "/", &mut out);
        Ok(out)
    }

    fn replace_all(&mut self, files: Vec<(String, Vec<u8>)>) -> VfsResult<()> {
        *self = MemoryBackend::new();
        for (path, contents) in files {
            let parts = Self::split_path(&path)?;
            let (parent, name) = self.find_or_create_parent_dir(&parts)?;
            self.alloc_node(name.to_string(), parent, NodeData::File(contents));
        }
        Ok(())
    }

    fn truncate(&mut self, fd: i32) -> VfsResult<()> {
        let slot = *self.slot(fd)?;
        match &mut self.nodes[slot.node].data {
            NodeData::File(bytes) => bytes.clear(),
            NodeData::Dir(_) => return Err(Errno::Eisdir),
        }
        self.slot_mut(fd)?.offset = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flags(bits: u32) -> OpenFlags {
        OpenFlags::from_bits_truncate(bits)
    }

    #[test]
    fn write_then_read_round_trip() {
        let mut be = MemoryBackend::new();
        let fd = be
            .open(
                "/hello.txt",
                OpenFlags::CREATE | OpenFlags::READWRITE,
                0o644,
            )
            .unwrap();
        assert_eq!(be.write(fd, b"hello").unwrap(), 5);
        be.close(fd).unwrap();

        let fd = be.open("/hello.txt", OpenFlags::READ, 0).unwrap();
        let mut buf = [0u8; 8];
        let n = be.read(fd, &mut buf).unwrap();
        assert_eq!(n, 5);
        assert_eq!(&buf[..5], b"hello");
    }

    #[test]
    fn exclusive_create_on_existing_fails() {
        let mut be = MemoryBackend::new();
        let fd = be
            .open("/a", OpenFlags::CREATE | OpenFlags::WRITE, 0)
            .unwrap();
        be.close(fd).unwrap();
        let err = be
            .open(
                "/a",
                OpenFlags::CREATE | OpenFlags::EXCLUSIVE | OpenFlags::WRITE,
                0,
            )
            .unwrap_err();
        assert_eq!(err, Errno::Eexist);
    }

    #[test]
    fn readdir_prepends_dot_entries_in_insertion_order() {
        let mut be = MemoryBackend::new();
        for name in ["/b", "/a", "/c"] {
            let fd = be.open(name, OpenFlags::CREATE | OpenFlags::WRITE, 0).unwrap();
            be.close(fd).unwrap();
        }
        let entries = be.readdir("/").unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec![".", "..", "b", "a", "c"]);
    }

    #[test]
    fn fds_are_never_reused_before_close_and_start_at_three() {
        let mut be = MemoryBackend::new();
        let fd1 = be.open("/a", OpenFlags::CREATE | OpenFlags::WRITE, 0).unwrap();
        assert_eq!(fd1, 3);
        let fd2 = be.open("/b", OpenFlags::CREATE | OpenFlags::WRITE, 0).unwrap();
        assert_eq!(fd2, 4);
        be.close(fd1).unwrap();
        let fd3 = be.open("/c", OpenFlags::CREATE | OpenFlags::WRITE, 0).unwrap();
        assert_eq!(fd3, 3);
        let _ = flags(0);
    }

    #[test]
    fn restore_round_trip_via_walk_and_replace() {
        let mut be = MemoryBackend::new();
        let fd = be
            .open("/workspace/a", OpenFlags::CREATE | OpenFlags::WRITE, 0)
            .unwrap();
        be.write(fd, b"1").unwrap();
        be.close(fd).unwrap();

        let snap = be.walk_files().unwrap();
        let fd = be
            .open("/workspace/b", OpenFlags::CREATE | OpenFlags::WRITE, 0)
            .unwrap();
        be.write(fd, b"2").unwrap();
        be.close(fd).unwrap();

        be.replace_all(snap).unwrap();
        assert!(matches!(be.find_node("/workspace/b"), Ok(None)));
        assert!(matches!(be.find_node("/workspace/a"), Ok(Some(_))));
    }
}
