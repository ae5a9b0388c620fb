//! The embedding seam for an external collaborator — an editor core, a
//! REPL, a batch harness — to drive a [`Vfs`] without this crate knowing
//! anything about process supervision, pty handling, or event loops.
//!
//! This is deliberately thin: no job queue, no subprocess management, no
//! terminal emulation live here. Those concerns belong to whatever embeds
//! this crate, not to the filesystem substrate itself.

use crate::vfs::Vfs;

/// One unit of work a collaborator performs against a [`Vfs`].
///
/// A blanket implementation over `FnMut(&mut Vfs)` means any closure can
/// act as a client directly; implement the trait explicitly only when the
/// collaborator needs its own state between calls.
pub trait VfsClient {
    /// Perform one unit of work against `vfs`.
    fn drive(&mut self, vfs: &mut Vfs);
}

impl<F: FnMut(&mut Vfs)> VfsClient for F {
    fn drive(&mut self, vfs: &mut Vfs) {
        self(vfs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::OpenFlags;

    #[test]
    fn closure_can_act_as_a_client() {
        let mut vfs = Vfs::new();
        let mut client = |vfs: &mut Vfs| {
            let fd = vfs
                .open("/workspace/note", OpenFlags::CREATE | OpenFlags::WRITE, 0o644)
                .unwrap();
            vfs.write(fd, b"hi").unwrap();
            vfs.close(fd).unwrap();
        };
        client.drive(&mut vfs);

        let fd = vfs.open("/workspace/note", OpenFlags::READ, 0).unwrap();
        let mut buf = [0u8; 8];
        let n = vfs.read(fd, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"hi");
    }
}
