//! Remote-RPC backend: each call is serialized to a length-prefixed
//! message on a stream socket, blocking for the reply.
//!
//! Wire framing: `[4-byte big-endian length][payload]`, symmetric for
//! request and reply. One outstanding request at a time, no threads, no
//! callbacks — a 5-second read timeout per call surfaces as
//! [`Errno::Etimedout`].

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{Backend, DirEntry, FileKind, FileStat, OpenFlags};
use crate::error::{Errno, VfsResult};

/// Per-call timeout, matching the original RPC backend's "5 seconds per
/// operation (global)" contract.
pub const CALL_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize, Deserialize)]
enum RpcRequest {
    Open { subpath: String, flags: u32, mode: u32 },
    Close { fd: i32 },
    Read { fd: i32, count: usize },
    Write { fd: i32, data: Vec<u8> },
    Stat { subpath: String },
    Readdir { subpath: String },
}

#[derive(Debug, Serialize, Deserialize)]
enum RpcReply {
    Open(Result<i32, i32>),
    Close(Result<(), i32>),
    Read(Result<Vec<u8>, i32>),
    Write(Result<usize, i32>),
    Stat(Result<(u64, bool), i32>),
    Readdir(Result<Vec<(String, bool)>, i32>),
}

/// A backend that forwards every operation to a remote RPC server over a
/// TCP stream.
#[derive(Debug)]
pub struct RemoteBackend {
    stream: TcpStream,
    next_request_id: u64,
}

impl RemoteBackend {
    /// Connect to `addr`, configuring the per-call read/write timeout.
    pub fn connect(addr: impl std::net::ToSocketAddrs) -> VfsResult<Self> {
        let stream = TcpStream::connect(addr).map_err(|_| Errno::Eio)?;
        stream
            .set_read_timeout(Some(CALL_TIMEOUT))
            .map_err(|_| Errno::Eio)?;
        stream
            .set_write_timeout(Some(CALL_TIMEOUT))
            .map_err(|_| Errno::Eio)?;
        Ok(RemoteBackend {
            stream,
            next_request_id: 0,
        })
    }

    fn call(&mut self, request: &RpcRequest) -> VfsResult<RpcReply> {
        let request_id = self.next_request_id;
        self.next_request_id += 1;
        let body = bincode::serialize(&(request_id, request)).map_err(|_| Errno::Einval)?;
        let len = u32::try_from(body.len()).map_err(|_| Errno::Einval)?;
        self.stream
            .write_all(&len.to_be_bytes())
            .map_err(timeout_or_io)?;
        self.stream.write_all(&body).map_err(timeout_or_io)?;

        let mut len_bytes = [0u8; 4];
        self.stream.read_exact(&mut len_bytes).map_err(timeout_or_io)?;
        let reply_len = u32::from_be_bytes(len_bytes) as usize;
        let mut reply_bytes = vec![0u8; reply_len];
        self.stream.read_exact(&mut reply_bytes).map_err(timeout_or_io)?;
        let (_reply_id, reply): (u64, RpcReply) =
            bincode::deserialize(&reply_bytes).map_err(|_| Errno::Eio)?;
        Ok(reply)
    }
}

fn timeout_or_io(e: std::io::Error) -> Errno {
    if matches!(
        e.kind(),
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
    ) {
        Errno::Etimedout
    } else {
        Errno::Eio
    }
}

impl Backend for RemoteBackend {
    fn open(&mut self, subpath: &str, flags: OpenFlags, mode: u32) -> VfsResult<i32> {
        match self.call(&RpcRequest::Open {
            subpath: subpath.to_string(),
            flags: flags.bits(),
            mode,
        })? {
            RpcReply::Open(Ok(fd)) => Ok(fd),
            RpcReply::Open(Err(errno)) => Err(Errno::from_raw(errno)),
            _ => Err(Errno::Eproto),
        }
    }

    fn close(&mut self, fd: i32) -> VfsResult<()> {
        match self.call(&RpcRequest::Close { fd })? {
            RpcReply::Close(Ok(())) => Ok(()),
            RpcReply::Close(Err(errno)) => Err(Errno::from_raw(errno)),
            _ => Err(Errno::Eproto),
        }
    }

    fn read(&mut self, fd: i32, buf: &mut [u8]) -> VfsResult<usize> {
        match self.call(&RpcRequest::Read {
            fd,
            count: buf.len(),
        })? {
            RpcReply::Read(Ok(data)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                Ok(n)
            }
            RpcReply::Read(Err(errno)) => Err(Errno::from_raw(errno)),
            _ => Err(Errno::Eproto),
        }
    }

    fn write(&mut self, fd: i32, buf: &[u8]) -> VfsResult<usize> {
        match self.call(&RpcRequest::Write {
            fd,
            data: buf.to_vec(),
        })? {
            RpcReply::Write(Ok(n)) => Ok(n),
            RpcReply::Write(Err(errno)) => Err(Errno::from_raw(errno)),
            _ => Err(Errno::Eproto),
        }
    }

    fn stat(&mut self, subpath: &str, out: &mut FileStat) -> VfsResult<()> {
        match self.call(&RpcRequest::Stat {
            subpath: subpath.to_string(),
        })? {
            RpcReply::Stat(Ok((size, is_dir))) => {
                out.size = size;
                out.kind = Some(if is_dir {
                    FileKind::Directory
                } else {
                    FileKind::RegularFile
                });
                out.nlink = 1;
                Ok(())
            }
            RpcReply::Stat(Err(errno)) => Err(Errno::from_raw(errno)),
            _ => Err(Errno::Eproto),
        }
    }

    fn readdir(&mut self, subpath: &str) -> VfsResult<Vec<DirEntry>> {
        match self.call(&RpcRequest::Readdir {
            subpath: subpath.to_string(),
        })? {
            RpcReply::Readdir(Ok(entries)) => Ok(entries
                .into_iter()
                .map(|(name, is_dir)| DirEntry {
                    name,
                    kind: if is_dir {
                        FileKind::Directory
                    } else {
                        FileKind::RegularFile
                    },
                })
                .collect()),
            RpcReply::Readdir(Err(errno)) => Err(Errno::from_raw(errno)),
            _ => Err(Errno::Eproto),
        }
    }
}
