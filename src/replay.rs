//! Binary append-only operation log, and the backend that replays one.
//!
//! Logging happens at the mount boundary, after permission checks succeed
//! and after the backend call returns — so the log is a transcript of
//! observed behavior, not of intent. Logging is best-effort: a failure to
//! write deactivates the session silently and never propagates to the
//! caller.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use zerocopy::byteorder::little_endian::{I32 as LeI32, U32 as LeU32, U64 as LeU64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::backend::{Backend, DirEntry, FileStat, OpenFlags};
use crate::error::{Errno, VfsResult};

const MAGIC: [u8; 8] = *b"NVIMRPL\0";
const VERSION: u32 = 1;
/// Longest path a replay record's fixed field can hold; longer paths are
/// truncated to fit, which is fine because replay only ever compares a
/// live path against the record's own stored (possibly truncated) path.
pub const PATH_MAX: usize = 256;

/// The six operations that can cross the mount boundary and be logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ReplayOp {
    /// `open`.
    Open = 1,
    /// `read`.
    Read = 2,
    /// `write`.
    Write = 3,
    /// `close`.
    Close = 4,
    /// `stat`.
    Stat = 5,
    /// `readdir`.
    Readdir = 6,
}

impl ReplayOp {
    fn from_u32(v: u32) -> Option<Self> {
        match v {
            1 => Some(ReplayOp::Open),
            2 => Some(ReplayOp::Read),
            3 => Some(ReplayOp::Write),
            4 => Some(ReplayOp::Close),
            5 => Some(ReplayOp::Stat),
            6 => Some(ReplayOp::Readdir),
            _ => None,
        }
    }
}

#[repr(C)]
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Debug, Clone, Copy)]
struct RawHeader {
    magic: [u8; 8],
    version: LeU32,
    session_id: LeU64,
    reserved: LeU64,
}

#[repr(C)]
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Debug, Clone, Copy)]
struct RawRecord {
    seq: LeU64,
    op: LeU32,
    fd: LeI32,
    path: [u8; PATH_MAX],
    offset: LeU64,
    size: LeU64,
    flags: LeU32,
    mode: LeU32,
    ret: LeI32,
    err: LeI32,
    data_len: LeU64,
}

/// A decoded record, plus the payload bytes (if any) that immediately
/// follow it in the stream.
#[derive(Debug, Clone)]
pub struct Record {
    /// Monotonic sequence number within the session.
    pub seq: u64,
    /// Which operation this record describes.
    pub op: ReplayOp,
    /// Synthetic descriptor, or `-1` when not applicable.
    pub fd: i32,
    /// The path argument, NUL-padding stripped.
    pub path: String,
    /// Read/write offset (0 when not applicable).
    pub offset: u64,
    /// Read/write size (0 when not applicable).
    pub size: u64,
    /// Open flags (0 when not applicable).
    pub flags: u32,
    /// Open mode (0 when not applicable).
    pub mode: u32,
    /// The return value observed from the real backend.
    pub ret: i32,
    /// 0 on success, else the positive errno observed.
    pub err: i32,
    /// Payload bytes (read result, write payload, or serialized stat).
    pub data: Vec<u8>,
}

fn path_field(path: &str) -> [u8; PATH_MAX] {
    let mut field = [0u8; PATH_MAX];
    let bytes = path.as_bytes();
    let n = bytes.len().min(PATH_MAX);
    field[..n].copy_from_slice(&bytes[..n]);
    field
}

fn path_from_field(field: &[u8; PATH_MAX]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(PATH_MAX);
    String::from_utf8_lossy(&field[..end]).into_owned()
}

/// A process-owned (not global) recording session. At most one can be
/// active through the owning [`crate::vfs::Vfs`] facade at a time.
#[derive(Debug)]
pub struct ReplaySession {
    file: File,
    session_id: u64,
    seq: u64,
    ops_logged: u64,
    bytes_logged: u64,
    disabled: bool,
}

impl ReplaySession {
    /// Start a new recording session, writing a fresh header.
    pub fn start(path: impl AsRef<Path>, session_id: u64) -> VfsResult<Self> {
        let mut file = File::create(path).map_err(|_| Errno::Eio)?;
        let header = RawHeader {
            magic: MAGIC,
            version: VERSION.into(),
            session_id: session_id.into(),
            reserved: 0.into(),
        };
        file.write_all(header.as_bytes()).map_err(|_| Errno::Eio)?;
        Ok(ReplaySession {
            file,
            session_id,
            seq: 0,
            ops_logged: 0,
            bytes_logged: 0,
            disabled: false,
        })
    }

    /// Session identifier assigned at start.
    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    /// Number of operations successfully appended so far.
    pub fn ops_logged(&self) -> u64 {
        self.ops_logged
    }

    /// Log one operation. Best-effort: on any I/O failure the session is
    /// silently disabled for the remainder of its lifetime and the caller
    /// is never told — logging must never perturb the call it's
    /// describing.
    #[allow(clippy::too_many_arguments)]
    pub fn log_operation(
        &mut self,
        op: ReplayOp,
        path: &str,
        fd: i32,
        offset: u64,
        size: u64,
        flags: u32,
        mode: u32,
        ret: i32,
        err: i32,
        data: &[u8],
    ) {
        if self.disabled {
            return;
        }
        let record = RawRecord {
            seq: self.seq.into(),
            op: (op as u32).into(),
            fd: fd.into(),
            path: path_field(path),
            offset: offset.into(),
            size: size.into(),
            flags: flags.into(),
            mode: mode.into(),
            ret: ret.into(),
            err: err.into(),
            data_len: (data.len() as u64).into(),
        };
        let wrote = self
            .file
            .write_all(record.as_bytes())
            .and_then(|()| self.file.write_all(data));
        if wrote.is_err() {
            self.disabled = true;
            return;
        }
        self.seq += 1;
        self.ops_logged += 1;
        self.bytes_logged += record.as_bytes().len() as u64 + data.len() as u64;
    }

    /// Flush and close the log file.
    pub fn stop(mut self) -> VfsResult<()> {
        self.file.flush().map_err(|_| Errno::Eio)
    }
}

/// A backend that replays a recorded log instead of touching real storage.
#[derive(Debug)]
pub struct ReplayBackend {
    file: File,
    ops_replayed: u64,
    mismatches: u64,
}

impl ReplayBackend {
    /// Open `log_path` for replay, verifying its header.
    pub fn open(log_path: impl AsRef<Path>) -> VfsResult<Self> {
        let mut file = File::open(log_path).map_err(|_| Errno::Eio)?;
        let mut header_bytes = [0u8; std::mem::size_of::<RawHeader>()];
        file.read_exact(&mut header_bytes).map_err(|_| Errno::Eio)?;
        let header =
            RawHeader::read_from_bytes(&header_bytes).map_err(|_| Errno::Eio)?;
        if header.magic != MAGIC || header.version.get() != VERSION {
            return Err(Errno::Eproto);
        }
        Ok(ReplayBackend {
            file,
            ops_replayed: 0,
            mismatches: 0,
        })
    }

    /// Seek back to just past the header so replay can be re-driven.
    pub fn reset(&mut self) -> VfsResult<()> {
        self.file
            .seek(SeekFrom::Start(std::mem::size_of::<RawHeader>() as u64))
            .map_err(|_| Errno::Eio)?;
        self.ops_replayed = 0;
        self.mismatches = 0;
        Ok(())
    }

    /// `(ops_replayed, mismatches)` counters, the signals the agent
    /// envelope uses to decide accept/reject.
    pub fn stats(&self) -> (u64, u64) {
        (self.ops_replayed, self.mismatches)
    }

    fn next_record(&mut self) -> VfsResult<Record> {
        let mut record_bytes = [0u8; std::mem::size_of::<RawRecord>()];
        self.file
            .read_exact(&mut record_bytes)
            .map_err(|_| Errno::Eio)?;
        let raw = RawRecord::read_from_bytes(&record_bytes).map_err(|_| Errno::Eio)?;
        let mut data = vec![0u8; raw.data_len.get() as usize];
        if !data.is_empty() {
            self.file.read_exact(&mut data).map_err(|_| Errno::Eio)?;
        }
        Ok(Record {
            seq: raw.seq.get(),
            op: ReplayOp::from_u32(raw.op.get()).ok_or(Errno::Eproto)?,
            fd: raw.fd.get(),
            path: path_from_field(&raw.path),
            offset: raw.offset.get(),
            size: raw.size.get(),
            flags: raw.flags.get(),
            mode: raw.mode.get(),
            ret: raw.ret.get(),
            err: raw.err.get(),
            data,
        })
    }

    /// Verify the next record matches the live call's op (and, when
    /// applicable, path) before handing it back. Path comparison is
    /// skipped for ops whose live call carries no path argument (read,
    /// write, close operate on an fd only) — matching spec.md §4.4c's
    /// "verify the path (when applicable)".
    fn verify_and_advance(&mut self, op: ReplayOp, path: Option<&str>) -> VfsResult<Record> {
        let record = self.next_record()?;
        let path_ok = path.is_none_or(|p| record.path == p);
        if record.op != op || !path_ok {
            self.mismatches += 1;
            return Err(Errno::Eacces);
        }
        self.ops_replayed += 1;
        Ok(record)
    }
}

impl Backend for ReplayBackend {
    fn open(&mut self, subpath: &str, _flags: OpenFlags, _mode: u32) -> VfsResult<i32> {
        let record = self.verify_and_advance(ReplayOp::Open, Some(subpath))?;
        if record.ret < 0 {
            return Err(Errno::from_raw(record.err));
        }
        Ok(record.ret)
    }

    fn close(&mut self, _fd: i32) -> VfsResult<()> {
        let record = self.verify_and_advance(ReplayOp::Close, None)?;
        if record.ret < 0 {
            return Err(Errno::from_raw(record.err));
        }
        Ok(())
    }

    fn read(&mut self, _fd: i32, buf: &mut [u8]) -> VfsResult<usize> {
        let record = self.verify_and_advance(ReplayOp::Read, None)?;
        if record.ret < 0 {
            return Err(Errno::from_raw(record.err));
        }
        let n = record.data.len().min(buf.len());
        buf[..n].copy_from_slice(&record.data[..n]);
        Ok(record.ret as usize)
    }

    fn write(&mut self, _fd: i32, buf: &[u8]) -> VfsResult<usize> {
        let record = self.verify_and_advance(ReplayOp::Write, None)?;
        // Op and fd matching isn't enough to certify determinism for a
        // write: the payload itself must match what was originally
        // committed, or a callback that writes different bytes on the
        // second pass would replay clean.
        if record.data != buf {
            self.mismatches += 1;
            return Err(Errno::Eacces);
        }
        if record.ret < 0 {
            return Err(Errno::from_raw(record.err));
        }
        Ok(record.ret as usize)
    }

    fn stat(&mut self, subpath: &str, out: &mut FileStat) -> VfsResult<()> {
        let record = self.verify_and_advance(ReplayOp::Stat, Some(subpath))?;
        if record.ret < 0 {
            return Err(Errno::from_raw(record.err));
        }
        if record.data.len() >= std::mem::size_of::<u64>() {
            out.size = u64::from_le_bytes(record.data[0..8].try_into().unwrap());
        }
        Ok(())
    }

    fn readdir(&mut self, subpath: &str) -> VfsResult<Vec<DirEntry>> {
        let record = self.verify_and_advance(ReplayOp::Readdir, Some(subpath))?;
        if record.ret < 0 {
            return Err(Errno::from_raw(record.err));
        }
        // Entry lists are not recorded (the reference backend is
        // deterministic on entries given an identical preceding trace);
        // replay only certifies that the call itself matched.
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn round_trip_open_write_close_read() {
        let tmp = NamedTempFile::new().unwrap();
        let path = tmp.path();

        let mut session = ReplaySession::start(path, 42).unwrap();
        session.log_operation(ReplayOp::Open, "/a", 3, 0, 0, 0, 0, 3, 0, &[]);
        session.log_operation(ReplayOp::Write, "/a", 3, 0, 11, 0, 0, 11, 0, b"hello world");
        session.log_operation(ReplayOp::Close, "/a", 3, 0, 0, 0, 0, 0, 0, &[]);
        assert_eq!(session.ops_logged(), 3);
        session.stop().unwrap();

        let mut replay = ReplayBackend::open(path).unwrap();
        assert_eq!(replay.open("/a", OpenFlags::READ, 0).unwrap(), 3);
        assert_eq!(replay.write(3, b"hello world").unwrap(), 11);
        replay.close(3).unwrap();
        let (ops, mismatches) = replay.stats();
        assert_eq!(ops, 3);
        assert_eq!(mismatches, 0);
    }

    #[test]
    fn write_payload_mismatch_increments_mismatch_counter() {
        let tmp = NamedTempFile::new().unwrap();
        let path = tmp.path();
        let mut session = ReplaySession::start(path, 1).unwrap();
        session.log_operation(ReplayOp::Open, "/a", 3, 0, 0, 0, 0, 3, 0, &[]);
        session.log_operation(ReplayOp::Write, "/a", 3, 0, 5, 0, 0, 5, 0, b"first");
        session.stop().unwrap();

        let mut replay = ReplayBackend::open(path).unwrap();
        replay.open("/a", OpenFlags::READ, 0).unwrap();
        let err = replay.write(3, b"other").unwrap_err();
        assert_eq!(err, Errno::Eacces);
        assert_eq!(replay.stats().1, 1);
    }

    #[test]
    fn path_mismatch_increments_mismatch_counter() {
        let tmp = NamedTempFile::new().unwrap();
        let path = tmp.path();
        let mut session = ReplaySession::start(path, 1).unwrap();
        session.log_operation(ReplayOp::Open, "/expected", 3, 0, 0, 0, 0, 3, 0, &[]);
        session.stop().unwrap();

        let mut replay = ReplayBackend::open(path).unwrap();
        let err = replay.open("/other", OpenFlags::READ, 0).unwrap_err();
        assert_eq!(err, Errno::Eacces);
        assert_eq!(replay.stats().1, 1);
    }
}
