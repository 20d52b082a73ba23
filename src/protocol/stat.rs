use chrono::{DateTime, Utc};

use crate::error::ProtocolError;

/// Size of an encoded [`Stat`] field.
pub const STAT_SIZE: usize = 80;

const S_IFMT: u32 = 0o170000;
const S_IFDIR: u32 = 0o040000;
const S_IFREG: u32 = 0o100000;

/// Snapshot of a remote file's metadata as returned by `GET_STAT`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Stat {
    pub dev: u64,
    pub ino: u64,
    pub mode: u32,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: i64,
    /// Seconds since the epoch
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
    pub blksize: i64,
    pub blocks: i64,
}

impl Stat {
    pub fn is_dir(&self) -> bool {
        self.mode & S_IFMT == S_IFDIR
    }

    pub fn is_file(&self) -> bool {
        self.mode & S_IFMT == S_IFREG
    }

    /// File length, treating a negative size as empty.
    pub fn len(&self) -> u64 {
        u64::try_from(self.size).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn accessed(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.atime, 0)
    }

    pub fn modified(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.mtime, 0)
    }

    pub fn changed(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.ctime, 0)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(STAT_SIZE);
        buf.extend_from_slice(&self.dev.to_be_bytes());
        buf.extend_from_slice(&self.ino.to_be_bytes());
        buf.extend_from_slice(&self.mode.to_be_bytes());
        buf.extend_from_slice(&self.nlink.to_be_bytes());
        buf.extend_from_slice(&self.uid.to_be_bytes());
        buf.extend_from_slice(&self.gid.to_be_bytes());
        for value in [
            self.size,
            self.atime,
            self.mtime,
            self.ctime,
            self.blksize,
            self.blocks,
        ] {
            buf.extend_from_slice(&value.to_be_bytes());
        }
        buf
    }

    pub fn decode(field: &[u8]) -> Result<Self, ProtocolError> {
        if field.len() != STAT_SIZE {
            return Err(ProtocolError::FieldWidth {
                expected: STAT_SIZE,
                actual: field.len(),
            });
        }
        let mut reader = FieldReader { buf: field, pos: 0 };
        Ok(Stat {
            dev: u64::from_be_bytes(reader.take()),
            ino: u64::from_be_bytes(reader.take()),
            mode: u32::from_be_bytes(reader.take()),
            nlink: u32::from_be_bytes(reader.take()),
            uid: u32::from_be_bytes(reader.take()),
            gid: u32::from_be_bytes(reader.take()),
            size: i64::from_be_bytes(reader.take()),
            atime: i64::from_be_bytes(reader.take()),
            mtime: i64::from_be_bytes(reader.take()),
            ctime: i64::from_be_bytes(reader.take()),
            blksize: i64::from_be_bytes(reader.take()),
            blocks: i64::from_be_bytes(reader.take()),
        })
    }
}

// caller has already checked the total width
struct FieldReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl FieldReader<'_> {
    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buf[self.pos..self.pos + N]);
        self.pos += N;
        out
    }
}
