//! Heap file header.
//!
//! Page 0 of a heap file starts with a fixed 100-byte block describing the
//! records stored in the data pages that follow:
//!
//! | bytes  | field          |
//! |--------|----------------|
//! | 0..16  | magic          |
//! | 16..20 | page size      |
//! | 20..24 | page count     |
//! | 24..28 | record width   |
//! | 28..36 | live records   |
//!
//! Integers are big-endian. The remaining bytes are zero.

use std::io::{self, Read, Write};

pub const MAGIC: &[u8; 16] = b"relq-heap\0\0\0\0\0\0\0";

pub const DEFAULT_PAGE_SIZE: u32 = relq_types::PAGE_SIZE as u32;

pub const HEADER_SIZE: usize = 100;

/// Record layout and occupancy of one heap file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub page_size: u32,
    /// Pages in the file, page 0 included.
    pub page_count: u32,
    /// Encoded width of every record in the table.
    pub record_size: u32,
    /// Records written so far; bumped on every insert.
    pub record_count: u64,
}

impl Default for FileHeader {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            page_count: 1,
            record_size: 0,
            record_count: 0,
        }
    }
}

impl FileHeader {
    /// Write the header block into the first [`HEADER_SIZE`] bytes of `buf`.
    pub fn serialize(&self, buf: &mut [u8]) -> io::Result<()> {
        if buf.len() < HEADER_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "buffer too small for header",
            ));
        }
        buf[..HEADER_SIZE].fill(0);

        buf[0..16].copy_from_slice(MAGIC);
        buf[16..20].copy_from_slice(&self.page_size.to_be_bytes());
        buf[20..24].copy_from_slice(&self.page_count.to_be_bytes());
        buf[24..28].copy_from_slice(&self.record_size.to_be_bytes());
        buf[28..36].copy_from_slice(&self.record_count.to_be_bytes());
        Ok(())
    }

    /// `None` when `buf` is short or is not a relq heap file.
    pub fn deserialize(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        if &buf[0..16] != MAGIC.as_slice() {
            return None;
        }
        Some(Self {
            page_size: u32::from_be_bytes(buf[16..20].try_into().ok()?),
            page_count: u32::from_be_bytes(buf[20..24].try_into().ok()?),
            record_size: u32::from_be_bytes(buf[24..28].try_into().ok()?),
            record_count: u64::from_be_bytes(buf[28..36].try_into().ok()?),
        })
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        let mut buf = [0u8; HEADER_SIZE];
        self.serialize(&mut buf)?;
        writer.write_all(&buf)
    }

    pub fn read_from<R: Read>(reader: &mut R) -> io::Result<Self> {
        let mut buf = [0u8; HEADER_SIZE];
        reader.read_exact(&mut buf)?;
        Self::deserialize(&buf).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidData, "not a relq heap file")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_header_survives_serialization() {
        let header = FileHeader::default();
        let mut buf = [0u8; HEADER_SIZE];
        header.serialize(&mut buf).unwrap();
        assert_eq!(FileHeader::deserialize(&buf), Some(header));
    }

    #[test]
    fn record_fields_survive_serialization() {
        let header = FileHeader {
            page_size: 4096,
            page_count: 42,
            record_size: 14,
            record_count: 11_000,
        };
        let mut out = Vec::new();
        header.write_to(&mut out).unwrap();
        assert_eq!(out.len(), HEADER_SIZE);
        let decoded = FileHeader::read_from(&mut out.as_slice()).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn record_fields_sit_at_documented_offsets() {
        let header = FileHeader {
            record_size: 14,
            record_count: 289,
            ..FileHeader::default()
        };
        let mut buf = [0xffu8; HEADER_SIZE];
        header.serialize(&mut buf).unwrap();
        assert_eq!(&buf[0..16], MAGIC);
        assert_eq!(buf[24..28], 14u32.to_be_bytes());
        assert_eq!(buf[28..36], 289u64.to_be_bytes());
        assert!(buf[36..].iter().all(|&b| b == 0));
    }

    #[test]
    fn bad_magic_returns_none() {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(b"bad!");
        assert!(FileHeader::deserialize(&buf).is_none());
    }

    #[test]
    fn short_buffers_are_rejected() {
        assert!(FileHeader::deserialize(&[0u8; 10]).is_none());
        let mut small = [0u8; 10];
        assert!(FileHeader::default().serialize(&mut small).is_err());
    }
}
