//! CRC32 (IEEE) helpers

use crate::source::ReadAt;
use std::io::{self, Read};

const RANGE_CHUNK: usize = 64 * 1024;

/// CRC32 of a buffer
pub fn crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// Eight lowercase hex digits, as stored on records
pub fn to_hex(crc: u32) -> String {
    hex::encode(crc.to_be_bytes())
}

/// Eight uppercase hex digits, as embedded in TorrentZip comments
pub fn to_hex_upper(crc: u32) -> String {
    hex::encode_upper(crc.to_be_bytes())
}

/// Parse eight hex digits of either case
pub fn from_hex(text: &str) -> Option<u32> {
    let mut bytes = [0u8; 4];
    hex::decode_to_slice(text, &mut bytes).ok()?;
    Some(u32::from_be_bytes(bytes))
}

/// CRC32 over `[start, end)` of a positioned source
pub fn crc32_range<R: ReadAt + ?Sized>(source: &R, start: u64, end: u64) -> io::Result<u32> {
    let mut hasher = crc32fast::Hasher::new();
    let mut buf = vec![0u8; RANGE_CHUNK];
    let mut position = start;
    while position < end {
        let want = usize::try_from(end - position).map_or(RANGE_CHUNK, |n| n.min(RANGE_CHUNK));
        source.read_exact_at(&mut buf[..want], position)?;
        hasher.update(&buf[..want]);
        position += want as u64;
    }
    Ok(hasher.finalize())
}

/// Pass-through reader that tracks the CRC32 and length of what it yields
#[derive(Debug)]
pub struct ChecksumReader<R> {
    inner: R,
    hasher: crc32fast::Hasher,
    length: u64,
}

impl<R: Read> ChecksumReader<R> {
    /// Wrap `inner`
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: crc32fast::Hasher::new(),
            length: 0,
        }
    }

    /// CRC32 of everything read so far
    pub fn crc32(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    /// Bytes read so far
    pub fn length(&self) -> u64 {
        self.length
    }
}

impl<R: Read> Read for ChecksumReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let read = self.inner.read(buf)?;
        self.hasher.update(&buf[..read]);
        self.length += read as u64;
        Ok(read)
    }
}
