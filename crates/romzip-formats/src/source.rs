//! Positioned byte sources and sinks.
//!
//! Archives are read through [`ReadAt`] instead of [`std::io::Read`] so that
//! parsing never needs `&mut` access to the underlying handle. Several
//! entries of one archive can then be streamed at the same time, each with
//! its own [`RangeReader`].

use parking_lot::Mutex;
use std::fs::File;
use std::io::{self, Read};
use std::sync::Arc;

/// Random-access byte source
pub trait ReadAt {
    /// Read up to `buf.len()` bytes starting at `offset`, returning how many
    /// were read. Zero means end of source.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize>;

    /// Total size of the source in bytes
    fn size(&self) -> io::Result<u64>;

    /// Fill `buf` completely from `offset` or fail with `UnexpectedEof`
    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let read = self.read_at(&mut buf[filled..], offset + filled as u64)?;
            if read == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "failed to fill whole buffer",
                ));
            }
            filled += read;
        }
        Ok(())
    }
}

/// Random-access byte sink
pub trait WriteAt {
    /// Write all of `buf` starting at `offset`
    fn write_all_at(&self, buf: &[u8], offset: u64) -> io::Result<()>;

    /// Flush buffered data to the backing store
    fn sync(&self) -> io::Result<()> {
        Ok(())
    }
}

impl ReadAt for File {
    #[cfg(unix)]
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        std::os::unix::fs::FileExt::read_at(self, buf, offset)
    }

    #[cfg(windows)]
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        std::os::windows::fs::FileExt::seek_read(self, buf, offset)
    }

    fn size(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }
}

impl WriteAt for File {
    #[cfg(unix)]
    fn write_all_at(&self, buf: &[u8], offset: u64) -> io::Result<()> {
        std::os::unix::fs::FileExt::write_all_at(self, buf, offset)
    }

    #[cfg(windows)]
    fn write_all_at(&self, mut buf: &[u8], mut offset: u64) -> io::Result<()> {
        while !buf.is_empty() {
            let written = std::os::windows::fs::FileExt::seek_write(self, buf, offset)?;
            if written == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "failed to write whole buffer",
                ));
            }
            buf = &buf[written..];
            offset += written as u64;
        }
        Ok(())
    }

    fn sync(&self) -> io::Result<()> {
        self.sync_all()
    }
}

impl ReadAt for [u8] {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let Ok(start) = usize::try_from(offset) else {
            return Ok(0);
        };
        if start >= self.len() {
            return Ok(0);
        }
        let count = buf.len().min(self.len() - start);
        buf[..count].copy_from_slice(&self[start..start + count]);
        Ok(count)
    }

    fn size(&self) -> io::Result<u64> {
        Ok(self.len() as u64)
    }
}

impl ReadAt for Vec<u8> {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        self.as_slice().read_at(buf, offset)
    }

    fn size(&self) -> io::Result<u64> {
        Ok(self.len() as u64)
    }
}

impl<T: ReadAt + ?Sized> ReadAt for &T {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        (**self).read_at(buf, offset)
    }

    fn size(&self) -> io::Result<u64> {
        (**self).size()
    }
}

impl<T: ReadAt + ?Sized> ReadAt for Arc<T> {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        (**self).read_at(buf, offset)
    }

    fn size(&self) -> io::Result<u64> {
        (**self).size()
    }
}

impl<T: WriteAt + ?Sized> WriteAt for Arc<T> {
    fn write_all_at(&self, buf: &[u8], offset: u64) -> io::Result<()> {
        (**self).write_all_at(buf, offset)
    }

    fn sync(&self) -> io::Result<()> {
        (**self).sync()
    }
}

/// In-memory sink, grows to fit positioned writes
impl WriteAt for Mutex<Vec<u8>> {
    fn write_all_at(&self, buf: &[u8], offset: u64) -> io::Result<()> {
        let start = usize::try_from(offset)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "offset overflows usize"))?;
        let end = start + buf.len();
        let mut data = self.lock();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(buf);
        Ok(())
    }
}

impl ReadAt for Mutex<Vec<u8>> {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        self.lock().as_slice().read_at(buf, offset)
    }

    fn size(&self) -> io::Result<u64> {
        Ok(self.lock().len() as u64)
    }
}

/// [`Read`] adapter over `[start, end)` of a [`ReadAt`] source
#[derive(Debug)]
pub struct RangeReader<R> {
    source: R,
    position: u64,
    end: u64,
}

impl<R: ReadAt> RangeReader<R> {
    /// Create a reader over `[start, end)`
    pub fn new(source: R, start: u64, end: u64) -> Self {
        Self {
            source,
            position: start,
            end: end.max(start),
        }
    }

    /// Bytes not yet read
    pub fn remaining(&self) -> u64 {
        self.end - self.position
    }
}

impl<R: ReadAt> Read for RangeReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.remaining();
        if remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let want = buf.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
        let read = self.source.read_at(&mut buf[..want], self.position)?;
        if read == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "source ended before the declared range",
            ));
        }
        self.position += read as u64;
        Ok(read)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_slice_read_at_clamps_to_end() {
        let data = b"abcdef".to_vec();
        let mut buf = [0u8; 4];
        assert_eq!(data.read_at(&mut buf, 4).expect("read"), 2);
        assert_eq!(&buf[..2], b"ef");
        assert_eq!(data.read_at(&mut buf, 10).expect("read"), 0);
    }

    #[test]
    fn test_read_exact_at_reports_eof() {
        let data = b"abc".to_vec();
        let mut buf = [0u8; 4];
        let err = data.read_exact_at(&mut buf, 0).expect_err("should be short");
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_range_reader_stops_at_end() {
        let data = b"0123456789".to_vec();
        let mut reader = RangeReader::new(&data, 2, 6);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).expect("read range");
        assert_eq!(out, b"2345");
    }

    #[test]
    fn test_range_reader_past_source_is_eof() {
        let data = b"0123".to_vec();
        let mut reader = RangeReader::new(&data, 2, 8);
        let mut out = Vec::new();
        let err = reader.read_to_end(&mut out).expect_err("source is short");
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_mutex_sink_grows_and_overwrites() {
        let sink = Mutex::new(Vec::new());
        sink.write_all_at(b"zzzz", 2).expect("write");
        sink.write_all_at(b"ab", 0).expect("write");
        sink.write_all_at(b"Z", 5).expect("write");
        assert_eq!(sink.lock().as_slice(), b"abzzzZ");
    }

    #[test]
    fn test_file_positioned_io() {
        let file = tempfile::tempfile().expect("temp file");
        file.write_all_at(b"hello world", 0).expect("write");
        file.write_all_at(b"W", 6).expect("patch");
        let mut buf = [0u8; 5];
        file.read_exact_at(&mut buf, 6).expect("read back");
        assert_eq!(&buf, b"World");
        assert_eq!(ReadAt::size(&file).expect("size"), 11);
    }
}
