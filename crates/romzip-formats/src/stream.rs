//! Entry data streams.
//!
//! [`compressed_stream`] is a positioned read over an entry's stored bytes.
//! [`uncompressed_stream`] layers the entry's decoder on top and wraps the
//! result in a [`ZipBombGuard`] sized to the declared uncompressed size, so
//! a crafted entry cannot expand past what its header claims.

use crate::error::{ZipBombError, ZipError, ZipResult};
use crate::record::{CompressionMethod, ResolvedEntry};
use crate::source::{RangeReader, ReadAt};
use flate2::read::DeflateDecoder;
use std::io::{self, BufReader, Read};
use tracing::warn;

/// Stored bytes of one entry
#[derive(Debug)]
pub enum CompressedStream<R> {
    /// Zero-length entry; the source is never touched
    Empty,
    /// Bytes `[data_offset, data_offset + compressed_size)`
    Range(RangeReader<R>),
}

impl<R: ReadAt> Read for CompressedStream<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Empty => Ok(0),
            Self::Range(reader) => reader.read(buf),
        }
    }
}

/// Open the stored bytes of `entry`
pub fn compressed_stream<R: ReadAt>(
    source: R,
    entry: &ResolvedEntry,
) -> ZipResult<CompressedStream<R>> {
    if entry.compressed_size == 0 {
        return Ok(CompressedStream::Empty);
    }
    let end = ZipError::region_end("entry data", entry.data_offset, entry.compressed_size)?;
    Ok(CompressedStream::Range(RangeReader::new(
        source,
        entry.data_offset,
        end,
    )))
}

/// Decoder selected by compression method
pub enum Decoder<R: Read> {
    /// Pass-through
    Store(R),
    /// Raw deflate
    Deflate(DeflateDecoder<R>),
    /// Zstandard
    Zstd(zstd::stream::read::Decoder<'static, BufReader<R>>),
}

impl<R: Read> Decoder<R> {
    /// Build the decoder for `method` over `inner`
    pub fn new(method: CompressionMethod, inner: R) -> ZipResult<Self> {
        match method {
            CompressionMethod::Store => Ok(Self::Store(inner)),
            CompressionMethod::Deflate => Ok(Self::Deflate(DeflateDecoder::new(inner))),
            CompressionMethod::Zstd | CompressionMethod::ZstdDeprecated => {
                Ok(Self::Zstd(zstd::stream::read::Decoder::new(inner)?))
            }
            CompressionMethod::Shrunk
            | CompressionMethod::ReducedFactor1
            | CompressionMethod::ReducedFactor2
            | CompressionMethod::ReducedFactor3
            | CompressionMethod::ReducedFactor4
            | CompressionMethod::Implode
            | CompressionMethod::Deflate64
            | CompressionMethod::PkwareImplode
            | CompressionMethod::Bzip2
            | CompressionMethod::Lzma
            | CompressionMethod::IbmCmpsc
            | CompressionMethod::IbmTerse
            | CompressionMethod::IbmLz77
            | CompressionMethod::Mp3
            | CompressionMethod::Xz
            | CompressionMethod::JpegVariant
            | CompressionMethod::WavPack
            | CompressionMethod::Ppmd
            | CompressionMethod::AeX
            | CompressionMethod::Unknown(_) => Err(ZipError::UnsupportedCompression(method)),
        }
    }
}

impl<R: Read> Read for Decoder<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Store(inner) => inner.read(buf),
            Self::Deflate(inner) => inner.read(buf),
            Self::Zstd(inner) => inner.read(buf),
        }
    }
}

/// Fails a read once more than `limit` bytes have come through.
///
/// Each read asks the inner reader for at most one byte past the limit, so
/// the overflow is detected without ever handing excess bytes to the caller.
#[derive(Debug)]
pub struct ZipBombGuard<R> {
    inner: R,
    limit: u64,
    produced: u64,
}

impl<R: Read> ZipBombGuard<R> {
    /// Guard `inner` at `limit` bytes
    pub fn new(inner: R, limit: u64) -> Self {
        Self {
            inner,
            limit,
            produced: 0,
        }
    }

    /// Bytes handed out so far
    pub fn produced(&self) -> u64 {
        self.produced
    }
}

impl<R: Read> Read for ZipBombGuard<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let allowance = (self.limit - self.produced).saturating_add(1);
        let want = buf
            .len()
            .min(usize::try_from(allowance).unwrap_or(usize::MAX));
        let read = self.inner.read(&mut buf[..want])?;
        let produced = self.produced + read as u64;
        if produced > self.limit {
            warn!(
                "Decompressed output exceeded declared size of {} bytes",
                self.limit
            );
            return Err(ZipBombError {
                limit: self.limit,
                produced,
            }
            .into());
        }
        self.produced = produced;
        Ok(read)
    }
}

/// Decompressed bytes of one entry
pub type UncompressedStream<R> = ZipBombGuard<Decoder<CompressedStream<R>>>;

/// Open the decompressed bytes of `entry`
pub fn uncompressed_stream<R: ReadAt>(
    source: R,
    entry: &ResolvedEntry,
) -> ZipResult<UncompressedStream<R>> {
    if entry.encrypted {
        return Err(ZipError::EncryptedEntry(entry.file_name.clone()));
    }
    let compressed = compressed_stream(source, entry)?;
    let decoder = if matches!(compressed, CompressedStream::Empty) {
        // Nothing to decode; keep the method check for unsupported entries
        Decoder::new(entry.compression_method, io::empty())?;
        Decoder::Store(compressed)
    } else {
        Decoder::new(entry.compression_method, compressed)?
    };
    Ok(ZipBombGuard::new(decoder, entry.uncompressed_size))
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::DeflateEncoder;
    use std::io::Write;

    fn entry(method: CompressionMethod, offset: u64, compressed: u64, uncompressed: u64) -> ResolvedEntry {
        ResolvedEntry {
            file_name: "test.rom".to_string(),
            compression_method: method,
            encrypted: false,
            data_offset: offset,
            crc32: 0,
            compressed_size: compressed,
            uncompressed_size: uncompressed,
        }
    }

    fn deflate(data: &[u8]) -> Vec<u8> {
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::best());
        encoder.write_all(data).expect("compress");
        encoder.finish().expect("finish")
    }

    /// Source that fails every read
    struct Untouchable;

    impl ReadAt for Untouchable {
        fn read_at(&self, _: &mut [u8], _: u64) -> io::Result<usize> {
            Err(io::Error::other("source was read"))
        }

        fn size(&self) -> io::Result<u64> {
            Err(io::Error::other("source was read"))
        }
    }

    #[test]
    fn test_compressed_range() {
        let data = b"headerPAYLOADtrailer".to_vec();
        let mut stream =
            compressed_stream(&data, &entry(CompressionMethod::Store, 6, 7, 7)).expect("range");
        let mut out = Vec::new();
        stream.read_to_end(&mut out).expect("read");
        assert_eq!(out, b"PAYLOAD");
    }

    #[test]
    fn test_empty_entry_does_not_touch_source() {
        let empty = entry(CompressionMethod::Deflate, 99, 0, 0);
        let mut out = Vec::new();
        compressed_stream(Untouchable, &empty)
            .expect("open")
            .read_to_end(&mut out)
            .expect("empty compressed stream");
        uncompressed_stream(Untouchable, &empty)
            .expect("open")
            .read_to_end(&mut out)
            .expect("empty uncompressed stream");
        assert!(out.is_empty());
    }

    #[test]
    fn test_deflate_round_trip() {
        let payload = b"the quick brown fox jumps over the lazy dog".repeat(20);
        let compressed = deflate(&payload);
        let e = entry(
            CompressionMethod::Deflate,
            0,
            compressed.len() as u64,
            payload.len() as u64,
        );
        let mut out = Vec::new();
        uncompressed_stream(&compressed, &e)
            .expect("open")
            .read_to_end(&mut out)
            .expect("inflate");
        assert_eq!(out, payload);
    }

    #[test]
    fn test_zstd_round_trip() {
        let payload = b"zstandard payload ".repeat(100);
        let compressed = zstd::encode_all(&payload[..], 3).expect("zstd");
        for method in [CompressionMethod::Zstd, CompressionMethod::ZstdDeprecated] {
            let e = entry(method, 0, compressed.len() as u64, payload.len() as u64);
            let mut out = Vec::new();
            uncompressed_stream(&compressed, &e)
                .expect("open")
                .read_to_end(&mut out)
                .expect("decompress");
            assert_eq!(out, payload);
        }
    }

    #[test]
    fn test_zip_bomb_trips_before_eleventh_byte() {
        let payload = vec![0u8; 1_000_000];
        let compressed = deflate(&payload);
        let e = entry(CompressionMethod::Deflate, 0, compressed.len() as u64, 10);
        let mut stream = uncompressed_stream(&compressed, &e).expect("open");

        let mut delivered = 0u64;
        let mut buf = [0u8; 4096];
        let err = loop {
            match stream.read(&mut buf) {
                Ok(0) => panic!("stream ended without tripping the guard"),
                Ok(n) => delivered += n as u64,
                Err(err) => break err,
            }
        };
        assert!(delivered <= 10);
        assert!(ZipError::from(err).is_zip_bomb());
    }

    #[test]
    fn test_guard_allows_exact_size() {
        let mut guard = ZipBombGuard::new(&b"0123456789"[..], 10);
        let mut out = Vec::new();
        guard.read_to_end(&mut out).expect("exact size is fine");
        assert_eq!(guard.produced(), 10);
    }

    #[test]
    fn test_unsupported_and_encrypted() {
        let data = vec![0u8; 8];
        let err = uncompressed_stream(&data, &entry(CompressionMethod::Bzip2, 0, 8, 8))
            .err()
            .expect("bzip2 unsupported");
        assert!(matches!(
            err,
            ZipError::UnsupportedCompression(CompressionMethod::Bzip2)
        ));

        let mut encrypted = entry(CompressionMethod::Store, 0, 8, 8);
        encrypted.encrypted = true;
        let err = uncompressed_stream(&data, &encrypted)
            .err()
            .expect("encrypted");
        assert!(err.is_unsupported());
    }

    #[test]
    fn test_range_past_u64_is_format_error() {
        let data = vec![0u8; 64];
        let huge = entry(CompressionMethod::Store, 40, u64::MAX, u64::MAX);
        let err = compressed_stream(&data, &huge).err().expect("overflow");
        assert!(matches!(
            err,
            ZipError::OutOfRange {
                offset: 40,
                length: u64::MAX,
                ..
            }
        ));
        assert!(err.is_format_error());
        assert!(uncompressed_stream(&data, &huge).err().expect("overflow").is_format_error());
    }
}
