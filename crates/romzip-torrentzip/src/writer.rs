//! Deterministic TorrentZip and RVZSTD archive writer.
//!
//! Entries are appended one at a time. For each entry the writer lays down a
//! placeholder local header at the cursor, streams the source through CRC32
//! and size tracking into the compressor, writes the compressed bytes
//! straight after the placeholder, then patches the header in place once
//! the CRC32 and sizes are known. Nothing is buffered beyond the channel
//! between the async reader and the blocking compressor.
//!
//! Callers must add entries in ascending case-insensitive name order; the
//! writer does not sort. [`finalize`](TorrentZipWriter::finalize) is the only
//! step that writes the central directory, so an archive abandoned earlier
//! has no EOCD and is never mistaken for a complete one.

use crate::config::WriterConfig;
use crate::error::{TorrentZipError, TorrentZipResult};
use crate::header::{
    self, EncodedName, EntryValues, ZIP64_THRESHOLD, needs_zip64_entry, needs_zip64_eocd,
};
use crate::method::{TorrentZipMethod, deflate_backend};
use flate2::Compression;
use flate2::write::DeflateEncoder;
use romzip_formats::WriteAt;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tracing::{debug, info, trace};

/// A local header as finally written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenHeader {
    /// Offset of the local header
    pub position: u64,
    /// CRC32 of the uncompressed data
    pub crc32: u32,
    /// Compressed size
    pub compressed_size: u64,
    /// Uncompressed size
    pub uncompressed_size: u64,
    /// Whether the header carries zip64 fields
    pub zip64: bool,
    /// Header bytes
    pub raw: Vec<u8>,
}

/// Writer for one TorrentZip or RVZSTD archive
#[derive(Debug)]
pub struct TorrentZipWriter<W: WriteAt = File> {
    sink: Arc<W>,
    method: TorrentZipMethod,
    config: WriterConfig,
    cursor: u64,
    headers: Vec<WrittenHeader>,
    poisoned: bool,
}

impl TorrentZipWriter<File> {
    /// Create or truncate the archive at `path`
    pub async fn open(path: impl AsRef<Path>, method: TorrentZipMethod) -> TorrentZipResult<Self> {
        Self::open_with_config(path, method, WriterConfig::default()).await
    }

    /// Create or truncate the archive at `path` with explicit tuning
    pub async fn open_with_config(
        path: impl AsRef<Path>,
        method: TorrentZipMethod,
        config: WriterConfig,
    ) -> TorrentZipResult<Self> {
        let path = path.as_ref();
        let file = tokio::fs::File::create(path).await?.into_std().await;
        debug!("Created {} archive {}", method, path.display());
        Self::new(Arc::new(file), method, config)
    }
}

impl<W> TorrentZipWriter<W>
where
    W: WriteAt + Send + Sync + 'static,
{
    /// Write into `sink`, which should be empty
    pub fn new(sink: Arc<W>, method: TorrentZipMethod, config: WriterConfig) -> TorrentZipResult<Self> {
        config.validate()?;
        if method == TorrentZipMethod::Deflate {
            debug!("Deflating with {} backend", deflate_backend());
        }
        Ok(Self {
            sink,
            method,
            config,
            cursor: 0,
            headers: Vec::new(),
            poisoned: false,
        })
    }

    /// Archive method
    pub fn method(&self) -> TorrentZipMethod {
        self.method
    }

    /// Local headers written so far
    pub fn headers(&self) -> &[WrittenHeader] {
        &self.headers
    }

    /// Offset the next local header will be written at
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Whether an earlier failure ruled out finalizing
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Compress `reader` into a new entry named `filename`.
    ///
    /// `size_hint` decides up front whether the entry gets zip64 fields; a
    /// source that turns out to need them without having been hinted is an
    /// error. `compressor_threads` is the zstd worker count.
    pub async fn add_stream<S>(
        &mut self,
        reader: S,
        filename: &str,
        size_hint: u64,
        compressor_threads: usize,
    ) -> TorrentZipResult<()>
    where
        S: AsyncRead + Unpin,
    {
        if self.poisoned {
            return Err(TorrentZipError::Poisoned);
        }
        let name = EncodedName::new(filename)?;

        let result = self
            .write_entry(reader, &name, size_hint, compressor_threads.max(1))
            .await;
        if let Err(err) = &result {
            if err.is_poisoning() {
                self.poisoned = true;
            }
        }
        result
    }

    async fn write_entry<S>(
        &mut self,
        mut reader: S,
        name: &EncodedName,
        size_hint: u64,
        threads: usize,
    ) -> TorrentZipResult<()>
    where
        S: AsyncRead + Unpin,
    {
        let position = self.cursor;
        let zip64 = needs_zip64_entry(size_hint, position);
        let placeholder = header::local_header(
            self.method,
            name,
            EntryValues {
                crc32: 0,
                compressed_size: 0,
                uncompressed_size: 0,
                offset: position,
                zip64,
            },
        )?;
        let data_offset = position + placeholder.len() as u64;

        let (tx, rx) = mpsc::channel::<Vec<u8>>(self.config.queue_depth);
        let sink = Arc::clone(&self.sink);
        let method = self.method;
        let chunk_size = self.config.chunk_size;
        let compressor = tokio::task::spawn_blocking(move || -> io::Result<u64> {
            sink.write_all_at(&placeholder, position)?;
            let out = PositionedWriter::new(sink, data_offset);
            compress(method, threads, chunk_size, rx, out)
        });

        let pumped = pump(&mut reader, chunk_size, tx).await;
        let compressed = compressor.await?;
        let (crc32, uncompressed_size) = pumped?;
        let compressed_size = compressed?;

        if !zip64 && uncompressed_size >= ZIP64_THRESHOLD {
            return Err(TorrentZipError::SizeMismatch {
                name: name.name.clone(),
                hint: size_hint,
                actual: uncompressed_size,
            });
        }

        let raw = header::local_header(
            self.method,
            name,
            EntryValues {
                crc32,
                compressed_size,
                uncompressed_size,
                offset: position,
                zip64,
            },
        )?;
        let sink = Arc::clone(&self.sink);
        let patch = raw.clone();
        tokio::task::spawn_blocking(move || sink.write_all_at(&patch, position)).await??;

        debug!(
            "Wrote {} at 0x{:08X}: {} -> {} bytes, crc {:08x}{}",
            name.name,
            position,
            uncompressed_size,
            compressed_size,
            crc32,
            if zip64 { " (zip64)" } else { "" }
        );
        self.cursor = data_offset + compressed_size;
        self.headers.push(WrittenHeader {
            position,
            crc32,
            compressed_size,
            uncompressed_size,
            zip64,
            raw,
        });
        Ok(())
    }

    /// Write the central directory and EOCD, then sync the sink.
    ///
    /// Returns the EOCD comment.
    pub async fn finalize(self) -> TorrentZipResult<String> {
        if self.poisoned {
            return Err(TorrentZipError::Poisoned);
        }

        let cd_offset = self.cursor;
        let mut tail = Vec::new();
        for written in &self.headers {
            tail.extend(header::central_header(&written.raw, written.position)?);
        }
        let cd_size = tail.len() as u64;
        let comment = self.method.comment(crc32fast::hash(&tail));

        let entries = self.headers.len() as u64;
        let any_zip64 = self.headers.iter().any(|written| written.zip64);
        if needs_zip64_eocd(entries, cd_size, cd_offset, any_zip64) {
            tail.extend(header::zip64_end_records(entries, cd_size, cd_offset)?);
        }
        tail.extend(header::end_of_central_directory(
            entries, cd_size, cd_offset, &comment,
        )?);

        let sink = Arc::clone(&self.sink);
        tokio::task::spawn_blocking(move || {
            sink.write_all_at(&tail, cd_offset)?;
            sink.sync()
        })
        .await??;

        info!(
            "Finalized {} archive with {} entries ({})",
            self.method, entries, comment
        );
        Ok(comment)
    }

    /// Abandon the archive without writing a central directory
    pub async fn close(self) -> TorrentZipResult<()> {
        debug!(
            "Closing writer after {} entries without finalizing",
            self.headers.len()
        );
        let sink = Arc::clone(&self.sink);
        tokio::task::spawn_blocking(move || sink.sync()).await??;
        Ok(())
    }
}

/// Read `reader` to the end in `chunk_size` pieces, hashing as it goes and
/// handing each piece to the compressor. Stops early if the compressor has
/// gone away; its own error is the one worth reporting.
async fn pump<S>(
    reader: &mut S,
    chunk_size: usize,
    tx: mpsc::Sender<Vec<u8>>,
) -> TorrentZipResult<(u32, u64)>
where
    S: AsyncRead + Unpin,
{
    let mut hasher = crc32fast::Hasher::new();
    let mut total = 0u64;
    loop {
        let mut chunk = vec![0u8; chunk_size];
        let read = reader.read(&mut chunk).await?;
        if read == 0 {
            break;
        }
        chunk.truncate(read);
        hasher.update(&chunk);
        total += read as u64;
        trace!("Queued {} bytes for compression", read);
        if tx.send(chunk).await.is_err() {
            break;
        }
    }
    Ok((hasher.finalize(), total))
}

/// Compress everything received on `rx` into `out`, returning the
/// compressed size
fn compress<W: WriteAt>(
    method: TorrentZipMethod,
    threads: usize,
    buffer_size: usize,
    mut rx: mpsc::Receiver<Vec<u8>>,
    out: PositionedWriter<W>,
) -> io::Result<u64> {
    let mut counted = CountingWriter::new(BufWriter::with_capacity(buffer_size, out));
    match method {
        TorrentZipMethod::Deflate => {
            let mut encoder = DeflateEncoder::new(
                &mut counted,
                Compression::new(TorrentZipMethod::DEFLATE_LEVEL),
            );
            while let Some(chunk) = rx.blocking_recv() {
                encoder.write_all(&chunk)?;
            }
            encoder.finish()?;
        }
        TorrentZipMethod::Zstd => {
            let mut encoder =
                zstd::stream::write::Encoder::new(&mut counted, TorrentZipMethod::ZSTD_LEVEL)?;
            // Worker mode is fixed so the frame does not depend on the count
            encoder.multithread(u32::try_from(threads).unwrap_or(u32::MAX))?;
            while let Some(chunk) = rx.blocking_recv() {
                encoder.write_all(&chunk)?;
            }
            encoder.finish()?;
        }
    }
    counted.flush()?;
    Ok(counted.count)
}

/// [`Write`] adapter appending to a [`WriteAt`] sink from a fixed offset
struct PositionedWriter<W> {
    sink: Arc<W>,
    offset: u64,
}

impl<W: WriteAt> PositionedWriter<W> {
    fn new(sink: Arc<W>, offset: u64) -> Self {
        Self { sink, offset }
    }
}

impl<W: WriteAt> Write for PositionedWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.sink.write_all_at(buf, self.offset)?;
        self.offset += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Counts bytes written through it
struct CountingWriter<W> {
    inner: W,
    count: u64,
}

impl<W> CountingWriter<W> {
    fn new(inner: W) -> Self {
        Self { inner, count: 0 }
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.count += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
