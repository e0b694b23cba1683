//! Read access to a whole archive.
//!
//! [`ZipArchive::open`] locates the EOCD and parses every central directory
//! record up front. Local headers are read on demand, and entry data is
//! streamed through [`compressed_stream`] and [`uncompressed_stream`].
//! Everything goes through `&self`, so entries can be read from several
//! threads at once when the source is `Sync`.

use crate::crc::{self, ChecksumReader};
use crate::eocd::EndOfCentralDirectory;
use crate::error::{ZipError, ZipResult};
use crate::fixed::{DATA_DESCRIPTOR_SIGNATURE, EOCD_SIGNATURE, LOCAL_FILE_HEADER_SIGNATURE};
use crate::record::{CentralDirectoryRecord, LocalRecord, ResolvedEntry};
use crate::source::ReadAt;
use crate::stream::{self, CompressedStream, UncompressedStream};
use std::fs::File;
use std::io;
use std::path::Path;
use tracing::{debug, info};

/// An opened archive
#[derive(Debug)]
pub struct ZipArchive<R> {
    source: R,
    eocd: EndOfCentralDirectory,
    entries: Vec<CentralDirectoryRecord>,
}

impl ZipArchive<File> {
    /// Open the archive at `path`
    pub fn open_path(path: impl AsRef<Path>) -> ZipResult<Self> {
        let path = path.as_ref();
        debug!("Opening archive {}", path.display());
        Self::open(File::open(path)?)
    }
}

impl<R: ReadAt> ZipArchive<R> {
    /// Locate the EOCD of `source` and parse its central directory
    pub fn open(source: R) -> ZipResult<Self> {
        let eocd = EndOfCentralDirectory::locate(&source)?;
        eocd.ensure_single_disk()?;

        let total = eocd.cd_total_records();
        let mut entries = Vec::with_capacity(usize::try_from(total.min(0x1_0000)).unwrap_or(0));
        let mut offset = eocd.cd_offset();
        for _ in 0..total {
            let record = CentralDirectoryRecord::read(&source, offset)?;
            offset = ZipError::region_end(
                "central directory file header",
                offset,
                record.header_len(),
            )?;
            entries.push(record);
        }

        info!(
            "Opened archive with {} entries, central directory at 0x{:08X}",
            entries.len(),
            eocd.cd_offset()
        );
        Ok(Self {
            source,
            eocd,
            entries,
        })
    }

    /// Whether `source` starts with a local header, EOCD or data descriptor
    /// signature. Sources shorter than four bytes are not archives.
    pub fn has_zip_signature(source: &R) -> ZipResult<bool> {
        let mut magic = [0u8; 4];
        match source.read_exact_at(&mut magic, 0) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(false),
            Err(err) => return Err(err.into()),
        }
        let magic = u32::from_le_bytes(magic);
        Ok([
            LOCAL_FILE_HEADER_SIGNATURE,
            EOCD_SIGNATURE,
            DATA_DESCRIPTOR_SIGNATURE,
        ]
        .contains(&magic))
    }

    /// Central directory records in directory order
    pub fn entries(&self) -> &[CentralDirectoryRecord] {
        &self.entries
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the archive has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// First entry with the decoded name `name`
    pub fn by_name(&self, name: &str) -> Option<&CentralDirectoryRecord> {
        self.entries.iter().find(|entry| entry.file_name == name)
    }

    /// End of central directory
    pub fn eocd(&self) -> &EndOfCentralDirectory {
        &self.eocd
    }

    /// Underlying source
    pub fn source(&self) -> &R {
        &self.source
    }

    /// Consume the archive, returning its source
    pub fn into_source(self) -> R {
        self.source
    }

    /// Read the local header of `central`
    pub fn local_record(&self, central: &CentralDirectoryRecord) -> ZipResult<LocalRecord> {
        central.read_local(&self.source)
    }

    /// Read the local header of `central` and pair the two
    pub fn resolve(&self, central: &CentralDirectoryRecord) -> ZipResult<ResolvedEntry> {
        Ok(self.local_record(central)?.resolve(central))
    }

    /// Stored bytes of `entry`
    pub fn compressed_stream(&self, entry: &ResolvedEntry) -> ZipResult<CompressedStream<&R>> {
        stream::compressed_stream(&self.source, entry)
    }

    /// Decompressed bytes of `entry`, guarded at its declared size
    pub fn uncompressed_stream(&self, entry: &ResolvedEntry) -> ZipResult<UncompressedStream<&R>> {
        stream::uncompressed_stream(&self.source, entry)
    }

    /// CRC32 of the central directory bytes as stored
    pub fn central_directory_crc32(&self) -> ZipResult<u32> {
        let start = self.eocd.cd_offset();
        let end = ZipError::region_end("central directory", start, self.eocd.cd_size())?;
        Ok(crc::crc32_range(&self.source, start, end)?)
    }

    /// Decompress `central` fully and check its CRC32 and size
    pub fn verify_entry(&self, central: &CentralDirectoryRecord) -> ZipResult<()> {
        let entry = self.resolve(central)?;
        let mut reader = ChecksumReader::new(self.uncompressed_stream(&entry)?);
        io::copy(&mut reader, &mut io::sink())?;

        if reader.length() != entry.uncompressed_size {
            return Err(ZipError::SizeMismatch {
                name: entry.file_name,
                expected: entry.uncompressed_size,
                actual: reader.length(),
            });
        }
        if reader.crc32() != entry.crc32 {
            return Err(ZipError::ChecksumMismatch {
                name: entry.file_name,
                expected: crc::to_hex(entry.crc32),
                actual: crc::to_hex(reader.crc32()),
            });
        }
        debug!("Verified {} ({} bytes)", entry.file_name, entry.uncompressed_size);
        Ok(())
    }
}
