//! Central directory and local file header records.
//!
//! Both record kinds share most of their fields. Each kind has a binrw
//! struct for its fixed-length body, and both go through [`read_record`],
//! which reads that body and then the variable-length tail (name, extra
//! fields and, for central records, the comment) in one more read. The
//! shared decoded fields live in [`FileRecord`].
//!
//! Local headers written with a data descriptor (flag bit 3) carry zero or
//! placeholder sizes and CRC. [`LocalRecord::resolve`] pairs a local header
//! with its central record so those values come from the central record.

use crate::cp437;
use crate::crc;
use crate::error::{ZipError, ZipResult};
use crate::extra_field::{ExtraFieldId, ExtraFields, Zip64ExtendedInfo, Zip64Sentinels, unicode_text};
use crate::fixed::{CENTRAL_FILE_HEADER_SIGNATURE, FixedRecord, LOCAL_FILE_HEADER_SIGNATURE};
use crate::source::ReadAt;
use crate::timestamp::{self, FileTimestamps};
use binrw::{BinRead, BinWrite};
use chrono::{DateTime, Utc};
use std::fmt;
use std::ops::Deref;
use tracing::trace;

/// Bytes of the traditional encryption header preceding encrypted data
pub const ENCRYPTION_HEADER_LEN: u64 = 12;

/// Compression method of an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompressionMethod {
    /// Stored without compression
    Store,
    /// Shrunk (LZW)
    Shrunk,
    /// Reduced with compression factor 1
    ReducedFactor1,
    /// Reduced with compression factor 2
    ReducedFactor2,
    /// Reduced with compression factor 3
    ReducedFactor3,
    /// Reduced with compression factor 4
    ReducedFactor4,
    /// Imploded
    Implode,
    /// Deflate
    Deflate,
    /// Enhanced deflate
    Deflate64,
    /// PKWARE data compression library implode
    PkwareImplode,
    /// BZIP2
    Bzip2,
    /// LZMA
    Lzma,
    /// IBM z/OS CMPSC
    IbmCmpsc,
    /// IBM TERSE
    IbmTerse,
    /// IBM LZ77 z Architecture
    IbmLz77,
    /// Zstandard under its pre-6.3.7 method id
    ZstdDeprecated,
    /// Zstandard
    Zstd,
    /// MP3
    Mp3,
    /// XZ
    Xz,
    /// JPEG variant
    JpegVariant,
    /// WavPack
    WavPack,
    /// PPMd version I, rev 1
    Ppmd,
    /// AE-x encryption marker
    AeX,
    /// Any other method id
    Unknown(u16),
}

impl From<u16> for CompressionMethod {
    fn from(value: u16) -> Self {
        match value {
            0 => Self::Store,
            1 => Self::Shrunk,
            2 => Self::ReducedFactor1,
            3 => Self::ReducedFactor2,
            4 => Self::ReducedFactor3,
            5 => Self::ReducedFactor4,
            6 => Self::Implode,
            8 => Self::Deflate,
            9 => Self::Deflate64,
            10 => Self::PkwareImplode,
            12 => Self::Bzip2,
            14 => Self::Lzma,
            16 => Self::IbmCmpsc,
            18 => Self::IbmTerse,
            19 => Self::IbmLz77,
            20 => Self::ZstdDeprecated,
            93 => Self::Zstd,
            94 => Self::Mp3,
            95 => Self::Xz,
            96 => Self::JpegVariant,
            97 => Self::WavPack,
            98 => Self::Ppmd,
            99 => Self::AeX,
            other => Self::Unknown(other),
        }
    }
}

impl CompressionMethod {
    /// Method id as stored
    pub const fn as_u16(self) -> u16 {
        match self {
            Self::Store => 0,
            Self::Shrunk => 1,
            Self::ReducedFactor1 => 2,
            Self::ReducedFactor2 => 3,
            Self::ReducedFactor3 => 4,
            Self::ReducedFactor4 => 5,
            Self::Implode => 6,
            Self::Deflate => 8,
            Self::Deflate64 => 9,
            Self::PkwareImplode => 10,
            Self::Bzip2 => 12,
            Self::Lzma => 14,
            Self::IbmCmpsc => 16,
            Self::IbmTerse => 18,
            Self::IbmLz77 => 19,
            Self::ZstdDeprecated => 20,
            Self::Zstd => 93,
            Self::Mp3 => 94,
            Self::Xz => 95,
            Self::JpegVariant => 96,
            Self::WavPack => 97,
            Self::Ppmd => 98,
            Self::AeX => 99,
            Self::Unknown(other) => other,
        }
    }
}

impl fmt::Display for CompressionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown(id) => write!(f, "unknown ({id})"),
            known => write!(f, "{known:?} ({})", known.as_u16()),
        }
    }
}

/// General purpose bit flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct GeneralPurposeFlags(pub u16);

impl GeneralPurposeFlags {
    /// Entry is encrypted
    pub const ENCRYPTED: u16 = 0x0001;
    /// Maximum compression was used
    pub const MAX_COMPRESSION: u16 = 0x0002;
    /// Sizes and CRC follow the data in a data descriptor
    pub const DATA_DESCRIPTOR: u16 = 0x0008;
    /// Name and comment are UTF-8
    pub const UTF8: u16 = 0x0800;

    /// Raw bits
    pub const fn bits(self) -> u16 {
        self.0
    }

    /// Whether every bit of `mask` is set
    pub const fn contains(self, mask: u16) -> bool {
        self.0 & mask == mask
    }
}

/// Fixed 30-byte body of a local file header
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[br(little)]
#[bw(little)]
pub struct LocalHeaderFixed {
    /// `PK\x03\x04`
    pub signature: u32,
    /// Version needed to extract
    pub version_needed: u16,
    /// General purpose bit flags
    pub flags: u16,
    /// Compression method id
    pub compression_method: u16,
    /// DOS modification time
    pub last_mod_time: u16,
    /// DOS modification date
    pub last_mod_date: u16,
    /// CRC32 of the uncompressed data
    pub crc32: u32,
    /// Compressed size, or sentinel
    pub compressed_size: u32,
    /// Uncompressed size, or sentinel
    pub uncompressed_size: u32,
    /// Length of the file name
    pub file_name_length: u16,
    /// Length of the extra field block
    pub extra_field_length: u16,
}

impl FixedRecord for LocalHeaderFixed {
    const NAME: &'static str = "local file header";
    const SIGNATURE: u32 = LOCAL_FILE_HEADER_SIGNATURE;
    const LEN: usize = 30;
}

/// Fixed 46-byte body of a central directory file header
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[br(little)]
#[bw(little)]
pub struct CentralHeaderFixed {
    /// `PK\x01\x02`
    pub signature: u32,
    /// Version made by
    pub version_made_by: u16,
    /// Version needed to extract
    pub version_needed: u16,
    /// General purpose bit flags
    pub flags: u16,
    /// Compression method id
    pub compression_method: u16,
    /// DOS modification time
    pub last_mod_time: u16,
    /// DOS modification date
    pub last_mod_date: u16,
    /// CRC32 of the uncompressed data
    pub crc32: u32,
    /// Compressed size, or sentinel
    pub compressed_size: u32,
    /// Uncompressed size, or sentinel
    pub uncompressed_size: u32,
    /// Length of the file name
    pub file_name_length: u16,
    /// Length of the extra field block
    pub extra_field_length: u16,
    /// Length of the file comment
    pub file_comment_length: u16,
    /// Disk holding the local header, or sentinel
    pub disk_start: u16,
    /// Internal file attributes
    pub internal_attributes: u16,
    /// External file attributes
    pub external_attributes: u32,
    /// Offset of the local header, or sentinel
    pub local_header_offset: u32,
}

impl FixedRecord for CentralHeaderFixed {
    const NAME: &'static str = "central directory file header";
    const SIGNATURE: u32 = CENTRAL_FILE_HEADER_SIGNATURE;
    const LEN: usize = 46;
}

/// Fields both record layouts share, in the order they share them
#[derive(Debug, Clone, Copy)]
struct CommonFields {
    version_needed: u16,
    flags: u16,
    compression_method: u16,
    last_mod_time: u16,
    last_mod_date: u16,
    crc32: u32,
    compressed_size: u32,
    uncompressed_size: u32,
}

/// Per-layout view used by [`read_record`]
trait RecordLayout: FixedRecord {
    fn common(&self) -> CommonFields;
    fn file_name_length(&self) -> usize;
    fn extra_field_length(&self) -> usize;
    fn trailing_length(&self) -> usize;
    fn zip64_sentinels(&self) -> Zip64Sentinels;
}

impl RecordLayout for LocalHeaderFixed {
    fn common(&self) -> CommonFields {
        CommonFields {
            version_needed: self.version_needed,
            flags: self.flags,
            compression_method: self.compression_method,
            last_mod_time: self.last_mod_time,
            last_mod_date: self.last_mod_date,
            crc32: self.crc32,
            compressed_size: self.compressed_size,
            uncompressed_size: self.uncompressed_size,
        }
    }

    fn file_name_length(&self) -> usize {
        usize::from(self.file_name_length)
    }

    fn extra_field_length(&self) -> usize {
        usize::from(self.extra_field_length)
    }

    fn trailing_length(&self) -> usize {
        0
    }

    fn zip64_sentinels(&self) -> Zip64Sentinels {
        Zip64Sentinels::local(self.uncompressed_size, self.compressed_size)
    }
}

impl RecordLayout for CentralHeaderFixed {
    fn common(&self) -> CommonFields {
        CommonFields {
            version_needed: self.version_needed,
            flags: self.flags,
            compression_method: self.compression_method,
            last_mod_time: self.last_mod_time,
            last_mod_date: self.last_mod_date,
            crc32: self.crc32,
            compressed_size: self.compressed_size,
            uncompressed_size: self.uncompressed_size,
        }
    }

    fn file_name_length(&self) -> usize {
        usize::from(self.file_name_length)
    }

    fn extra_field_length(&self) -> usize {
        usize::from(self.extra_field_length)
    }

    fn trailing_length(&self) -> usize {
        usize::from(self.file_comment_length)
    }

    fn zip64_sentinels(&self) -> Zip64Sentinels {
        Zip64Sentinels::central(
            self.uncompressed_size,
            self.compressed_size,
            self.local_header_offset,
            self.disk_start,
        )
    }
}

/// Decoded fields shared by central and local records
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// Record bytes exactly as stored, fixed body through variable tail
    pub raw: Vec<u8>,
    /// Version needed to extract
    pub version_needed: u16,
    /// General purpose bit flags
    pub flags: GeneralPurposeFlags,
    /// Compression method
    pub compression_method: CompressionMethod,
    /// DOS modification time
    pub last_mod_time: u16,
    /// DOS modification date
    pub last_mod_date: u16,
    /// CRC32 as stored
    pub crc32: u32,
    /// Compressed size as stored, possibly a sentinel
    pub compressed_size: u32,
    /// Uncompressed size as stored, possibly a sentinel
    pub uncompressed_size: u32,
    /// File name bytes as stored
    pub raw_file_name: Vec<u8>,
    /// Decoded file name
    pub file_name: String,
    /// Extra fields by id
    pub extra_fields: ExtraFields,
    /// Zip64 values for the sentineled fields, if a zip64 field is present
    pub zip64: Option<Zip64ExtendedInfo>,
}

impl FileRecord {
    /// Name and comment are UTF-8
    pub fn is_utf8(&self) -> bool {
        self.flags.contains(GeneralPurposeFlags::UTF8)
    }

    /// Data is encrypted and preceded by a 12-byte header
    pub fn is_encrypted(&self) -> bool {
        self.flags.contains(GeneralPurposeFlags::ENCRYPTED)
    }

    /// Sizes and CRC follow the data
    pub fn has_data_descriptor(&self) -> bool {
        self.flags.contains(GeneralPurposeFlags::DATA_DESCRIPTOR)
    }

    /// Directory entries end in `/`
    pub fn is_directory(&self) -> bool {
        self.file_name.ends_with('/')
    }

    /// CRC32 as eight lowercase hex digits
    pub fn crc32_hex(&self) -> String {
        crc::to_hex(self.crc32)
    }

    /// Compressed payload size, excluding any encryption header
    pub fn compressed_size_resolved(&self) -> u64 {
        let size = self
            .zip64
            .and_then(|z| z.compressed_size)
            .unwrap_or_else(|| u64::from(self.compressed_size));
        if self.is_encrypted() {
            size.saturating_sub(ENCRYPTION_HEADER_LEN)
        } else {
            size
        }
    }

    /// Uncompressed size
    pub fn uncompressed_size_resolved(&self) -> u64 {
        self.zip64
            .and_then(|z| z.uncompressed_size)
            .unwrap_or_else(|| u64::from(self.uncompressed_size))
    }

    /// Modified, accessed and created times
    pub fn timestamps(&self) -> FileTimestamps {
        timestamp::resolve(&self.extra_fields, self.last_mod_time, self.last_mod_date)
    }

    /// Modification time
    pub fn modified(&self) -> Option<DateTime<Utc>> {
        self.timestamps().modified
    }

    /// Length of the record in bytes
    pub fn header_len(&self) -> u64 {
        self.raw.len() as u64
    }
}

fn decode_text(raw: &[u8], unicode: Option<&[u8]>, utf8: bool) -> String {
    if let Some(text) = unicode.and_then(unicode_text) {
        return text;
    }
    if utf8 {
        String::from_utf8_lossy(raw).into_owned()
    } else {
        cp437::decode(raw)
    }
}

/// Read a fixed body of layout `L` at `offset`, then its variable tail
fn read_record<L, R>(source: &R, offset: u64) -> ZipResult<(L, FileRecord, Vec<u8>)>
where
    L: RecordLayout,
    for<'a> <L as BinRead>::Args<'a>: Default,
    R: ReadAt + ?Sized,
{
    let mut raw = vec![0u8; L::LEN];
    source
        .read_exact_at(&mut raw, offset)
        .map_err(|e| ZipError::truncated_or(L::NAME, offset, e))?;
    let fixed = L::decode(&raw, offset)?;

    let name_len = fixed.file_name_length();
    let extra_len = fixed.extra_field_length();
    let variable_len = name_len + extra_len + fixed.trailing_length();
    if variable_len > 0 {
        raw.resize(L::LEN + variable_len, 0);
        source
            .read_exact_at(&mut raw[L::LEN..], offset + L::LEN as u64)
            .map_err(|e| ZipError::truncated_or(L::NAME, offset, e))?;
    }

    let tail = &raw[L::LEN..];
    let raw_file_name = tail[..name_len].to_vec();
    let extra_fields = ExtraFields::parse(&tail[name_len..name_len + extra_len]);
    let trailing = tail[name_len + extra_len..].to_vec();

    let common = fixed.common();
    let flags = GeneralPurposeFlags(common.flags);
    let zip64 = extra_fields
        .get(ExtraFieldId::ZIP64)
        .and_then(|data| Zip64ExtendedInfo::parse(data, fixed.zip64_sentinels()));
    let file_name = decode_text(
        &raw_file_name,
        extra_fields.get(ExtraFieldId::UNICODE_PATH),
        flags.contains(GeneralPurposeFlags::UTF8),
    );

    trace!("Parsed {} for {:?} at 0x{:08X}", L::NAME, file_name, offset);
    let record = FileRecord {
        raw,
        version_needed: common.version_needed,
        flags,
        compression_method: CompressionMethod::from(common.compression_method),
        last_mod_time: common.last_mod_time,
        last_mod_date: common.last_mod_date,
        crc32: common.crc32,
        compressed_size: common.compressed_size,
        uncompressed_size: common.uncompressed_size,
        raw_file_name,
        file_name,
        extra_fields,
        zip64,
    };
    Ok((fixed, record, trailing))
}

/// A central directory file header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CentralDirectoryRecord {
    /// Shared record fields
    pub record: FileRecord,
    /// Absolute offset of this header
    pub offset: u64,
    /// Version made by
    pub version_made_by: u16,
    /// Disk holding the local header, possibly a sentinel
    pub disk_start: u16,
    /// Internal file attributes
    pub internal_attributes: u16,
    /// External file attributes
    pub external_attributes: u32,
    /// Local header offset, possibly a sentinel
    pub local_header_offset: u32,
    /// Comment bytes as stored
    pub raw_comment: Vec<u8>,
    /// Decoded comment
    pub comment: String,
}

impl CentralDirectoryRecord {
    /// Parse the central directory file header at `offset`
    pub fn read<R: ReadAt + ?Sized>(source: &R, offset: u64) -> ZipResult<Self> {
        let (fixed, record, raw_comment) = read_record::<CentralHeaderFixed, R>(source, offset)?;
        let comment = decode_text(
            &raw_comment,
            record.extra_fields.get(ExtraFieldId::UNICODE_COMMENT),
            record.is_utf8(),
        );
        Ok(Self {
            record,
            offset,
            version_made_by: fixed.version_made_by,
            disk_start: fixed.disk_start,
            internal_attributes: fixed.internal_attributes,
            external_attributes: fixed.external_attributes,
            local_header_offset: fixed.local_header_offset,
            raw_comment,
            comment,
        })
    }

    /// Offset of the local header
    pub fn local_header_offset_resolved(&self) -> u64 {
        self.record
            .zip64
            .and_then(|z| z.local_header_offset)
            .unwrap_or_else(|| u64::from(self.local_header_offset))
    }

    /// Disk holding the local header
    pub fn disk_start_resolved(&self) -> u32 {
        self.record
            .zip64
            .and_then(|z| z.disk_start)
            .unwrap_or_else(|| u32::from(self.disk_start))
    }

    /// Read the local header this record points at
    pub fn read_local<R: ReadAt + ?Sized>(&self, source: &R) -> ZipResult<LocalRecord> {
        LocalRecord::read(source, self.local_header_offset_resolved())
    }
}

impl Deref for CentralDirectoryRecord {
    type Target = FileRecord;

    fn deref(&self) -> &FileRecord {
        &self.record
    }
}

/// A local file header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalRecord {
    /// Shared record fields
    pub record: FileRecord,
    /// Absolute offset of this header
    pub header_offset: u64,
}

impl LocalRecord {
    /// Parse the local file header at `offset`
    pub fn read<R: ReadAt + ?Sized>(source: &R, offset: u64) -> ZipResult<Self> {
        let (_, record, _) = read_record::<LocalHeaderFixed, R>(source, offset)?;
        Ok(Self {
            record,
            header_offset: offset,
        })
    }

    /// Absolute offset of the compressed data, after any encryption header
    pub fn data_offset(&self) -> u64 {
        let offset = self.header_offset + self.record.header_len();
        if self.record.is_encrypted() {
            offset + ENCRYPTION_HEADER_LEN
        } else {
            offset
        }
    }

    /// Pair with the central record, taking sizes and CRC from it when this
    /// header deferred them to a data descriptor
    pub fn resolve(&self, central: &CentralDirectoryRecord) -> ResolvedEntry {
        let authority = if self.record.has_data_descriptor() {
            &central.record
        } else {
            &self.record
        };
        ResolvedEntry {
            file_name: self.record.file_name.clone(),
            compression_method: self.record.compression_method,
            encrypted: self.record.is_encrypted(),
            data_offset: self.data_offset(),
            crc32: authority.crc32,
            compressed_size: authority.compressed_size_resolved(),
            uncompressed_size: authority.uncompressed_size_resolved(),
        }
    }
}

impl Deref for LocalRecord {
    type Target = FileRecord;

    fn deref(&self) -> &FileRecord {
        &self.record
    }
}

/// Everything needed to stream one entry's data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEntry {
    /// Entry name
    pub file_name: String,
    /// Compression method
    pub compression_method: CompressionMethod,
    /// Data is encrypted
    pub encrypted: bool,
    /// Absolute offset of the compressed data
    pub data_offset: u64,
    /// Authoritative CRC32
    pub crc32: u32,
    /// Authoritative compressed size
    pub compressed_size: u64,
    /// Authoritative uncompressed size
    pub uncompressed_size: u64,
}
