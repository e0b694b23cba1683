//! TorrentZip and RVZSTD conformance checks.
//!
//! An archive is conformant when every byte of it is what
//! [`TorrentZipWriter`](crate::TorrentZipWriter) would have written for the
//! same entries: canonical EOCD and comment, canonical headers, names in
//! order and no bytes between or around the entries.
//!
//! Validation only fails with an error when the archive cannot be located
//! at all (no EOCD, or I/O failure). Anything past that point is reported
//! as [`ValidationOutcome::Invalid`] with the first [`InvalidReason`] found.

use crate::header::{ZIP64_EOCD_VERSION, ZIP64_THRESHOLD};
use crate::method::{RVZSTD_PREFIX, TORRENTZIP_PREFIX, TorrentZipMethod};
use romzip_formats::extra_field::ExtraFieldId;
use romzip_formats::record::{FileRecord, GeneralPurposeFlags};
use romzip_formats::{
    CentralDirectoryRecord, CompressionMethod, LocalRecord, ReadAt, ZipArchive, ZipError,
    ZipResult, crc,
};
use std::fmt;
use std::fs::File;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};

const SENTINEL: u32 = u32::MAX;

/// Classification of an archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    /// Conformant TorrentZip (deflate)
    TorrentZip,
    /// Conformant RVZSTD (zstd)
    RvZstd,
    /// Not conformant
    Invalid(InvalidReason),
}

impl ValidationOutcome {
    /// Whether the archive is conformant
    pub fn is_valid(&self) -> bool {
        !matches!(self, Self::Invalid(_))
    }

    /// Method of a conformant archive
    pub fn method(&self) -> Option<TorrentZipMethod> {
        match self {
            Self::TorrentZip => Some(TorrentZipMethod::Deflate),
            Self::RvZstd => Some(TorrentZipMethod::Zstd),
            Self::Invalid(_) => None,
        }
    }

    /// Stable label for reports
    pub fn label(&self) -> &'static str {
        match self {
            Self::TorrentZip => "VALID_TORRENTZIP",
            Self::RvZstd => "VALID_RVZSTD",
            Self::Invalid(_) => "INVALID",
        }
    }

    fn valid(method: TorrentZipMethod) -> Self {
        match method {
            TorrentZipMethod::Deflate => Self::TorrentZip,
            TorrentZipMethod::Zstd => Self::RvZstd,
        }
    }
}

impl fmt::Display for ValidationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invalid(reason) => write!(f, "INVALID ({reason})"),
            valid => f.write_str(valid.label()),
        }
    }
}

/// Which copy of an entry's header a check looked at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// Central directory file header
    Central,
    /// Local file header
    Local,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Central => f.write_str("central header"),
            Self::Local => f.write_str("local header"),
        }
    }
}

/// First reason an archive was found not conformant
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidReason {
    /// Archive structure past the EOCD could not be parsed
    #[error("unreadable archive: {0}")]
    Unreadable(String),

    /// Archive spans disks
    #[error("archive spans several disks")]
    MultiDisk,

    /// Per-disk and total record counts differ
    #[error("record count on disk ({disk}) differs from total ({total})")]
    RecordCountMismatch {
        /// Records on this disk
        disk: u64,
        /// Records in total
        total: u64,
    },

    /// EOCD comment is not a TorrentZip or RVZSTD comment
    #[error("archive comment {0:?} is not a TorrentZip or RVZSTD comment")]
    Comment(String),

    /// EOCD comment does not carry the central directory CRC32
    #[error("archive comment {found:?} does not match central directory, expected {expected:?}")]
    CommentCrc {
        /// Comment as stored
        found: String,
        /// Comment the central directory calls for
        expected: String,
    },

    /// Zip64 EOCD record is not canonical
    #[error("zip64 end of central directory record: {0}")]
    Zip64Record(&'static str),

    /// Entry uses another method than the archive
    #[error("{name}: compression method {method} does not belong in this archive")]
    Method {
        /// Entry name
        name: String,
        /// Method found
        method: CompressionMethod,
    },

    /// A fixed header field has the wrong value
    #[error("{name}: {record} {field} is {found:#x}, expected {expected:#x}")]
    Field {
        /// Entry name
        name: String,
        /// Header checked
        record: RecordKind,
        /// Field name
        field: &'static str,
        /// Value found
        found: u64,
        /// Value required
        expected: u64,
    },

    /// A sentineled field has no zip64 value
    #[error("{name}: {record} {field} is clamped without a zip64 value")]
    MissingZip64 {
        /// Entry name
        name: String,
        /// Header checked
        record: RecordKind,
        /// Field name
        field: &'static str,
    },

    /// One size is clamped and the other is not
    #[error("{name}: {record} sizes are not clamped together")]
    PartialClamp {
        /// Entry name
        name: String,
        /// Header checked
        record: RecordKind,
    },

    /// An extra field other than zip64 is present
    #[error("{name}: {record} carries extra field {id:#06x}")]
    ExtraField {
        /// Entry name
        name: String,
        /// Header checked
        record: RecordKind,
        /// Extra field id
        id: u16,
    },

    /// Entry has a file comment
    #[error("{0}: entry has a file comment")]
    FileComment(String),

    /// Name contains a backslash
    #[error("{0}: name contains a backslash")]
    Backslash(String),

    /// Names are not in ascending case-insensitive order
    #[error("{name} sorts before {previous}")]
    NotSorted {
        /// Entry before it in the central directory
        previous: String,
        /// Offending entry
        name: String,
    },

    /// Local header could not be read
    #[error("{name}: local header unreadable: {reason}")]
    LocalHeader {
        /// Entry name
        name: String,
        /// Parse failure
        reason: String,
    },

    /// Local and central headers disagree
    #[error("{name}: local and central {field} differ")]
    LocalMismatch {
        /// Entry name
        name: String,
        /// Field that differs
        field: &'static str,
    },

    /// Bytes between one entry and the next, or an encryption header
    #[error("{name}: local header at {found:#x}, expected {expected:#x}")]
    Gap {
        /// Entry name
        name: String,
        /// Where the header should start
        expected: u64,
        /// Where it starts
        found: u64,
    },

    /// Declared entry size runs past the addressable range
    #[error("{name}: {size} bytes at {offset:#x} overflow the archive offset")]
    SizeOverflow {
        /// Entry name
        name: String,
        /// Local header offset
        offset: u64,
        /// Declared compressed size
        size: u64,
    },

    /// Bytes between the last entry and the central directory
    #[error("central directory at {cd_offset:#x}, entries end at {expected:#x}")]
    TrailingGap {
        /// Where the entries end
        expected: u64,
        /// Where the central directory starts
        cd_offset: u64,
    },
}

type Check = Result<(), InvalidReason>;

/// Validate the archive at `path`
pub fn validate_path(path: impl AsRef<Path>) -> ZipResult<ValidationOutcome> {
    validate(File::open(path)?)
}

/// Validate the archive in `source`.
///
/// Fails only when no EOCD can be found or the source cannot be read.
pub fn validate<R: ReadAt>(source: R) -> ZipResult<ValidationOutcome> {
    match ZipArchive::open(source) {
        Ok(archive) => validate_archive(&archive),
        Err(err @ (ZipError::EocdNotFound { .. } | ZipError::Io(_))) => Err(err),
        Err(ZipError::MultiDisk { .. }) => Ok(reject(InvalidReason::MultiDisk)),
        Err(err) => Ok(reject(InvalidReason::Unreadable(err.to_string()))),
    }
}

/// Validate an opened archive
pub fn validate_archive<R: ReadAt>(archive: &ZipArchive<R>) -> ZipResult<ValidationOutcome> {
    let method = match check_end_records(archive) {
        Ok(method) => method,
        Err(reason) => return Ok(reject(reason)),
    };
    if let Err(reason) = check_central_directory(archive, method) {
        return Ok(reject(reason));
    }
    if let Err(reason) = check_comment_crc(archive, method)? {
        return Ok(reject(reason));
    }
    if let Err(reason) = check_local_headers(archive, method) {
        return Ok(reject(reason));
    }

    let outcome = ValidationOutcome::valid(method);
    debug!("Archive with {} entries is {}", archive.len(), outcome);
    Ok(outcome)
}

fn reject(reason: InvalidReason) -> ValidationOutcome {
    warn!("Archive is not conformant: {}", reason);
    ValidationOutcome::Invalid(reason)
}

fn check_end_records<R: ReadAt>(archive: &ZipArchive<R>) -> Result<TorrentZipMethod, InvalidReason> {
    let eocd = archive.eocd();
    if eocd.disk_number() != 0 || eocd.cd_disk_start() != 0 {
        return Err(InvalidReason::MultiDisk);
    }
    if eocd.cd_disk_records() != eocd.cd_total_records() {
        return Err(InvalidReason::RecordCountMismatch {
            disk: eocd.cd_disk_records(),
            total: eocd.cd_total_records(),
        });
    }

    let comment = &eocd.comment;
    let method = if comment.len() == TORRENTZIP_PREFIX.len() + 8 && comment.starts_with(TORRENTZIP_PREFIX)
    {
        TorrentZipMethod::Deflate
    } else if comment.len() == RVZSTD_PREFIX.len() + 8 && comment.starts_with(RVZSTD_PREFIX) {
        TorrentZipMethod::Zstd
    } else {
        return Err(InvalidReason::Comment(comment.clone()));
    };
    if crc::from_hex(&comment[method.comment_prefix().len()..]).is_none() {
        return Err(InvalidReason::Comment(comment.clone()));
    }

    if let Some(record) = &eocd.zip64_record {
        if record.disk_number != 0 || record.cd_disk_start != 0 {
            return Err(InvalidReason::Zip64Record("disk fields are not zero"));
        }
        if record.cd_disk_records != record.cd_total_records {
            return Err(InvalidReason::Zip64Record("record counts differ"));
        }
        if record.comment_length() != 0 || !eocd.zip64_comment.is_empty() {
            return Err(InvalidReason::Zip64Record("extensible data present"));
        }
        if record.version_made_by != ZIP64_EOCD_VERSION || record.version_needed != ZIP64_EOCD_VERSION {
            return Err(InvalidReason::Zip64Record("versions are not 45"));
        }
    }
    Ok(method)
}

fn check_central_directory<R: ReadAt>(archive: &ZipArchive<R>, method: TorrentZipMethod) -> Check {
    let mut previous: Option<(String, &str)> = None;
    for central in archive.entries() {
        let name = &central.file_name;
        check_common(central, method, RecordKind::Central)?;

        let field = |field: &'static str, found: u64, expected: u64| {
            if found == expected {
                Ok(())
            } else {
                Err(InvalidReason::Field {
                    name: name.clone(),
                    record: RecordKind::Central,
                    field,
                    found,
                    expected,
                })
            }
        };
        field("version made by", u64::from(central.version_made_by), 0)?;
        field("disk start", u64::from(central.disk_start_resolved()), 0)?;
        field("internal attributes", u64::from(central.internal_attributes), 0)?;
        field("external attributes", u64::from(central.external_attributes), 0)?;

        if central.local_header_offset == SENTINEL
            && central.zip64.and_then(|z| z.local_header_offset).is_none()
        {
            return Err(InvalidReason::MissingZip64 {
                name: name.clone(),
                record: RecordKind::Central,
                field: "local header offset",
            });
        }
        if !central.raw_comment.is_empty() {
            return Err(InvalidReason::FileComment(name.clone()));
        }
        if name.contains('\\') {
            return Err(InvalidReason::Backslash(name.clone()));
        }

        let folded = name.to_lowercase();
        if let Some((previous_folded, previous_name)) = &previous {
            if folded < *previous_folded {
                return Err(InvalidReason::NotSorted {
                    previous: (*previous_name).to_string(),
                    name: name.clone(),
                });
            }
        }
        previous = Some((folded, name.as_str()));
    }
    Ok(())
}

/// Checks shared by central and local headers
fn check_common(record: &FileRecord, method: TorrentZipMethod, kind: RecordKind) -> Check {
    let name = &record.file_name;
    if TorrentZipMethod::from_compression_method(record.compression_method) != Some(method) {
        return Err(InvalidReason::Method {
            name: name.clone(),
            method: record.compression_method,
        });
    }

    let field = |field: &'static str, found: u64, expected: u64| {
        if found == expected {
            Ok(())
        } else {
            Err(InvalidReason::Field {
                name: name.clone(),
                record: kind,
                field,
                found,
                expected,
            })
        }
    };
    let has_zip64 = record.zip64.is_some();
    field(
        "version needed",
        u64::from(record.version_needed),
        u64::from(method.version_needed(has_zip64)),
    )?;

    let flags = record.flags.bits();
    let utf8 = flags & GeneralPurposeFlags::UTF8;
    field(
        "flags",
        u64::from(flags),
        u64::from(GeneralPurposeFlags::MAX_COMPRESSION | utf8),
    )?;

    let (time, date) = method.dos_time_date();
    field("modification time", u64::from(record.last_mod_time), u64::from(time))?;
    field("modification date", u64::from(record.last_mod_date), u64::from(date))?;

    if let Some(id) = record.extra_fields.ids().find(|&id| id != ExtraFieldId::ZIP64) {
        return Err(InvalidReason::ExtraField {
            name: name.clone(),
            record: kind,
            id: id.as_u16(),
        });
    }

    let compressed_clamped = record.compressed_size == SENTINEL;
    let uncompressed_clamped = record.uncompressed_size == SENTINEL;
    if compressed_clamped != uncompressed_clamped {
        return Err(InvalidReason::PartialClamp {
            name: name.clone(),
            record: kind,
        });
    }
    let zip64 = record.zip64.unwrap_or_default();
    if compressed_clamped && zip64.compressed_size.is_none() {
        return Err(InvalidReason::MissingZip64 {
            name: name.clone(),
            record: kind,
            field: "compressed size",
        });
    }
    if uncompressed_clamped && zip64.uncompressed_size.is_none() {
        return Err(InvalidReason::MissingZip64 {
            name: name.clone(),
            record: kind,
            field: "uncompressed size",
        });
    }
    Ok(())
}

fn check_comment_crc<R: ReadAt>(
    archive: &ZipArchive<R>,
    method: TorrentZipMethod,
) -> ZipResult<Check> {
    let eocd = archive.eocd();
    let headers_len: u64 = archive.entries().iter().map(|c| c.header_len()).sum();
    if headers_len != eocd.cd_size() {
        return Ok(Err(InvalidReason::Field {
            name: String::new(),
            record: RecordKind::Central,
            field: "central directory size",
            found: eocd.cd_size(),
            expected: headers_len,
        }));
    }

    let expected = method.comment(archive.central_directory_crc32()?);
    if eocd.comment == expected {
        Ok(Ok(()))
    } else {
        Ok(Err(InvalidReason::CommentCrc {
            found: eocd.comment.clone(),
            expected,
        }))
    }
}

fn check_local_headers<R: ReadAt>(archive: &ZipArchive<R>, method: TorrentZipMethod) -> Check {
    let mut expected_offset = 0u64;
    for central in archive.entries() {
        let name = &central.file_name;
        let local = archive
            .local_record(central)
            .map_err(|err| InvalidReason::LocalHeader {
                name: name.clone(),
                reason: err.to_string(),
            })?;

        if local.data_offset() != local.header_offset + local.header_len() {
            return Err(InvalidReason::LocalMismatch {
                name: name.clone(),
                field: "data offset",
            });
        }
        if local.header_offset != expected_offset {
            return Err(InvalidReason::Gap {
                name: name.clone(),
                expected: expected_offset,
                found: local.header_offset,
            });
        }
        let size = central.compressed_size_resolved();
        expected_offset = expected_offset
            .checked_add(local.header_len())
            .and_then(|end| end.checked_add(size))
            .ok_or_else(|| InvalidReason::SizeOverflow {
                name: name.clone(),
                offset: local.header_offset,
                size,
            })?;

        check_common(&local, method, RecordKind::Local)?;
        check_local_matches_central(&local, central, method)?;
    }

    let cd_offset = archive.eocd().cd_offset();
    if expected_offset != cd_offset {
        return Err(InvalidReason::TrailingGap {
            expected: expected_offset,
            cd_offset,
        });
    }
    Ok(())
}

fn check_local_matches_central(
    local: &LocalRecord,
    central: &CentralDirectoryRecord,
    method: TorrentZipMethod,
) -> Check {
    let mismatch = |field: &'static str| InvalidReason::LocalMismatch {
        name: central.file_name.clone(),
        field,
    };
    if local.crc32 != central.crc32 {
        return Err(mismatch("crc32"));
    }
    if local.raw_file_name != central.raw_file_name {
        return Err(mismatch("file name"));
    }

    let local_zip64 = local.zip64.unwrap_or_default();
    let central_zip64 = central.zip64.unwrap_or_default();
    let sizes = [
        (
            "compressed size",
            local.compressed_size,
            local_zip64.compressed_size,
            central.compressed_size,
            central_zip64.compressed_size,
        ),
        (
            "uncompressed size",
            local.uncompressed_size,
            local_zip64.uncompressed_size,
            central.uncompressed_size,
            central_zip64.uncompressed_size,
        ),
    ];
    for (field, local_base, local_wide, central_base, central_wide) in sizes {
        let agrees = match method {
            TorrentZipMethod::Deflate => local_base == central_base && local_wide == central_wide,
            TorrentZipMethod::Zstd => {
                sizes_agree_loosely(local_base, local_wide, central_base, central_wide)
            }
        };
        if !agrees {
            return Err(mismatch(field));
        }
    }
    Ok(())
}

/// RVZSTD tools may write a zip64 value in one header only. A wide local
/// value must match the central zip64 value, a narrow one the central base
/// field, and an unclamped local base field must match the central base.
fn sizes_agree_loosely(
    local_base: u32,
    local_wide: Option<u64>,
    central_base: u32,
    central_wide: Option<u64>,
) -> bool {
    if let Some(wide) = local_wide {
        let agrees = if wide >= ZIP64_THRESHOLD {
            Some(wide) == central_wide
        } else {
            wide == u64::from(central_base)
        };
        if !agrees {
            return false;
        }
    }
    local_base == SENTINEL || local_base == central_base
}
