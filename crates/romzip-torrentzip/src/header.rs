//! Byte-exact header construction.
//!
//! Every field of every structure written here is a function of the entry
//! name, its CRC32 and sizes, its offset and the archive method. Nothing
//! depends on the clock, the host or the order of compression work, which
//! is what makes two runs over the same input produce the same bytes.

use crate::error::{TorrentZipError, TorrentZipResult};
use crate::method::TorrentZipMethod;
use romzip_formats::cp437;
use romzip_formats::eocd::{EocdRecord, Zip64EocdRecord, Zip64Locator};
use romzip_formats::extra_field::Zip64ExtendedInfo;
use romzip_formats::fixed::{
    CENTRAL_FILE_HEADER_SIGNATURE, EOCD_SIGNATURE, FixedRecord, LOCAL_FILE_HEADER_SIGNATURE,
    ZIP64_EOCD_SIGNATURE, ZIP64_LOCATOR_SIGNATURE,
};
use romzip_formats::record::{CentralHeaderFixed, GeneralPurposeFlags, LocalHeaderFixed};

/// Sizes and offsets at or above this value need zip64 fields
pub const ZIP64_THRESHOLD: u64 = 0xFFFF_FFFF;

/// Entry counts above this value need a zip64 EOCD record
pub const MAX_CLASSIC_ENTRIES: u64 = 0xFFFF;

/// Version made by and needed in the zip64 EOCD record
pub const ZIP64_EOCD_VERSION: u16 = 45;

const SIZE_SENTINEL: u32 = u32::MAX;

/// File name as it will be stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedName {
    /// Name as given
    pub name: String,
    /// Stored bytes
    pub bytes: Vec<u8>,
    /// Stored as UTF-8 because CP437 cannot represent it
    pub utf8: bool,
}

impl EncodedName {
    /// Encode `name` as CP437 where possible, UTF-8 otherwise
    pub fn new(name: &str) -> TorrentZipResult<Self> {
        let (bytes, utf8) = match cp437::encode(name) {
            Some(bytes) => (bytes, false),
            None => (name.as_bytes().to_vec(), true),
        };
        if bytes.len() > usize::from(u16::MAX) {
            return Err(TorrentZipError::FileNameTooLong {
                length: bytes.len(),
            });
        }
        Ok(Self {
            name: name.to_string(),
            bytes,
            utf8,
        })
    }

    /// General purpose flags for this name
    pub fn flags(&self) -> u16 {
        if self.utf8 {
            GeneralPurposeFlags::MAX_COMPRESSION | GeneralPurposeFlags::UTF8
        } else {
            GeneralPurposeFlags::MAX_COMPRESSION
        }
    }
}

/// Whether an entry with this size hint written at `offset` gets zip64 fields
pub const fn needs_zip64_entry(size_hint: u64, offset: u64) -> bool {
    size_hint >= ZIP64_THRESHOLD || offset >= ZIP64_THRESHOLD
}

/// Whether the archive needs a zip64 EOCD record and locator
pub const fn needs_zip64_eocd(entries: u64, cd_size: u64, cd_offset: u64, any_zip64_entry: bool) -> bool {
    any_zip64_entry
        || entries > MAX_CLASSIC_ENTRIES
        || cd_size >= ZIP64_THRESHOLD
        || cd_offset >= ZIP64_THRESHOLD
}

/// Values that vary between local headers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryValues {
    /// CRC32 of the uncompressed data
    pub crc32: u32,
    /// Compressed size
    pub compressed_size: u64,
    /// Uncompressed size
    pub uncompressed_size: u64,
    /// Offset of the local header
    pub offset: u64,
    /// Whether the entry carries zip64 fields
    pub zip64: bool,
}

/// Build a local file header.
///
/// A zip64 entry stores both sizes as sentinels and carries them in a zip64
/// extra field, followed by the header offset when that is also too large.
/// The central header repeats the same extra field.
pub fn local_header(
    method: TorrentZipMethod,
    name: &EncodedName,
    values: EntryValues,
) -> TorrentZipResult<Vec<u8>> {
    let (compressed_size, uncompressed_size, extra) = if values.zip64 {
        let info = Zip64ExtendedInfo {
            uncompressed_size: Some(values.uncompressed_size),
            compressed_size: Some(values.compressed_size),
            local_header_offset: (values.offset >= ZIP64_THRESHOLD).then_some(values.offset),
            disk_start: None,
        };
        (SIZE_SENTINEL, SIZE_SENTINEL, info.to_extra_field())
    } else {
        let narrow = |size: u64| {
            u32::try_from(size)
                .ok()
                .filter(|&size| u64::from(size) < ZIP64_THRESHOLD)
                .ok_or_else(|| TorrentZipError::EntryTooLarge {
                    name: name.name.clone(),
                    size,
                })
        };
        (
            narrow(values.compressed_size)?,
            narrow(values.uncompressed_size)?,
            Vec::new(),
        )
    };

    let (last_mod_time, last_mod_date) = method.dos_time_date();
    let fixed = LocalHeaderFixed {
        signature: LOCAL_FILE_HEADER_SIGNATURE,
        version_needed: method.version_needed(values.zip64),
        flags: name.flags(),
        compression_method: method.compression_method().as_u16(),
        last_mod_time,
        last_mod_date,
        crc32: values.crc32,
        compressed_size,
        uncompressed_size,
        file_name_length: name.bytes.len() as u16,
        extra_field_length: extra.len() as u16,
    };

    let mut header = fixed.to_bytes()?;
    header.extend_from_slice(&name.bytes);
    header.extend_from_slice(&extra);
    Ok(header)
}

/// Build the central header for a local header written at `offset`.
///
/// Everything from the version needed through the extra field length is
/// copied from the local header, and the name and extra field follow it
/// unchanged. Made-by, comment, disk and attribute fields are zero.
pub fn central_header(local: &[u8], offset: u64) -> TorrentZipResult<Vec<u8>> {
    let fixed = LocalHeaderFixed::decode(local, 0)?;
    let central = CentralHeaderFixed {
        signature: CENTRAL_FILE_HEADER_SIGNATURE,
        version_made_by: 0,
        version_needed: fixed.version_needed,
        flags: fixed.flags,
        compression_method: fixed.compression_method,
        last_mod_time: fixed.last_mod_time,
        last_mod_date: fixed.last_mod_date,
        crc32: fixed.crc32,
        compressed_size: fixed.compressed_size,
        uncompressed_size: fixed.uncompressed_size,
        file_name_length: fixed.file_name_length,
        extra_field_length: fixed.extra_field_length,
        file_comment_length: 0,
        disk_start: 0,
        internal_attributes: 0,
        external_attributes: 0,
        local_header_offset: offset.min(ZIP64_THRESHOLD) as u32,
    };

    let mut header = central.to_bytes()?;
    header.extend_from_slice(&local[LocalHeaderFixed::LEN..]);
    Ok(header)
}

/// Build the zip64 EOCD record and its locator
pub fn zip64_end_records(
    entries: u64,
    cd_size: u64,
    cd_offset: u64,
) -> TorrentZipResult<Vec<u8>> {
    let record = Zip64EocdRecord {
        signature: ZIP64_EOCD_SIGNATURE,
        record_size: (Zip64EocdRecord::LEN - 12) as u64,
        version_made_by: ZIP64_EOCD_VERSION,
        version_needed: ZIP64_EOCD_VERSION,
        disk_number: 0,
        cd_disk_start: 0,
        cd_disk_records: entries,
        cd_total_records: entries,
        cd_size,
        cd_offset,
    };
    let locator = Zip64Locator {
        signature: ZIP64_LOCATOR_SIGNATURE,
        zip64_eocd_disk: 0,
        zip64_eocd_offset: cd_offset + cd_size,
        disk_count: 1,
    };

    let mut bytes = record.to_bytes()?;
    bytes.extend(locator.to_bytes()?);
    Ok(bytes)
}

/// Build the classic EOCD with `comment`, clamping wide values to their
/// sentinels
pub fn end_of_central_directory(
    entries: u64,
    cd_size: u64,
    cd_offset: u64,
    comment: &str,
) -> TorrentZipResult<Vec<u8>> {
    let count = entries.min(MAX_CLASSIC_ENTRIES) as u16;
    let record = EocdRecord {
        signature: EOCD_SIGNATURE,
        disk_number: 0,
        cd_disk_start: 0,
        cd_disk_records: count,
        cd_total_records: count,
        cd_size: cd_size.min(ZIP64_THRESHOLD) as u32,
        cd_offset: cd_offset.min(ZIP64_THRESHOLD) as u32,
        comment_length: comment.len() as u16,
    };

    let mut bytes = record.to_bytes()?;
    bytes.extend_from_slice(comment.as_bytes());
    Ok(bytes)
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use romzip_formats::extra_field::{ExtraFields, Zip64Sentinels};
    use romzip_formats::record::CentralDirectoryRecord;

    fn values(size: u64, offset: u64) -> EntryValues {
        EntryValues {
            crc32: 0xDEAD_BEEF,
            compressed_size: size / 2,
            uncompressed_size: size,
            offset,
            zip64: needs_zip64_entry(size, offset),
        }
    }

    #[test]
    fn test_name_encoding() {
        let plain = EncodedName::new("Sonic (USA).md").expect("encode");
        assert!(!plain.utf8);
        assert_eq!(plain.flags(), 0x0002);

        let accented = EncodedName::new("Pokémon.gb").expect("encode");
        assert!(!accented.utf8);
        assert_eq!(accented.bytes[3], 0x82);

        let kana = EncodedName::new("ドラゴン.nes").expect("encode");
        assert!(kana.utf8);
        assert_eq!(kana.flags(), 0x0802);
        assert_eq!(kana.bytes, "ドラゴン.nes".as_bytes());

        let long = "a".repeat(70_000);
        assert!(matches!(
            EncodedName::new(&long),
            Err(TorrentZipError::FileNameTooLong { length: 70_000 })
        ));
    }

    #[test]
    fn test_zip64_entry_boundary() {
        assert!(!needs_zip64_entry(ZIP64_THRESHOLD - 1, 0));
        assert!(needs_zip64_entry(ZIP64_THRESHOLD, 0));
        assert!(needs_zip64_entry(0, ZIP64_THRESHOLD));
    }

    #[test]
    fn test_zip64_eocd_entry_count_boundary() {
        assert!(!needs_zip64_eocd(0xFFFF, 100, 100, false));
        assert!(needs_zip64_eocd(0x1_0000, 100, 100, false));
        assert!(needs_zip64_eocd(1, ZIP64_THRESHOLD, 0, false));
        assert!(needs_zip64_eocd(1, 0, ZIP64_THRESHOLD, false));
        assert!(needs_zip64_eocd(1, 0, 0, true));
    }

    #[test]
    fn test_classic_local_header_layout() {
        let name = EncodedName::new("a.rom").expect("encode");
        let header = local_header(TorrentZipMethod::Deflate, &name, values(4, 0)).expect("header");
        assert_eq!(header.len(), 30 + 5);
        let fixed = LocalHeaderFixed::decode(&header, 0).expect("decode");
        assert_eq!(fixed.version_needed, 20);
        assert_eq!(fixed.flags, 0x0002);
        assert_eq!(fixed.compression_method, 8);
        assert_eq!((fixed.last_mod_time, fixed.last_mod_date), (48128, 8600));
        assert_eq!(fixed.crc32, 0xDEAD_BEEF);
        assert_eq!((fixed.compressed_size, fixed.uncompressed_size), (2, 4));
        assert_eq!(fixed.extra_field_length, 0);
    }

    #[test]
    fn test_just_below_threshold_is_not_zip64() {
        let name = EncodedName::new("big.bin").expect("encode");
        let header = local_header(
            TorrentZipMethod::Deflate,
            &name,
            values(ZIP64_THRESHOLD - 1, 0),
        )
        .expect("header");
        let fixed = LocalHeaderFixed::decode(&header, 0).expect("decode");
        assert_eq!(fixed.version_needed, 20);
        assert_eq!(fixed.uncompressed_size, 0xFFFF_FFFE);
        assert_eq!(fixed.extra_field_length, 0);
    }

    #[test]
    fn test_zip64_local_header() {
        let name = EncodedName::new("huge.bin").expect("encode");
        let header = local_header(
            TorrentZipMethod::Deflate,
            &name,
            values(ZIP64_THRESHOLD, 0),
        )
        .expect("header");
        let fixed = LocalHeaderFixed::decode(&header, 0).expect("decode");
        assert_eq!(fixed.version_needed, 45);
        assert_eq!((fixed.compressed_size, fixed.uncompressed_size), (u32::MAX, u32::MAX));
        assert_eq!(fixed.extra_field_length, 20);

        let extra = ExtraFields::parse(&header[30 + 8..]);
        let info = Zip64ExtendedInfo::parse(
            extra.get(romzip_formats::extra_field::ExtraFieldId::ZIP64).expect("zip64"),
            Zip64Sentinels::local(u32::MAX, u32::MAX),
        )
        .expect("info");
        assert_eq!(info.uncompressed_size, Some(ZIP64_THRESHOLD));
        assert_eq!(info.compressed_size, Some(ZIP64_THRESHOLD / 2));
    }

    #[test]
    fn test_zip64_offset_widens_extra() {
        let name = EncodedName::new("late.bin").expect("encode");
        let offset = 0x1_0000_0000;
        let local = local_header(TorrentZipMethod::Zstd, &name, values(10, offset)).expect("header");
        let fixed = LocalHeaderFixed::decode(&local, 0).expect("decode");
        assert_eq!(fixed.version_needed, 63);
        assert_eq!((fixed.last_mod_time, fixed.last_mod_date), (0, 0));
        assert_eq!(fixed.extra_field_length, 28);

        let central = central_header(&local, offset).expect("central");
        let parsed = CentralDirectoryRecord::read(&central, 0).expect("parse");
        assert_eq!(parsed.local_header_offset, u32::MAX);
        assert_eq!(parsed.local_header_offset_resolved(), offset);
        assert_eq!(parsed.uncompressed_size_resolved(), 10);
        assert_eq!(parsed.compressed_size_resolved(), 5);
    }

    #[test]
    fn test_oversized_without_zip64_rejected() {
        let name = EncodedName::new("liar.bin").expect("encode");
        let mut entry = values(10, 0);
        entry.uncompressed_size = ZIP64_THRESHOLD;
        let err = local_header(TorrentZipMethod::Deflate, &name, entry).expect_err("too large");
        assert!(matches!(err, TorrentZipError::EntryTooLarge { .. }));
    }

    #[test]
    fn test_central_copies_local_fields() {
        let name = EncodedName::new("ドラゴン.nes").expect("encode");
        let local = local_header(TorrentZipMethod::Deflate, &name, values(4, 77)).expect("local");
        let central = central_header(&local, 77).expect("central");
        assert_eq!(central.len(), local.len() + 16);
        assert_eq!(&central[6..32], &local[4..30]);
        assert_eq!(&central[0..6], &[0x50, 0x4b, 0x01, 0x02, 0, 0]);
        assert_eq!(&central[32..42], &[0u8; 10]);
        assert_eq!(&central[42..46], &77u32.to_le_bytes());
        assert_eq!(&central[46..], &local[30..]);
    }

    #[test]
    fn test_end_records() {
        let eocd = end_of_central_directory(0x1_0000, 0x1_0000_0000, 5, "RVZSTD-00000000")
            .expect("eocd");
        assert_eq!(eocd.len(), 22 + 15);
        assert_eq!(&eocd[8..12], &[0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(&eocd[12..16], &[0xFF; 4]);
        assert_eq!(&eocd[16..20], &5u32.to_le_bytes());
        assert_eq!(&eocd[20..22], &15u16.to_le_bytes());

        let zip64 = zip64_end_records(3, 100, 200).expect("zip64");
        assert_eq!(zip64.len(), 56 + 20);
        let record = Zip64EocdRecord::decode(&zip64, 0).expect("record");
        assert_eq!(record.record_size, 44);
        assert_eq!(record.comment_length(), 0);
        let locator = Zip64Locator::decode(&zip64[56..], 56).expect("locator");
        assert_eq!(locator.zip64_eocd_offset, 300);
        assert_eq!(locator.disk_count, 1);
    }
}
