//! End of central directory discovery and parsing.
//!
//! The EOCD record sits at the very end of an archive, followed only by its
//! comment. Because the comment is variable length, the record is found by
//! scanning backwards through the last `22 + 65535` bytes for its signature
//! and taking the last match. A comment that itself contains the signature
//! bytes can mislead this scan; that limitation is shared with most ZIP
//! readers and is kept for compatibility.
//!
//! Any count, size or offset field holding its 16-bit or 32-bit sentinel is
//! resolved from the zip64 EOCD record, reached through the zip64 locator
//! that immediately precedes the EOCD.

use crate::cp437;
use crate::error::{ZipError, ZipResult};
use crate::fixed::{EOCD_SIGNATURE, FixedRecord, ZIP64_EOCD_SIGNATURE, ZIP64_LOCATOR_SIGNATURE};
use crate::source::ReadAt;
use binrw::{BinRead, BinWrite};
use tracing::debug;

/// Maximum distance from the end of the file to the EOCD signature
pub const MAX_EOCD_SEARCH: u64 = EocdRecord::LEN as u64 + u16::MAX as u64;

/// Fixed part of the end of central directory record
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[br(little)]
#[bw(little)]
pub struct EocdRecord {
    /// `PK\x05\x06`
    pub signature: u32,
    /// Number of this disk
    pub disk_number: u16,
    /// Disk holding the start of the central directory
    pub cd_disk_start: u16,
    /// Central directory records on this disk
    pub cd_disk_records: u16,
    /// Central directory records in total
    pub cd_total_records: u16,
    /// Central directory size in bytes
    pub cd_size: u32,
    /// Central directory offset from the start of the archive
    pub cd_offset: u32,
    /// Length of the trailing comment
    pub comment_length: u16,
}

impl FixedRecord for EocdRecord {
    const NAME: &'static str = "end of central directory";
    const SIGNATURE: u32 = EOCD_SIGNATURE;
    const LEN: usize = 22;
}

impl EocdRecord {
    fn count_sentineled(&self) -> bool {
        self.cd_disk_records == u16::MAX || self.cd_total_records == u16::MAX
    }

    fn wide_sentineled(&self) -> bool {
        self.disk_number == u16::MAX
            || self.cd_disk_start == u16::MAX
            || self.cd_size == u32::MAX
            || self.cd_offset == u32::MAX
    }
}

/// Zip64 end of central directory locator
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[br(little)]
#[bw(little)]
pub struct Zip64Locator {
    /// `PK\x06\x07`
    pub signature: u32,
    /// Disk holding the zip64 EOCD record
    pub zip64_eocd_disk: u32,
    /// Offset of the zip64 EOCD record
    pub zip64_eocd_offset: u64,
    /// Total number of disks
    pub disk_count: u32,
}

impl FixedRecord for Zip64Locator {
    const NAME: &'static str = "zip64 end of central directory locator";
    const SIGNATURE: u32 = ZIP64_LOCATOR_SIGNATURE;
    const LEN: usize = 20;
}

/// Fixed part of the zip64 end of central directory record
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[br(little)]
#[bw(little)]
pub struct Zip64EocdRecord {
    /// `PK\x06\x06`
    pub signature: u32,
    /// Size of the record excluding the signature and this field
    pub record_size: u64,
    /// Version made by
    pub version_made_by: u16,
    /// Version needed to extract
    pub version_needed: u16,
    /// Number of this disk
    pub disk_number: u32,
    /// Disk holding the start of the central directory
    pub cd_disk_start: u32,
    /// Central directory records on this disk
    pub cd_disk_records: u64,
    /// Central directory records in total
    pub cd_total_records: u64,
    /// Central directory size in bytes
    pub cd_size: u64,
    /// Central directory offset
    pub cd_offset: u64,
}

impl FixedRecord for Zip64EocdRecord {
    const NAME: &'static str = "zip64 end of central directory record";
    const SIGNATURE: u32 = ZIP64_EOCD_SIGNATURE;
    const LEN: usize = 56;
}

impl Zip64EocdRecord {
    /// Length of the extensible data that follows the fixed part
    pub fn comment_length(&self) -> u64 {
        self.record_size.saturating_add(12).saturating_sub(Self::LEN as u64)
    }
}

/// A located and decoded end of central directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndOfCentralDirectory {
    /// Absolute offset of the EOCD signature
    pub position: u64,
    /// The classic EOCD record
    pub record: EocdRecord,
    /// Comment bytes as stored
    pub raw_comment: Vec<u8>,
    /// Comment decoded as CP437
    pub comment: String,
    /// Zip64 locator, when a sentinel required it
    pub zip64_locator: Option<Zip64Locator>,
    /// Zip64 EOCD record, when a sentinel required it
    pub zip64_record: Option<Zip64EocdRecord>,
    /// Zip64 extensible data, decoded as CP437
    pub zip64_comment: String,
}

impl EndOfCentralDirectory {
    /// Find and decode the EOCD of `source`
    pub fn locate<R: ReadAt + ?Sized>(source: &R) -> ZipResult<Self> {
        let size = source.size()?;
        let window = size.min(MAX_EOCD_SEARCH);
        let window_start = size - window;
        let mut tail = vec![0u8; usize::try_from(window).unwrap_or(0)];
        source.read_exact_at(&mut tail, window_start)?;

        let signature = EOCD_SIGNATURE.to_le_bytes();
        let Some(index) = tail.windows(4).rposition(|w| w == signature) else {
            return Err(ZipError::EocdNotFound { searched: window });
        };
        let position = window_start + index as u64;
        debug!("Found end of central directory at 0x{:08X}", position);

        let record = EocdRecord::read_from(source, position)?;
        let mut raw_comment = vec![0u8; usize::from(record.comment_length)];
        let comment_offset = position + EocdRecord::LEN as u64;
        source
            .read_exact_at(&mut raw_comment, comment_offset)
            .map_err(|e| ZipError::truncated_or("archive comment", comment_offset, e))?;
        let comment = cp437::decode(&raw_comment);

        let mut eocd = Self {
            position,
            record,
            raw_comment,
            comment,
            zip64_locator: None,
            zip64_record: None,
            zip64_comment: String::new(),
        };

        if eocd.record.wide_sentineled() || eocd.record.count_sentineled() {
            eocd.read_zip64(source)?;
        }
        Ok(eocd)
    }

    fn read_zip64<R: ReadAt + ?Sized>(&mut self, source: &R) -> ZipResult<()> {
        let counts_only = !self.record.wide_sentineled();
        let Some(locator_offset) = self.position.checked_sub(Zip64Locator::LEN as u64) else {
            if counts_only {
                return Ok(());
            }
            return Err(ZipError::Truncated {
                structure: Zip64Locator::NAME,
                offset: 0,
            });
        };

        let locator = match Zip64Locator::read_from(source, locator_offset) {
            Ok(locator) => locator,
            // 0xFFFF is also a legitimate 16-bit count
            Err(err @ (ZipError::InvalidSignature { .. } | ZipError::Truncated { .. }))
                if counts_only =>
            {
                debug!("Treating 0xFFFF record count as literal: {}", err);
                return Ok(());
            }
            Err(err) => return Err(err),
        };

        if locator.zip64_eocd_disk != 0 || locator.disk_count != 1 {
            return Err(ZipError::MultiDisk {
                disk_count: locator.disk_count,
                cd_disk: locator.zip64_eocd_disk,
            });
        }

        let record = Zip64EocdRecord::read_from(source, locator.zip64_eocd_offset)?;
        let comment_offset = locator.zip64_eocd_offset + Zip64EocdRecord::LEN as u64;
        let comment_length = record.comment_length();
        if comment_offset.saturating_add(comment_length) > self.position {
            return Err(ZipError::Truncated {
                structure: Zip64EocdRecord::NAME,
                offset: locator.zip64_eocd_offset,
            });
        }
        let mut comment = vec![0u8; usize::try_from(comment_length).unwrap_or(0)];
        source
            .read_exact_at(&mut comment, comment_offset)
            .map_err(|e| ZipError::truncated_or(Zip64EocdRecord::NAME, comment_offset, e))?;

        debug!(
            "Read zip64 end of central directory at 0x{:08X} ({} records)",
            locator.zip64_eocd_offset, record.cd_total_records
        );
        self.zip64_comment = cp437::decode(&comment);
        self.zip64_locator = Some(locator);
        self.zip64_record = Some(record);
        Ok(())
    }

    /// Number of this disk
    pub fn disk_number(&self) -> u32 {
        match &self.zip64_record {
            Some(z) if self.record.disk_number == u16::MAX => z.disk_number,
            _ => u32::from(self.record.disk_number),
        }
    }

    /// Disk holding the start of the central directory
    pub fn cd_disk_start(&self) -> u32 {
        match &self.zip64_record {
            Some(z) if self.record.cd_disk_start == u16::MAX => z.cd_disk_start,
            _ => u32::from(self.record.cd_disk_start),
        }
    }

    /// Central directory records on this disk
    pub fn cd_disk_records(&self) -> u64 {
        match &self.zip64_record {
            Some(z) if self.record.cd_disk_records == u16::MAX => z.cd_disk_records,
            _ => u64::from(self.record.cd_disk_records),
        }
    }

    /// Central directory records in total
    pub fn cd_total_records(&self) -> u64 {
        match &self.zip64_record {
            Some(z) if self.record.cd_total_records == u16::MAX => z.cd_total_records,
            _ => u64::from(self.record.cd_total_records),
        }
    }

    /// Central directory size in bytes
    pub fn cd_size(&self) -> u64 {
        match &self.zip64_record {
            Some(z) if self.record.cd_size == u32::MAX => z.cd_size,
            _ => u64::from(self.record.cd_size),
        }
    }

    /// Central directory offset
    pub fn cd_offset(&self) -> u64 {
        match &self.zip64_record {
            Some(z) if self.record.cd_offset == u32::MAX => z.cd_offset,
            _ => u64::from(self.record.cd_offset),
        }
    }

    /// Reject archives that span disks
    pub fn ensure_single_disk(&self) -> ZipResult<()> {
        let cd_disk = self.cd_disk_start();
        if self.disk_number() != 0 || cd_disk != 0 {
            return Err(ZipError::MultiDisk {
                disk_count: self.disk_number().saturating_add(1),
                cd_disk,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::test_utils::{ZipImage, eocd_bytes, zip64_eocd_bytes, zip64_locator_bytes};

    #[test]
    fn test_locate_empty_archive() {
        let archive = eocd_bytes(0, 0, 0, b"");
        let eocd = EndOfCentralDirectory::locate(&archive).expect("eocd");
        assert_eq!(eocd.position, 0);
        assert_eq!(eocd.cd_total_records(), 0);
        assert!(eocd.comment.is_empty());
        assert!(eocd.zip64_record.is_none());
    }

    #[test]
    fn test_locate_reads_comment() {
        let mut archive = vec![0xAA; 100];
        archive.extend(eocd_bytes(3, 50, 40, b"TORRENTZIPPED-0123ABCD"));
        let eocd = EndOfCentralDirectory::locate(&archive).expect("eocd");
        assert_eq!(eocd.position, 100);
        assert_eq!(eocd.comment, "TORRENTZIPPED-0123ABCD");
        assert_eq!(eocd.cd_offset(), 40);
        assert_eq!(eocd.cd_size(), 50);
    }

    #[test]
    fn test_locate_uses_last_signature() {
        let mut comment = b"junk".to_vec();
        comment.extend_from_slice(&EOCD_SIGNATURE.to_le_bytes());
        comment.extend_from_slice(&[0u8; 18]);
        let archive = eocd_bytes(1, 2, 3, &comment);
        let eocd = EndOfCentralDirectory::locate(&archive).expect("eocd");
        // The embedded signature wins
        assert_eq!(eocd.position, 22 + 4);
    }

    #[test]
    fn test_missing_signature() {
        let err = EndOfCentralDirectory::locate(&vec![0u8; 64]).expect_err("no eocd");
        assert!(matches!(err, ZipError::EocdNotFound { searched: 64 }));
        assert!(err.is_format_error());
    }

    #[test]
    fn test_zip64_resolution() {
        let mut archive = vec![0u8; 16];
        let zip64_offset = archive.len() as u64;
        archive.extend(zip64_eocd_bytes(70_000, 0x1_2345_6789, 0x2_0000_0000));
        archive.extend(zip64_locator_bytes(zip64_offset, 1));
        archive.extend(eocd_bytes(u16::MAX, u32::MAX, u32::MAX, b""));

        let eocd = EndOfCentralDirectory::locate(&archive).expect("eocd");
        assert_eq!(eocd.cd_total_records(), 70_000);
        assert_eq!(eocd.cd_disk_records(), 70_000);
        assert_eq!(eocd.cd_size(), 0x1_2345_6789);
        assert_eq!(eocd.cd_offset(), 0x2_0000_0000);
        let record = eocd.zip64_record.as_ref().expect("zip64 record");
        assert_eq!(record.version_made_by, 45);
        assert!(eocd.zip64_comment.is_empty());
    }

    #[test]
    fn test_zip64_record_signature_mismatch() {
        let mut archive = vec![0u8; 56];
        archive.extend(zip64_locator_bytes(0, 1));
        archive.extend(eocd_bytes(1, u32::MAX, 0, b""));
        let err = EndOfCentralDirectory::locate(&archive).expect_err("bad zip64 record");
        assert!(matches!(
            err,
            ZipError::InvalidSignature {
                offset: 0,
                expected: ZIP64_EOCD_SIGNATURE,
                found: 0,
                ..
            }
        ));
    }

    #[test]
    fn test_missing_locator_for_wide_sentinel() {
        let mut archive = vec![0u8; 20];
        archive.extend(eocd_bytes(1, 10, u32::MAX, b""));
        let err = EndOfCentralDirectory::locate(&archive).expect_err("no locator");
        assert!(matches!(err, ZipError::InvalidSignature { offset: 0, .. }));
    }

    #[test]
    fn test_literal_0xffff_count_without_locator() {
        let mut archive = vec![0u8; 30];
        archive.extend(eocd_bytes(u16::MAX, 10, 20, b""));
        let eocd = EndOfCentralDirectory::locate(&archive).expect("eocd");
        assert_eq!(eocd.cd_total_records(), 0xFFFF);
        assert!(eocd.zip64_locator.is_none());
    }

    #[test]
    fn test_multi_disk_locator_rejected() {
        let mut archive = vec![0u8; 56];
        archive.extend(zip64_locator_bytes(0, 2));
        archive.extend(eocd_bytes(1, u32::MAX, 0, b""));
        let err = EndOfCentralDirectory::locate(&archive).expect_err("multi-disk");
        assert!(err.is_unsupported());
    }

    #[test]
    fn test_record_round_trips_through_binrw() {
        let image = ZipImage::new().finish(b"comment");
        let eocd = EndOfCentralDirectory::locate(&image).expect("eocd");
        let bytes = eocd.record.to_bytes().expect("encode");
        assert_eq!(bytes, image[eocd.position as usize..eocd.position as usize + 22]);
    }
}
