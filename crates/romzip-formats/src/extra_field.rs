//! Extra field blocks of local and central records.
//!
//! An extra field block is a run of `(id: u16, size: u16, data)` triples.
//! [`ExtraFields`] indexes the block by id; the sub-field decoders in this
//! module and in [`crate::timestamp`] then read individual entries.

use std::collections::BTreeMap;
use std::fmt;

/// Header id of an extra field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExtraFieldId(pub u16);

impl ExtraFieldId {
    /// Zip64 extended information
    pub const ZIP64: Self = Self(0x0001);
    /// NTFS file times
    pub const NTFS: Self = Self(0x000A);
    /// Info-ZIP extended timestamp
    pub const EXTENDED_TIMESTAMP: Self = Self(0x5455);
    /// Info-ZIP Unix (original) timestamps
    pub const INFO_ZIP_UNIX: Self = Self(0x5855);
    /// Info-ZIP Unicode comment
    pub const UNICODE_COMMENT: Self = Self(0x6375);
    /// Info-ZIP Unicode path
    pub const UNICODE_PATH: Self = Self(0x7075);

    /// Raw header id
    pub const fn as_u16(self) -> u16 {
        self.0
    }
}

impl fmt::Display for ExtraFieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X}", self.0)
    }
}

/// Extra field block indexed by header id
///
/// When an id repeats, the last occurrence wins. Data running past the end of
/// the block is clipped rather than rejected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtraFields {
    fields: BTreeMap<ExtraFieldId, Vec<u8>>,
}

impl ExtraFields {
    /// Index an extra field block
    pub fn parse(block: &[u8]) -> Self {
        let mut fields = BTreeMap::new();
        let mut position = 0;
        // A header needs four bytes
        while position + 3 < block.len() {
            let id = u16::from_le_bytes([block[position], block[position + 1]]);
            let size = usize::from(u16::from_le_bytes([block[position + 2], block[position + 3]]));
            let start = position + 4;
            let end = (start + size).min(block.len());
            fields.insert(ExtraFieldId(id), block[start..end].to_vec());
            position = start + size;
        }
        Self { fields }
    }

    /// Data of the field with `id`
    pub fn get(&self, id: ExtraFieldId) -> Option<&[u8]> {
        self.fields.get(&id).map(Vec::as_slice)
    }

    /// Whether a field with `id` is present
    pub fn contains(&self, id: ExtraFieldId) -> bool {
        self.fields.contains_key(&id)
    }

    /// Ids present, ascending
    pub fn ids(&self) -> impl Iterator<Item = ExtraFieldId> + '_ {
        self.fields.keys().copied()
    }

    /// Number of distinct fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the block held no fields
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Which base fields of a record hold their zip64 sentinel
///
/// Only sentineled fields have a value in the zip64 extra field, and they
/// appear in the order of this struct's fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Zip64Sentinels {
    /// Uncompressed size is `0xFFFFFFFF`
    pub uncompressed_size: bool,
    /// Compressed size is `0xFFFFFFFF`
    pub compressed_size: bool,
    /// Local header offset is `0xFFFFFFFF`
    pub local_header_offset: bool,
    /// Disk start is `0xFFFF`
    pub disk_start: bool,
}

impl Zip64Sentinels {
    /// Sentinels of a central directory record
    pub const fn central(
        uncompressed_size: u32,
        compressed_size: u32,
        local_header_offset: u32,
        disk_start: u16,
    ) -> Self {
        Self {
            uncompressed_size: uncompressed_size == u32::MAX,
            compressed_size: compressed_size == u32::MAX,
            local_header_offset: local_header_offset == u32::MAX,
            disk_start: disk_start == u16::MAX,
        }
    }

    /// Sentinels of a local header, which only carries sizes
    pub const fn local(uncompressed_size: u32, compressed_size: u32) -> Self {
        Self {
            uncompressed_size: uncompressed_size == u32::MAX,
            compressed_size: compressed_size == u32::MAX,
            local_header_offset: false,
            disk_start: false,
        }
    }

    /// Whether any field needs a zip64 value
    pub const fn any(self) -> bool {
        self.uncompressed_size || self.compressed_size || self.local_header_offset || self.disk_start
    }
}

/// Decoded zip64 extended information (`0x0001`)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Zip64ExtendedInfo {
    /// 64-bit uncompressed size
    pub uncompressed_size: Option<u64>,
    /// 64-bit compressed size
    pub compressed_size: Option<u64>,
    /// 64-bit local header offset
    pub local_header_offset: Option<u64>,
    /// 32-bit disk start
    pub disk_start: Option<u32>,
}

impl Zip64ExtendedInfo {
    /// Decode the values that `sentinels` says are present.
    ///
    /// Returns `None` for an empty buffer. A buffer too short for a declared
    /// value leaves that value and the ones after it unset.
    pub fn parse(data: &[u8], sentinels: Zip64Sentinels) -> Option<Self> {
        if data.is_empty() {
            return None;
        }

        let mut cursor = data;
        let mut values = [None; 3];
        let mut short = false;
        let present = [
            sentinels.uncompressed_size,
            sentinels.compressed_size,
            sentinels.local_header_offset,
        ];
        for (slot, sentineled) in values.iter_mut().zip(present) {
            if !sentineled {
                continue;
            }
            match take_u64(&mut cursor) {
                Some(value) => *slot = Some(value),
                None => {
                    short = true;
                    break;
                }
            }
        }
        let disk_start = if sentinels.disk_start && !short {
            cursor
                .first_chunk::<4>()
                .map(|bytes| u32::from_le_bytes(*bytes))
        } else {
            None
        };

        let [uncompressed_size, compressed_size, local_header_offset] = values;
        Some(Self {
            uncompressed_size,
            compressed_size,
            local_header_offset,
            disk_start,
        })
    }

    /// Encode as a complete extra field, header included
    pub fn to_extra_field(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(28);
        for value in [
            self.uncompressed_size,
            self.compressed_size,
            self.local_header_offset,
        ]
        .into_iter()
        .flatten()
        {
            data.extend_from_slice(&value.to_le_bytes());
        }
        if let Some(disk) = self.disk_start {
            data.extend_from_slice(&disk.to_le_bytes());
        }

        let mut field = Vec::with_capacity(4 + data.len());
        field.extend_from_slice(&ExtraFieldId::ZIP64.as_u16().to_le_bytes());
        field.extend_from_slice(&(data.len() as u16).to_le_bytes());
        field.extend_from_slice(&data);
        field
    }
}

fn take_u64(cursor: &mut &[u8]) -> Option<u64> {
    let (head, tail) = cursor.split_first_chunk::<8>()?;
    *cursor = tail;
    Some(u64::from_le_bytes(*head))
}

/// Text of an Info-ZIP Unicode path or comment field, after its version byte
/// and CRC32 of the original field
pub fn unicode_text(data: &[u8]) -> Option<String> {
    data.get(5..)
        .map(|text| String::from_utf8_lossy(text).into_owned())
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    fn field(id: u16, data: &[u8]) -> Vec<u8> {
        let mut out = id.to_le_bytes().to_vec();
        out.extend_from_slice(&(data.len() as u16).to_le_bytes());
        out.extend_from_slice(data);
        out
    }

    #[test]
    fn test_parse_indexes_by_id() {
        let mut block = field(0x5455, &[1, 2, 3, 4, 5]);
        block.extend(field(0x000A, &[9; 8]));
        let fields = ExtraFields::parse(&block);
        assert_eq!(fields.len(), 2);
        assert_eq!(fields.get(ExtraFieldId::EXTENDED_TIMESTAMP), Some(&[1, 2, 3, 4, 5][..]));
        assert_eq!(
            fields.ids().collect::<Vec<_>>(),
            vec![ExtraFieldId::NTFS, ExtraFieldId::EXTENDED_TIMESTAMP]
        );
    }

    #[test]
    fn test_parse_clips_truncated_data_and_ignores_trailing_bytes() {
        let mut block = field(0x0001, &[7; 16]);
        block.truncate(10);
        let fields = ExtraFields::parse(&block);
        assert_eq!(fields.get(ExtraFieldId::ZIP64).expect("present").len(), 6);

        let fields = ExtraFields::parse(&[0x01, 0x00, 0x00]);
        assert!(fields.is_empty());
    }

    #[test]
    fn test_zip64_consumes_only_sentineled_values_in_order() {
        let mut data = 0x1_0000_0000u64.to_le_bytes().to_vec();
        data.extend_from_slice(&0x2_0000_0000u64.to_le_bytes());
        let sentinels = Zip64Sentinels::central(0x10, u32::MAX, u32::MAX, 0);
        let info = Zip64ExtendedInfo::parse(&data, sentinels).expect("zip64 info");
        assert_eq!(info.uncompressed_size, None);
        assert_eq!(info.compressed_size, Some(0x1_0000_0000));
        assert_eq!(info.local_header_offset, Some(0x2_0000_0000));
        assert_eq!(info.disk_start, None);
    }

    #[test]
    fn test_zip64_full_layout() {
        let info = Zip64ExtendedInfo {
            uncompressed_size: Some(1),
            compressed_size: Some(2),
            local_header_offset: Some(3),
            disk_start: Some(4),
        };
        let encoded = info.to_extra_field();
        assert_eq!(encoded.len(), 4 + 28);
        let fields = ExtraFields::parse(&encoded);
        let parsed = Zip64ExtendedInfo::parse(
            fields.get(ExtraFieldId::ZIP64).expect("zip64 field"),
            Zip64Sentinels::central(u32::MAX, u32::MAX, u32::MAX, u16::MAX),
        )
        .expect("zip64 info");
        assert_eq!(parsed, info);
    }

    #[test]
    fn test_zip64_short_buffer_leaves_values_unset() {
        let sentinels = Zip64Sentinels::central(u32::MAX, u32::MAX, 0, 0);
        let info = Zip64ExtendedInfo::parse(&[1, 0, 0, 0, 0, 0, 0, 0, 5], sentinels)
            .expect("zip64 info");
        assert_eq!(info.uncompressed_size, Some(1));
        assert_eq!(info.compressed_size, None);
        assert!(Zip64ExtendedInfo::parse(&[], sentinels).is_none());
    }

    #[test]
    fn test_unicode_text_skips_prefix() {
        let mut data = vec![1, 0xAA, 0xBB, 0xCC, 0xDD];
        data.extend_from_slice("日本.rom".as_bytes());
        assert_eq!(unicode_text(&data).as_deref(), Some("日本.rom"));
        assert_eq!(unicode_text(&[1, 2]), None);
    }
}
