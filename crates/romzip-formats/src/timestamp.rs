//! File timestamp decoding.
//!
//! A record can carry its times in up to four places. Resolution takes the
//! first that yields a value, in this order:
//!
//! 1. Info-ZIP extended timestamp (`0x5455`)
//! 2. Info-ZIP Unix timestamp (`0x5855`)
//! 3. NTFS file times (`0x000A`)
//! 4. The DOS date and time fields, interpreted as local time

use crate::extra_field::{ExtraFieldId, ExtraFields};
use chrono::{DateTime, Duration, Local, Months, NaiveDate, TimeZone, Utc};

/// Milliseconds between 1601-01-01 and 1970-01-01
const NTFS_EPOCH_OFFSET_MS: i64 = 11_644_473_600_000;

/// Modified, accessed and created times of an entry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileTimestamps {
    /// Last modification
    pub modified: Option<DateTime<Utc>>,
    /// Last access
    pub accessed: Option<DateTime<Utc>>,
    /// Creation
    pub created: Option<DateTime<Utc>>,
}

impl FileTimestamps {
    fn or(self, other: Self) -> Self {
        Self {
            modified: self.modified.or(other.modified),
            accessed: self.accessed.or(other.accessed),
            created: self.created.or(other.created),
        }
    }
}

/// Decode an extended timestamp field: a flags byte followed by signed Unix
/// seconds for each of modified (bit 0), accessed (bit 1) and created
/// (bit 2) that is set. Central records often carry only the first.
pub fn parse_extended(data: &[u8]) -> Option<FileTimestamps> {
    let (&flags, rest) = data.split_first()?;
    if rest.len() < 4 {
        return None;
    }
    let mut times = rest
        .chunks_exact(4)
        .map(|chunk| i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));

    let mut next = |bit: u8| {
        if flags & bit == 0 {
            return None;
        }
        times
            .next()
            .and_then(|secs| DateTime::from_timestamp(i64::from(secs), 0))
    };
    let modified = next(0x01);
    let accessed = next(0x02);
    let created = next(0x04);
    Some(FileTimestamps {
        modified,
        accessed,
        created,
    })
}

/// Decode an Info-ZIP Unix field: accessed then modified, unsigned seconds
pub fn parse_unix(data: &[u8]) -> Option<FileTimestamps> {
    let accessed = data.get(0..4)?;
    let modified = data.get(4..8)?;
    let secs = |b: &[u8]| i64::from(u32::from_le_bytes([b[0], b[1], b[2], b[3]]));
    Some(FileTimestamps {
        modified: DateTime::from_timestamp(secs(modified), 0),
        accessed: DateTime::from_timestamp(secs(accessed), 0),
        created: None,
    })
}

/// Decode an NTFS field: four reserved bytes, then tagged attributes. Tag 1
/// holds modified, accessed and created as 100ns ticks since 1601.
pub fn parse_ntfs(data: &[u8]) -> Option<FileTimestamps> {
    let mut position = 4;
    let mut file_times = None;
    while position + 4 <= data.len() {
        let tag = u16::from_le_bytes([data[position], data[position + 1]]);
        let size = usize::from(u16::from_le_bytes([data[position + 2], data[position + 3]]));
        let start = position + 4;
        let end = (start + size).min(data.len());
        if tag == 0x0001 {
            file_times = Some(&data[start..end]);
        }
        position = start + size;
    }

    let file_times = file_times?;
    let at = |index: usize| {
        let bytes = file_times.get(index * 8..index * 8 + 8)?;
        let ticks = u64::from_le_bytes(bytes.try_into().ok()?);
        let millis = i64::try_from(ticks / 10_000).ok()? - NTFS_EPOCH_OFFSET_MS;
        DateTime::from_timestamp_millis(millis)
    };
    Some(FileTimestamps {
        modified: at(0),
        accessed: at(1),
        created: at(2),
    })
}

/// Decode DOS date and time fields as local time.
///
/// Out-of-range components roll over into the next larger unit, so a zeroed
/// date becomes 1979-11-30.
pub fn parse_dos(time: u16, date: u16) -> Option<DateTime<Utc>> {
    let seconds = i64::from(time & 0x1F) * 2;
    let minutes = i64::from((time >> 5) & 0x3F);
    let hours = i64::from(time >> 11);

    let day = i64::from(date & 0x1F);
    let month = u32::from((date >> 5) & 0x0F);
    let year = 1980 + i32::from(date >> 9);

    let january = NaiveDate::from_ymd_opt(year, 1, 1)?;
    let month_start = if month == 0 {
        january.checked_sub_months(Months::new(1))?
    } else {
        january.checked_add_months(Months::new(month - 1))?
    };
    let naive = month_start.and_hms_opt(0, 0, 0)?
        + Duration::days(day - 1)
        + Duration::seconds(hours * 3600 + minutes * 60 + seconds);

    let local = Local
        .from_local_datetime(&naive)
        .earliest()
        .or_else(|| Local.from_local_datetime(&(naive + Duration::hours(1))).earliest())?;
    Some(local.with_timezone(&Utc))
}

/// Resolve a record's timestamps from its extra fields and DOS fields
pub fn resolve(extra: &ExtraFields, dos_time: u16, dos_date: u16) -> FileTimestamps {
    let parsers: [(ExtraFieldId, fn(&[u8]) -> Option<FileTimestamps>); 3] = [
        (ExtraFieldId::EXTENDED_TIMESTAMP, parse_extended),
        (ExtraFieldId::INFO_ZIP_UNIX, parse_unix),
        (ExtraFieldId::NTFS, parse_ntfs),
    ];

    let resolved = parsers
        .iter()
        .filter_map(|(id, parse)| extra.get(*id).and_then(*parse))
        .fold(FileTimestamps::default(), FileTimestamps::or);

    FileTimestamps {
        modified: resolved.modified.or_else(|| parse_dos(dos_time, dos_date)),
        ..resolved
    }
}
