//! Archive-wide compression method and the header constants it fixes

use romzip_formats::CompressionMethod;
use romzip_formats::crc::to_hex_upper;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// DOS time of every TorrentZip entry
pub const TORRENTZIP_DOS_TIME: u16 = 48128;
/// DOS date of every TorrentZip entry
pub const TORRENTZIP_DOS_DATE: u16 = 8600;

/// Comment prefix of TorrentZip archives
pub const TORRENTZIP_PREFIX: &str = "TORRENTZIPPED-";
/// Comment prefix of RVZSTD archives
pub const RVZSTD_PREFIX: &str = "RVZSTD-";

/// Compression method shared by every entry of an archive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TorrentZipMethod {
    /// TorrentZip: raw deflate at maximum compression
    Deflate,
    /// RVZSTD: zstd
    Zstd,
}

impl TorrentZipMethod {
    /// Zstd level used for RVZSTD entries
    pub const ZSTD_LEVEL: i32 = 19;

    /// Deflate level used for TorrentZip entries
    pub const DEFLATE_LEVEL: u32 = 9;

    /// Method id written to headers
    pub const fn compression_method(self) -> CompressionMethod {
        match self {
            Self::Deflate => CompressionMethod::Deflate,
            Self::Zstd => CompressionMethod::Zstd,
        }
    }

    /// Method for a stored method id, if it is one of ours
    pub const fn from_compression_method(method: CompressionMethod) -> Option<Self> {
        match method {
            CompressionMethod::Deflate => Some(Self::Deflate),
            CompressionMethod::Zstd => Some(Self::Zstd),
            _ => None,
        }
    }

    /// Version needed to extract
    pub const fn version_needed(self, zip64: bool) -> u16 {
        match (self, zip64) {
            (Self::Deflate, false) => 20,
            (Self::Deflate, true) => 45,
            (Self::Zstd, _) => 63,
        }
    }

    /// Fixed DOS `(time, date)` of every entry
    pub const fn dos_time_date(self) -> (u16, u16) {
        match self {
            Self::Deflate => (TORRENTZIP_DOS_TIME, TORRENTZIP_DOS_DATE),
            Self::Zstd => (0, 0),
        }
    }

    /// EOCD comment prefix
    pub const fn comment_prefix(self) -> &'static str {
        match self {
            Self::Deflate => TORRENTZIP_PREFIX,
            Self::Zstd => RVZSTD_PREFIX,
        }
    }

    /// EOCD comment for a central directory with CRC32 `crc`
    pub fn comment(self, crc: u32) -> String {
        format!("{}{}", self.comment_prefix(), to_hex_upper(crc))
    }
}

impl fmt::Display for TorrentZipMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deflate => write!(f, "deflate"),
            Self::Zstd => write!(f, "zstd"),
        }
    }
}

impl FromStr for TorrentZipMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "deflate" | "torrentzip" => Ok(Self::Deflate),
            "zstd" | "rvzstd" => Ok(Self::Zstd),
            other => Err(format!("unknown method: {other}")),
        }
    }
}

/// Deflate implementation compiled into the writer.
///
/// Only a zlib backend (`zlib` or `zlib-rs` feature) reproduces the
/// TorrentZip reference byte stream; `miniz_oxide` output validates but
/// differs from archives written by other tools.
pub const fn deflate_backend() -> &'static str {
    if cfg!(feature = "zlib") {
        "zlib"
    } else if cfg!(feature = "zlib-rs") {
        "zlib-rs"
    } else {
        "miniz_oxide"
    }
}
