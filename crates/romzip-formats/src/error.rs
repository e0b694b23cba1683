//! ZIP error types

use crate::record::CompressionMethod;
use std::fmt;
use thiserror::Error;

/// Result type for ZIP operations
pub type ZipResult<T> = Result<T, ZipError>;

/// Errors raised while locating, parsing or streaming ZIP structures
#[derive(Debug, Error)]
pub enum ZipError {
    /// A fixed record did not start with its signature
    #[error(
        "invalid {structure} signature at offset 0x{offset:08X}: expected 0x{expected:08X}, got 0x{found:08X}"
    )]
    InvalidSignature {
        /// Name of the record that was expected
        structure: &'static str,
        /// Absolute byte offset of the record
        offset: u64,
        /// Signature the record must carry
        expected: u32,
        /// Signature actually read
        found: u32,
    },

    /// No end of central directory signature in the trailing window
    #[error("end of central directory not found in the last {searched} bytes")]
    EocdNotFound {
        /// Number of trailing bytes scanned
        searched: u64,
    },

    /// A record extends past the end of the source
    #[error("{structure} truncated at offset 0x{offset:08X}")]
    Truncated {
        /// Name of the truncated record
        structure: &'static str,
        /// Absolute byte offset of the record
        offset: u64,
    },

    /// Offset plus length of a region does not fit in 64 bits
    #[error("{structure} at offset 0x{offset:08X} with length {length} overflows the address space")]
    OutOfRange {
        /// Name of the region
        structure: &'static str,
        /// Declared start offset
        offset: u64,
        /// Declared length
        length: u64,
    },

    /// Archive spans several disks
    #[error("multi-disk archives are not supported (disks: {disk_count}, central directory disk: {cd_disk})")]
    MultiDisk {
        /// Declared number of disks
        disk_count: u32,
        /// Disk holding the start of the central directory
        cd_disk: u32,
    },

    /// Entry uses a compression method that cannot be extracted
    #[error("unsupported compression method: {0}")]
    UnsupportedCompression(CompressionMethod),

    /// Entry is encrypted
    #[error("entry is encrypted: {0}")]
    EncryptedEntry(String),

    /// Decompressed output grew past the declared uncompressed size
    #[error(transparent)]
    ZipBomb(#[from] ZipBombError),

    /// Decompressed output does not match the declared CRC32
    #[error("checksum mismatch for {name}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Entry name
        name: String,
        /// Declared CRC32 (hex)
        expected: String,
        /// Computed CRC32 (hex)
        actual: String,
    },

    /// Decompressed output is shorter than the declared uncompressed size
    #[error("size mismatch for {name}: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        /// Entry name
        name: String,
        /// Declared uncompressed size
        expected: u64,
        /// Bytes actually produced
        actual: u64,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(std::io::Error),

    /// Binary parsing error
    #[error("binary parsing error: {0}")]
    BinRw(#[from] binrw::Error),
}

impl ZipError {
    /// Structurally invalid input; never worth retrying
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidSignature { .. }
                | Self::EocdNotFound { .. }
                | Self::Truncated { .. }
                | Self::OutOfRange { .. }
                | Self::BinRw(_)
        )
    }

    /// Structurally valid input this crate does not handle
    pub fn is_unsupported(&self) -> bool {
        matches!(
            self,
            Self::MultiDisk { .. } | Self::UnsupportedCompression(_) | Self::EncryptedEntry(_)
        )
    }

    /// Decompression exceeded the declared size
    pub fn is_zip_bomb(&self) -> bool {
        matches!(self, Self::ZipBomb(_))
    }

    /// End of the region `[offset, offset + length)`
    pub(crate) fn region_end(structure: &'static str, offset: u64, length: u64) -> ZipResult<u64> {
        offset.checked_add(length).ok_or(Self::OutOfRange {
            structure,
            offset,
            length,
        })
    }

    pub(crate) fn truncated_or(structure: &'static str, offset: u64, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            Self::Truncated { structure, offset }
        } else {
            Self::from(err)
        }
    }
}

impl From<std::io::Error> for ZipError {
    fn from(err: std::io::Error) -> Self {
        // Decoders surface the guard through `io::Error`
        if let Some(bomb) = err
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<ZipBombError>())
            .copied()
        {
            return Self::ZipBomb(bomb);
        }
        Self::Io(err)
    }
}

/// Raised by [`ZipBombGuard`](crate::stream::ZipBombGuard) once more bytes
/// come out of a decoder than the entry declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZipBombError {
    /// Declared uncompressed size
    pub limit: u64,
    /// Bytes produced when the guard tripped
    pub produced: u64,
}

impl fmt::Display for ZipBombError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "zip bomb: decompressed {} bytes but the entry declares {}",
            self.produced, self.limit
        )
    }
}

impl std::error::Error for ZipBombError {}

impl From<ZipBombError> for std::io::Error {
    fn from(err: ZipBombError) -> Self {
        Self::other(err)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_zip_bomb_survives_io_round_trip() {
        let io: std::io::Error = ZipBombError {
            limit: 10,
            produced: 11,
        }
        .into();
        let err = ZipError::from(io);
        assert!(err.is_zip_bomb());
        assert!(!err.is_format_error());
    }

    #[test]
    fn test_signature_error_reports_offset_and_values() {
        let err = ZipError::InvalidSignature {
            structure: "local file header",
            offset: 0x1234,
            expected: 0x0403_4b50,
            found: 0xDEAD_BEEF,
        };
        let message = err.to_string();
        assert!(message.contains("0x00001234"));
        assert!(message.contains("0x04034B50"));
        assert!(message.contains("0xDEADBEEF"));
        assert!(err.is_format_error());
    }

    #[test]
    fn test_unexpected_eof_becomes_truncated() {
        let eof = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "short");
        let err = ZipError::truncated_or("end of central directory", 7, eof);
        assert!(matches!(err, ZipError::Truncated { offset: 7, .. }));
    }
}
