//! Error types for TorrentZip writing and validation

use romzip_formats::ZipError;
use thiserror::Error;

/// Result type for TorrentZip operations
pub type TorrentZipResult<T> = Result<T, TorrentZipError>;

/// Errors raised by the writer, the validator's I/O, or configuration
#[derive(Debug, Error)]
pub enum TorrentZipError {
    /// Underlying ZIP parsing failed
    #[error(transparent)]
    Zip(#[from] ZipError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A previous write failed; the archive cannot be finalized
    #[error("writer is poisoned by an earlier failure")]
    Poisoned,

    /// Source produced a different number of bytes than promised
    #[error("size mismatch for {name}: hinted {hint} bytes below the zip64 threshold, got {actual}")]
    SizeMismatch {
        /// Entry name
        name: String,
        /// Size hint given to `add_stream`
        hint: u64,
        /// Bytes actually read
        actual: u64,
    },

    /// Entry needs zip64 fields it was not written with
    #[error("entry {name} is too large for a non-zip64 header ({size} bytes)")]
    EntryTooLarge {
        /// Entry name
        name: String,
        /// Offending size
        size: u64,
    },

    /// Encoded file name does not fit in 16 bits
    #[error("file name is {length} bytes, at most 65535 are allowed")]
    FileNameTooLong {
        /// Encoded length
        length: usize,
    },

    /// Writer configuration is unusable
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Blocking compression task panicked or was cancelled
    #[error("compression task failed: {0}")]
    TaskFailed(#[from] tokio::task::JoinError),
}

impl TorrentZipError {
    /// Whether the error left the writer unusable
    pub fn is_poisoning(&self) -> bool {
        !matches!(
            self,
            Self::InvalidConfig(_) | Self::FileNameTooLong { .. }
        )
    }
}
