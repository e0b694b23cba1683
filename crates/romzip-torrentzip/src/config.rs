//! Writer configuration

use crate::error::{TorrentZipError, TorrentZipResult};
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;

/// Tuning for [`TorrentZipWriter`](crate::TorrentZipWriter)
///
/// None of these affect the bytes written; output is identical for any
/// valid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    /// Zstd worker threads per entry
    pub compressor_threads: usize,

    /// Bytes read from the source per chunk
    pub chunk_size: usize,

    /// Chunks buffered between the reader and the compressor
    pub queue_depth: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            compressor_threads: std::thread::available_parallelism().map_or(1, NonZeroUsize::get),
            chunk_size: 64 * 1024,
            queue_depth: 8,
        }
    }
}

impl WriterConfig {
    /// Set the compressor thread count
    #[must_use]
    pub const fn with_compressor_threads(mut self, threads: usize) -> Self {
        self.compressor_threads = threads;
        self
    }

    /// Set the read chunk size
    #[must_use]
    pub const fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    /// Set the reader-to-compressor queue depth
    #[must_use]
    pub const fn with_queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth;
        self
    }

    /// Reject zero-valued settings
    pub fn validate(&self) -> TorrentZipResult<()> {
        if self.compressor_threads == 0 {
            return Err(TorrentZipError::InvalidConfig(
                "compressor_threads must be at least 1".to_string(),
            ));
        }
        if self.chunk_size == 0 {
            return Err(TorrentZipError::InvalidConfig(
                "chunk_size must be at least 1".to_string(),
            ));
        }
        if self.queue_depth == 0 {
            return Err(TorrentZipError::InvalidConfig(
                "queue_depth must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = WriterConfig::default();
        assert!(config.compressor_threads >= 1);
        assert_eq!(config.chunk_size, 65536);
        config.validate().expect("default config is valid");
    }

    #[test]
    fn test_zero_values_rejected() {
        for config in [
            WriterConfig::default().with_compressor_threads(0),
            WriterConfig::default().with_chunk_size(0),
            WriterConfig::default().with_queue_depth(0),
        ] {
            assert!(matches!(
                config.validate(),
                Err(TorrentZipError::InvalidConfig(_))
            ));
        }
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: WriterConfig =
            serde_json::from_str(r#"{"queue_depth": 2}"#).expect("deserialize");
        assert_eq!(config.queue_depth, 2);
        assert_eq!(config.chunk_size, WriterConfig::default().chunk_size);

        let json = serde_json::to_string(&config).expect("serialize");
        let back: WriterConfig = serde_json::from_str(&json).expect("round trip");
        assert_eq!(back, config);
    }
}
