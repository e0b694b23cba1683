//! Deterministic TorrentZip and RVZSTD archives
//!
#![allow(clippy::cast_possible_truncation)] // Header fields are clamped before narrowing
#![allow(clippy::uninlined_format_args)] // Backwards compatibility
#![allow(clippy::module_name_repetitions)] // Clear naming is preferred
//! TorrentZip archives hold the same bytes whenever they hold the same
//! files: entries are sorted, compressed with fixed settings, stamped with a
//! fixed date, and the archive comment carries the CRC32 of the central
//! directory. RVZSTD is the same idea with zstd in place of deflate.
//!
//! This crate writes such archives with [`TorrentZipWriter`] and classifies
//! existing ones with [`validate`].
//!
//! # Example
//!
//! ```rust,no_run
//! use romzip_torrentzip::{TorrentZipMethod, TorrentZipWriter, validate_path};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let mut writer = TorrentZipWriter::open("set.zip", TorrentZipMethod::Deflate).await?;
//! let rom = tokio::fs::File::open("game.rom").await?;
//! let size = rom.metadata().await?.len();
//! writer.add_stream(rom, "game.rom", size, 1).await?;
//! writer.finalize().await?;
//!
//! assert!(validate_path("set.zip")?.is_valid());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod header;
pub mod method;
pub mod validator;
pub mod writer;

pub use config::WriterConfig;
pub use error::{TorrentZipError, TorrentZipResult};
pub use method::TorrentZipMethod;
pub use validator::{InvalidReason, ValidationOutcome, validate, validate_archive, validate_path};
pub use writer::{TorrentZipWriter, WrittenHeader};
