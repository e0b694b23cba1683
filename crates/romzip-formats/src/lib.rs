//! ZIP container parsing for ROM archives
//!
#![allow(clippy::cast_possible_truncation)] // Intentional for binary format parsing
#![allow(clippy::cast_lossless)] // Sometimes clearer than From
#![allow(clippy::uninlined_format_args)] // Backwards compatibility
#![allow(clippy::module_name_repetitions)] // Clear naming is preferred
#![allow(clippy::similar_names)] // Field names mirror the wire format
#![allow(clippy::redundant_closure_for_method_calls)] // Iterator chains
//! This crate reads standard PKZIP archives, including the zip64 extensions,
//! through a positioned [`source::ReadAt`] source. It is the foundation for
//! the TorrentZip and RVZSTD tooling in `romzip-torrentzip`.
//!
//! # Components
//!
//! - **EOCD**: locate the end of central directory and resolve zip64 values
//! - **Records**: central directory and local file headers with extra
//!   fields, zip64 overrides and timestamp resolution
//! - **Streams**: compressed and decompressed entry data, with decompressed
//!   output capped at the declared size
//! - **Archive**: an opened archive tying the above together
//!
//! # Example
//!
//! ```rust,no_run
//! use romzip_formats::ZipArchive;
//! use std::io::Read;
//!
//! let archive = ZipArchive::open_path("games.zip")?;
//! for central in archive.entries() {
//!     let entry = archive.resolve(central)?;
//!     let mut data = Vec::new();
//!     archive.uncompressed_stream(&entry)?.read_to_end(&mut data)?;
//!     println!("{}: {} bytes", entry.file_name, data.len());
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![warn(missing_docs)]

pub mod archive;
pub mod cp437;
pub mod crc;
pub mod eocd;
pub mod error;
pub mod extra_field;
pub mod fixed;
pub mod record;
pub mod source;
pub mod stream;
pub mod timestamp;

#[cfg(test)]
pub(crate) mod test_utils;

pub use archive::ZipArchive;
pub use eocd::EndOfCentralDirectory;
pub use error::{ZipBombError, ZipError, ZipResult};
pub use record::{
    CentralDirectoryRecord, CompressionMethod, FileRecord, GeneralPurposeFlags, LocalRecord,
    ResolvedEntry,
};
pub use source::{ReadAt, WriteAt};
pub use timestamp::FileTimestamps;
