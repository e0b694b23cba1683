//! In-memory archive builder for unit tests

#![allow(clippy::expect_used, clippy::cast_possible_truncation)]

use crate::crc;
use crate::source::ReadAt;
use flate2::Compression;
use flate2::write::DeflateEncoder;
use std::io::{self, Write};
use std::ops::Deref;

/// One entry to lay down in a [`ZipImage`]
#[derive(Debug, Clone)]
pub(crate) struct EntrySpec {
    name: Vec<u8>,
    stored: Vec<u8>,
    crc32: u32,
    uncompressed_len: u32,
    method: u16,
    flags: u16,
    extra: Vec<u8>,
    declared_sizes: Option<(u32, u32)>,
}

impl EntrySpec {
    pub(crate) fn stored(name: Vec<u8>, data: &[u8]) -> Self {
        Self {
            name,
            stored: data.to_vec(),
            crc32: crc::crc32(data),
            uncompressed_len: data.len() as u32,
            method: 0,
            flags: 0,
            extra: Vec::new(),
            declared_sizes: None,
        }
    }

    pub(crate) fn deflated(name: Vec<u8>, data: &[u8]) -> Self {
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).expect("deflate");
        Self {
            stored: encoder.finish().expect("deflate"),
            method: 8,
            ..Self::stored(name, data)
        }
    }

    pub(crate) fn utf8(mut self) -> Self {
        self.flags |= 0x0800;
        self
    }

    pub(crate) fn encrypted(mut self) -> Self {
        self.flags |= 0x0001;
        self
    }

    pub(crate) fn data_descriptor(mut self) -> Self {
        self.flags |= 0x0008;
        self
    }

    pub(crate) fn extra(mut self, id: u16, data: &[u8]) -> Self {
        self.extra.extend_from_slice(&id.to_le_bytes());
        self.extra
            .extend_from_slice(&(data.len() as u16).to_le_bytes());
        self.extra.extend_from_slice(data);
        self
    }

    /// Override the declared compressed and uncompressed sizes
    pub(crate) fn sizes(mut self, compressed: u32, uncompressed: u32) -> Self {
        self.declared_sizes = Some((compressed, uncompressed));
        self
    }

    fn declared(&self) -> (u32, u32) {
        self.declared_sizes
            .unwrap_or((self.stored.len() as u32, self.uncompressed_len))
    }

    fn common(&self, deferred: bool) -> Vec<u8> {
        let (compressed, uncompressed) = if deferred { (0, 0) } else { self.declared() };
        let crc32 = if deferred { 0 } else { self.crc32 };
        let mut out = Vec::new();
        out.extend_from_slice(&20u16.to_le_bytes());
        out.extend_from_slice(&self.flags.to_le_bytes());
        out.extend_from_slice(&self.method.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0x2100u16.to_le_bytes());
        out.extend_from_slice(&crc32.to_le_bytes());
        out.extend_from_slice(&compressed.to_le_bytes());
        out.extend_from_slice(&uncompressed.to_le_bytes());
        out.extend_from_slice(&(self.name.len() as u16).to_le_bytes());
        out.extend_from_slice(&(self.extra.len() as u16).to_le_bytes());
        out
    }
}

/// Builder for a single-disk archive of entries followed by a central
/// directory and EOCD
#[derive(Debug, Default)]
pub(crate) struct ZipImage {
    bytes: Vec<u8>,
    central: Vec<u8>,
    count: u16,
}

impl ZipImage {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn stored(self, name: &str, data: &[u8]) -> Self {
        self.entry(EntrySpec::stored(name.as_bytes().to_vec(), data))
    }

    pub(crate) fn entry(mut self, spec: EntrySpec) -> Self {
        let offset = self.bytes.len() as u32;
        let deferred = spec.flags & 0x0008 != 0;

        self.bytes.extend_from_slice(&0x0403_4b50u32.to_le_bytes());
        self.bytes.extend(spec.common(deferred));
        self.bytes.extend_from_slice(&spec.name);
        self.bytes.extend_from_slice(&spec.extra);
        self.bytes.extend_from_slice(&spec.stored);
        if deferred {
            let (compressed, uncompressed) = spec.declared();
            self.bytes.extend_from_slice(&0x0807_4b50u32.to_le_bytes());
            self.bytes.extend_from_slice(&spec.crc32.to_le_bytes());
            self.bytes.extend_from_slice(&compressed.to_le_bytes());
            self.bytes.extend_from_slice(&uncompressed.to_le_bytes());
        }

        self.central
            .extend_from_slice(&0x0201_4b50u32.to_le_bytes());
        self.central.extend_from_slice(&20u16.to_le_bytes());
        self.central.extend(spec.common(false));
        // comment length, disk, internal and external attributes
        self.central.extend_from_slice(&[0u8; 10]);
        self.central.extend_from_slice(&offset.to_le_bytes());
        self.central.extend_from_slice(&spec.name);
        self.central.extend_from_slice(&spec.extra);
        self.count += 1;
        self
    }

    pub(crate) fn finish(mut self, comment: &[u8]) -> BuiltZip {
        let cd_offset = self.bytes.len() as u32;
        let cd_size = self.central.len() as u32;
        self.bytes.append(&mut self.central);
        self.bytes
            .extend(eocd_bytes(self.count, cd_size, cd_offset, comment));
        BuiltZip {
            bytes: self.bytes,
            cd_offset: u64::from(cd_offset),
        }
    }
}

/// A finished archive image
#[derive(Debug, Clone)]
pub(crate) struct BuiltZip {
    bytes: Vec<u8>,
    cd_offset: u64,
}

impl BuiltZip {
    pub(crate) fn cd_offset(&self) -> u64 {
        self.cd_offset
    }
}

impl Deref for BuiltZip {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.bytes
    }
}

impl From<BuiltZip> for Vec<u8> {
    fn from(image: BuiltZip) -> Self {
        image.bytes
    }
}

impl ReadAt for BuiltZip {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        self.bytes.read_at(buf, offset)
    }

    fn size(&self) -> io::Result<u64> {
        Ok(self.bytes.len() as u64)
    }
}

/// Classic EOCD with `records` on this disk and in total
pub(crate) fn eocd_bytes(records: u16, cd_size: u32, cd_offset: u32, comment: &[u8]) -> Vec<u8> {
    let mut out = 0x0605_4b50u32.to_le_bytes().to_vec();
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&records.to_le_bytes());
    out.extend_from_slice(&records.to_le_bytes());
    out.extend_from_slice(&cd_size.to_le_bytes());
    out.extend_from_slice(&cd_offset.to_le_bytes());
    out.extend_from_slice(&(comment.len() as u16).to_le_bytes());
    out.extend_from_slice(comment);
    out
}

/// Zip64 EOCD record without extensible data
pub(crate) fn zip64_eocd_bytes(records: u64, cd_size: u64, cd_offset: u64) -> Vec<u8> {
    let mut out = 0x0606_4b50u32.to_le_bytes().to_vec();
    out.extend_from_slice(&44u64.to_le_bytes());
    out.extend_from_slice(&45u16.to_le_bytes());
    out.extend_from_slice(&45u16.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&records.to_le_bytes());
    out.extend_from_slice(&records.to_le_bytes());
    out.extend_from_slice(&cd_size.to_le_bytes());
    out.extend_from_slice(&cd_offset.to_le_bytes());
    out
}

/// Zip64 locator pointing at `offset`
pub(crate) fn zip64_locator_bytes(offset: u64, disk_count: u32) -> Vec<u8> {
    let mut out = 0x0706_4b50u32.to_le_bytes().to_vec();
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&offset.to_le_bytes());
    out.extend_from_slice(&disk_count.to_le_bytes());
    out
}
