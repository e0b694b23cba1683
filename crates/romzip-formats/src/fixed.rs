//! Fixed-size, signature-prefixed ZIP structures

use crate::error::{ZipError, ZipResult};
use crate::source::ReadAt;
use binrw::io::Cursor;
use binrw::{BinRead, BinWrite};

/// Local file header signature (`PK\x03\x04`)
pub const LOCAL_FILE_HEADER_SIGNATURE: u32 = 0x0403_4b50;
/// Central directory file header signature (`PK\x01\x02`)
pub const CENTRAL_FILE_HEADER_SIGNATURE: u32 = 0x0201_4b50;
/// End of central directory signature (`PK\x05\x06`)
pub const EOCD_SIGNATURE: u32 = 0x0605_4b50;
/// Zip64 end of central directory record signature (`PK\x06\x06`)
pub const ZIP64_EOCD_SIGNATURE: u32 = 0x0606_4b50;
/// Zip64 end of central directory locator signature (`PK\x06\x07`)
pub const ZIP64_LOCATOR_SIGNATURE: u32 = 0x0706_4b50;
/// Data descriptor signature (`PK\x07\x08`)
pub const DATA_DESCRIPTOR_SIGNATURE: u32 = 0x0807_4b50;

/// A little-endian structure of constant length starting with a signature
pub trait FixedRecord: Sized + BinRead + BinWrite {
    /// Human readable name for errors
    const NAME: &'static str;
    /// Leading signature
    const SIGNATURE: u32;
    /// Encoded length in bytes, signature included
    const LEN: usize;

    /// Decode from the start of `bytes`, which were read at `offset`
    fn decode(bytes: &[u8], offset: u64) -> ZipResult<Self>
    where
        for<'a> <Self as BinRead>::Args<'a>: Default,
    {
        let Some(fixed) = bytes.get(..Self::LEN) else {
            return Err(ZipError::Truncated {
                structure: Self::NAME,
                offset,
            });
        };
        let found = u32::from_le_bytes([fixed[0], fixed[1], fixed[2], fixed[3]]);
        if found != Self::SIGNATURE {
            return Err(ZipError::InvalidSignature {
                structure: Self::NAME,
                offset,
                expected: Self::SIGNATURE,
                found,
            });
        }
        Ok(Self::read_le(&mut Cursor::new(fixed))?)
    }

    /// Read and decode at `offset` of `source`
    fn read_from<R: ReadAt + ?Sized>(source: &R, offset: u64) -> ZipResult<Self>
    where
        for<'a> <Self as BinRead>::Args<'a>: Default,
    {
        let mut buf = vec![0u8; Self::LEN];
        source
            .read_exact_at(&mut buf, offset)
            .map_err(|e| ZipError::truncated_or(Self::NAME, offset, e))?;
        Self::decode(&buf, offset)
    }

    /// Encode to bytes
    fn to_bytes(&self) -> ZipResult<Vec<u8>>
    where
        for<'a> <Self as BinWrite>::Args<'a>: Default,
    {
        let mut cursor = Cursor::new(Vec::with_capacity(Self::LEN));
        self.write_le(&mut cursor)?;
        Ok(cursor.into_inner())
    }
}
