//! Block framing and metadata.
//!
//! Layout of one stored block:
//! [ magic: u32 ][ version: u16 ][ encoding: u8 ][ codec: u8 ]
//! [ num_rows: u64 ][ uncompressed_len: u64 ][ compressed_len: u64 ]
//! [ payload bytes … ]
//!
//! The blake3 checksum covers (header || payload) and is kept in `BlockInfo`,
//! which the segment trailer stores. Copying a block to another file only
//! changes `BlockInfo::offset`.

use serde::{Deserialize, Serialize};
use strata_core::hash::{hash_bytes, Hash256};
use strata_core::types::Scalar;

use crate::codec::{self, Codec};
use crate::encoding::{self, Encoding};
use crate::error::{Error, Result};

pub const MAGIC: u32 = 0x5354_4B42; // "STKB"
pub const VERSION: u16 = 1;
pub const HEADER_LEN: usize = 4 + 2 + 1 + 1 + 8 + 8 + 8;

/// Sanity bound against corrupt length fields.
const MAX_BLOCK_BYTES: u64 = 1 << 31;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub magic: u32,
    pub version: u16,
    pub encoding: Encoding,
    pub codec: Codec,
    pub num_rows: u64,
    pub uncompressed_len: u64,
    pub compressed_len: u64,
}

impl BlockHeader {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN);
        out.extend_from_slice(&self.magic.to_le_bytes());
        out.extend_from_slice(&self.version.to_le_bytes());
        out.push(self.encoding as u8);
        out.push(self.codec as u8);
        out.extend_from_slice(&self.num_rows.to_le_bytes());
        out.extend_from_slice(&self.uncompressed_len.to_le_bytes());
        out.extend_from_slice(&self.compressed_len.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(Error::Corrupt("short block header".into()));
        }
        let magic = u32::from_le_bytes(le(&bytes[0..4]));
        let version = u16::from_le_bytes(le(&bytes[4..6]));
        if magic != MAGIC || version != VERSION {
            return Err(Error::Corrupt(format!(
                "bad magic/version {magic:#x}/{version}"
            )));
        }
        let header = Self {
            magic,
            version,
            encoding: Encoding::from_u8(bytes[6])?,
            codec: Codec::from_u8(bytes[7])?,
            num_rows: u64::from_le_bytes(le(&bytes[8..16])),
            uncompressed_len: u64::from_le_bytes(le(&bytes[16..24])),
            compressed_len: u64::from_le_bytes(le(&bytes[24..32])),
        };
        header.validate_sizes()?;
        Ok(header)
    }

    /// Reject sizes that would trigger huge allocations on corrupt input.
    fn validate_sizes(&self) -> Result<()> {
        if self.uncompressed_len > MAX_BLOCK_BYTES || self.compressed_len > MAX_BLOCK_BYTES {
            return Err(Error::Corrupt(format!(
                "block sizes out of range: {} / {}",
                self.uncompressed_len, self.compressed_len
            )));
        }
        if self.codec == Codec::None && self.compressed_len != self.uncompressed_len {
            return Err(Error::Corrupt(
                "uncompressed block with differing lengths".into(),
            ));
        }
        Ok(())
    }
}

fn le<const N: usize>(b: &[u8]) -> [u8; N] {
    let mut a = [0u8; N];
    a.copy_from_slice(b);
    a
}

/// Per-block metadata kept in the segment trailer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInfo {
    /// Byte offset of the block inside its segment file.
    pub offset: u64,
    /// Stored length, header included.
    pub length: u64,
    pub num_rows: u64,
    pub encoding: Encoding,
    pub codec: Codec,
    pub uncompressed_len: u64,
    pub checksum: Hash256,
}

/// Framed block bytes plus their metadata, ready to append to a segment.
#[derive(Debug, Clone)]
pub struct EncodedBlock {
    pub info: BlockInfo,
    pub bytes: Vec<u8>,
}

/// Encode and frame one column block.
pub fn encode_block(values: &[Scalar], codec: Codec) -> Result<EncodedBlock> {
    let enc = Encoding::choose(values);
    let mut raw = Vec::new();
    encoding::encode_values(enc, values, &mut raw)?;
    let payload = codec::compress(codec, &raw)?;

    let header = BlockHeader {
        magic: MAGIC,
        version: VERSION,
        encoding: enc,
        codec,
        num_rows: values.len() as u64,
        uncompressed_len: raw.len() as u64,
        compressed_len: payload.len() as u64,
    };
    let mut bytes = header.to_bytes();
    bytes.extend_from_slice(&payload);
    let checksum = hash_bytes(&bytes);

    Ok(EncodedBlock {
        info: BlockInfo {
            offset: 0,
            length: bytes.len() as u64,
            num_rows: header.num_rows,
            encoding: enc,
            codec,
            uncompressed_len: header.uncompressed_len,
            checksum,
        },
        bytes,
    })
}

/// Check stored bytes against their metadata without decoding values.
pub fn verify_block(bytes: &[u8], info: &BlockInfo) -> Result<BlockHeader> {
    if bytes.len() as u64 != info.length {
        return Err(Error::Corrupt(format!(
            "block length {} does not match recorded {}",
            bytes.len(),
            info.length
        )));
    }
    let actual = hash_bytes(bytes);
    if actual != info.checksum {
        return Err(Error::ChecksumMismatch {
            expected: info.checksum.to_hex(),
            actual: actual.to_hex(),
        });
    }
    let header = BlockHeader::from_bytes(bytes)?;
    if header.num_rows != info.num_rows
        || header.encoding != info.encoding
        || header.codec != info.codec
        || HEADER_LEN as u64 + header.compressed_len != info.length
    {
        return Err(Error::Corrupt("block header disagrees with block info".into()));
    }
    Ok(header)
}

/// Verify, decompress and decode a stored block.
pub fn decode_block(bytes: &[u8], info: &BlockInfo) -> Result<Vec<Scalar>> {
    let header = verify_block(bytes, info)?;
    let raw = codec::decompress(header.codec, &bytes[HEADER_LEN..])?;
    if raw.len() as u64 != header.uncompressed_len {
        return Err(Error::Corrupt(format!(
            "decompressed {} bytes, header says {}",
            raw.len(),
            header.uncompressed_len
        )));
    }
    encoding::decode_values(header.encoding, &raw, header.num_rows as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<Scalar> {
        (0..100).map(Scalar::I64).collect()
    }

    #[test]
    fn header_round_trip() {
        let block = encode_block(&sample(), Codec::None).unwrap();
        let header = BlockHeader::from_bytes(&block.bytes).unwrap();
        assert_eq!(header.num_rows, 100);
        assert_eq!(header.encoding, Encoding::Int64);
        assert_eq!(header.uncompressed_len, 800);
    }

    #[test]
    fn decode_returns_original_values() {
        let values = vec![Scalar::Str("a".into()), Scalar::Null, Scalar::Bool(false)];
        let block = encode_block(&values, Codec::None).unwrap();
        assert_eq!(block.info.encoding, Encoding::Tagged);
        assert_eq!(decode_block(&block.bytes, &block.info).unwrap(), values);
    }

    #[test]
    fn flipped_byte_fails_checksum() {
        let mut block = encode_block(&sample(), Codec::None).unwrap();
        let last = block.bytes.len() - 1;
        block.bytes[last] ^= 0xff;
        assert!(matches!(
            decode_block(&block.bytes, &block.info),
            Err(Error::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn bad_magic_is_corrupt() {
        let mut bytes = encode_block(&sample(), Codec::None).unwrap().bytes;
        bytes[0] = 0;
        assert!(matches!(BlockHeader::from_bytes(&bytes), Err(Error::Corrupt(_))));
    }

    #[cfg(feature = "zstd")]
    #[test]
    fn zstd_blocks_decode() {
        let block = encode_block(&sample(), Codec::Zstd).unwrap();
        assert_eq!(decode_block(&block.bytes, &block.info).unwrap(), sample());
    }
}
