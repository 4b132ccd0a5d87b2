#![forbid(unsafe_code)]
//! strata-codec: the codec layer under the block store.
//!
//! - `encoding`: value encodings (dense int/float/string, tagged fallback)
//! - `codec`: optional block compression (zstd / lz4 behind features)
//! - `block`: block framing with a fixed header and blake3 checksum,
//!   `encode_block` / `decode_block`
//!
//! Nothing here knows about files; offsets in `BlockInfo` are filled in by the
//! writer that places the bytes.

pub mod block;
pub mod codec;
pub mod encoding;
pub mod error;

pub use block::{decode_block, encode_block, verify_block, BlockHeader, BlockInfo, EncodedBlock};
pub use codec::Codec;
pub use encoding::Encoding;
pub use error::{Error, Result};
