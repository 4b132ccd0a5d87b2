//! blake3 helpers for block checksums and row partitioning.

use blake3::Hasher;

use crate::types::Scalar;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    pub fn to_hex(&self) -> String {
        let mut s = String::with_capacity(64);
        for b in &self.0 {
            use std::fmt::Write as _;
            let _ = write!(&mut s, "{:02x}", b);
        }
        s
    }
}

impl std::fmt::Display for Hash256 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

pub fn hash_bytes(bytes: &[u8]) -> Hash256 {
    let mut h = Hasher::new();
    h.update(bytes);
    Hash256(h.finalize().into())
}

/// Hash several byte slices as if they were concatenated.
pub fn hash_parts(parts: &[&[u8]]) -> Hash256 {
    let mut h = Hasher::new();
    for p in parts {
        h.update(p);
    }
    Hash256(h.finalize().into())
}

/// Stable 64-bit hash of a row's key values. Used to route rows to buckets.
pub fn hash_row_key(values: &[&Scalar]) -> u64 {
    let mut h = Hasher::new();
    for v in values {
        hash_scalar(v, &mut h);
    }
    let out = h.finalize();
    let mut first = [0u8; 8];
    first.copy_from_slice(&out.as_bytes()[0..8]);
    u64::from_le_bytes(first)
}

fn hash_scalar(scalar: &Scalar, hasher: &mut Hasher) {
    hasher.update(&[scalar.type_tag()]);
    match scalar {
        Scalar::Null => {}
        Scalar::Bool(b) => {
            hasher.update(&[*b as u8]);
        }
        Scalar::I64(i) => {
            hasher.update(&i.to_le_bytes());
        }
        Scalar::F64(f) => {
            hasher.update(&f.to_bits().to_le_bytes());
        }
        Scalar::Str(s) => {
            // length prefix keeps ("ab","c") and ("a","bc") apart
            hasher.update(&(s.len() as u64).to_le_bytes());
            hasher.update(s.as_bytes());
        }
        Scalar::Bin(b) => {
            hasher.update(&(b.len() as u64).to_le_bytes());
            hasher.update(b);
        }
    }
}
