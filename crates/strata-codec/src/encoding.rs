//! Value encodings for one column block.
//!
//! The writer picks the densest encoding that fits every value in the block:
//! - `Int64` / `Float64`: little-endian fixed width, no nulls
//! - `Utf8`: u32 length prefix per string, no nulls
//! - `Tagged`: one type tag byte per value, then its payload (anything goes)

use serde::{Deserialize, Serialize};
use strata_core::types::Scalar;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Encoding {
    Tagged = 0,
    Int64 = 1,
    Float64 = 2,
    Utf8 = 3,
}

impl Encoding {
    /// Fewest bytes one encoded value can take.
    fn min_value_bytes(self) -> usize {
        match self {
            Encoding::Int64 | Encoding::Float64 => 8,
            Encoding::Utf8 => 4,
            Encoding::Tagged => 1,
        }
    }

    pub fn from_u8(v: u8) -> Result<Self> {
        match v {
            0 => Ok(Encoding::Tagged),
            1 => Ok(Encoding::Int64),
            2 => Ok(Encoding::Float64),
            3 => Ok(Encoding::Utf8),
            other => Err(Error::Corrupt(format!("unknown encoding id {other}"))),
        }
    }

    /// Densest encoding able to represent all of `values`.
    pub fn choose(values: &[Scalar]) -> Encoding {
        let Some(first) = values.first() else {
            return Encoding::Tagged;
        };
        let candidate = match first {
            Scalar::I64(_) => Encoding::Int64,
            Scalar::F64(_) => Encoding::Float64,
            Scalar::Str(_) => Encoding::Utf8,
            _ => return Encoding::Tagged,
        };
        let uniform = values.iter().all(|v| {
            matches!(
                (candidate, v),
                (Encoding::Int64, Scalar::I64(_))
                    | (Encoding::Float64, Scalar::F64(_))
                    | (Encoding::Utf8, Scalar::Str(_))
            )
        });
        if uniform {
            candidate
        } else {
            Encoding::Tagged
        }
    }
}

/// Encode `values` with `encoding` into `out`. The encoding must fit every value.
pub fn encode_values(encoding: Encoding, values: &[Scalar], out: &mut Vec<u8>) -> Result<()> {
    match encoding {
        Encoding::Int64 => {
            out.reserve(values.len() * 8);
            for v in values {
                let Scalar::I64(i) = v else {
                    return Err(mismatch(encoding, v));
                };
                out.extend_from_slice(&i.to_le_bytes());
            }
        }
        Encoding::Float64 => {
            out.reserve(values.len() * 8);
            for v in values {
                let Scalar::F64(f) = v else {
                    return Err(mismatch(encoding, v));
                };
                out.extend_from_slice(&f.to_bits().to_le_bytes());
            }
        }
        Encoding::Utf8 => {
            for v in values {
                let Scalar::Str(s) = v else {
                    return Err(mismatch(encoding, v));
                };
                put_bytes(out, s.as_bytes())?;
            }
        }
        Encoding::Tagged => {
            for v in values {
                out.push(v.type_tag());
                match v {
                    Scalar::Null => {}
                    Scalar::Bool(b) => out.push(*b as u8),
                    Scalar::I64(i) => out.extend_from_slice(&i.to_le_bytes()),
                    Scalar::F64(f) => out.extend_from_slice(&f.to_bits().to_le_bytes()),
                    Scalar::Str(s) => put_bytes(out, s.as_bytes())?,
                    Scalar::Bin(b) => put_bytes(out, b)?,
                }
            }
        }
    }
    Ok(())
}

/// Decode exactly `num_rows` values; trailing bytes are an error.
pub fn decode_values(encoding: Encoding, bytes: &[u8], num_rows: usize) -> Result<Vec<Scalar>> {
    let mut cur = Cursor { bytes, pos: 0 };
    // The row count is not covered by the block checksum.
    let mut out = Vec::with_capacity(num_rows.min(bytes.len() / encoding.min_value_bytes()));
    for _ in 0..num_rows {
        let v = match encoding {
            Encoding::Int64 => Scalar::I64(i64::from_le_bytes(cur.take_array()?)),
            Encoding::Float64 => Scalar::F64(f64::from_bits(u64::from_le_bytes(cur.take_array()?))),
            Encoding::Utf8 => Scalar::Str(cur.take_string()?),
            Encoding::Tagged => match cur.take_array::<1>()?[0] {
                0 => Scalar::Null,
                1 => Scalar::Bool(cur.take_array::<1>()?[0] != 0),
                2 => Scalar::I64(i64::from_le_bytes(cur.take_array()?)),
                3 => Scalar::F64(f64::from_bits(u64::from_le_bytes(cur.take_array()?))),
                4 => Scalar::Str(cur.take_string()?),
                5 => Scalar::Bin(cur.take_prefixed()?.to_vec()),
                tag => return Err(Error::Corrupt(format!("unknown value tag {tag}"))),
            },
        };
        out.push(v);
    }
    if cur.pos != bytes.len() {
        return Err(Error::Corrupt(format!(
            "{} trailing bytes after {num_rows} values",
            bytes.len() - cur.pos
        )));
    }
    Ok(out)
}

fn mismatch(encoding: Encoding, v: &Scalar) -> Error {
    Error::Codec(format!("value {v:?} does not fit {encoding:?} encoding"))
}

fn put_bytes(out: &mut Vec<u8>, b: &[u8]) -> Result<()> {
    let len = u32::try_from(b.len())
        .map_err(|_| Error::Codec(format!("value of {} bytes too large", b.len())))?;
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(b);
    Ok(())
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&e| e <= self.bytes.len())
            .ok_or_else(|| Error::Corrupt(format!("truncated block at byte {}", self.pos)))?;
        let s = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(s)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut a = [0u8; N];
        a.copy_from_slice(self.take(N)?);
        Ok(a)
    }

    fn take_prefixed(&mut self) -> Result<&'a [u8]> {
        let len = u32::from_le_bytes(self.take_array()?) as usize;
        self.take(len)
    }

    fn take_string(&mut self) -> Result<String> {
        let b = self.take_prefixed()?;
        String::from_utf8(b.to_vec()).map_err(|e| Error::Corrupt(format!("invalid utf8: {e}")))
    }
}
