//! Segment file layout.
//!
//! [ block 0 ][ block 1 ] … [ trailer JSON ][ footer ]
//!
//! footer (24 bytes): [ trailer_offset: u64 LE ][ trailer_len: u64 LE ][ magic: 8 bytes ]
//!
//! The trailer lists every column's `BlockInfo`s in block order, so any
//! block can be read without scanning the file.

use std::path::Path;

use serde::{Deserialize, Serialize};
use strata_codec::BlockInfo;
use strata_io::{file_size, read_range, SegmentSink};

use crate::error::{Error, Result};

pub const FOOTER_MAGIC: [u8; 8] = *b"STRATSEG";
pub const FOOTER_LEN: usize = 24;
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentTrailer {
    pub version: u32,
    /// `columns[c]` holds column `c`'s blocks in row order.
    pub columns: Vec<Vec<BlockInfo>>,
}

impl SegmentTrailer {
    pub fn new(num_columns: usize) -> Self {
        Self {
            version: FORMAT_VERSION,
            columns: vec![Vec::new(); num_columns],
        }
    }

    pub fn num_rows(&self, column: usize) -> u64 {
        self.columns
            .get(column)
            .map(|blocks| blocks.iter().map(|b| b.num_rows).sum())
            .unwrap_or(0)
    }
}

/// Append trailer and footer. The sink must not be written to afterwards.
pub fn write_trailer(sink: &mut SegmentSink, trailer: &SegmentTrailer) -> Result<()> {
    let json = serde_json::to_vec(trailer)?;
    let offset = sink.append(&json)?;
    let mut footer = [0u8; FOOTER_LEN];
    footer[0..8].copy_from_slice(&offset.to_le_bytes());
    footer[8..16].copy_from_slice(&(json.len() as u64).to_le_bytes());
    footer[16..24].copy_from_slice(&FOOTER_MAGIC);
    sink.append(&footer)?;
    Ok(())
}

/// Read and validate the trailer of a finished segment file.
pub fn read_trailer(path: &Path) -> Result<SegmentTrailer> {
    let size = file_size(path)?;
    if size < FOOTER_LEN as u64 {
        return Err(Error::corrupt(path, format!("file of {size} bytes has no footer")));
    }
    let footer = read_range(path, size - FOOTER_LEN as u64, FOOTER_LEN)?;
    if footer[16..24] != FOOTER_MAGIC {
        return Err(Error::corrupt(path, "bad footer magic"));
    }
    let mut word = [0u8; 8];
    word.copy_from_slice(&footer[0..8]);
    let trailer_offset = u64::from_le_bytes(word);
    word.copy_from_slice(&footer[8..16]);
    let trailer_len = u64::from_le_bytes(word);
    if trailer_offset.checked_add(trailer_len) != Some(size - FOOTER_LEN as u64) {
        return Err(Error::corrupt(
            path,
            format!("trailer [{trailer_offset}, +{trailer_len}) does not end at the footer"),
        ));
    }

    let bytes = read_range(path, trailer_offset, trailer_len as usize)?;
    let trailer: SegmentTrailer = serde_json::from_slice(&bytes)
        .map_err(|e| Error::corrupt(path, format!("trailer: {e}")))?;
    if trailer.version != FORMAT_VERSION {
        return Err(Error::corrupt(
            path,
            format!("unsupported segment version {}", trailer.version),
        ));
    }
    for (c, blocks) in trailer.columns.iter().enumerate() {
        for (b, info) in blocks.iter().enumerate() {
            let end = info.offset.checked_add(info.length);
            if end.map_or(true, |e| e > trailer_offset) {
                return Err(Error::corrupt(
                    path,
                    format!("column {c} block {b} extends past the block area"),
                ));
            }
        }
    }
    Ok(trailer)
}
