//! Table index files (`.sidx`).
//!
//! JSON listing each column's segment files, per-segment row counts and a
//! free-form metadata map. Segment files next to the index are stored by file
//! name only so a table directory can be moved as a whole.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use strata_core::schema::DataType;
use strata_io::{file_size, read_range, SegmentSink};

use crate::error::{Error, Result};

pub const INDEX_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentRef {
    pub file: PathBuf,
    /// Column slot inside the segment file.
    pub column: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnIndex {
    pub name: String,
    pub data_type: DataType,
    pub num_rows: u64,
    pub segments: Vec<SegmentRef>,
    pub segment_sizes: Vec<u64>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl ColumnIndex {
    pub fn validate(&self) -> Result<()> {
        if self.segments.len() != self.segment_sizes.len() {
            return Err(Error::Index(format!(
                "column '{}': {} segments but {} segment sizes",
                self.name,
                self.segments.len(),
                self.segment_sizes.len()
            )));
        }
        let total: u64 = self.segment_sizes.iter().sum();
        if total != self.num_rows {
            return Err(Error::Index(format!(
                "column '{}': segment sizes sum to {total}, expected {} rows",
                self.name, self.num_rows
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableIndex {
    pub version: u32,
    pub num_rows: u64,
    pub columns: Vec<ColumnIndex>,
}

impl TableIndex {
    pub fn new(num_rows: u64, columns: Vec<ColumnIndex>) -> Self {
        Self {
            version: INDEX_VERSION,
            num_rows,
            columns,
        }
    }
}

fn base_dir(index_path: &Path) -> &Path {
    index_path.parent().unwrap_or_else(|| Path::new(""))
}

pub fn write_index(index_path: &Path, index: &TableIndex) -> Result<()> {
    let dir = base_dir(index_path);
    let mut stored = index.clone();
    for col in &mut stored.columns {
        for seg in &mut col.segments {
            if let Ok(rel) = seg.file.strip_prefix(dir) {
                if rel.components().count() == 1 {
                    seg.file = rel.to_path_buf();
                }
            }
        }
    }
    let json = serde_json::to_vec_pretty(&stored)?;
    let mut sink = SegmentSink::create(index_path)?;
    sink.append(&json)?;
    sink.finish()?;
    tracing::debug!(path = %index_path.display(), columns = index.columns.len(), "index written");
    Ok(())
}

pub fn read_index(index_path: &Path) -> Result<TableIndex> {
    let size = file_size(index_path)?;
    let bytes = read_range(index_path, 0, size as usize)?;
    let mut index: TableIndex = serde_json::from_slice(&bytes)
        .map_err(|e| Error::Index(format!("{}: {e}", index_path.display())))?;
    if index.version != INDEX_VERSION {
        return Err(Error::Index(format!(
            "{}: unsupported index version {}",
            index_path.display(),
            index.version
        )));
    }
    let dir = base_dir(index_path);
    for col in &mut index.columns {
        for seg in &mut col.segments {
            if seg.file.is_relative() {
                seg.file = dir.join(&seg.file);
            }
        }
        col.validate()?;
        if col.num_rows != index.num_rows {
            return Err(Error::Index(format!(
                "column '{}' has {} rows, table has {}",
                col.name, col.num_rows, index.num_rows
            )));
        }
    }
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(dir: &Path) -> ColumnIndex {
        ColumnIndex {
            name: "x".into(),
            data_type: DataType::Int64,
            num_rows: 5,
            segments: vec![
                SegmentRef { file: dir.join("t.0000"), column: 0 },
                SegmentRef { file: PathBuf::from("/elsewhere/u.0000"), column: 2 },
            ],
            segment_sizes: vec![2, 3],
            metadata: BTreeMap::from([("source".to_string(), "test".to_string())]),
        }
    }

    #[test]
    fn local_segments_are_stored_relative() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.sidx");
        let index = TableIndex::new(5, vec![column(dir.path())]);
        write_index(&path, &index).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"t.0000\""));
        assert!(raw.contains("/elsewhere/u.0000"));

        assert_eq!(read_index(&path).unwrap(), index);
    }

    #[test]
    fn inconsistent_sizes_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut col = column(dir.path());
        col.segment_sizes = vec![1, 1];
        assert!(matches!(col.validate(), Err(Error::Index(_))));
    }
}
