//! Appends blocks to a set of segment files, one lock per segment.
//!
//! Encoding happens before the segment lock is taken, so writers of different
//! columns of one segment only serialize on the file append itself.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use strata_codec::{encode_block, BlockInfo, Codec, EncodedBlock};
use strata_core::types::Scalar;
use strata_io::{remove_if_exists, SegmentSink};

use crate::block_store::BlockStore;
use crate::error::{Error, Result};
use crate::segment::{write_trailer, SegmentTrailer};

struct SegmentState {
    path: PathBuf,
    sink: Option<SegmentSink>,
    trailer: SegmentTrailer,
}

pub struct BlockWriter {
    codec: Codec,
    num_columns: usize,
    segments: Vec<Mutex<SegmentState>>,
}

impl BlockWriter {
    /// Create one segment file per path. If any file cannot be created the
    /// ones already created are removed before the error is returned.
    pub fn create(
        store: &BlockStore,
        paths: Vec<PathBuf>,
        num_columns: usize,
        codec: Codec,
    ) -> Result<Self> {
        let mut segments = Vec::with_capacity(paths.len());
        for path in paths {
            let opened = store
                .invalidate_path(&path)
                .and_then(|_| SegmentSink::create(&path).map_err(Error::from));
            match opened {
                Ok(sink) => segments.push(Mutex::new(SegmentState {
                    path,
                    sink: Some(sink),
                    trailer: SegmentTrailer::new(num_columns),
                })),
                Err(e) => {
                    let partial = BlockWriter {
                        codec,
                        num_columns,
                        segments,
                    };
                    partial.abort();
                    return Err(e);
                }
            }
        }
        Ok(Self {
            codec,
            num_columns,
            segments,
        })
    }

    pub fn num_segments(&self) -> usize {
        self.segments.len()
    }

    pub fn num_columns(&self) -> usize {
        self.num_columns
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    pub fn segment_path(&self, segment: usize) -> Result<PathBuf> {
        let state = self.state(segment)?;
        let path = crate::lock(state, "segment writer")?.path.clone();
        Ok(path)
    }

    fn state(&self, segment: usize) -> Result<&Mutex<SegmentState>> {
        self.segments.get(segment).ok_or_else(|| {
            Error::Invalid(format!(
                "segment {segment} out of range ({} segments)",
                self.segments.len()
            ))
        })
    }

    /// Encode `values` and append them as a new block of `column` in `segment`.
    pub fn write_block(&self, segment: usize, column: usize, values: &[Scalar]) -> Result<BlockInfo> {
        let block = encode_block(values, self.codec)?;
        self.write_encoded(segment, column, block)
    }

    /// Append an already framed block (block copies skip re-encoding).
    pub fn write_encoded(&self, segment: usize, column: usize, block: EncodedBlock) -> Result<BlockInfo> {
        if column >= self.num_columns {
            return Err(Error::Invalid(format!(
                "column {column} out of range ({} columns)",
                self.num_columns
            )));
        }
        let mut state = crate::lock(self.state(segment)?, "segment writer")?;
        let state = &mut *state;
        let sink = state.sink.as_mut().ok_or_else(|| {
            Error::Invalid(format!("segment {} is already closed", state.path.display()))
        })?;
        let mut info = block.info;
        info.offset = sink.append(&block.bytes)?;
        state.trailer.columns[column].push(info.clone());
        Ok(info)
    }

    /// Rows written so far to `column` of `segment`.
    pub fn rows_written(&self, segment: usize, column: usize) -> Result<u64> {
        let state = crate::lock(self.state(segment)?, "segment writer")?;
        Ok(state.trailer.num_rows(column))
    }

    /// Write trailer and footer. Closing twice is a no-op.
    pub fn close_segment(&self, segment: usize) -> Result<()> {
        let mut state = crate::lock(self.state(segment)?, "segment writer")?;
        let Some(mut sink) = state.sink.take() else {
            return Ok(());
        };
        write_trailer(&mut sink, &state.trailer)?;
        let bytes = sink.finish()?;
        tracing::debug!(
            path = %state.path.display(),
            bytes,
            blocks = state.trailer.columns.iter().map(Vec::len).sum::<usize>(),
            "segment closed"
        );
        Ok(())
    }

    pub fn close_all(&self) -> Result<()> {
        for s in 0..self.segments.len() {
            self.close_segment(s)?;
        }
        Ok(())
    }

    /// Drop every sink and delete the files. Best effort, never fails.
    pub fn abort(&self) {
        for state in &self.segments {
            let mut state = state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            state.sink = None;
            if let Err(e) = remove_if_exists(&state.path) {
                tracing::warn!(path = %state.path.display(), error = %e, "could not remove aborted segment");
            }
        }
    }
}

/// Segment file `i` of the table indexed at `index_path`: `<stem>.NNNN`.
pub fn segment_file_path(index_path: &Path, i: usize) -> PathBuf {
    index_path.with_extension(format!("{i:04}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::config::EngineConfig;

    #[test]
    fn segment_paths_replace_the_index_extension() {
        assert_eq!(
            segment_file_path(Path::new("/d/t.sidx"), 3),
            PathBuf::from("/d/t.0003")
        );
        assert_eq!(segment_file_path(Path::new("t"), 12), PathBuf::from("t.0012"));
    }

    #[test]
    fn closed_segment_rejects_writes() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlockStore::new(&EngineConfig::default()).unwrap();
        let w = BlockWriter::create(&store, vec![dir.path().join("a.0000")], 1, Codec::None).unwrap();
        w.write_block(0, 0, &[Scalar::I64(1)]).unwrap();
        w.close_segment(0).unwrap();
        w.close_segment(0).unwrap();
        assert!(matches!(
            w.write_block(0, 0, &[Scalar::I64(2)]),
            Err(Error::Invalid(_))
        ));
        assert!(matches!(w.write_block(0, 1, &[]), Err(Error::Invalid(_))));
    }

    #[test]
    fn failed_create_removes_earlier_files() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();
        let store = BlockStore::new(&EngineConfig::default()).unwrap();
        let first = dir.path().join("ok.0000");
        // parent of the second path is a regular file, so creation fails
        let res = BlockWriter::create(
            &store,
            vec![first.clone(), blocker.join("bad.0001")],
            1,
            Codec::None,
        );
        assert!(res.is_err());
        assert!(!first.exists());
    }
}
