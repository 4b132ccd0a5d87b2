//! Local segment files: append-only writing and ranged reads.

use std::fs::{self, File};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Append-only sink for one segment file. Tracks the running byte offset so
/// callers can record where each appended chunk starts.
#[derive(Debug)]
pub struct SegmentSink {
    path: PathBuf,
    out: BufWriter<File>,
    offset: u64,
}

impl SegmentSink {
    /// Create (truncate) the file, creating parent directories as needed.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
            }
        }
        let f = File::create(&path).map_err(|e| Error::io(&path, e))?;
        Ok(Self {
            path,
            out: BufWriter::new(f),
            offset: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes written so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Append `bytes`; returns the offset they start at.
    pub fn append(&mut self, bytes: &[u8]) -> Result<u64> {
        let at = self.offset;
        self.out
            .write_all(bytes)
            .map_err(|e| Error::io(&self.path, e))?;
        self.offset += bytes.len() as u64;
        Ok(at)
    }

    /// Flush buffers and sync the file to disk.
    pub fn finish(mut self) -> Result<u64> {
        self.out.flush().map_err(|e| Error::io(&self.path, e))?;
        self.out
            .get_ref()
            .sync_all()
            .map_err(|e| Error::io(&self.path, e))?;
        tracing::debug!(path = %self.path.display(), bytes = self.offset, "segment file finished");
        Ok(self.offset)
    }
}

/// Read exactly `len` bytes at `offset`.
pub fn read_range(path: &Path, offset: u64, len: usize) -> Result<Vec<u8>> {
    let mut f = File::open(path).map_err(|e| Error::io(path, e))?;
    f.seek(SeekFrom::Start(offset))
        .map_err(|e| Error::io(path, e))?;
    let mut buf = vec![0u8; len];
    let mut got = 0;
    while got < len {
        let n = f.read(&mut buf[got..]).map_err(|e| Error::io(path, e))?;
        if n == 0 {
            return Err(Error::ShortRead {
                path: path.display().to_string(),
                offset,
                wanted: len,
                got,
            });
        }
        got += n;
    }
    Ok(buf)
}

pub fn file_size(path: &Path) -> Result<u64> {
    let meta = fs::metadata(path).map_err(|e| Error::io(path, e))?;
    Ok(meta.len())
}

/// Delete a file. Idempotent (no error if it does not exist).
pub fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::io(path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_tracks_offsets_and_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/seg.0000");
        let mut sink = SegmentSink::create(&path).unwrap();
        assert_eq!(sink.append(b"hello").unwrap(), 0);
        assert_eq!(sink.append(b"world").unwrap(), 5);
        assert_eq!(sink.finish().unwrap(), 10);

        assert_eq!(read_range(&path, 5, 5).unwrap(), b"world");
        assert_eq!(file_size(&path).unwrap(), 10);
    }

    #[test]
    fn short_read_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seg");
        let mut sink = SegmentSink::create(&path).unwrap();
        sink.append(b"abc").unwrap();
        sink.finish().unwrap();
        assert!(matches!(
            read_range(&path, 2, 4),
            Err(Error::ShortRead { got: 1, .. })
        ));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = read_range(Path::new("/definitely/not/here"), 0, 1).unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here"));
    }

    #[test]
    fn remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone");
        remove_if_exists(&path).unwrap();
        std::fs::write(&path, b"x").unwrap();
        remove_if_exists(&path).unwrap();
        assert!(!path.exists());
    }
}
