//! Files owned by temporary tables.
//!
//! A temporary table shares one `TempFiles` among all of its columns and any
//! column derived from them (renames, appends, selections). The index and
//! segment files are removed when the last holder goes away, unless the
//! table was saved under a new index in the meantime.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

pub(crate) struct TempFiles {
    paths: Vec<PathBuf>,
    keep: AtomicBool,
}

impl TempFiles {
    pub(crate) fn new(paths: Vec<PathBuf>) -> Self {
        Self {
            paths,
            keep: AtomicBool::new(false),
        }
    }

    /// Stop the files from being removed on drop.
    pub(crate) fn keep(&self) {
        self.keep.store(true, Ordering::Release);
    }
}

impl Drop for TempFiles {
    fn drop(&mut self) {
        if self.keep.load(Ordering::Acquire) {
            return;
        }
        for path in &self.paths {
            if let Err(e) = strata_io::remove_if_exists(path) {
                tracing::warn!(path = %path.display(), error = %e, "temporary file not removed");
            }
        }
        tracing::debug!(files = self.paths.len(), "temporary table files removed");
    }
}

impl std::fmt::Debug for TempFiles {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TempFiles")
            .field("files", &self.paths.len())
            .field("keep", &self.keep.load(Ordering::Relaxed))
            .finish()
    }
}
