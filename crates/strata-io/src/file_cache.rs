//! Download-cache collaborator.
//!
//! Remote locations are resolved to local files by a cache that is owned
//! outside the engine. The engine only needs `get_local_path` and `release`;
//! `LocalFileCache` covers plain paths and `file://` URLs.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use url::Url;

use crate::error::{Error, Result};

pub trait FileCache: Send + Sync {
    /// Local path holding the content of `location`. Each call takes a
    /// reference that must be returned through `release`.
    fn get_local_path(&self, location: &str) -> Result<PathBuf>;

    /// Drop one reference taken by `get_local_path`. Unknown locations are ignored.
    fn release(&self, location: &str);
}

/// Cache for locations that are already local. Keeps reference counts so
/// callers can check that every acquisition was released.
#[derive(Debug, Default)]
pub struct LocalFileCache {
    refs: Mutex<HashMap<String, usize>>,
}

impl LocalFileCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Outstanding references for `location`.
    pub fn refcount(&self, location: &str) -> usize {
        self.refs
            .lock()
            .map(|m| m.get(location).copied().unwrap_or(0))
            .unwrap_or(0)
    }
}

fn resolve(location: &str) -> Result<PathBuf> {
    match Url::parse(location) {
        Ok(url) if url.scheme() == "file" => url
            .to_file_path()
            .map_err(|_| Error::Url(format!("not a local file url: {location}"))),
        // A one-letter scheme is a Windows drive prefix, not a URL.
        Ok(url) if url.scheme().len() == 1 => Ok(PathBuf::from(location)),
        Ok(url) => Err(Error::Unsupported(format!(
            "{location} (scheme '{}' needs a remote download cache)",
            url.scheme()
        ))),
        Err(url::ParseError::RelativeUrlWithoutBase) => Ok(PathBuf::from(location)),
        Err(e) => Err(Error::Url(format!("{location}: {e}"))),
    }
}

impl FileCache for LocalFileCache {
    fn get_local_path(&self, location: &str) -> Result<PathBuf> {
        let path = resolve(location)?;
        if let Ok(mut refs) = self.refs.lock() {
            *refs.entry(location.to_string()).or_insert(0) += 1;
        }
        Ok(path)
    }

    fn release(&self, location: &str) {
        if let Ok(mut refs) = self.refs.lock() {
            if let Some(n) = refs.get_mut(location) {
                *n -= 1;
                if *n == 0 {
                    refs.remove(location);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_paths_pass_through() {
        let cache = LocalFileCache::new();
        let p = cache.get_local_path("data/table.sidx").unwrap();
        assert_eq!(p, PathBuf::from("data/table.sidx"));
        assert_eq!(cache.refcount("data/table.sidx"), 1);
        cache.release("data/table.sidx");
        assert_eq!(cache.refcount("data/table.sidx"), 0);
    }

    #[test]
    fn file_urls_resolve() {
        let cache = LocalFileCache::new();
        let p = cache.get_local_path("file:///tmp/x.sidx").unwrap();
        assert_eq!(p, PathBuf::from("/tmp/x.sidx"));
    }

    #[test]
    fn remote_schemes_are_unsupported() {
        let cache = LocalFileCache::new();
        assert!(matches!(
            cache.get_local_path("s3://bucket/key"),
            Err(Error::Unsupported(_))
        ));
        assert_eq!(cache.refcount("s3://bucket/key"), 0);
    }

    #[test]
    fn release_of_unknown_location_is_ignored() {
        let cache = LocalFileCache::new();
        cache.release("never-acquired");
        assert_eq!(cache.refcount("never-acquired"), 0);
    }
}
