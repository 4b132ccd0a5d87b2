//! Block store: column handles over segment files and cached block reads.
//!
//! A segment file is opened once and shared by every column it holds. Handles
//! are reference counted; when the last reference goes away the parsed trailer
//! moves to a small LRU of idle handles so a reopen skips the footer read.
//! Segment ids are handed out from a counter and never reused for another file.

use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use lru::LruCache;
use strata_codec::{decode_block, verify_block, BlockInfo, Codec, EncodedBlock};
use strata_core::config::EngineConfig;
use strata_core::id::SegmentId;
use strata_core::types::Scalar;
use strata_io::read_range;

use crate::block_cache::{BlockCache, CacheStats};
use crate::error::{Error, Result};
use crate::segment::{read_trailer, SegmentTrailer};
use crate::table_writer::FlushPolicy;

/// One column inside one open segment file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ColumnAddress {
    pub segment: SegmentId,
    pub column: usize,
}

impl ColumnAddress {
    pub fn block(&self, block: usize) -> BlockAddress {
        BlockAddress {
            segment: self.segment,
            column: self.column,
            block,
        }
    }
}

impl std::fmt::Display for ColumnAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.segment.get(), self.column)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockAddress {
    pub segment: SegmentId,
    pub column: usize,
    pub block: usize,
}

impl BlockAddress {
    /// Cursor step to the following block of the same column.
    pub fn next(&self) -> BlockAddress {
        BlockAddress {
            block: self.block + 1,
            ..*self
        }
    }

    pub fn column_address(&self) -> ColumnAddress {
        ColumnAddress {
            segment: self.segment,
            column: self.column,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub opens: u64,
    pub closes: u64,
    /// Outstanding column references.
    pub open_handles: usize,
    pub idle_handles: usize,
    pub cache: CacheStats,
}

struct OpenSegment {
    path: PathBuf,
    trailer: Arc<SegmentTrailer>,
    /// Outstanding references per column of this segment.
    refs: BTreeMap<usize, usize>,
}

impl OpenSegment {
    fn new(path: &Path, trailer: Arc<SegmentTrailer>, column: usize) -> Self {
        Self {
            path: path.to_path_buf(),
            trailer,
            refs: BTreeMap::from([(column, 1)]),
        }
    }

    fn total_refs(&self) -> usize {
        self.refs.values().sum()
    }
}

struct Handles {
    open: HashMap<SegmentId, OpenSegment>,
    by_path: HashMap<PathBuf, SegmentId>,
    idle: LruCache<PathBuf, (SegmentId, Arc<SegmentTrailer>)>,
    next_id: u64,
}

impl Handles {
    /// Take a reference on `column` of an already known segment (open or idle).
    fn acquire_existing(&mut self, path: &Path, column: usize) -> Option<SegmentId> {
        if let Some(&id) = self.by_path.get(path) {
            if let Some(seg) = self.open.get_mut(&id) {
                *seg.refs.entry(column).or_insert(0) += 1;
                return Some(id);
            }
        }
        let (id, trailer) = self.idle.pop(path)?;
        self.open.insert(id, OpenSegment::new(path, trailer, column));
        self.by_path.insert(path.to_path_buf(), id);
        Some(id)
    }

    /// Drop one reference held on `address`. Returns false if the address had
    /// none; references on other columns of the segment are never touched.
    fn release(&mut self, address: ColumnAddress) -> (bool, Option<SegmentId>) {
        let Some(seg) = self.open.get_mut(&address.segment) else {
            return (false, None);
        };
        let Some(n) = seg.refs.get_mut(&address.column) else {
            return (false, None);
        };
        *n -= 1;
        if *n == 0 {
            seg.refs.remove(&address.column);
        }
        if !seg.refs.is_empty() {
            return (true, None);
        }
        let mut evicted = None;
        if let Some(seg) = self.open.remove(&address.segment) {
            self.by_path.remove(&seg.path);
            if let Some((_, (old, _))) = self.idle.push(seg.path, (address.segment, seg.trailer)) {
                if old != address.segment {
                    evicted = Some(old);
                }
            }
        }
        (true, evicted)
    }
}

/// Settings writers pick up from the store they write through.
#[derive(Debug, Clone, Copy)]
pub struct WriterSettings {
    pub codec: Codec,
    pub flush: FlushPolicy,
}

pub struct BlockStore {
    handles: Mutex<Handles>,
    cache: BlockCache,
    opens: AtomicU64,
    closes: AtomicU64,
    writer: WriterSettings,
}

impl BlockStore {
    pub fn new(cfg: &EngineConfig) -> Result<Self> {
        cfg.validate()?;
        let codec = Codec::from_name(&cfg.codec)?;
        if !codec.is_available() {
            return Err(Error::Invalid(format!(
                "codec '{}' is not compiled into this build",
                cfg.codec
            )));
        }
        let idle_cap = NonZeroUsize::new(cfg.handle_cache_entries.max(1)).unwrap_or(NonZeroUsize::MIN);
        Ok(Self {
            handles: Mutex::new(Handles {
                open: HashMap::new(),
                by_path: HashMap::new(),
                idle: LruCache::new(idle_cap),
                next_id: 1,
            }),
            cache: BlockCache::new(cfg.block_cache_bytes),
            opens: AtomicU64::new(0),
            closes: AtomicU64::new(0),
            writer: WriterSettings {
                codec,
                flush: FlushPolicy::from_config(cfg),
            },
        })
    }

    pub fn writer_settings(&self) -> WriterSettings {
        self.writer
    }

    fn handles(&self) -> Result<MutexGuard<'_, Handles>> {
        crate::lock(&self.handles, "block store handle table")
    }

    /// Open column `column` of the segment file at `path`.
    ///
    /// Every successful call must be paired with one `close_column`; prefer
    /// `open_column_guard` which does that on drop.
    pub fn open_column(&self, path: &Path, column: usize) -> Result<ColumnAddress> {
        let cached = self.handles()?.acquire_existing(path, column);
        let segment = match cached {
            Some(id) => id,
            None => {
                // Parse outside the lock; another thread may win the race.
                let trailer = Arc::new(read_trailer(path)?);
                let mut h = self.handles()?;
                match h.acquire_existing(path, column) {
                    Some(id) => id,
                    None => {
                        let id = SegmentId::new(h.next_id);
                        h.next_id += 1;
                        h.open.insert(id, OpenSegment::new(path, trailer, column));
                        h.by_path.insert(path.to_path_buf(), id);
                        tracing::debug!(segment = %id, path = %path.display(), "segment opened");
                        id
                    }
                }
            }
        };
        self.opens.fetch_add(1, Ordering::Relaxed);
        let address = ColumnAddress { segment, column };

        let num_columns = self.segment_trailer(segment).map(|t| t.columns.len());
        match num_columns {
            Ok(n) if column < n => Ok(address),
            Ok(n) => {
                self.close_column(address);
                Err(Error::Invalid(format!(
                    "{} has {n} columns, column {column} requested",
                    path.display()
                )))
            }
            Err(e) => {
                self.close_column(address);
                Err(e)
            }
        }
    }

    /// RAII variant of `open_column`.
    pub fn open_column_guard(self: &Arc<Self>, path: &Path, column: usize) -> Result<ColumnHandle> {
        let address = self.open_column(path, column)?;
        Ok(ColumnHandle {
            store: Arc::clone(self),
            address,
            open: true,
        })
    }

    /// Release one reference on the column. Never fails; closing an address
    /// with no outstanding reference is a no-op.
    pub fn close_column(&self, address: ColumnAddress) {
        let mut h = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        let (released, evicted) = h.release(address);
        drop(h);
        if released {
            self.closes.fetch_add(1, Ordering::Relaxed);
        } else {
            tracing::debug!(%address, "close of a column that is not open ignored");
        }
        if let Some(old) = evicted {
            self.cache.evict_segment(old);
        }
    }

    fn segment_trailer(&self, segment: SegmentId) -> Result<Arc<SegmentTrailer>> {
        self.segment_view(segment).map(|(_, t)| t)
    }

    fn segment_view(&self, segment: SegmentId) -> Result<(PathBuf, Arc<SegmentTrailer>)> {
        let h = self.handles()?;
        h.open
            .get(&segment)
            .map(|s| (s.path.clone(), Arc::clone(&s.trailer)))
            .ok_or_else(|| Error::UnknownHandle(segment.to_string()))
    }

    pub fn num_blocks_in_column(&self, address: ColumnAddress) -> Result<usize> {
        Ok(self.column_block_infos(address)?.len())
    }

    /// All block infos of a column, in row order.
    pub fn column_block_infos(&self, address: ColumnAddress) -> Result<Vec<BlockInfo>> {
        let trailer = self.segment_trailer(address.segment)?;
        trailer
            .columns
            .get(address.column)
            .cloned()
            .ok_or_else(|| Error::UnknownHandle(address.to_string()))
    }

    fn locate(&self, address: BlockAddress) -> Result<(PathBuf, BlockInfo)> {
        let (path, trailer) = self.segment_view(address.segment)?;
        let info = trailer
            .columns
            .get(address.column)
            .and_then(|blocks| blocks.get(address.block))
            .cloned()
            .ok_or_else(|| {
                Error::Invalid(format!(
                    "block {} of column {} is out of range",
                    address.block,
                    address.column_address()
                ))
            })?;
        Ok((path, info))
    }

    pub fn block_info(&self, address: BlockAddress) -> Result<BlockInfo> {
        self.locate(address).map(|(_, info)| info)
    }

    /// Decoded values of one block, through the shared cache.
    pub fn read_block(&self, address: BlockAddress) -> Result<(Arc<Vec<Scalar>>, BlockInfo)> {
        let (path, info) = self.locate(address)?;
        let key = (address.segment, address.column, address.block);
        if let Some(values) = self.cache.get(&key) {
            return Ok((values, info));
        }
        let bytes = read_range(&path, info.offset, info.length as usize)?;
        let values = Arc::new(
            decode_block(&bytes, &info).map_err(|e| Error::corrupt(&path, e.to_string()))?,
        );
        self.cache.insert(key, Arc::clone(&values));
        Ok((values, info))
    }

    /// Stored bytes of one block, checksum verified but not decoded.
    pub fn read_encoded_block(&self, address: BlockAddress) -> Result<EncodedBlock> {
        let (path, info) = self.locate(address)?;
        let bytes = read_range(&path, info.offset, info.length as usize)?;
        verify_block(&bytes, &info).map_err(|e| Error::corrupt(&path, e.to_string()))?;
        Ok(EncodedBlock { info, bytes })
    }

    /// Forget everything cached about `path` before it is rewritten.
    pub fn invalidate_path(&self, path: &Path) -> Result<()> {
        let mut h = self.handles()?;
        if h.by_path.contains_key(path) {
            return Err(Error::Invalid(format!(
                "cannot rewrite {} while it is open",
                path.display()
            )));
        }
        let idle = h.idle.pop(path);
        drop(h);
        if let Some((id, _)) = idle {
            self.cache.evict_segment(id);
        }
        Ok(())
    }

    pub fn stats(&self) -> StoreStats {
        let h = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        StoreStats {
            opens: self.opens.load(Ordering::Relaxed),
            closes: self.closes.load(Ordering::Relaxed),
            open_handles: h.open.values().map(OpenSegment::total_refs).sum(),
            idle_handles: h.idle.len(),
            cache: self.cache.stats(),
        }
    }

    /// Drop all handles and cached blocks. Addresses handed out before become
    /// unknown; closing them afterwards is a no-op.
    pub fn shutdown(&self) {
        let mut h = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        let outstanding: usize = h.open.values().map(OpenSegment::total_refs).sum();
        if outstanding > 0 {
            tracing::warn!(outstanding, "block store shut down with open column handles");
        }
        h.open.clear();
        h.by_path.clear();
        h.idle.clear();
        drop(h);
        self.cache.clear();
        tracing::debug!("block store shut down");
    }
}

/// Open column that is closed exactly once: by `close` or on drop.
pub struct ColumnHandle {
    store: Arc<BlockStore>,
    address: ColumnAddress,
    open: bool,
}

impl ColumnHandle {
    pub fn address(&self) -> ColumnAddress {
        self.address
    }

    pub fn num_blocks(&self) -> Result<usize> {
        self.store.num_blocks_in_column(self.address)
    }

    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if std::mem::replace(&mut self.open, false) {
            self.store.close_column(self.address);
        }
    }
}

impl Drop for ColumnHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for ColumnHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColumnHandle")
            .field("address", &self.address)
            .field("open", &self.open)
            .finish()
    }
}
