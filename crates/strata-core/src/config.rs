//! Engine configuration that downstream crates can serialize/deserialize.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Rows per block exchanged between operators through a query context.
    pub block_size: usize,

    /// Worker pool size. Segments run in parallel up to this many at once.
    pub max_parallel_tasks: usize,

    /// Segment count used when a materialization asks for `0` (auto).
    pub default_num_segments: usize,

    /// Encoded bytes a writer aims for before flushing a column block.
    pub target_block_bytes: usize,

    /// Bounds on the adaptive rows-per-block estimate.
    pub min_rows_per_block: usize,
    pub max_rows_per_block: usize,

    /// Byte budget of the shared decoded-block cache.
    pub block_cache_bytes: usize,

    /// Recently closed segment handles kept warm for reopening.
    pub handle_cache_entries: usize,

    /// Buffered writer thresholds: try-lock flush at soft, blocking flush at hard.
    pub writer_soft_limit: usize,
    pub writer_hard_limit: usize,

    /// Block compression: "none", "zstd", or "lz4".
    pub codec: String,

    /// Directory for generated output tables.
    pub temp_dir: String,

    /// Lazy graphs with more distinct nodes than this should be materialized.
    pub online_materialization_nodes: usize,

    /// Same, for graph depth.
    pub online_materialization_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self {
            block_size: 256,
            max_parallel_tasks: cpus,
            default_num_segments: cpus,
            target_block_bytes: 64 * 1024,
            min_rows_per_block: 8,
            max_rows_per_block: 64 * 1024,
            block_cache_bytes: 64 * 1024 * 1024,
            handle_cache_entries: 128,
            writer_soft_limit: 1024,
            writer_hard_limit: 4096,
            codec: "none".to_string(),
            temp_dir: std::env::temp_dir()
                .join("strata")
                .to_string_lossy()
                .into_owned(),
            online_materialization_nodes: 50,
            online_materialization_depth: 32,
        }
    }
}

impl EngineConfig {
    /// Create a config from environment variables, falling back to defaults.
    ///
    /// Environment variables:
    /// - `STRATA_BLOCK_SIZE`: rows per operator block
    /// - `STRATA_MAX_PARALLEL_TASKS`: worker pool size
    /// - `STRATA_DEFAULT_NUM_SEGMENTS`: segments for auto materialization
    /// - `STRATA_TARGET_BLOCK_BYTES`: writer block size target
    /// - `STRATA_BLOCK_CACHE_BYTES`: decoded block cache budget
    /// - `STRATA_HANDLE_CACHE_ENTRIES`: warm segment handles
    /// - `STRATA_WRITER_SOFT_LIMIT` / `STRATA_WRITER_HARD_LIMIT`
    /// - `STRATA_CODEC`: none | zstd | lz4
    /// - `STRATA_TEMP_DIR`: output directory for generated tables
    /// - `STRATA_ONLINE_MATERIALIZATION_NODES`
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Some(v) = env_usize("STRATA_BLOCK_SIZE") {
            cfg.block_size = v;
        }
        if let Some(v) = env_usize("STRATA_MAX_PARALLEL_TASKS") {
            cfg.max_parallel_tasks = v;
        }
        if let Some(v) = env_usize("STRATA_DEFAULT_NUM_SEGMENTS") {
            cfg.default_num_segments = v;
        }
        if let Some(v) = env_usize("STRATA_TARGET_BLOCK_BYTES") {
            cfg.target_block_bytes = v;
        }
        if let Some(v) = env_usize("STRATA_BLOCK_CACHE_BYTES") {
            cfg.block_cache_bytes = v;
        }
        if let Some(v) = env_usize("STRATA_HANDLE_CACHE_ENTRIES") {
            cfg.handle_cache_entries = v;
        }
        if let Some(v) = env_usize("STRATA_WRITER_SOFT_LIMIT") {
            cfg.writer_soft_limit = v;
        }
        if let Some(v) = env_usize("STRATA_WRITER_HARD_LIMIT") {
            cfg.writer_hard_limit = v;
        }
        if let Ok(s) = std::env::var("STRATA_CODEC") {
            cfg.codec = s;
        }
        if let Ok(s) = std::env::var("STRATA_TEMP_DIR") {
            cfg.temp_dir = s;
        }
        if let Some(v) = env_usize("STRATA_ONLINE_MATERIALIZATION_NODES") {
            cfg.online_materialization_nodes = v;
        }

        cfg
    }

    /// Check the relationships between settings.
    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            return Err(Error::Config("block_size must be > 0".into()));
        }
        if self.max_parallel_tasks == 0 {
            return Err(Error::Config("max_parallel_tasks must be > 0".into()));
        }
        if self.writer_soft_limit == 0 || self.writer_hard_limit <= self.writer_soft_limit {
            return Err(Error::Config(format!(
                "writer limits must satisfy 0 < soft ({}) < hard ({})",
                self.writer_soft_limit, self.writer_hard_limit
            )));
        }
        if self.min_rows_per_block == 0 || self.min_rows_per_block > self.max_rows_per_block {
            return Err(Error::Config(format!(
                "rows per block bounds invalid: min {} max {}",
                self.min_rows_per_block, self.max_rows_per_block
            )));
        }
        match self.codec.as_str() {
            "none" | "zstd" | "lz4" => Ok(()),
            other => Err(Error::Config(format!("unknown codec '{other}'"))),
        }
    }

    /// Segment count for a materialization request (`0` means auto).
    pub fn resolve_num_segments(&self, requested: usize) -> usize {
        if requested == 0 {
            self.default_num_segments.max(1)
        } else {
            requested
        }
    }
}

fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key).ok().and_then(|s| s.parse::<usize>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_inverted_writer_limits() {
        let cfg = EngineConfig {
            writer_soft_limit: 8,
            writer_hard_limit: 8,
            ..EngineConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn auto_segments_fall_back_to_default() {
        let cfg = EngineConfig {
            default_num_segments: 3,
            ..EngineConfig::default()
        };
        assert_eq!(cfg.resolve_num_segments(0), 3);
        assert_eq!(cfg.resolve_num_segments(5), 5);
    }
}
