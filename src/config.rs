//! Configuration for mmqueue
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{QueueError, Result};

/// Main configuration for a transaction log instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all page files
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── meta/page-<n>.dat   (message meta records)
    ///     └── data/page-<n>.dat   (message payloads)
    pub data_dir: PathBuf,

    /// Size of each mapped page in bytes
    pub page_size: usize,

    // -------------------------------------------------------------------------
    // Page Cache Configuration
    // -------------------------------------------------------------------------
    /// How long an unreferenced page stays mapped after its last use (milliseconds)
    pub cache_ttl_ms: u64,

    // -------------------------------------------------------------------------
    // Durability Configuration
    // -------------------------------------------------------------------------
    /// How often dirty pages are forced to stable storage
    pub sync_strategy: SyncStrategy,
}

/// Checkpoint strategy: when dirty pages are forced to disk
///
/// Writes never sync on their own; durability is reached at these checkpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    /// Only explicit `flush()` / `close()` calls
    Manual,

    /// Force after every mutating operation (safest, slowest)
    EveryWrite,

    /// Force after N mutating operations (balanced durability/performance)
    EveryNOperations { count: usize },

    /// Background checkpoint thread forces pages every `ms` milliseconds
    Interval { ms: u64 },
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./mmqueue_data"),
            page_size: 1024 * 1024, // 1 MB
            cache_ttl_ms: 10_000,
            sync_strategy: SyncStrategy::Interval { ms: 1000 },
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Cache TTL as a Duration
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    /// Check the values that would otherwise break page arithmetic
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 || self.page_size % 8 != 0 {
            return Err(QueueError::Config(format!(
                "page_size must be a non-zero multiple of 8, got {}",
                self.page_size
            )));
        }
        if self.page_size > i32::MAX as usize {
            return Err(QueueError::Config(format!(
                "page_size {} exceeds the maximum mappable page",
                self.page_size
            )));
        }
        if self.cache_ttl_ms == 0 {
            return Err(QueueError::Config("cache_ttl_ms must be positive".to_string()));
        }
        match self.sync_strategy {
            SyncStrategy::EveryNOperations { count: 0 } => Err(QueueError::Config(
                "EveryNOperations requires count > 0".to_string(),
            )),
            SyncStrategy::Interval { ms: 0 } => Err(QueueError::Config(
                "Interval requires ms > 0".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all page files)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the page size (in bytes)
    pub fn page_size(mut self, size: usize) -> Self {
        self.config.page_size = size;
        self
    }

    /// Set the page cache TTL (in milliseconds)
    pub fn cache_ttl_ms(mut self, ms: u64) -> Self {
        self.config.cache_ttl_ms = ms;
        self
    }

    /// Set the sync strategy
    pub fn sync_strategy(mut self, strategy: SyncStrategy) -> Self {
        self.config.sync_strategy = strategy;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
