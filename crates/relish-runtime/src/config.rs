//! Runtime configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for a [`Runtime`](crate::Runtime).
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// SQLite database file. `None` keeps all data in memory.
    pub db_path: Option<PathBuf>,
    /// Entries kept by the dispatch resolution cache. Default: 4096.
    pub dispatch_cache_capacity: usize,
    /// Period of the background GC sweep. Default: 30s.
    pub gc_interval: Duration,
    /// How long a sweep waits for mutators to reach a safe point.
    pub gc_wait: Duration,
    /// Maximum nested multi-method calls per thread. Default: 512.
    pub max_recursion_depth: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            db_path: None,
            dispatch_cache_capacity: 4096,
            gc_interval: Duration::from_secs(30),
            gc_wait: Duration::from_millis(200),
            max_recursion_depth: 512,
        }
    }
}

impl RuntimeConfig {
    /// In-memory configuration with defaults.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Configuration backed by the SQLite file at `path`.
    pub fn with_db(path: impl Into<PathBuf>) -> Self {
        RuntimeConfig {
            db_path: Some(path.into()),
            ..Self::default()
        }
    }
}
