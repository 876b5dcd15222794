//! Client configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for a [`Client`](crate::Client)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// How long fetched ranges stay fresh
    pub ttl: Duration,

    /// Snapshot file shared with other processes; `None` keeps the cache
    /// purely in memory and disables the lease protocol
    pub cache_file_path: Option<PathBuf>,

    /// How long to wait on another process's refresh lease before taking over
    pub cache_refresh_timeout: Duration,

    /// How often the wait loop re-checks the lease marker
    pub lease_poll_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(12 * 60 * 60),
            cache_file_path: None,
            cache_refresh_timeout: Duration::from_secs(5 * 60),
            lease_poll_interval: Duration::from_secs(5),
        }
    }
}

impl Config {
    /// Default snapshot location for the CLI
    pub fn default_cache_path() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("clouddetect")
            .join("ranges.json")
    }

    /// Copy of this config with a snapshot path set
    pub fn with_cache_file(mut self, path: PathBuf) -> Self {
        self.cache_file_path = Some(path);
        self
    }
}
