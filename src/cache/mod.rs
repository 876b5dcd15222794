//! In-memory cache of provider subnet records
//!
//! One [`CacheStore`] is shared by every lookup and refresh within a process.
//! The record list is either empty (never refreshed) or the complete result
//! of one successful refresh; partial sets are never committed.
//!
//! # Cache sources
//!
//! | Source | Meaning |
//! |--------|---------|
//! | Web    | This process fetched from the providers |
//! | Disk   | A sibling process refreshed recently; we loaded its snapshot |

pub mod lease;
pub mod snapshot;

use crate::error::{DetectError, DetectResult};
use crate::providers::SubnetRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Where the current record set came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheSource {
    Web,
    Disk,
}

impl fmt::Display for CacheSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Web => write!(f, "web"),
            Self::Disk => write!(f, "disk"),
        }
    }
}

#[derive(Debug, Default)]
struct CacheState {
    records: Arc<Vec<SubnetRecord>>,
    write_time: Option<DateTime<Utc>>,
    source: Option<CacheSource>,
    refresh_in_progress: bool,
}

/// Record cache guarded by a reader/writer lock
///
/// Readers take a cheap `Arc` clone of the record list and release the lock
/// before scanning, so lookups never hold the lock across I/O.
#[derive(Debug, Default)]
pub struct CacheStore {
    state: RwLock<CacheState>,
}

impl CacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current records and write time; the lock is released before returning
    pub async fn snapshot(&self) -> (Arc<Vec<SubnetRecord>>, Option<DateTime<Utc>>) {
        let state = self.state.read().await;
        (Arc::clone(&state.records), state.write_time)
    }

    /// Claim the single refresh slot for this store
    pub async fn begin_refresh(&self) -> DetectResult<()> {
        let mut state = self.state.write().await;
        if state.refresh_in_progress {
            return Err(DetectError::RefreshInProgress);
        }
        state.refresh_in_progress = true;
        Ok(())
    }

    /// Release the refresh slot without new data (error paths)
    pub async fn abort_refresh(&self) {
        let mut state = self.state.write().await;
        state.refresh_in_progress = false;
    }

    /// Replace the record set and release the refresh slot
    ///
    /// Disk loads pass the snapshot's mtime as `write_time`; web fetches pass
    /// the current time.
    pub async fn commit(
        &self,
        records: Vec<SubnetRecord>,
        source: CacheSource,
        write_time: DateTime<Utc>,
    ) {
        let mut state = self.state.write().await;
        debug!(
            "Committing {} records from {} (write time {})",
            records.len(),
            source,
            write_time
        );
        state.records = Arc::new(records);
        state.write_time = Some(write_time);
        state.source = Some(source);
        state.refresh_in_progress = false;
    }

    /// Push the write time forward without new data, so concurrent lookups in
    /// this process don't all trigger their own background refresh
    pub async fn bump_write_time(&self, now: DateTime<Utc>) {
        let mut state = self.state.write().await;
        state.write_time = Some(now);
    }

    /// Number of records currently held, for diagnostics
    pub async fn count(&self) -> usize {
        self.state.read().await.records.len()
    }

    /// Where the current record set came from, if anything is cached yet
    pub async fn source(&self) -> Option<CacheSource> {
        self.state.read().await.source
    }
}
