//! Lease marker coordinating refreshes across processes
//!
//! The marker is an empty file next to the snapshot; existence plus mtime is
//! the entire protocol. This is a best-effort lease, not a lock: a holder
//! that dies leaves a marker any process may reclaim once it ages past the
//! cache TTL, and two processes racing past a timeout may both fetch.

use crate::error::{DetectError, DetectResult};
use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

const LEASE_SUFFIX: &str = ".lock";

/// Marker path derived from the snapshot path
pub fn lease_path(snapshot_path: &Path) -> PathBuf {
    let mut os = snapshot_path.as_os_str().to_os_string();
    os.push(LEASE_SUFFIX);
    PathBuf::from(os)
}

/// Observed state of the lease marker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseStatus {
    Absent,
    Held { age: chrono::Duration },
}

/// Stat the marker; only absence and age matter
pub async fn status(path: &Path) -> DetectResult<LeaseStatus> {
    match fs::metadata(path).await {
        Ok(meta) => {
            let modified = meta
                .modified()
                .map_err(|e| DetectError::io(format!("reading mtime of {}", path.display()), e))?;
            let age = Utc::now().signed_duration_since(DateTime::<Utc>::from(modified));
            Ok(LeaseStatus::Held { age })
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(LeaseStatus::Absent),
        Err(e) => Err(DetectError::io(
            format!("statting lease marker {}", path.display()),
            e,
        )),
    }
}

/// Create the marker, returning a guard that removes it on drop
///
/// The guard covers every exit path out of a web fetch, success or error.
pub async fn acquire(path: &Path) -> DetectResult<LeaseGuard> {
    fs::write(path, b"")
        .await
        .map_err(|e| DetectError::io(format!("creating lease marker {}", path.display()), e))?;
    debug!("Acquired refresh lease {}", path.display());
    Ok(LeaseGuard {
        path: path.to_path_buf(),
    })
}

/// Remove the marker; missing files are fine
pub async fn remove(path: &Path) -> DetectResult<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(DetectError::io(
            format!("removing lease marker {}", path.display()),
            e,
        )),
    }
}

/// Removes the lease marker when dropped
#[derive(Debug)]
pub struct LeaseGuard {
    path: PathBuf,
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != ErrorKind::NotFound {
                warn!("Failed to remove lease marker {}: {}", self.path.display(), e);
            }
        } else {
            debug!("Released refresh lease {}", self.path.display());
        }
    }
}
