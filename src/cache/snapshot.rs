//! Disk snapshot of the record set
//!
//! Written whole on every successful web refresh and read whole by sibling
//! processes; the file's mtime stands in for an explicit timestamp.

use crate::error::{DetectError, DetectResult};
use crate::providers::SubnetRecord;
use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::Path;
use tokio::fs;
use tracing::debug;

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct SnapshotBody {
    cache: Vec<SubnetRecord>,
}

/// Serialize the full record list to `path`
pub async fn save(path: &Path, records: &[SubnetRecord]) -> DetectResult<()> {
    let body = SnapshotBody {
        cache: records.to_vec(),
    };
    let content = serde_json::to_string(&body)?;

    fs::write(path, content)
        .await
        .map_err(|e| DetectError::io(format!("writing cache snapshot {}", path.display()), e))?;

    debug!("Persisted {} records to {}", records.len(), path.display());
    Ok(())
}

/// Load the snapshot at `path`, returning the records and the file's mtime
///
/// Fails with `DiskCacheExpired` when `min_mod_time` is after the file's
/// mtime: the caller already holds data at least as fresh as this file.
/// Pass `None` to accept the snapshot regardless of age.
pub async fn load(
    path: &Path,
    min_mod_time: Option<DateTime<Utc>>,
) -> DetectResult<(Vec<SubnetRecord>, DateTime<Utc>)> {
    let meta = fs::metadata(path).await.map_err(|e| {
        if e.kind() == ErrorKind::NotFound {
            DetectError::SnapshotNotFound(path.to_path_buf())
        } else {
            DetectError::io(format!("statting cache snapshot {}", path.display()), e)
        }
    })?;

    let modified = meta
        .modified()
        .map_err(|e| DetectError::io(format!("reading mtime of {}", path.display()), e))?;
    let mtime = DateTime::<Utc>::from(modified);

    if let Some(floor) = min_mod_time {
        if floor > mtime {
            return Err(DetectError::DiskCacheExpired(path.to_path_buf()));
        }
    }

    let content = fs::read_to_string(path)
        .await
        .map_err(|e| DetectError::io(format!("reading cache snapshot {}", path.display()), e))?;

    let body: SnapshotBody = serde_json::from_str(&content)?;
    debug!(
        "Loaded {} records from {} (mtime {})",
        body.cache.len(),
        path.display(),
        mtime
    );
    Ok((body.cache, mtime))
}
