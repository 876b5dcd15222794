//! Error types for clouddetect
//!
//! All modules use `DetectResult<T>` as their return type.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for clouddetect operations
pub type DetectResult<T> = Result<T, DetectError>;

/// All errors that can occur in clouddetect
#[derive(Error, Debug)]
pub enum DetectError {
    // Lookup errors
    #[error("not resolved to any known cloud IP range")]
    NotCloudIp,

    // Refresh coordination errors
    #[error("cache refresh already in progress")]
    RefreshInProgress,

    #[error("disk cache {0} is no fresher than the data already held")]
    DiskCacheExpired(PathBuf),

    #[error("cache snapshot not found: {0}")]
    SnapshotNotFound(PathBuf),

    // Fetcher errors, fatal to the refresh that hit them
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("DNS TXT lookup failed: {0}")]
    Dns(#[from] hickory_resolver::error::ResolveError),

    #[error("invalid CIDR in provider data: {0}")]
    InvalidCidr(#[from] ipnet::AddrParseError),

    #[error("Azure range document malformed: {0}")]
    Xml(#[from] quick_xml::DeError),

    #[error("Azure download page does not link a PublicIPs XML file")]
    AzureXmlLinkMissing,

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DetectError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Lookup misses are expected outcomes, not operational failures
    pub fn is_lookup_miss(&self) -> bool {
        matches!(self, Self::NotCloudIp)
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RefreshInProgress)
    }
}
