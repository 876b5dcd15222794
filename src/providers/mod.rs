//! Provider range records and the fetcher seam
//!
//! Each provider publishes its address space in a different shape: Amazon as
//! JSON over HTTP, Google as recursive SPF TXT records, Microsoft as an XML
//! document linked from a download page. The [`RangeFetcher`] trait hides
//! those differences from the cache layer and lets tests inject fixed data.

pub mod amazon;
pub mod google;
pub mod microsoft;

pub use amazon::AmazonFetcher;
pub use google::GoogleFetcher;
pub use microsoft::MicrosoftFetcher;

use crate::error::DetectResult;
use async_trait::async_trait;
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

/// Public cloud providers with published IP ranges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Provider {
    #[serde(rename = "Amazon Web Services")]
    Amazon,
    #[serde(rename = "Google Cloud")]
    Google,
    #[serde(rename = "Microsoft Azure")]
    Microsoft,
}

impl Provider {
    /// Human-readable provider name, matching the snapshot serialization
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Amazon => "Amazon Web Services",
            Self::Google => "Google Cloud",
            Self::Microsoft => "Microsoft Azure",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One published CIDR range, immutable once fetched
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubnetRecord {
    /// Provider that published the range
    #[serde(rename = "providerName")]
    pub provider: Provider,

    /// Provider region, where the feed exposes one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    /// The published CIDR
    pub subnet: IpNet,
}

impl SubnetRecord {
    /// Whether the given IP falls inside this record's range
    pub fn contains(&self, ip: IpAddr) -> bool {
        self.subnet.contains(&ip)
    }
}

/// Source of the current full range list for one provider
///
/// Fetchers are stateless from the cache's point of view: every call returns
/// the complete, current record set or an error. Retries and pagination are
/// the fetcher's own concern.
#[async_trait]
pub trait RangeFetcher: Send + Sync {
    /// Provider this fetcher covers
    fn provider(&self) -> Provider;

    /// Fetch the complete current record list
    async fn fetch(&self) -> DetectResult<Vec<SubnetRecord>>;
}

/// The three real fetchers in lookup tie-break order: Amazon, Google, Microsoft
pub fn default_fetchers() -> Vec<Box<dyn RangeFetcher>> {
    vec![
        Box::new(AmazonFetcher::new()),
        Box::new(GoogleFetcher::new()),
        Box::new(MicrosoftFetcher::new()),
    ]
}
