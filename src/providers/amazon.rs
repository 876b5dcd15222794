//! Amazon Web Services range fetcher
//!
//! AWS publishes its address space as a single JSON document with separate
//! IPv4 and IPv6 prefix lists.

use crate::error::DetectResult;
use crate::providers::{Provider, RangeFetcher, SubnetRecord};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

const IP_RANGES_URL: &str = "https://ip-ranges.amazonaws.com/ip-ranges.json";

#[derive(Debug, Deserialize)]
struct AmazonIpPrefixes {
    #[serde(default)]
    prefixes: Vec<Ipv4Prefix>,
    #[serde(default)]
    ipv6_prefixes: Vec<Ipv6Prefix>,
}

#[derive(Debug, Deserialize)]
struct Ipv4Prefix {
    ip_prefix: String,
    region: String,
}

#[derive(Debug, Deserialize)]
struct Ipv6Prefix {
    ipv6_prefix: String,
    region: String,
}

/// Fetches the published AWS IP ranges
pub struct AmazonFetcher {
    http: reqwest::Client,
    url: String,
}

impl AmazonFetcher {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
            url: IP_RANGES_URL.to_string(),
        }
    }
}

impl Default for AmazonFetcher {
    fn default() -> Self {
        Self::new()
    }
}

fn records_from(prefixes: AmazonIpPrefixes) -> DetectResult<Vec<SubnetRecord>> {
    let mut records = Vec::with_capacity(prefixes.prefixes.len() + prefixes.ipv6_prefixes.len());

    for prefix in prefixes.prefixes {
        records.push(SubnetRecord {
            provider: Provider::Amazon,
            region: Some(prefix.region),
            subnet: prefix.ip_prefix.parse()?,
        });
    }
    for prefix in prefixes.ipv6_prefixes {
        records.push(SubnetRecord {
            provider: Provider::Amazon,
            region: Some(prefix.region),
            subnet: prefix.ipv6_prefix.parse()?,
        });
    }

    Ok(records)
}

#[async_trait]
impl RangeFetcher for AmazonFetcher {
    fn provider(&self) -> Provider {
        Provider::Amazon
    }

    async fn fetch(&self) -> DetectResult<Vec<SubnetRecord>> {
        debug!("Fetching AWS ranges from {}", self.url);
        let prefixes: AmazonIpPrefixes = self
            .http
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        records_from(prefixes)
    }
}
