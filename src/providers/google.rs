//! Google Cloud range fetcher
//!
//! Google publishes its netblocks through SPF TXT records: the root record
//! lists `include:` domains, each of which carries `ip4:`/`ip6:` CIDR terms.

use crate::error::DetectResult;
use crate::providers::{Provider, RangeFetcher, SubnetRecord};
use async_trait::async_trait;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use regex::Regex;
use std::sync::OnceLock;
use tracing::debug;

const NETBLOCK_ROOT: &str = "_cloud-netblocks.googleusercontent.com";

fn include_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"include:(\S+)").unwrap())
}

fn cidr_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"ip\d:(\S+)").unwrap())
}

/// Extract `include:` domains from an SPF TXT record
fn included_domains(txt: &str) -> Vec<String> {
    include_pattern()
        .captures_iter(txt)
        .map(|cap| cap[1].to_string())
        .collect()
}

/// Extract the CIDR terms from an SPF TXT record
fn spf_cidrs(txt: &str) -> DetectResult<Vec<SubnetRecord>> {
    cidr_pattern()
        .captures_iter(txt)
        .map(|cap| {
            Ok(SubnetRecord {
                provider: Provider::Google,
                region: None,
                subnet: cap[1].parse()?,
            })
        })
        .collect()
}

/// Fetches Google Cloud netblocks via DNS TXT records
pub struct GoogleFetcher {
    resolver: TokioAsyncResolver,
}

impl GoogleFetcher {
    pub fn new() -> Self {
        Self {
            resolver: TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default()),
        }
    }

    async fn txt_strings(&self, name: &str) -> DetectResult<Vec<String>> {
        let lookup = self.resolver.txt_lookup(name.to_string()).await?;
        Ok(lookup.iter().map(|txt| txt.to_string()).collect())
    }
}

impl Default for GoogleFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RangeFetcher for GoogleFetcher {
    fn provider(&self) -> Provider {
        Provider::Google
    }

    async fn fetch(&self) -> DetectResult<Vec<SubnetRecord>> {
        debug!("Fetching Google netblocks from {}", NETBLOCK_ROOT);
        let mut records = Vec::new();

        for root in self.txt_strings(NETBLOCK_ROOT).await? {
            for domain in included_domains(&root) {
                for txt in self.txt_strings(&domain).await? {
                    records.extend(spf_cidrs(&txt)?);
                }
            }
        }

        Ok(records)
    }
}
