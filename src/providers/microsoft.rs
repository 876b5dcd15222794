//! Microsoft Azure range fetcher
//!
//! Azure publishes its ranges as an XML document whose URL changes with each
//! release; the stable entry point is a download-confirmation page that links
//! the current `PublicIPs_*.xml` file.

use crate::error::{DetectError, DetectResult};
use crate::providers::{Provider, RangeFetcher, SubnetRecord};
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;
use tracing::debug;

const DOWNLOAD_PAGE: &str = "https://www.microsoft.com/en-us/download/confirmation.aspx?id=41653";

fn xml_href_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#"href=["']([^"']*PublicIPs[^"']*\.xml)["']"#).unwrap())
}

#[derive(Debug, Deserialize)]
struct AzurePublicIpAddresses {
    #[serde(rename = "Region", default)]
    regions: Vec<AzureRegion>,
}

#[derive(Debug, Deserialize)]
struct AzureRegion {
    #[serde(rename = "@Name")]
    name: String,
    #[serde(rename = "IpRange", default)]
    ip_ranges: Vec<AzureIpRange>,
}

#[derive(Debug, Deserialize)]
struct AzureIpRange {
    #[serde(rename = "@Subnet")]
    subnet: String,
}

/// Find the current PublicIPs XML link in the download page markup
fn find_xml_url(page: &str) -> DetectResult<String> {
    xml_href_pattern()
        .captures(page)
        .map(|cap| cap[1].to_string())
        .ok_or(DetectError::AzureXmlLinkMissing)
}

fn records_from_xml(body: &str) -> DetectResult<Vec<SubnetRecord>> {
    let ranges: AzurePublicIpAddresses = quick_xml::de::from_str(body)?;

    let mut records = Vec::new();
    for region in ranges.regions {
        for range in region.ip_ranges {
            records.push(SubnetRecord {
                provider: Provider::Microsoft,
                region: Some(region.name.clone()),
                subnet: range.subnet.parse()?,
            });
        }
    }

    Ok(records)
}

/// Fetches the published Azure IP ranges
pub struct MicrosoftFetcher {
    http: reqwest::Client,
    download_page: String,
}

impl MicrosoftFetcher {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
            download_page: DOWNLOAD_PAGE.to_string(),
        }
    }
}

impl Default for MicrosoftFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RangeFetcher for MicrosoftFetcher {
    fn provider(&self) -> Provider {
        Provider::Microsoft
    }

    async fn fetch(&self) -> DetectResult<Vec<SubnetRecord>> {
        debug!("Locating Azure XML via {}", self.download_page);
        let page = self
            .http
            .get(&self.download_page)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        let xml_url = find_xml_url(&page)?;
        debug!("Fetching Azure ranges from {}", xml_url);

        let body = self
            .http
            .get(&xml_url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        records_from_xml(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_XML: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<AzurePublicIpAddresses>
  <Region Name="australiaeast">
    <IpRange Subnet="13.70.64.0/18" />
    <IpRange Subnet="13.73.192.0/20" />
  </Region>
  <Region Name="uswest">
    <IpRange Subnet="168.61.64.0/18" />
  </Region>
</AzurePublicIpAddresses>"#;

    #[test]
    fn finds_xml_link_in_page() {
        let page = r#"<html><body>
            <a href="https://download.microsoft.com/download/0/1/PublicIPs_20230830.xml">click here</a>
        </body></html>"#;

        let url = find_xml_url(page).unwrap();
        assert!(url.ends_with("PublicIPs_20230830.xml"));
    }

    #[test]
    fn missing_link_is_an_error() {
        let err = find_xml_url("<html><body>nothing here</body></html>").unwrap_err();
        assert!(matches!(err, DetectError::AzureXmlLinkMissing));
    }

    #[test]
    fn parses_regions_and_subnets() {
        let records = records_from_xml(SAMPLE_XML).unwrap();

        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| r.provider == Provider::Microsoft));
        assert_eq!(records[0].region.as_deref(), Some("australiaeast"));
        assert_eq!(records[2].region.as_deref(), Some("uswest"));
        assert!(records[2].contains("168.61.66.2".parse().unwrap()));
    }

    #[test]
    fn malformed_xml_is_an_error() {
        assert!(records_from_xml("<AzurePublicIpAddresses><Region").is_err());
    }
}
