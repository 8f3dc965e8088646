//! AWS published IP range provider.

use super::{CloudRangeSource, LookupError};
use crate::cache::RangeCache;
use crate::config::AwsRangesConfig;
use async_trait::async_trait;
use ipnet::IpNet;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// `ip-ranges.json` document.
#[derive(Debug, Deserialize)]
struct AwsRangesDocument {
    prefixes: Vec<AwsPrefix>,

    #[serde(default)]
    ipv6_prefixes: Vec<AwsIpv6Prefix>,
}

#[derive(Debug, Deserialize)]
struct AwsPrefix {
    ip_prefix: String,
}

#[derive(Debug, Deserialize)]
struct AwsIpv6Prefix {
    ipv6_prefix: String,
}

/// Fetches the AWS range document, optionally reusing it for a TTL.
pub struct AwsRangeProvider {
    config: AwsRangesConfig,
    client: Client,
    cache: RangeCache,
}

impl AwsRangeProvider {
    /// Create a new AWS range provider.
    pub fn new(config: AwsRangesConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        let cache = RangeCache::new(config.cache_ttl_seconds);

        Ok(Self {
            config,
            client,
            cache,
        })
    }

    /// Fetch and parse the document, bypassing the cache.
    pub async fn fetch(&self) -> Result<Vec<IpNet>, LookupError> {
        debug!(url = %self.config.url, "Fetching AWS IP ranges");

        let response = self
            .client
            .get(&self.config.url)
            .send()
            .await
            .map_err(|e| LookupError::from_reqwest(self.name(), e))?;

        if !response.status().is_success() {
            return Err(LookupError::Status {
                source_name: self.name().to_string(),
                status: response.status(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| LookupError::from_reqwest(self.name(), e))?;

        parse_document(&body, self.config.include_ipv6).map_err(|message| LookupError::Parse {
            source_name: self.name().to_string(),
            message,
        })
    }
}

#[async_trait]
impl CloudRangeSource for AwsRangeProvider {
    async fn ranges(&self) -> Result<Vec<IpNet>, LookupError> {
        if let Some(cached) = self.cache.get() {
            debug!(prefixes = cached.len(), "AWS ranges cache hit");
            return Ok((*cached).clone());
        }

        let ranges = self.fetch().await?;
        debug!(prefixes = ranges.len(), "AWS IP ranges loaded");

        if self.cache.is_enabled() {
            self.cache.set(Arc::new(ranges.clone()));
        }

        Ok(ranges)
    }

    fn name(&self) -> &str {
        "aws"
    }
}

/// Decode the range document into networks. Unparsable prefixes are skipped.
fn parse_document(body: &[u8], include_ipv6: bool) -> Result<Vec<IpNet>, String> {
    let document: AwsRangesDocument =
        serde_json::from_slice(body).map_err(|e| format!("Invalid JSON: {}", e))?;

    let v4 = document.prefixes.iter().map(|p| p.ip_prefix.as_str());
    let v6 = document
        .ipv6_prefixes
        .iter()
        .filter(|_| include_ipv6)
        .map(|p| p.ipv6_prefix.as_str());

    let mut skipped = 0usize;
    let ranges: Vec<IpNet> = v4
        .chain(v6)
        .filter_map(|s| match s.trim().parse::<IpNet>() {
            Ok(net) => Some(net),
            Err(_) => {
                skipped += 1;
                None
            }
        })
        .collect();

    if skipped > 0 {
        warn!(skipped, "Skipped unparsable AWS prefixes");
    }

    Ok(ranges)
}
