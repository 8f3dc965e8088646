//! ip-api.com geolocation provider.

use super::{GeoLocator, GeoLookup, LookupError};
use crate::config::GeoConfig;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// ip-api JSON response. Only the fields the filter needs.
#[derive(Debug, Deserialize)]
struct IpApiResponse {
    /// "success" or "fail".
    status: String,

    #[serde(rename = "countryCode", default)]
    country_code: Option<String>,

    /// Failure reason, e.g. "private range" or "invalid query".
    #[serde(default)]
    message: Option<String>,
}

/// Geolocation through the ip-api JSON endpoint.
pub struct IpApiLocator {
    endpoint: Url,
    client: Client,
}

impl IpApiLocator {
    /// Create a new ip-api locator.
    pub fn new(config: &GeoConfig) -> anyhow::Result<Self> {
        let endpoint = Url::parse(&config.endpoint)?;
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;

        Ok(Self { endpoint, client })
    }

    /// Build the lookup URL for `address`, escaping it as a single path segment.
    fn lookup_url(&self, address: &str) -> Result<Url, LookupError> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| LookupError::Lookup {
                source_name: self.name().to_string(),
                message: format!("endpoint cannot take a path: {}", self.endpoint),
            })?
            .pop_if_empty()
            .push(address);
        Ok(url)
    }
}

#[async_trait]
impl GeoLocator for IpApiLocator {
    async fn locate(&self, address: &str) -> Result<GeoLookup, LookupError> {
        // An empty path segment makes ip-api locate the caller, i.e. this server.
        if address.trim().is_empty() {
            debug!("No client address to locate");
            return Ok(GeoLookup::unresolved());
        }

        let url = self.lookup_url(address)?;

        debug!(ip = %address, "Querying ip-api");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| LookupError::from_reqwest(self.name(), e))?;

        if !response.status().is_success() {
            return Err(LookupError::Status {
                source_name: self.name().to_string(),
                status: response.status(),
            });
        }

        let body: IpApiResponse = response.json().await.map_err(|e| LookupError::Parse {
            source_name: self.name().to_string(),
            message: e.to_string(),
        })?;

        Ok(into_lookup(address, body))
    }

    fn name(&self) -> &str {
        "ip-api"
    }
}

fn into_lookup(address: &str, body: IpApiResponse) -> GeoLookup {
    if body.status != "success" {
        debug!(ip = %address, message = ?body.message, "ip-api could not locate address");
        return GeoLookup::unresolved();
    }

    match body.country_code {
        Some(code) => {
            debug!(ip = %address, country = %code, "ip-api lookup complete");
            GeoLookup::located(&code)
        }
        None => GeoLookup {
            success: true,
            country_code: None,
        },
    }
}
