//! Request-scoped inputs to the filter.

use crate::config::IpExtractionConfig;
use axum::http::HeaderMap;
use std::collections::HashMap;
use std::net::SocketAddr;

/// The parts of an inbound request the filter reads.
#[derive(Debug, Clone, Default)]
pub struct IncomingRequest {
    headers: HashMap<String, String>,
    peer: Option<SocketAddr>,
}

impl IncomingRequest {
    /// Build from already-flattened headers. Header names are lowercased.
    pub fn new(headers: HashMap<String, String>, peer: Option<SocketAddr>) -> Self {
        let headers = headers
            .into_iter()
            .map(|(k, v)| (k.to_lowercase(), v))
            .collect();
        Self { headers, peer }
    }

    /// Build from an HTTP header map, keeping the first value of each header.
    /// Values that are not valid UTF-8 are dropped.
    pub fn from_header_map(headers: &HeaderMap, peer: Option<SocketAddr>) -> Self {
        let mut flat = HashMap::new();
        for (name, value) in headers {
            if flat.contains_key(name.as_str()) {
                continue;
            }
            if let Ok(value) = value.to_str() {
                flat.insert(name.as_str().to_string(), value.to_string());
            }
        }
        Self { headers: flat, peer }
    }

    /// Get a header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(|s| s.as_str())
    }

    /// The User-Agent header, or an empty string.
    pub fn user_agent(&self) -> &str {
        self.header("user-agent").unwrap_or("")
    }

    /// Transport-level peer address.
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }
}

/// Derive the client address used for range and geolocation checks.
///
/// The first configured header carrying a non-empty token wins. Without one
/// the peer IP is used, and without a peer the result is empty. The value is
/// not required to parse as an IP.
pub fn client_address(request: &IncomingRequest, config: &IpExtractionConfig) -> String {
    for header_name in &config.headers {
        if let Some(value) = request.header(header_name) {
            let token = if config.use_first_ip {
                // X-Forwarded-For: client, proxy1, proxy2
                value.split(',').next()
            } else {
                // Use the last IP (closest proxy)
                value.split(',').last()
            };

            if let Some(token) = token.map(str::trim).filter(|t| !t.is_empty()) {
                return token.to_string();
            }
        }
    }

    request
        .peer()
        .map(|addr| addr.ip().to_string())
        .unwrap_or_default()
}
