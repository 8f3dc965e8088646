//! Geo Redirect agent: wires configured providers into the filter and serves it over HTTP.

use crate::config::Config;
use crate::filter::{FilterDecision, RequestFilter};
use crate::providers::aws::AwsRangeProvider;
use crate::providers::ip_api::IpApiLocator;
use crate::providers::static_ranges::StaticRangeProvider;
use crate::providers::CloudRangeSource;
use crate::request::IncomingRequest;
use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Body returned for any failed lookup. Never carries error detail.
pub const SERVER_ERROR_BODY: &str = "Internal server error.";

/// Geo Redirect agent.
pub struct GeoRedirectAgent {
    filter: RequestFilter,
}

impl GeoRedirectAgent {
    /// Create a new agent from configuration.
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let mut range_sources: Vec<Box<dyn CloudRangeSource>> = Vec::new();

        if config.cloud_ranges.aws.enabled {
            let provider = AwsRangeProvider::new(config.cloud_ranges.aws.clone())?;
            range_sources.push(Box::new(provider));
            info!(
                url = %config.cloud_ranges.aws.url,
                cache_ttl_seconds = config.cloud_ranges.aws.cache_ttl_seconds,
                "AWS range provider enabled"
            );
        }

        for (name, nets) in config.parse_static_ranges() {
            let provider = StaticRangeProvider::new(name, nets);
            if provider.is_empty() {
                warn!(name = %provider.name(), "Static range set is empty, skipping");
                continue;
            }
            info!(name = %provider.name(), prefixes = provider.len(), "Static range set loaded");
            range_sources.push(Box::new(provider));
        }

        let locator = IpApiLocator::new(&config.geo)?;

        info!(
            range_sources = range_sources.len(),
            allowed_countries = ?config.geo.allowed_countries,
            lookup_mode = ?config.settings.lookup_mode,
            redirect = %config.redirect.target_url,
            "Geo Redirect agent initialized"
        );

        Ok(Self::with_filter(RequestFilter::new(
            &config,
            range_sources,
            Box::new(locator),
        )))
    }

    /// Create an agent around an already-built filter.
    pub fn with_filter(filter: RequestFilter) -> Self {
        Self { filter }
    }

    /// Filter one request and render the HTTP response.
    pub async fn handle(&self, request: &IncomingRequest) -> Response {
        let decision = self.filter.evaluate(request).await;
        debug!(
            status = decision.status(),
            redirect = decision.is_redirect(),
            reason = ?decision.reject_reason(),
            "Request filtered"
        );
        into_response(decision)
    }

    /// Router sending every path and method through the filter.
    pub fn router(self: Arc<Self>) -> Router {
        Router::new().fallback(handle_request).with_state(self)
    }
}

async fn handle_request(
    State(agent): State<Arc<GeoRedirectAgent>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Response {
    let peer = connect_info.map(|ConnectInfo(addr)| addr);
    let request = IncomingRequest::from_header_map(&headers, peer);
    agent.handle(&request).await
}

/// Render a decision as an HTTP response.
pub fn into_response(decision: FilterDecision) -> Response {
    match decision {
        FilterDecision::Redirect { location, status } => {
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::MOVED_PERMANENTLY);
            (status, [(header::LOCATION, location)]).into_response()
        }
        FilterDecision::Rejected {
            status, message, ..
        } => {
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::FORBIDDEN);
            (status, message).into_response()
        }
        FilterDecision::ServerError(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, SERVER_ERROR_BODY).into_response()
        }
    }
}
