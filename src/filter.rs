//! Request filtering decision.
//!
//! Checks run in a fixed order and the first match wins:
//!
//! 1. bot User-Agent signature
//! 2. blocked browser signature
//! 3. client address inside a cloud provider range
//! 4. geolocated country not in the allowed list
//!
//! A request passing all four is redirected. A failed outbound lookup turns
//! the whole decision into a server error.

use crate::config::{Config, IpExtractionConfig, LookupMode, Messages, RedirectConfig};
use crate::providers::{CloudRangeSource, GeoLocator, GeoLookup, LookupError};
use crate::request::{client_address, IncomingRequest};
use crate::signatures::SignatureList;
use ipnet::IpNet;
use std::net::IpAddr;
use tracing::{debug, info, warn};

/// Why a request was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    Bot,
    Browser,
    CloudProvider,
    Country,
}

impl RejectReason {
    /// Tag used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::Bot => "bot",
            RejectReason::Browser => "browser",
            RejectReason::CloudProvider => "cloud-provider",
            RejectReason::Country => "country",
        }
    }
}

/// Outcome of filtering one request.
#[derive(Debug)]
pub enum FilterDecision {
    /// Send the client to `location`.
    Redirect { location: String, status: u16 },
    /// Refuse the request with a plain-text body.
    Rejected {
        reason: RejectReason,
        status: u16,
        message: String,
    },
    /// An outbound lookup failed. The error is for operators only.
    ServerError(LookupError),
}

impl FilterDecision {
    /// HTTP status the decision maps to.
    pub fn status(&self) -> u16 {
        match self {
            FilterDecision::Redirect { status, .. } | FilterDecision::Rejected { status, .. } => {
                *status
            }
            FilterDecision::ServerError(_) => 500,
        }
    }

    pub fn is_redirect(&self) -> bool {
        matches!(self, FilterDecision::Redirect { .. })
    }

    /// The rejection reason, if this is a rejection.
    pub fn reject_reason(&self) -> Option<RejectReason> {
        match self {
            FilterDecision::Rejected { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}

const REJECT_STATUS: u16 = 403;

/// Evaluates requests against signature lists, cloud ranges and geolocation.
pub struct RequestFilter {
    enabled: bool,
    log_blocked: bool,
    log_allowed: bool,
    lookup_mode: LookupMode,
    ip_extraction: IpExtractionConfig,
    bots: SignatureList,
    browsers: SignatureList,
    range_sources: Vec<Box<dyn CloudRangeSource>>,
    locator: Box<dyn GeoLocator>,
    allowed_countries: Vec<String>,
    redirect: RedirectConfig,
    messages: Messages,
}

impl RequestFilter {
    /// Create a filter from configuration and the outbound providers to consult.
    ///
    /// Range sources are queried in the order given.
    pub fn new(
        config: &Config,
        range_sources: Vec<Box<dyn CloudRangeSource>>,
        locator: Box<dyn GeoLocator>,
    ) -> Self {
        let bots = SignatureList::new(&config.user_agent.bot_signatures);
        let browsers = SignatureList::new(&config.user_agent.blocked_browsers);

        if bots.is_empty() {
            warn!("No bot signatures configured, bot check disabled");
        }
        if browsers.is_empty() {
            debug!("No blocked browser signatures configured");
        }
        debug!(
            bot_signatures = bots.len(),
            blocked_browsers = browsers.len(),
            range_sources = range_sources.len(),
            "Request filter built"
        );

        Self {
            enabled: config.settings.enabled,
            log_blocked: config.settings.log_blocked,
            log_allowed: config.settings.log_allowed,
            lookup_mode: config.settings.lookup_mode,
            ip_extraction: config.ip_extraction.clone(),
            bots,
            browsers,
            range_sources,
            locator,
            allowed_countries: config
                .geo
                .allowed_countries
                .iter()
                .map(|c| c.to_ascii_uppercase())
                .collect(),
            redirect: config.redirect.clone(),
            messages: config.messages.clone(),
        }
    }

    /// Names of the configured range sources, in query order.
    pub fn range_source_names(&self) -> Vec<&str> {
        self.range_sources.iter().map(|s| s.name()).collect()
    }

    /// Decide what to do with `request`.
    pub async fn evaluate(&self, request: &IncomingRequest) -> FilterDecision {
        if !self.enabled {
            debug!("Geo redirect filter disabled globally");
            return self.redirect_decision(None);
        }

        let user_agent = request.user_agent();

        if let Some(signature) = self.bots.find(user_agent) {
            return self.reject(RejectReason::Bot, &self.messages.bot, signature);
        }

        if let Some(signature) = self.browsers.find(user_agent) {
            return self.reject(RejectReason::Browser, &self.messages.browser, signature);
        }

        let address = client_address(request, &self.ip_extraction);
        let ip = parse_client_ip(&address);

        let geo = match self.lookup_mode {
            LookupMode::Sequential => {
                let ranges = match self.collect_ranges().await {
                    Ok(ranges) => ranges,
                    Err(e) => return self.server_error(&address, e),
                };

                if let Some(net) = find_range(&ranges, ip.as_ref()) {
                    return self.reject_cloud(&address, net);
                }

                match self.locator.locate(&address).await {
                    Ok(geo) => geo,
                    Err(e) => return self.server_error(&address, e),
                }
            }
            LookupMode::Concurrent => {
                let (ranges, geo) =
                    match tokio::try_join!(self.collect_ranges(), self.locator.locate(&address)) {
                        Ok(results) => results,
                        Err(e) => return self.server_error(&address, e),
                    };

                // Cloud membership still outranks the country result.
                if let Some(net) = find_range(&ranges, ip.as_ref()) {
                    return self.reject_cloud(&address, net);
                }

                geo
            }
        };

        self.country_decision(&address, &geo)
    }

    /// Query every range source and concatenate the results.
    async fn collect_ranges(&self) -> Result<Vec<IpNet>, LookupError> {
        let mut ranges = Vec::new();
        for source in &self.range_sources {
            let fetched = source.ranges().await?;
            debug!(source = source.name(), prefixes = fetched.len(), "Loaded cloud ranges");
            ranges.extend(fetched);
        }
        Ok(ranges)
    }

    fn country_decision(&self, address: &str, geo: &GeoLookup) -> FilterDecision {
        match geo.country() {
            Some(country)
                if self
                    .allowed_countries
                    .iter()
                    .any(|c| c.eq_ignore_ascii_case(country)) =>
            {
                self.redirect_decision(Some((address, country)))
            }
            country => {
                if self.log_blocked {
                    info!(
                        ip = %address,
                        reason = RejectReason::Country.as_str(),
                        country = ?country,
                        lookup_success = geo.success,
                        "Rejecting request"
                    );
                }
                FilterDecision::Rejected {
                    reason: RejectReason::Country,
                    status: REJECT_STATUS,
                    message: self.messages.country.clone(),
                }
            }
        }
    }

    fn redirect_decision(&self, located: Option<(&str, &str)>) -> FilterDecision {
        if self.log_allowed {
            if let Some((address, country)) = located {
                debug!(ip = %address, country = %country, "Redirecting request");
            }
        }

        FilterDecision::Redirect {
            location: self.redirect.target_url.clone(),
            status: self.redirect.status,
        }
    }

    fn reject_cloud(&self, address: &str, net: &IpNet) -> FilterDecision {
        if self.log_blocked {
            info!(
                ip = %address,
                reason = RejectReason::CloudProvider.as_str(),
                range = %net,
                "Rejecting request"
            );
        }

        FilterDecision::Rejected {
            reason: RejectReason::CloudProvider,
            status: REJECT_STATUS,
            message: self.messages.cloud.clone(),
        }
    }

    fn reject(&self, reason: RejectReason, message: &str, signature: &str) -> FilterDecision {
        if self.log_blocked {
            info!(
                reason = reason.as_str(),
                signature = %signature,
                "Rejecting request"
            );
        }

        FilterDecision::Rejected {
            reason,
            status: REJECT_STATUS,
            message: message.to_string(),
        }
    }

    fn server_error(&self, address: &str, error: LookupError) -> FilterDecision {
        warn!(
            ip = %address,
            source = error.source_name(),
            kind = error.kind(),
            error = %error,
            "Outbound lookup failed"
        );
        FilterDecision::ServerError(error)
    }
}

/// Parse the extracted address, mapping IPv4-mapped IPv6 back to IPv4.
fn parse_client_ip(address: &str) -> Option<IpAddr> {
    address.parse::<IpAddr>().ok().map(|ip| ip.to_canonical())
}

fn find_range<'a>(ranges: &'a [IpNet], ip: Option<&IpAddr>) -> Option<&'a IpNet> {
    let ip = ip?;
    ranges.iter().find(|net| net.contains(ip))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::static_ranges::StaticRangeProvider;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const CHROME: &str =
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

    /// Range source standing in for the AWS document.
    struct StubRanges {
        ranges: Vec<IpNet>,
        fail: bool,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl CloudRangeSource for StubRanges {
        async fn ranges(&self) -> Result<Vec<IpNet>, LookupError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(LookupError::Status {
                    source_name: "aws".to_string(),
                    status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
                });
            }
            Ok(self.ranges.clone())
        }

        fn name(&self) -> &str {
            "aws"
        }
    }

    /// Locator answering from a fixed table.
    struct StubLocator {
        countries: HashMap<String, String>,
        fail: bool,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl GeoLocator for StubLocator {
        async fn locate(&self, address: &str) -> Result<GeoLookup, LookupError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(LookupError::Parse {
                    source_name: "ip-api".to_string(),
                    message: "expected value at line 1 column 1".to_string(),
                });
            }
            Ok(match self.countries.get(address) {
                Some(code) => GeoLookup::located(code),
                None => GeoLookup::unresolved(),
            })
        }

        fn name(&self) -> &str {
            "ip-api"
        }
    }

    struct Harness {
        filter: RequestFilter,
        range_calls: Arc<AtomicUsize>,
        geo_calls: Arc<AtomicUsize>,
    }

    fn harness_with(config: Config, ranges_fail: bool, geo_fail: bool) -> Harness {
        let range_calls = Arc::new(AtomicUsize::new(0));
        let geo_calls = Arc::new(AtomicUsize::new(0));

        let aws = StubRanges {
            ranges: vec!["3.5.140.0/22".parse().unwrap(), "2600:1f18::/33".parse().unwrap()],
            fail: ranges_fail,
            calls: range_calls.clone(),
        };

        let mut sources: Vec<Box<dyn CloudRangeSource>> = vec![Box::new(aws)];
        for (name, nets) in config.parse_static_ranges() {
            sources.push(Box::new(StaticRangeProvider::new(name, nets)));
        }

        let countries = [
            ("90.0.0.1", "FR"),
            ("2a01:cb00::1", "FR"),
            ("8.8.8.8", "US"),
            ("35.190.1.1", "FR"),
            ("3.5.140.9", "FR"),
        ]
        .iter()
        .map(|(ip, cc)| (ip.to_string(), cc.to_string()))
        .collect();

        let locator = StubLocator {
            countries,
            fail: geo_fail,
            calls: geo_calls.clone(),
        };

        Harness {
            filter: RequestFilter::new(&config, sources, Box::new(locator)),
            range_calls,
            geo_calls,
        }
    }

    fn harness() -> Harness {
        harness_with(Config::default(), false, false)
    }

    fn request(user_agent: &str, xff: Option<&str>) -> IncomingRequest {
        let mut headers = HashMap::new();
        headers.insert("user-agent".to_string(), user_agent.to_string());
        if let Some(xff) = xff {
            headers.insert("x-forwarded-for".to_string(), xff.to_string());
        }
        IncomingRequest::new(headers, Some("192.0.2.10:40000".parse().unwrap()))
    }

    fn assert_rejected(decision: &FilterDecision, reason: RejectReason, message: &str) {
        match decision {
            FilterDecision::Rejected {
                reason: r,
                status,
                message: m,
            } => {
                assert_eq!(*r, reason);
                assert_eq!(*status, 403);
                assert_eq!(m, message);
            }
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_bot_rejected_before_anything_else() {
        let h = harness();
        // Cloud address and a French one; the bot check still wins.
        for xff in ["3.5.140.9", "90.0.0.1"] {
            let decision = h
                .filter
                .evaluate(&request("Mozilla/5.0 (compatible; googlebot/2.1)", Some(xff)))
                .await;
            assert_rejected(&decision, RejectReason::Bot, "Access blocked for bots.");
        }
        assert_eq!(h.range_calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.geo_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_bot_wins_over_browser() {
        let h = harness();
        let decision = h
            .filter
            .evaluate(&request("TorBrowser/13.0 DuckDuckBot/1.1", Some("90.0.0.1")))
            .await;
        assert_rejected(&decision, RejectReason::Bot, "Access blocked for bots.");
    }

    #[tokio::test]
    async fn test_browser_rejected() {
        let h = harness();
        let decision = h
            .filter
            .evaluate(&request("Mozilla/5.0 SafeExamBrowser/3.5", Some("3.5.140.9")))
            .await;
        assert_rejected(&decision, RejectReason::Browser, "Access blocked for this browser.");
        assert_eq!(h.range_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_browser_rejected_even_when_lookups_fail() {
        let h = harness_with(Config::default(), true, true);
        let decision = h
            .filter
            .evaluate(&request("mozilla/5.0 torbrowser/13.0", Some("90.0.0.1")))
            .await;
        assert_rejected(&decision, RejectReason::Browser, "Access blocked for this browser.");
    }

    #[tokio::test]
    async fn test_aws_range_rejected() {
        let h = harness();
        let decision = h.filter.evaluate(&request(CHROME, Some("3.5.140.9"))).await;
        assert_rejected(&decision, RejectReason::CloudProvider, "Access blocked for cloud provider IPs.");
        assert_eq!(h.geo_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_static_range_rejected() {
        let h = harness();
        for xff in ["35.190.1.1", "104.199.255.255", "20.39.0.1", "40.91.3.4"] {
            let decision = h.filter.evaluate(&request(CHROME, Some(xff))).await;
            assert_eq!(decision.reject_reason(), Some(RejectReason::CloudProvider), "{}", xff);
        }
    }

    #[tokio::test]
    async fn test_ipv6_and_mapped_addresses() {
        let h = harness();
        let decision = h.filter.evaluate(&request(CHROME, Some("2600:1f18::abcd"))).await;
        assert_eq!(decision.reject_reason(), Some(RejectReason::CloudProvider));

        let decision = h.filter.evaluate(&request(CHROME, Some("::ffff:35.190.1.1"))).await;
        assert_eq!(decision.reject_reason(), Some(RejectReason::CloudProvider));
    }

    #[tokio::test]
    async fn test_france_redirected() {
        let h = harness();
        let decision = h
            .filter
            .evaluate(&request(CHROME, Some("90.0.0.1, 10.0.0.1")))
            .await;
        match decision {
            FilterDecision::Redirect { location, status } => {
                assert_eq!(location, "https://assurance-maladie-cpam.vercel.app/");
                assert_eq!(status, 301);
            }
            other => panic!("expected redirect, got {:?}", other),
        }
        assert_eq!(h.range_calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.geo_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_other_country_rejected() {
        let h = harness();
        let decision = h.filter.evaluate(&request(CHROME, Some("8.8.8.8"))).await;
        assert_rejected(
            &decision,
            RejectReason::Country,
            "Access restricted to France-based IPs only.",
        );
    }

    #[tokio::test]
    async fn test_failed_geolocation_rejected() {
        let h = harness();
        let decision = h.filter.evaluate(&request(CHROME, Some("198.51.100.1"))).await;
        assert_eq!(decision.reject_reason(), Some(RejectReason::Country));
    }

    #[tokio::test]
    async fn test_missing_address_rejected_by_country() {
        let h = harness();
        let request = IncomingRequest::new(HashMap::new(), None);
        let decision = h.filter.evaluate(&request).await;
        assert_eq!(decision.reject_reason(), Some(RejectReason::Country));
        assert_eq!(h.geo_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_peer_address_used_without_xff() {
        let h = harness();
        let request = IncomingRequest::new(HashMap::new(), Some("90.0.0.1:1234".parse().unwrap()));
        assert!(h.filter.evaluate(&request).await.is_redirect());
    }

    #[tokio::test]
    async fn test_range_fetch_failure_is_server_error() {
        let h = harness_with(Config::default(), true, false);
        let decision = h.filter.evaluate(&request(CHROME, Some("90.0.0.1"))).await;
        assert_eq!(decision.status(), 500);
        match decision {
            FilterDecision::ServerError(e) => assert_eq!(e.source_name(), "aws"),
            other => panic!("expected server error, got {:?}", other),
        }
        assert_eq!(h.geo_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_geo_failure_is_server_error() {
        let h = harness_with(Config::default(), false, true);
        let decision = h.filter.evaluate(&request(CHROME, Some("90.0.0.1"))).await;
        match decision {
            FilterDecision::ServerError(e) => {
                assert_eq!(e.source_name(), "ip-api");
                assert_eq!(e.kind(), "parse");
            }
            other => panic!("expected server error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cloud_rejection_skips_failing_geo_lookup() {
        let h = harness_with(Config::default(), false, true);
        let decision = h.filter.evaluate(&request(CHROME, Some("3.5.140.9"))).await;
        assert_eq!(decision.reject_reason(), Some(RejectReason::CloudProvider));
    }

    #[tokio::test]
    async fn test_concurrent_mode_same_decisions() {
        let mut config = Config::default();
        config.settings.lookup_mode = LookupMode::Concurrent;
        let h = harness_with(config, false, false);

        let decision = h.filter.evaluate(&request(CHROME, Some("3.5.140.9"))).await;
        assert_eq!(decision.reject_reason(), Some(RejectReason::CloudProvider));
        // Both lookups were issued.
        assert_eq!(h.geo_calls.load(Ordering::SeqCst), 1);

        assert!(h.filter.evaluate(&request(CHROME, Some("90.0.0.1"))).await.is_redirect());

        let decision = h.filter.evaluate(&request(CHROME, Some("8.8.8.8"))).await;
        assert_eq!(decision.reject_reason(), Some(RejectReason::Country));
    }

    #[tokio::test]
    async fn test_concurrent_mode_failure_is_server_error() {
        let mut config = Config::default();
        config.settings.lookup_mode = LookupMode::Concurrent;
        let h = harness_with(config, false, true);

        let decision = h.filter.evaluate(&request(CHROME, Some("3.5.140.9"))).await;
        assert_eq!(decision.status(), 500);
    }

    #[tokio::test]
    async fn test_disabled_redirects_everything() {
        let mut config = Config::default();
        config.settings.enabled = false;
        let h = harness_with(config, true, true);

        let decision = h.filter.evaluate(&request("Googlebot", Some("3.5.140.9"))).await;
        assert!(decision.is_redirect());
        assert_eq!(h.range_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_custom_countries_and_redirect() {
        let mut config = Config::default();
        config.geo.allowed_countries = vec!["us".to_string()];
        config.redirect.target_url = "https://example.com/".to_string();
        config.redirect.status = 302;
        let h = harness_with(config, false, false);

        match h.filter.evaluate(&request(CHROME, Some("8.8.8.8"))).await {
            FilterDecision::Redirect { location, status } => {
                assert_eq!(location, "https://example.com/");
                assert_eq!(status, 302);
            }
            other => panic!("expected redirect, got {:?}", other),
        }

        let decision = h.filter.evaluate(&request(CHROME, Some("90.0.0.1"))).await;
        assert_eq!(decision.reject_reason(), Some(RejectReason::Country));
    }

    #[test]
    fn test_range_source_order() {
        let h = harness();
        assert_eq!(h.filter.range_source_names(), ["aws", "google-cloud", "azure"]);
    }

    #[test]
    fn test_parse_client_ip() {
        assert_eq!(parse_client_ip("1.2.3.4"), Some("1.2.3.4".parse().unwrap()));
        assert_eq!(parse_client_ip("::ffff:1.2.3.4"), Some("1.2.3.4".parse().unwrap()));
        assert_eq!(parse_client_ip("unknown"), None);
        assert_eq!(parse_client_ip(""), None);
    }
}
