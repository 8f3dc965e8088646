//! Configuration types for the Geo Redirect agent.

use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use url::Url;

/// Root configuration for the Geo Redirect agent.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Global settings.
    #[serde(default)]
    pub settings: Settings,

    /// IP extraction configuration.
    #[serde(default)]
    pub ip_extraction: IpExtractionConfig,

    /// User-Agent signature lists.
    #[serde(default)]
    pub user_agent: UserAgentConfig,

    /// Cloud provider range sources.
    #[serde(default)]
    pub cloud_ranges: CloudRangesConfig,

    /// Geolocation lookup.
    #[serde(default)]
    pub geo: GeoConfig,

    /// Redirect issued to accepted requests.
    #[serde(default)]
    pub redirect: RedirectConfig,

    /// Rejection bodies.
    #[serde(default)]
    pub messages: Messages,
}

/// Global settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    /// Master enable/disable switch. When disabled every request is redirected.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Log rejected requests.
    #[serde(default = "default_true")]
    pub log_blocked: bool,

    /// Log redirected requests.
    #[serde(default)]
    pub log_allowed: bool,

    /// How the two outbound lookups are scheduled.
    #[serde(default)]
    pub lookup_mode: LookupMode,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enabled: true,
            log_blocked: true,
            log_allowed: false,
            lookup_mode: LookupMode::default(),
        }
    }
}

/// Scheduling of the cloud range fetch and the geolocation lookup.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LookupMode {
    /// Fetch ranges, check membership, then geolocate.
    #[default]
    Sequential,
    /// Issue both lookups at once. Cloud membership still decides first.
    Concurrent,
}

/// IP extraction configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IpExtractionConfig {
    /// Headers to check for client IP, in order of preference.
    #[serde(default = "default_ip_headers")]
    pub headers: Vec<String>,

    /// Use first IP from X-Forwarded-For (true) or last IP (false).
    #[serde(default = "default_true")]
    pub use_first_ip: bool,
}

impl Default for IpExtractionConfig {
    fn default() -> Self {
        Self {
            headers: default_ip_headers(),
            use_first_ip: true,
        }
    }
}

fn default_ip_headers() -> Vec<String> {
    vec!["x-forwarded-for".to_string()]
}

/// User-Agent substring lists. Matching is case-insensitive.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UserAgentConfig {
    #[serde(default = "default_bot_signatures")]
    pub bot_signatures: Vec<String>,

    #[serde(default = "default_blocked_browsers")]
    pub blocked_browsers: Vec<String>,
}

impl Default for UserAgentConfig {
    fn default() -> Self {
        Self {
            bot_signatures: default_bot_signatures(),
            blocked_browsers: default_blocked_browsers(),
        }
    }
}

fn default_bot_signatures() -> Vec<String> {
    ["Googlebot", "Bingbot", "Slurp", "DuckDuckBot"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_blocked_browsers() -> Vec<String> {
    ["SafeExamBrowser", "TorBrowser"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Cloud provider range sources.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CloudRangesConfig {
    /// Published AWS range document.
    #[serde(default)]
    pub aws: AwsRangesConfig,

    /// Fixed CIDR sets.
    #[serde(default = "default_static_ranges")]
    pub static_ranges: Vec<StaticRangeSet>,
}

impl Default for CloudRangesConfig {
    fn default() -> Self {
        Self {
            aws: AwsRangesConfig::default(),
            static_ranges: default_static_ranges(),
        }
    }
}

/// AWS `ip-ranges.json` source.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AwsRangesConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// URL of the range document.
    #[serde(default = "default_aws_url")]
    pub url: String,

    /// Request timeout in milliseconds.
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,

    /// Reuse a fetched document for this many seconds. 0 fetches on every request.
    #[serde(default)]
    pub cache_ttl_seconds: u64,

    /// Also load `ipv6_prefixes`.
    #[serde(default = "default_true")]
    pub include_ipv6: bool,
}

impl Default for AwsRangesConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: default_aws_url(),
            timeout_ms: default_timeout(),
            cache_ttl_seconds: 0,
            include_ipv6: true,
        }
    }
}

fn default_aws_url() -> String {
    "https://ip-ranges.amazonaws.com/ip-ranges.json".to_string()
}

/// Named list of CIDR prefixes.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StaticRangeSet {
    /// Name for logging.
    pub name: String,

    /// CIDR prefixes.
    #[serde(default)]
    pub cidrs: Vec<String>,
}

// Placeholders, not an exhaustive list of either provider's space.
fn default_static_ranges() -> Vec<StaticRangeSet> {
    vec![
        StaticRangeSet {
            name: "google-cloud".to_string(),
            cidrs: vec!["35.190.0.0/16".to_string(), "104.196.0.0/14".to_string()],
        },
        StaticRangeSet {
            name: "azure".to_string(),
            cidrs: vec!["20.36.0.0/14".to_string(), "40.90.0.0/15".to_string()],
        },
    ]
}

/// Geolocation lookup configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GeoConfig {
    /// Base endpoint. The client address is appended as a path segment.
    #[serde(default = "default_geo_endpoint")]
    pub endpoint: String,

    /// Request timeout in milliseconds.
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,

    /// Countries whose visitors are redirected.
    #[serde(default = "default_allowed_countries")]
    pub allowed_countries: Vec<String>,
}

impl Default for GeoConfig {
    fn default() -> Self {
        Self {
            endpoint: default_geo_endpoint(),
            timeout_ms: default_timeout(),
            allowed_countries: default_allowed_countries(),
        }
    }
}

fn default_geo_endpoint() -> String {
    "http://ip-api.com/json".to_string()
}

fn default_allowed_countries() -> Vec<String> {
    vec!["FR".to_string()]
}

/// Redirect configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RedirectConfig {
    #[serde(default = "default_target_url")]
    pub target_url: String,

    /// Must be a 3xx status.
    #[serde(default = "default_redirect_status")]
    pub status: u16,
}

impl Default for RedirectConfig {
    fn default() -> Self {
        Self {
            target_url: default_target_url(),
            status: default_redirect_status(),
        }
    }
}

fn default_target_url() -> String {
    "https://assurance-maladie-cpam.vercel.app/".to_string()
}

fn default_redirect_status() -> u16 {
    301
}

/// Plain-text bodies returned with each rejection.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Messages {
    #[serde(default = "default_bot_message")]
    pub bot: String,

    #[serde(default = "default_browser_message")]
    pub browser: String,

    #[serde(default = "default_cloud_message")]
    pub cloud: String,

    #[serde(default = "default_country_message")]
    pub country: String,
}

impl Default for Messages {
    fn default() -> Self {
        Self {
            bot: default_bot_message(),
            browser: default_browser_message(),
            cloud: default_cloud_message(),
            country: default_country_message(),
        }
    }
}

fn default_bot_message() -> String {
    "Access blocked for bots.".to_string()
}

fn default_browser_message() -> String {
    "Access blocked for this browser.".to_string()
}

fn default_cloud_message() -> String {
    "Access blocked for cloud provider IPs.".to_string()
}

fn default_country_message() -> String {
    "Access restricted to France-based IPs only.".to_string()
}

fn default_timeout() -> u64 {
    5000
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let expanded = expand_env_vars(&content);
        let config: Config = serde_yaml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        for (kind, list) in [
            ("bot_signatures", &self.user_agent.bot_signatures),
            ("blocked_browsers", &self.user_agent.blocked_browsers),
        ] {
            if list.iter().any(|s| s.trim().is_empty()) {
                anyhow::bail!("{} contains an empty signature", kind);
            }
        }

        if self.cloud_ranges.aws.enabled {
            Url::parse(&self.cloud_ranges.aws.url).map_err(|e| {
                anyhow::anyhow!("Invalid AWS range url '{}': {}", self.cloud_ranges.aws.url, e)
            })?;
        }

        for set in &self.cloud_ranges.static_ranges {
            for cidr in &set.cidrs {
                if parse_range(cidr).is_none() {
                    anyhow::bail!("Invalid CIDR in static range '{}': {}", set.name, cidr);
                }
            }
        }

        Url::parse(&self.geo.endpoint)
            .map_err(|e| anyhow::anyhow!("Invalid geo endpoint '{}': {}", self.geo.endpoint, e))?;

        if self.geo.allowed_countries.is_empty() {
            anyhow::bail!("geo.allowed_countries must not be empty");
        }
        for code in &self.geo.allowed_countries {
            if code.len() != 2 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
                anyhow::bail!("Invalid country code: {}", code);
            }
        }

        Url::parse(&self.redirect.target_url).map_err(|e| {
            anyhow::anyhow!("Invalid redirect target '{}': {}", self.redirect.target_url, e)
        })?;

        if !(300..400).contains(&self.redirect.status) {
            anyhow::bail!(
                "redirect.status must be a 3xx status, got {}",
                self.redirect.status
            );
        }

        Ok(())
    }

    /// Parse every static range set into networks, skipping invalid entries.
    pub fn parse_static_ranges(&self) -> Vec<(String, Vec<IpNet>)> {
        self.cloud_ranges
            .static_ranges
            .iter()
            .map(|set| {
                let nets = set.cidrs.iter().filter_map(|c| parse_range(c)).collect();
                (set.name.clone(), nets)
            })
            .collect()
    }

    /// Generate example configuration YAML.
    pub fn example() -> String {
        r#"# Geo Redirect Agent Configuration

settings:
  enabled: true
  log_blocked: true
  log_allowed: false
  lookup_mode: sequential      # sequential or concurrent

# IP extraction from request headers, falls back to the peer address
ip_extraction:
  headers:
    - "x-forwarded-for"
  use_first_ip: true           # Use first IP from X-Forwarded-For

# Case-insensitive substrings of the User-Agent header
user_agent:
  bot_signatures: ["Googlebot", "Bingbot", "Slurp", "DuckDuckBot"]
  blocked_browsers: ["SafeExamBrowser", "TorBrowser"]

cloud_ranges:
  aws:
    enabled: true
    url: "https://ip-ranges.amazonaws.com/ip-ranges.json"
    timeout_ms: 5000
    cache_ttl_seconds: 0       # 0 = fetch on every request
    include_ipv6: true
  static_ranges:
    - name: "google-cloud"
      cidrs: ["35.190.0.0/16", "104.196.0.0/14"]
    - name: "azure"
      cidrs: ["20.36.0.0/14", "40.90.0.0/15"]

geo:
  endpoint: "http://ip-api.com/json"
  timeout_ms: 5000
  allowed_countries: ["FR"]

redirect:
  target_url: "${GEO_REDIRECT_TARGET}"
  status: 301

messages:
  bot: "Access blocked for bots."
  browser: "Access blocked for this browser."
  cloud: "Access blocked for cloud provider IPs."
  country: "Access restricted to France-based IPs only."
"#
        .to_string()
    }
}

/// Parse a CIDR prefix, accepting a bare address as a host route.
pub fn parse_range(s: &str) -> Option<IpNet> {
    let s = s.trim();
    if let Ok(net) = s.parse::<IpNet>() {
        return Some(net);
    }
    s.parse::<IpAddr>().ok().map(IpNet::from)
}

/// Expand environment variables in the format ${VAR_NAME}.
fn expand_env_vars(content: &str) -> String {
    let mut result = content.to_string();
    let re = match regex::Regex::new(r"\$\{([^}]+)\}") {
        Ok(re) => re,
        Err(_) => return result,
    };

    for cap in re.captures_iter(content) {
        let var_name = &cap[1];
        let var_value = std::env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}
