//! Outbound lookup providers.
//!
//! The filter consults two kinds of external data: cloud provider range
//! lists ([`CloudRangeSource`]) and IP geolocation ([`GeoLocator`]).

pub mod aws;
pub mod ip_api;
pub mod static_ranges;

use async_trait::async_trait;
use ipnet::IpNet;

/// Outcome of a geolocation lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeoLookup {
    /// Whether the service reported a successful lookup.
    pub success: bool,

    /// ISO 3166-1 alpha-2 country code, uppercase.
    pub country_code: Option<String>,
}

impl GeoLookup {
    /// A successful lookup resolving to `country_code`.
    pub fn located(country_code: &str) -> Self {
        Self {
            success: true,
            country_code: Some(country_code.to_ascii_uppercase()),
        }
    }

    /// A lookup the service could not resolve.
    pub fn unresolved() -> Self {
        Self {
            success: false,
            country_code: None,
        }
    }

    /// Returns the country code if the lookup succeeded.
    pub fn country(&self) -> Option<&str> {
        if self.success {
            self.country_code.as_deref()
        } else {
            None
        }
    }
}

/// Error from an outbound lookup.
///
/// Every variant renders as the same opaque 500 to the client; the variants
/// only exist for operator diagnostics.
#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    /// The request could not be sent or the body could not be read.
    #[error("{source_name}: fetch failed: {error}")]
    Fetch {
        source_name: String,
        #[source]
        error: reqwest::Error,
    },

    /// The request timed out.
    #[error("{source_name}: request timed out")]
    Timeout { source_name: String },

    /// Non-success HTTP status.
    #[error("{source_name}: unexpected HTTP status {status}")]
    Status {
        source_name: String,
        status: reqwest::StatusCode,
    },

    /// The body did not decode as the expected document.
    #[error("{source_name}: invalid response: {message}")]
    Parse {
        source_name: String,
        message: String,
    },

    /// The lookup could not be issued.
    #[error("{source_name}: lookup failed: {message}")]
    Lookup {
        source_name: String,
        message: String,
    },
}

impl LookupError {
    /// Classify a reqwest error raised while talking to `source_name`.
    pub fn from_reqwest(source_name: &str, error: reqwest::Error) -> Self {
        if error.is_timeout() {
            LookupError::Timeout {
                source_name: source_name.to_string(),
            }
        } else if error.is_decode() {
            LookupError::Parse {
                source_name: source_name.to_string(),
                message: error.to_string(),
            }
        } else {
            LookupError::Fetch {
                source_name: source_name.to_string(),
                error,
            }
        }
    }

    /// Short machine-friendly label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            LookupError::Fetch { .. } => "fetch",
            LookupError::Timeout { .. } => "timeout",
            LookupError::Status { .. } => "status",
            LookupError::Parse { .. } => "parse",
            LookupError::Lookup { .. } => "lookup",
        }
    }

    /// Name of the source that failed.
    pub fn source_name(&self) -> &str {
        match self {
            LookupError::Fetch { source_name, .. }
            | LookupError::Timeout { source_name }
            | LookupError::Status { source_name, .. }
            | LookupError::Parse { source_name, .. }
            | LookupError::Lookup { source_name, .. } => source_name,
        }
    }
}

/// A source of cloud provider CIDR prefixes.
#[async_trait]
pub trait CloudRangeSource: Send + Sync {
    /// Return the prefixes this source currently publishes.
    async fn ranges(&self) -> Result<Vec<IpNet>, LookupError>;

    /// Source name for logging.
    fn name(&self) -> &str;
}

/// An IP geolocation service.
#[async_trait]
pub trait GeoLocator: Send + Sync {
    /// Locate `address`. The address is passed through as extracted and may
    /// not be a valid IP.
    async fn locate(&self, address: &str) -> Result<GeoLookup, LookupError>;

    /// Locator name for logging.
    fn name(&self) -> &str;
}
