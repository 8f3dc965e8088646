//! Geo Redirect Agent for Zentinel.
//!
//! Filters incoming requests by User-Agent, cloud provider address ranges and
//! geolocated country, then redirects the requests that pass.
//!
//! # Checks
//!
//! Evaluated in order, first match wins:
//!
//! - **Bot signatures** - Googlebot, Bingbot, Slurp, DuckDuckBot (403)
//! - **Blocked browsers** - SafeExamBrowser, TorBrowser (403)
//! - **Cloud provider ranges** - AWS published ranges plus static sets (403)
//! - **Country** - only allowed countries are redirected, others get 403
//!
//! A failed outbound lookup answers 500 without detail.
//!
//! # Example Configuration
//!
//! ```yaml
//! settings:
//!   lookup_mode: sequential
//!
//! cloud_ranges:
//!   aws:
//!     cache_ttl_seconds: 0
//!
//! geo:
//!   allowed_countries: ["FR"]
//!
//! redirect:
//!   target_url: "https://assurance-maladie-cpam.vercel.app/"
//!   status: 301
//! ```

pub mod agent;
pub mod cache;
pub mod config;
pub mod filter;
pub mod providers;
pub mod request;
pub mod signatures;

#[cfg(test)]
mod test_support;

pub use agent::GeoRedirectAgent;
pub use config::Config;
pub use filter::{FilterDecision, RejectReason, RequestFilter};
pub use request::IncomingRequest;
