//! Fixed CIDR range sets loaded from configuration.

use super::{CloudRangeSource, LookupError};
use async_trait::async_trait;
use ipnet::IpNet;

/// A named, configuration-provided list of prefixes.
pub struct StaticRangeProvider {
    name: String,
    ranges: Vec<IpNet>,
}

impl StaticRangeProvider {
    /// Create a provider over already-parsed ranges.
    pub fn new(name: impl Into<String>, ranges: Vec<IpNet>) -> Self {
        Self {
            name: name.into(),
            ranges,
        }
    }

    /// Number of prefixes in this set.
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

#[async_trait]
impl CloudRangeSource for StaticRangeProvider {
    async fn ranges(&self) -> Result<Vec<IpNet>, LookupError> {
        Ok(self.ranges.clone())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
