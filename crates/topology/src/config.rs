//! Configuration for the topology manager

use crate::topology::instance::QueryLimits;
use crate::topology::routing::{RouteMetric, DEFAULT_MAX_LINK_LATENCY};
use crate::{Result, TopologyError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Core configuration for the topology manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopologyConfig {
    /// Switches the link store will accept
    #[serde(default = "default_max_switches")]
    pub max_switches: usize,
    /// Link records the link store will accept
    #[serde(default = "default_max_links")]
    pub max_links: usize,
    /// Upper bound on `k` for route queries; larger requests are clamped
    #[serde(default = "default_max_route_count")]
    pub max_route_count: usize,
    /// Metric in effect at start-up
    #[serde(default)]
    pub route_metric: RouteMetric,
    /// Latency ceiling; out-of-range latencies cost this much
    #[serde(default = "default_max_link_latency")]
    pub max_link_latency: i64,
    /// Whether to rebuild periodically when links changed
    #[serde(default = "default_true")]
    pub auto_refresh: bool,
    /// Refresh interval in milliseconds
    #[serde(default = "default_refresh_interval_ms")]
    pub refresh_interval_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_max_switches() -> usize {
    4096
}

fn default_max_links() -> usize {
    65536
}

fn default_max_route_count() -> usize {
    1000
}

fn default_max_link_latency() -> i64 {
    DEFAULT_MAX_LINK_LATENCY
}

fn default_refresh_interval_ms() -> u64 {
    500
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            max_switches: default_max_switches(),
            max_links: default_max_links(),
            max_route_count: default_max_route_count(),
            route_metric: RouteMetric::default(),
            max_link_latency: default_max_link_latency(),
            auto_refresh: true,
            refresh_interval_ms: default_refresh_interval_ms(),
        }
    }
}

impl TopologyConfig {
    /// Create a minimal configuration: small limits, no background refresh
    pub fn minimal() -> Self {
        Self {
            max_switches: 64,
            max_links: 512,
            max_route_count: 16,
            auto_refresh: false,
            ..Default::default()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config = Self::from_json_str(&raw)?;
        tracing::info!(path = %path.display(), "Loaded topology configuration");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_switches == 0 {
            return Err(TopologyError::ConfigError("maxSwitches must be positive".to_string()));
        }
        if self.max_links == 0 {
            return Err(TopologyError::ConfigError("maxLinks must be positive".to_string()));
        }
        if self.max_route_count == 0 {
            return Err(TopologyError::ConfigError("maxRouteCount must be positive".to_string()));
        }
        if self.max_link_latency <= 0 {
            return Err(TopologyError::ConfigError("maxLinkLatency must be positive".to_string()));
        }
        if self.refresh_interval_ms == 0 {
            return Err(TopologyError::ConfigError("refreshIntervalMs must be positive".to_string()));
        }
        Ok(())
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    pub fn query_limits(&self) -> QueryLimits {
        QueryLimits {
            max_route_count: self.max_route_count,
            max_link_latency: self.max_link_latency,
        }
    }
}
