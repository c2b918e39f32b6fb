//! # Topology - Switch topology and route engine for an SDN controller
//!
//! Keeps a live model of the switches and links discovered on an OpenFlow
//! network and turns it into immutable snapshots that answer clustering and
//! routing questions.
//!
//! ## Core Capabilities
//!
//! - **Link Store**: Directed link records fed by discovery events
//! - **Broadcast Domains**: Detects ports behind hubs and non-OpenFlow segments
//! - **Clusters**: OpenFlow domains, archipelagos and per-cluster broadcast trees
//! - **Routing**: k-shortest paths by hop count, latency or utilization
//! - **Snapshots**: Atomically published instances, with and without tunnel links

pub mod config;
pub mod topology;

pub use config::TopologyConfig;
pub use topology::{
    broadcast::BroadcastDomainClassifier,
    clusters::{Cluster, ClusterBuilder},
    engine::{Path, RoutingGraph, TopologyEngine},
    graph::{DatapathId, Link, LinkInfo, LinkType, NodePortTuple, PortNumber, Route, RouteId},
    instance::{QueryLimits, TopologyInstance},
    invariants::{InvariantChecker, InvariantViolation, ViolationSeverity},
    links::LinkStore,
    manager::{InstancePair, TopologyListener, TopologyManager},
    routing::{LinkCost, RouteConfig, RouteMetric, RoutePlanner},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Main error types for topology operations
#[derive(Debug, thiserror::Error)]
pub enum TopologyError {
    #[error("Invalid route metric: {0:?}")]
    InvalidRouteMetric(String),

    #[error("Invalid path count: {0} (must be at least 1)")]
    InvalidPathCount(usize),

    #[error("Switch limit of {limit} reached")]
    SwitchLimitExceeded { limit: usize },

    #[error("Link limit of {limit} reached")]
    LinkLimitExceeded { limit: usize },

    #[error("Self-loop on switch {0}")]
    SelfLoop(DatapathId),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TopologyError>;

/// A change applied to the link store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum TopologyChange {
    LinkUpdated { link: Link, link_type: LinkType, latency: i64 },
    LinkRemoved { link: Link },
    SwitchRemoved { switch: DatapathId },
}

/// Summary of one published instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopologySummary {
    pub generation: u64,
    pub built_at: DateTime<Utc>,
    pub tunnels_enabled: bool,
    pub switch_count: usize,
    pub link_count: usize,
    pub filtered_link_count: usize,
    pub cluster_count: usize,
    pub broadcast_domain_port_count: usize,
    pub tunnel_port_count: usize,
}

/// Install a fmt subscriber filtered by `RUST_LOG`, with debug output for
/// this crate. Does nothing if a global subscriber is already set.
pub fn init_tracing() -> Result<()> {
    let directive = "topology=debug"
        .parse::<tracing_subscriber::filter::Directive>()
        .map_err(|e| TopologyError::ConfigError(format!("invalid log directive: {}", e)))?;

    let installed = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(directive))
        .try_init()
        .is_ok();

    if installed {
        tracing::info!("Topology v{} initialized", env!("CARGO_PKG_VERSION"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_twice() {
        assert!(init_tracing().is_ok());
        assert!(init_tracing().is_ok());
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            TopologyError::InvalidPathCount(0).to_string(),
            "Invalid path count: 0 (must be at least 1)"
        );
        assert_eq!(
            TopologyError::SelfLoop(DatapathId(1)).to_string(),
            "Self-loop on switch 00:00:00:00:00:00:00:01"
        );
    }

    #[test]
    fn test_change_serializes_camel_case() {
        let change = TopologyChange::LinkUpdated {
            link: Link::new(1u64, 2u32, 3u64, 4u32),
            link_type: LinkType::Tunnel,
            latency: 5,
        };
        let json = serde_json::to_value(&change).unwrap();
        assert_eq!(json["linkUpdated"]["linkType"], "tunnel");
        assert_eq!(json["linkUpdated"]["link"]["srcPort"], 2);
    }
}
