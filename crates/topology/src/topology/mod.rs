//! Topology module - Graph model, snapshot building and route search

pub mod graph;
pub mod links;
pub mod broadcast;
pub mod clusters;
pub mod engine;
pub mod routing;
pub mod instance;
pub mod invariants;
pub mod manager;


pub use graph::{DatapathId, Link, LinkInfo, LinkType, NodePortTuple, PortNumber, Route, RouteId};
pub use links::LinkStore;
pub use broadcast::BroadcastDomainClassifier;
pub use clusters::{Cluster, ClusterBuilder};
pub use engine::{Path, RoutingGraph, TopologyEngine};
pub use routing::{LinkCost, RouteConfig, RouteMetric, RoutePlanner};
pub use instance::{QueryLimits, TopologyInstance};
pub use invariants::{InvariantChecker, InvariantViolation, ViolationSeverity};
pub use manager::{InstancePair, TopologyListener, TopologyManager};
