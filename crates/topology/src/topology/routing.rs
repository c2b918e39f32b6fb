//! Route planning - Metrics, link costs and k-route queries

use super::engine::{RoutingGraph, TopologyEngine};
use super::graph::{DatapathId, LinkInfo, Route};
use crate::{Result, TopologyError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Latency ceiling applied when no configuration says otherwise
pub const DEFAULT_MAX_LINK_LATENCY: i64 = 10_000;

/// Cost added per unit of utilization on top of the base hop cost
pub const UTILIZATION_COST_SCALE: f64 = 100.0;

/// Cost function used to rank routes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteMetric {
    /// Every link costs 1
    #[default]
    Hopcount,
    /// Link latency, clamped to the configured ceiling
    Latency,
    /// Link load: `1 + utilization * 100`
    Utilization,
}

impl RouteMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteMetric::Hopcount => "hopcount",
            RouteMetric::Latency => "latency",
            RouteMetric::Utilization => "utilization",
        }
    }
}

impl fmt::Display for RouteMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RouteMetric {
    type Err = TopologyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "hopcount" => Ok(RouteMetric::Hopcount),
            "latency" => Ok(RouteMetric::Latency),
            "utilization" => Ok(RouteMetric::Utilization),
            _ => Err(TopologyError::InvalidRouteMetric(s.to_string())),
        }
    }
}

/// A versioned route configuration. Readers load one value and use it for
/// the whole query; every change bumps `version`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteConfig {
    pub metric: RouteMetric,
    pub version: u64,
}

impl RouteConfig {
    pub fn new(metric: RouteMetric) -> Self {
        Self { metric, version: 0 }
    }

    /// The next version carrying `metric`
    pub fn with_metric(&self, metric: RouteMetric) -> Self {
        Self {
            metric,
            version: self.version + 1,
        }
    }
}

/// Per-link cost under one metric
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkCost {
    metric: RouteMetric,
    max_latency: i64,
}

impl LinkCost {
    pub fn new(metric: RouteMetric, max_latency: i64) -> Self {
        Self { metric, max_latency }
    }

    pub fn metric(&self) -> RouteMetric {
        self.metric
    }

    /// Out-of-range latency costs the ceiling so it never wins a route
    pub fn clamp_latency(latency: i64, max_latency: i64) -> i64 {
        if latency < 0 || latency > max_latency {
            max_latency
        } else {
            latency
        }
    }

    pub fn cost(&self, info: &LinkInfo) -> f64 {
        match self.metric {
            RouteMetric::Hopcount => 1.0,
            RouteMetric::Latency => Self::clamp_latency(info.latency, self.max_latency) as f64,
            RouteMetric::Utilization => 1.0 + LinkInfo::sanitize_utilization(info.utilization) * UTILIZATION_COST_SCALE,
        }
    }
}

/// Route planner answering k-route queries over a routing graph
pub struct RoutePlanner;

impl RoutePlanner {
    /// Up to `k` routes from `src` to `dst`, cheapest first.
    ///
    /// `k` must be positive and is capped at `max_routes`. Unknown or
    /// unreachable switches give an empty list.
    pub fn plan_routes(
        graph: &RoutingGraph,
        src: DatapathId,
        dst: DatapathId,
        k: usize,
        max_routes: usize,
        cost: &LinkCost,
    ) -> Result<Vec<Route>> {
        if k == 0 {
            return Err(TopologyError::InvalidPathCount(k));
        }
        let k = k.min(max_routes.max(1));

        if src == dst {
            return Ok(vec![Route::new(src, dst)]);
        }

        let routes: Vec<Route> = TopologyEngine::k_shortest_paths(graph, src, dst, k, cost)
            .into_iter()
            .map(|path| Route::from_links(src, dst, &path.links))
            .collect();

        tracing::debug!(
            src = %src,
            dst = %dst,
            k,
            metric = %cost.metric(),
            found = routes.len(),
            "Planned routes"
        );

        Ok(routes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::graph::{Link, LinkType};
    use std::collections::{BTreeMap, BTreeSet};

    fn info(latency: i64) -> LinkInfo {
        LinkInfo::new(LinkType::Direct, latency)
    }

    #[test]
    fn test_metric_parsing() {
        assert_eq!("hopcount".parse::<RouteMetric>().unwrap(), RouteMetric::Hopcount);
        assert_eq!("  Latency ".parse::<RouteMetric>().unwrap(), RouteMetric::Latency);
        assert_eq!("UTILIZATION".parse::<RouteMetric>().unwrap(), RouteMetric::Utilization);
        assert!(matches!(
            "bandwidth".parse::<RouteMetric>(),
            Err(TopologyError::InvalidRouteMetric(_))
        ));
    }

    #[test]
    fn test_metric_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&RouteMetric::Latency).unwrap(), "\"latency\"");
        let parsed: RouteMetric = serde_json::from_str("\"utilization\"").unwrap();
        assert_eq!(parsed, RouteMetric::Utilization);
    }

    #[test]
    fn test_latency_clamping() {
        let cost = LinkCost::new(RouteMetric::Latency, DEFAULT_MAX_LINK_LATENCY);
        assert_eq!(cost.cost(&info(42)), 42.0);
        assert_eq!(cost.cost(&info(-1)), 10_000.0);
        assert_eq!(cost.cost(&info(10_001)), 10_000.0);
        assert_eq!(cost.cost(&info(10_000)), 10_000.0);
    }

    #[test]
    fn test_utilization_cost() {
        let cost = LinkCost::new(RouteMetric::Utilization, DEFAULT_MAX_LINK_LATENCY);
        assert_eq!(cost.cost(&info(5)), 1.0);
        assert_eq!(cost.cost(&info(5).with_utilization(0.5)), 51.0);
        assert_eq!(cost.cost(&info(5).with_utilization(1.0)), 101.0);
    }

    #[test]
    fn test_nan_utilization_costs_like_idle() {
        let cost = LinkCost::new(RouteMetric::Utilization, DEFAULT_MAX_LINK_LATENCY);
        assert_eq!(cost.cost(&info(5).with_utilization(f64::NAN)), 1.0);

        let mut raw = info(5);
        raw.utilization = f64::NAN;
        assert_eq!(cost.cost(&raw), 1.0);
    }

    #[test]
    fn test_route_config_versions() {
        let config = RouteConfig::new(RouteMetric::Hopcount);
        let next = config.with_metric(RouteMetric::Latency);
        assert_eq!(next.version, 1);
        assert_eq!(next.metric, RouteMetric::Latency);
    }

    #[test]
    fn test_plan_routes_rejects_zero_k() {
        let graph = RoutingGraph::default();
        let cost = LinkCost::new(RouteMetric::Hopcount, DEFAULT_MAX_LINK_LATENCY);
        let result = RoutePlanner::plan_routes(&graph, DatapathId(1), DatapathId(2), 0, 10, &cost);
        assert!(matches!(result, Err(TopologyError::InvalidPathCount(0))));
    }

    #[test]
    fn test_plan_routes_caps_k() {
        let links: BTreeMap<Link, LinkInfo> = [
            (Link::new(1u64, 1u32, 2u64, 1u32), info(1)),
            (Link::new(1u64, 2u32, 3u64, 1u32), info(1)),
            (Link::new(2u64, 2u32, 3u64, 2u32), info(1)),
        ]
        .into_iter()
        .collect();
        let switches: BTreeSet<DatapathId> = (1..=3u64).map(DatapathId).collect();
        let graph = RoutingGraph::new(&links, &switches);
        let cost = LinkCost::new(RouteMetric::Hopcount, DEFAULT_MAX_LINK_LATENCY);

        let routes = RoutePlanner::plan_routes(&graph, DatapathId(1), DatapathId(3), 5, 1, &cost).unwrap();
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].hop_count(), 1);
    }

    #[test]
    fn test_plan_routes_same_switch() {
        let graph = RoutingGraph::default();
        let cost = LinkCost::new(RouteMetric::Latency, DEFAULT_MAX_LINK_LATENCY);
        let routes = RoutePlanner::plan_routes(&graph, DatapathId(7), DatapathId(7), 3, 10, &cost).unwrap();
        assert_eq!(routes, vec![Route::new(7u64, 7u64)]);
    }
}
