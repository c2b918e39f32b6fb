//! Topology instance - One immutable, fully computed view of the network
//!
//! An instance is built from a [`LinkStore`] in one pass (classify, filter,
//! cluster, index routes) and never changes afterwards. The manager
//! publishes instances atomically; readers hold an `Arc` for as long as
//! they need a consistent answer.

use super::broadcast::BroadcastDomainClassifier;
use super::clusters::{Cluster, ClusterBuilder};
use super::engine::RoutingGraph;
use super::graph::{DatapathId, Link, LinkInfo, NodePortTuple, PortNumber, Route};
use super::links::LinkStore;
use super::routing::{LinkCost, RouteMetric, RoutePlanner};
use crate::{Result, TopologyChange, TopologySummary};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use std::collections::{BTreeMap, BTreeSet};

/// Limits an instance applies when answering queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryLimits {
    pub max_route_count: usize,
    pub max_link_latency: i64,
}

impl Default for QueryLimits {
    fn default() -> Self {
        Self {
            max_route_count: 1000,
            max_link_latency: super::routing::DEFAULT_MAX_LINK_LATENCY,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TopologyInstance {
    pub(crate) generation: u64,
    pub(crate) built_at: DateTime<Utc>,
    pub(crate) tunnels_enabled: bool,
    pub(crate) limits: QueryLimits,

    pub(crate) switch_ports: BTreeMap<DatapathId, BTreeSet<PortNumber>>,
    pub(crate) links: BTreeMap<Link, LinkInfo>,
    pub(crate) filtered_links: BTreeMap<Link, LinkInfo>,
    pub(crate) broadcast_domain_ports: BTreeSet<NodePortTuple>,
    pub(crate) tunnel_ports: BTreeSet<NodePortTuple>,
    /// Endpoints of filtered links
    pub(crate) internal_ports: BTreeSet<NodePortTuple>,

    /// Keyed by cluster id, in ascending id order
    pub(crate) clusters: IndexMap<DatapathId, Cluster>,
    pub(crate) cluster_of: BTreeMap<DatapathId, DatapathId>,
    /// Broadcast-tree ports, keyed by cluster id
    pub(crate) cluster_broadcast_ports: IndexMap<DatapathId, BTreeSet<NodePortTuple>>,
    pub(crate) all_broadcast_ports: BTreeSet<NodePortTuple>,

    pub(crate) archipelagos: Vec<BTreeSet<DatapathId>>,
    pub(crate) archipelago_of: BTreeMap<DatapathId, usize>,
    /// One routing graph per archipelago, same index
    pub(crate) routing_graphs: Vec<RoutingGraph>,

    pub(crate) applied_updates: Vec<TopologyChange>,
}

impl TopologyInstance {
    /// An instance with no switches
    pub fn empty(tunnels_enabled: bool) -> Self {
        Self::build(0, &LinkStore::default(), tunnels_enabled, Vec::new(), QueryLimits::default())
    }

    /// Compute a new instance from the store's current contents
    pub fn build(
        generation: u64,
        store: &LinkStore,
        tunnels_enabled: bool,
        applied_updates: Vec<TopologyChange>,
        limits: QueryLimits,
    ) -> Self {
        let links = store.links().clone();
        let switch_ports = store.switch_ports().clone();

        let broadcast_domain_ports = BroadcastDomainClassifier::classify(&links);
        let filtered_links = BroadcastDomainClassifier::filter_links(&links, &broadcast_domain_ports, tunnels_enabled);

        let tunnel_ports = links
            .iter()
            .filter(|(_, info)| info.is_tunnel())
            .flat_map(|(link, _)| [link.src_npt(), link.dst_npt()])
            .collect();
        let internal_ports = filtered_links
            .keys()
            .flat_map(|link| [link.src_npt(), link.dst_npt()])
            .collect();

        let switches: Vec<DatapathId> = switch_ports.keys().copied().collect();

        let mut clusters = IndexMap::new();
        let mut cluster_of = BTreeMap::new();
        let mut cluster_broadcast_ports = IndexMap::new();
        let mut all_broadcast_ports = BTreeSet::new();
        for cluster in ClusterBuilder::build(switches.iter().copied(), &filtered_links) {
            for sw in &cluster.switches {
                cluster_of.insert(*sw, cluster.id);
            }
            let ports = ClusterBuilder::broadcast_ports(&cluster);
            all_broadcast_ports.extend(ports.iter().copied());
            cluster_broadcast_ports.insert(cluster.id, ports);
            clusters.insert(cluster.id, cluster);
        }

        let archipelagos = ClusterBuilder::archipelagos(switches.iter().copied(), &filtered_links);
        let mut archipelago_of = BTreeMap::new();
        for (index, members) in archipelagos.iter().enumerate() {
            for sw in members {
                archipelago_of.insert(*sw, index);
            }
        }

        let mut archipelago_links: Vec<BTreeMap<Link, LinkInfo>> = vec![BTreeMap::new(); archipelagos.len()];
        for (link, info) in &filtered_links {
            if let (Some(&a), Some(&b)) = (archipelago_of.get(&link.src), archipelago_of.get(&link.dst)) {
                if a == b {
                    archipelago_links[a].insert(*link, info.clone());
                }
            }
        }
        let routing_graphs: Vec<RoutingGraph> = archipelagos
            .iter()
            .zip(&archipelago_links)
            .map(|(members, links)| RoutingGraph::new(links, members))
            .collect();

        tracing::debug!(
            generation,
            tunnels_enabled,
            switches = switches.len(),
            links = links.len(),
            filtered = filtered_links.len(),
            clusters = clusters.len(),
            archipelagos = archipelagos.len(),
            "Built topology instance"
        );

        Self {
            generation,
            built_at: Utc::now(),
            tunnels_enabled,
            limits,
            switch_ports,
            links,
            filtered_links,
            broadcast_domain_ports,
            tunnel_ports,
            internal_ports,
            clusters,
            cluster_of,
            cluster_broadcast_ports,
            all_broadcast_ports,
            archipelagos,
            archipelago_of,
            routing_graphs,
            applied_updates,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    pub fn tunnels_enabled(&self) -> bool {
        self.tunnels_enabled
    }

    pub fn switches(&self) -> impl Iterator<Item = DatapathId> + '_ {
        self.switch_ports.keys().copied()
    }

    pub fn switch_ports(&self, switch: DatapathId) -> BTreeSet<PortNumber> {
        self.switch_ports.get(&switch).cloned().unwrap_or_default()
    }

    /// Every link record, filtered or not
    pub fn links(&self) -> &BTreeMap<Link, LinkInfo> {
        &self.links
    }

    /// Links used for clustering and routing
    pub fn filtered_links(&self) -> &BTreeMap<Link, LinkInfo> {
        &self.filtered_links
    }

    // Clusters

    /// Cluster memberships, ordered by cluster id
    pub fn clusters(&self) -> Vec<BTreeSet<DatapathId>> {
        self.clusters.values().map(|c| c.switches.clone()).collect()
    }

    pub fn cluster(&self, switch: DatapathId) -> Option<&Cluster> {
        self.cluster_id(switch).and_then(|id| self.clusters.get(&id))
    }

    pub fn cluster_id(&self, switch: DatapathId) -> Option<DatapathId> {
        self.cluster_of.get(&switch).copied()
    }

    pub fn cluster_count(&self) -> usize {
        self.clusters.len()
    }

    /// Switches in the same OpenFlow domain as `switch`; empty when unknown
    pub fn switches_in_domain(&self, switch: DatapathId) -> BTreeSet<DatapathId> {
        self.cluster(switch).map(|c| c.switches.clone()).unwrap_or_default()
    }

    pub fn in_same_domain(&self, a: DatapathId, b: DatapathId) -> bool {
        match (self.cluster_id(a), self.cluster_id(b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        }
    }

    pub fn archipelago_of(&self, switch: DatapathId) -> Option<&BTreeSet<DatapathId>> {
        self.archipelago_of.get(&switch).and_then(|i| self.archipelagos.get(*i))
    }

    // Ports

    pub fn broadcast_domain_ports(&self) -> &BTreeSet<NodePortTuple> {
        &self.broadcast_domain_ports
    }

    pub fn is_broadcast_domain_port(&self, npt: &NodePortTuple) -> bool {
        self.broadcast_domain_ports.contains(npt)
    }

    /// Broadcast-tree ports of the cluster containing `switch`
    pub fn broadcast_ports_in_cluster(&self, switch: DatapathId) -> BTreeSet<NodePortTuple> {
        self.cluster_id(switch)
            .and_then(|id| self.cluster_broadcast_ports.get(&id))
            .cloned()
            .unwrap_or_default()
    }

    /// Whether a broadcast arriving on `npt` should be flooded. Attachment
    /// points always accept; internal ports only when on the broadcast tree.
    pub fn is_broadcast_allowed(&self, npt: &NodePortTuple) -> bool {
        !self.is_internal_port(npt) || self.all_broadcast_ports.contains(npt)
    }

    pub fn tunnel_ports(&self) -> &BTreeSet<NodePortTuple> {
        &self.tunnel_ports
    }

    /// A port facing hosts rather than another switch in the domain
    pub fn is_attachment_point_port(&self, npt: &NodePortTuple) -> bool {
        !self.is_internal_port(npt)
    }

    pub fn is_internal_port(&self, npt: &NodePortTuple) -> bool {
        self.internal_ports.contains(npt)
    }

    // Routes

    /// Up to `k` routes under `metric`, cheapest first. Switches in
    /// different archipelagos have no routes.
    pub fn get_routes(&self, src: DatapathId, dst: DatapathId, k: usize, metric: RouteMetric) -> Result<Vec<Route>> {
        let empty = RoutingGraph::default();
        let graph = match (self.archipelago_of.get(&src), self.archipelago_of.get(&dst)) {
            (Some(a), Some(b)) if a == b => self.routing_graphs.get(*a).unwrap_or(&empty),
            _ => &empty,
        };
        let cost = LinkCost::new(metric, self.limits.max_link_latency);
        RoutePlanner::plan_routes(graph, src, dst, k, self.limits.max_route_count, &cost)
    }

    /// Cost of `route` under `metric`, or `None` if it uses a link this
    /// instance does not know
    pub fn route_cost(&self, route: &Route, metric: RouteMetric) -> Option<f64> {
        let cost = LinkCost::new(metric, self.limits.max_link_latency);
        route
            .links()
            .iter()
            .map(|link| self.links.get(link).map(|info| cost.cost(info)))
            .sum()
    }

    pub fn applied_updates(&self) -> &[TopologyChange] {
        &self.applied_updates
    }

    pub fn summary(&self) -> TopologySummary {
        TopologySummary {
            generation: self.generation,
            built_at: self.built_at,
            tunnels_enabled: self.tunnels_enabled,
            switch_count: self.switch_ports.len(),
            link_count: self.links.len(),
            filtered_link_count: self.filtered_links.len(),
            cluster_count: self.clusters.len(),
            broadcast_domain_port_count: self.broadcast_domain_ports.len(),
            tunnel_port_count: self.tunnel_ports.len(),
        }
    }
}
