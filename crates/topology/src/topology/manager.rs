//! Topology manager - Owns the link store and publishes topology instances
//!
//! Writers (discovery events, rebuilds) serialize on one mutex. Readers load
//! the current instance with a single atomic pointer read and keep using it
//! for the whole query, so a concurrent rebuild never changes an answer
//! half-way through.

use super::graph::{DatapathId, Link, LinkInfo, LinkType, NodePortTuple, Route};
use super::instance::TopologyInstance;
use super::invariants::InvariantChecker;
use super::links::LinkStore;
use super::routing::{RouteConfig, RouteMetric};
use crate::config::TopologyConfig;
use crate::{Result, TopologyChange, TopologySummary};
use arc_swap::ArcSwap;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Notified after every published rebuild
pub trait TopologyListener: Send + Sync {
    fn topology_changed(&self, generation: u64, changes: &[TopologyChange]);
}

/// Both tunnel variants of one generation, published as a unit
#[derive(Debug, Clone)]
pub struct InstancePair {
    pub with_tunnels: Arc<TopologyInstance>,
    pub without_tunnels: Arc<TopologyInstance>,
}

impl InstancePair {
    pub fn get(&self, tunnels_enabled: bool) -> &Arc<TopologyInstance> {
        if tunnels_enabled {
            &self.with_tunnels
        } else {
            &self.without_tunnels
        }
    }

    pub fn generation(&self) -> u64 {
        self.with_tunnels.generation()
    }
}

/// State only writers touch
struct WriteState {
    store: LinkStore,
    generation: u64,
}

pub struct TopologyManager {
    config: TopologyConfig,
    state: Mutex<WriteState>,
    instances: ArcSwap<InstancePair>,
    route_config: ArcSwap<RouteConfig>,
    listeners: RwLock<Vec<Arc<dyn TopologyListener>>>,
    checker: InvariantChecker,
}

impl TopologyManager {
    pub fn new(config: TopologyConfig) -> Result<Self> {
        config.validate()?;

        let store = LinkStore::new(config.max_switches, config.max_links);
        let limits = config.query_limits();
        let with_tunnels = TopologyInstance::build(0, &store, true, Vec::new(), limits);
        let without_tunnels = TopologyInstance::build(0, &store, false, Vec::new(), limits);

        tracing::info!(
            max_switches = config.max_switches,
            max_links = config.max_links,
            metric = %config.route_metric,
            "Topology manager created"
        );

        Ok(Self {
            route_config: ArcSwap::from_pointee(RouteConfig::new(config.route_metric)),
            config,
            state: Mutex::new(WriteState { store, generation: 0 }),
            instances: ArcSwap::from_pointee(InstancePair {
                with_tunnels: Arc::new(with_tunnels),
                without_tunnels: Arc::new(without_tunnels),
            }),
            listeners: RwLock::new(Vec::new()),
            checker: InvariantChecker::new(),
        })
    }

    pub fn config(&self) -> &TopologyConfig {
        &self.config
    }

    // Inbound events

    /// Record a discovered link. Takes effect at the next rebuild.
    pub fn link_up(&self, link: Link, latency: i64, link_type: LinkType) -> Result<bool> {
        self.state.lock().store.add_or_update_link(link, latency, link_type)
    }

    /// Drop a link and its reverse
    pub fn link_down(&self, link: Link) -> bool {
        self.state.lock().store.remove_link(link)
    }

    pub fn switch_removed(&self, switch: DatapathId) -> bool {
        self.state.lock().store.remove_switch(switch)
    }

    pub fn set_link_utilization(&self, link: Link, utilization: f64) -> bool {
        self.state.lock().store.set_link_utilization(link, utilization)
    }

    /// Forget every switch and link
    pub fn clear(&self) {
        self.state.lock().store.clear();
    }

    /// Build and publish new instances from the current store contents.
    /// Returns the new generation.
    pub fn rebuild_topology(&self) -> u64 {
        let (generation, changes) = {
            let mut state = self.state.lock();
            self.rebuild_locked(&mut state)
        };
        self.notify(generation, &changes);
        generation
    }

    /// Rebuild only if the store changed since the last rebuild
    pub fn rebuild_if_dirty(&self) -> Option<u64> {
        let (generation, changes) = {
            let mut state = self.state.lock();
            if !state.store.is_dirty() {
                return None;
            }
            self.rebuild_locked(&mut state)
        };
        self.notify(generation, &changes);
        Some(generation)
    }

    fn rebuild_locked(&self, state: &mut WriteState) -> (u64, Vec<TopologyChange>) {
        state.generation += 1;
        let generation = state.generation;
        let changes = state.store.take_pending();
        let limits = self.config.query_limits();

        let with_tunnels = TopologyInstance::build(generation, &state.store, true, changes.clone(), limits);
        let without_tunnels = TopologyInstance::build(generation, &state.store, false, changes.clone(), limits);

        self.checker.enforce(&with_tunnels);
        self.checker.enforce(&without_tunnels);

        tracing::info!(
            generation,
            switches = with_tunnels.summary().switch_count,
            clusters = with_tunnels.cluster_count(),
            clusters_without_tunnels = without_tunnels.cluster_count(),
            changes = changes.len(),
            "Published topology instance"
        );

        self.instances.store(Arc::new(InstancePair {
            with_tunnels: Arc::new(with_tunnels),
            without_tunnels: Arc::new(without_tunnels),
        }));

        (generation, changes)
    }

    // Listeners

    pub fn add_listener(&self, listener: Arc<dyn TopologyListener>) {
        self.listeners.write().push(listener);
    }

    fn notify(&self, generation: u64, changes: &[TopologyChange]) {
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            listener.topology_changed(generation, changes);
        }
    }

    /// Start the periodic rebuild task. Needs a tokio runtime; returns
    /// `None` when auto refresh is off. The task stops once the manager
    /// is dropped.
    pub fn spawn_refresh_task(self: Arc<Self>) -> Option<JoinHandle<()>> {
        if !self.config.auto_refresh {
            return None;
        }

        let interval = self.config.refresh_interval();
        let weak = Arc::downgrade(&self);
        drop(self);

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(manager) = weak.upgrade() else {
                    tracing::debug!("Topology manager dropped, stopping refresh task");
                    break;
                };
                if let Some(generation) = manager.rebuild_if_dirty() {
                    tracing::debug!(generation, "Periodic topology refresh");
                }
            }
        }))
    }

    // Queries

    pub fn current_instance(&self, tunnels_enabled: bool) -> Arc<TopologyInstance> {
        self.instances.load().get(tunnels_enabled).clone()
    }

    /// Both variants from the same generation
    pub fn current_instances(&self) -> Arc<InstancePair> {
        self.instances.load_full()
    }

    pub fn get_clusters(&self, tunnels_enabled: bool) -> Vec<BTreeSet<DatapathId>> {
        self.current_instance(tunnels_enabled).clusters()
    }

    pub fn get_switches_in_domain(&self, switch: DatapathId) -> BTreeSet<DatapathId> {
        self.instances.load().with_tunnels.switches_in_domain(switch)
    }

    /// Broadcast-tree ports of the cluster containing `switch`
    pub fn get_broadcast_ports(&self, switch: DatapathId) -> BTreeSet<NodePortTuple> {
        self.instances.load().with_tunnels.broadcast_ports_in_cluster(switch)
    }

    pub fn get_broadcast_domain_ports(&self) -> BTreeSet<NodePortTuple> {
        self.instances.load().with_tunnels.broadcast_domain_ports().clone()
    }

    /// Up to `k` routes under the metric in effect when the call starts
    pub fn get_routes(&self, src: DatapathId, dst: DatapathId, k: usize) -> Result<Vec<Route>> {
        let route_config = self.route_config.load();
        let instance = self.current_instance(true);
        instance.get_routes(src, dst, k, route_config.metric)
    }

    /// The cheapest route, if any
    pub fn get_route(&self, src: DatapathId, dst: DatapathId) -> Option<Route> {
        self.get_routes(src, dst, 1).ok().and_then(|routes| routes.into_iter().next())
    }

    /// Link records as of the last rebuild
    pub fn get_links(&self) -> BTreeMap<Link, LinkInfo> {
        self.instances.load().with_tunnels.links().clone()
    }

    /// Changes folded into the current instance
    pub fn last_link_updates(&self) -> Vec<TopologyChange> {
        self.instances.load().with_tunnels.applied_updates().to_vec()
    }

    pub fn summary(&self) -> TopologySummary {
        self.instances.load().with_tunnels.summary()
    }

    // Route metric

    /// Switch the route metric. Returns the metric now in effect. Setting
    /// the current metric again leaves the version untouched.
    pub fn set_route_metric(&self, metric: RouteMetric) -> RouteMetric {
        let previous = self.route_config.rcu(|current| {
            if current.metric == metric {
                **current
            } else {
                current.with_metric(metric)
            }
        });
        if previous.metric != metric {
            tracing::info!(from = %previous.metric, to = %metric, "Route metric changed");
        }
        self.route_config.load().metric
    }

    /// Parse and apply a metric name. Unknown names leave the current
    /// metric untouched.
    pub fn set_route_metric_by_name(&self, name: &str) -> Result<RouteMetric> {
        match name.parse::<RouteMetric>() {
            Ok(metric) => Ok(self.set_route_metric(metric)),
            Err(e) => {
                tracing::warn!(name, current = %self.route_metric(), "Rejected route metric");
                Err(e)
            }
        }
    }

    pub fn route_metric(&self) -> RouteMetric {
        self.route_config.load().metric
    }

    pub fn route_config(&self) -> RouteConfig {
        **self.route_config.load()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = TopologyConfig {
            max_links: 0,
            ..TopologyConfig::minimal()
        };
        assert!(TopologyManager::new(config).is_err());
    }

    #[test]
    fn test_initial_state() {
        let manager = TopologyManager::new(TopologyConfig::minimal()).unwrap();
        assert_eq!(manager.current_instance(true).generation(), 0);
        assert!(manager.get_clusters(false).is_empty());
        assert_eq!(manager.route_metric(), RouteMetric::Hopcount);
        assert_eq!(manager.route_config().version, 0);
    }

    #[test]
    fn test_rebuild_if_dirty() {
        let manager = TopologyManager::new(TopologyConfig::minimal()).unwrap();
        assert_eq!(manager.rebuild_if_dirty(), None);

        manager.link_up(Link::new(1u64, 1u32, 2u64, 1u32), 1, LinkType::Direct).unwrap();
        assert_eq!(manager.rebuild_if_dirty(), Some(1));
        assert_eq!(manager.rebuild_if_dirty(), None);
        assert_eq!(manager.rebuild_topology(), 2);
    }

    #[test]
    fn test_unknown_metric_keeps_current() {
        let manager = TopologyManager::new(TopologyConfig::minimal()).unwrap();
        assert_eq!(manager.set_route_metric_by_name("Latency").unwrap(), RouteMetric::Latency);
        assert!(manager.set_route_metric_by_name("cheapest").is_err());
        assert_eq!(manager.route_metric(), RouteMetric::Latency);
        assert_eq!(manager.route_config().version, 1);
    }

    #[test]
    fn test_same_metric_keeps_version() {
        let manager = TopologyManager::new(TopologyConfig::minimal()).unwrap();
        assert_eq!(manager.set_route_metric(RouteMetric::Hopcount), RouteMetric::Hopcount);
        assert_eq!(manager.route_config().version, 0);

        assert_eq!(manager.set_route_metric(RouteMetric::Utilization), RouteMetric::Utilization);
        assert_eq!(manager.set_route_metric(RouteMetric::Utilization), RouteMetric::Utilization);
        assert_eq!(manager.route_config().version, 1);
    }

    #[test]
    fn test_variants_published_together() {
        let manager = TopologyManager::new(TopologyConfig::minimal()).unwrap();
        manager.link_up(Link::new(1u64, 1u32, 2u64, 1u32), 1, LinkType::Tunnel).unwrap();
        manager.rebuild_topology();

        let pair = manager.current_instances();
        assert_eq!(pair.generation(), 1);
        assert_eq!(pair.without_tunnels.generation(), 1);
        assert!(pair.get(true).tunnels_enabled());
        assert!(!pair.get(false).tunnels_enabled());
        assert!(Arc::ptr_eq(pair.get(true), &manager.current_instance(true)));
    }

    #[test]
    fn test_refresh_task_disabled() {
        let manager = Arc::new(TopologyManager::new(TopologyConfig::minimal()).unwrap());
        assert!(manager.spawn_refresh_task().is_none());
    }
}
