//! Topological Invariants - Rules every published instance must satisfy
//!
//! The checks run once per freshly built instance. A `Critical` violation
//! means the snapshot cannot be trusted and the process stops rather than
//! serving routes from it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::graph::{DatapathId, Link};
use super::instance::TopologyInstance;
use super::routing::LinkCost;

/// A violation of a topological invariant
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvariantViolation {
    pub invariant_name: String,
    pub severity: ViolationSeverity,
    pub message: String,
    pub affected_switches: Vec<DatapathId>,
    pub affected_links: Vec<Link>,
}

/// Severity levels for invariant violations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationSeverity {
    /// Informational - doesn't break anything but worth noting
    Info,
    /// Warning - could cause issues, should be addressed
    Warning,
    /// Error - violates a required invariant
    Error,
    /// Critical - the instance is in an invalid state
    Critical,
}

/// Invariant checker for topology instances
pub struct InvariantChecker;

impl Default for InvariantChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl InvariantChecker {
    pub fn new() -> Self {
        Self
    }

    /// Check all invariants against an instance
    pub fn check_all(&self, instance: &TopologyInstance) -> Vec<InvariantViolation> {
        let mut violations = Vec::new();

        violations.extend(self.check_cluster_partition(instance));
        violations.extend(self.check_cluster_ids(instance));
        violations.extend(self.check_filtered_links(instance));
        violations.extend(self.check_no_self_loops(instance));
        violations.extend(self.check_latency_range(instance));

        violations
    }

    /// Run every check and stop the process on a critical violation.
    ///
    /// # Panics
    ///
    /// Panics if any violation is `Critical`.
    pub fn enforce(&self, instance: &TopologyInstance) {
        let violations = self.check_all(instance);
        let mut critical = 0;

        for v in &violations {
            match v.severity {
                ViolationSeverity::Critical => {
                    critical += 1;
                    tracing::error!(
                        invariant = %v.invariant_name,
                        generation = instance.generation(),
                        "{}",
                        v.message
                    );
                }
                ViolationSeverity::Error | ViolationSeverity::Warning => {
                    tracing::warn!(invariant = %v.invariant_name, "{}", v.message);
                }
                ViolationSeverity::Info => {
                    tracing::debug!(invariant = %v.invariant_name, "{}", v.message);
                }
            }
        }

        if critical > 0 {
            panic!(
                "topology instance {} violates {} critical invariant(s)",
                instance.generation(),
                critical
            );
        }
    }

    /// Every known switch sits in exactly one cluster, and clusters hold
    /// only known switches
    fn check_cluster_partition(&self, instance: &TopologyInstance) -> Vec<InvariantViolation> {
        let mut violations = Vec::new();
        let mut seen: BTreeMap<DatapathId, usize> = instance.switches().map(|sw| (sw, 0)).collect();

        for cluster in instance.clusters.values() {
            for sw in &cluster.switches {
                match seen.get_mut(sw) {
                    Some(count) => *count += 1,
                    None => violations.push(InvariantViolation {
                        invariant_name: "cluster_partition".to_string(),
                        severity: ViolationSeverity::Critical,
                        message: format!("Cluster {} contains unknown switch {}", cluster.id, sw),
                        affected_switches: vec![*sw],
                        affected_links: vec![],
                    }),
                }
            }
        }

        for (sw, count) in seen {
            if count != 1 {
                violations.push(InvariantViolation {
                    invariant_name: "cluster_partition".to_string(),
                    severity: ViolationSeverity::Critical,
                    message: format!("Switch {} appears in {} clusters", sw, count),
                    affected_switches: vec![sw],
                    affected_links: vec![],
                });
            }
        }

        violations
    }

    fn check_cluster_ids(&self, instance: &TopologyInstance) -> Vec<InvariantViolation> {
        let mut violations = Vec::new();

        for (id, cluster) in &instance.clusters {
            let min = cluster.switches.iter().next().copied();
            if min != Some(*id) || cluster.id != *id {
                violations.push(InvariantViolation {
                    invariant_name: "cluster_id_is_minimum".to_string(),
                    severity: ViolationSeverity::Critical,
                    message: format!("Cluster {} is not keyed by its smallest switch", id),
                    affected_switches: cluster.switches.iter().copied().collect(),
                    affected_links: vec![],
                });
            }
        }

        violations
    }

    /// Filtered links stay off broadcast-domain ports and unknown switches
    fn check_filtered_links(&self, instance: &TopologyInstance) -> Vec<InvariantViolation> {
        let mut violations = Vec::new();

        for link in instance.filtered_links().keys() {
            let unknown: Vec<DatapathId> = [link.src, link.dst]
                .into_iter()
                .filter(|sw| !instance.switch_ports.contains_key(sw))
                .collect();
            if !unknown.is_empty() {
                violations.push(InvariantViolation {
                    invariant_name: "no_orphan_links".to_string(),
                    severity: ViolationSeverity::Critical,
                    message: format!("Link {} references removed switches: {:?}", link, unknown),
                    affected_switches: unknown,
                    affected_links: vec![*link],
                });
            }

            if instance.is_broadcast_domain_port(&link.src_npt()) || instance.is_broadcast_domain_port(&link.dst_npt()) {
                violations.push(InvariantViolation {
                    invariant_name: "no_broadcast_domain_links".to_string(),
                    severity: ViolationSeverity::Critical,
                    message: format!("Filtered link {} touches a broadcast-domain port", link),
                    affected_switches: vec![link.src, link.dst],
                    affected_links: vec![*link],
                });
            }
        }

        violations
    }

    fn check_no_self_loops(&self, instance: &TopologyInstance) -> Vec<InvariantViolation> {
        instance
            .links()
            .keys()
            .filter(|link| link.is_self_loop())
            .map(|link| InvariantViolation {
                invariant_name: "no_self_loops".to_string(),
                severity: ViolationSeverity::Critical,
                message: format!("Link {} is a self-loop on switch {}", link, link.src),
                affected_switches: vec![link.src],
                affected_links: vec![*link],
            })
            .collect()
    }

    /// Out-of-range latencies are legal but get costed at the ceiling
    fn check_latency_range(&self, instance: &TopologyInstance) -> Vec<InvariantViolation> {
        let ceiling = instance.limits.max_link_latency;

        instance
            .links()
            .iter()
            .filter(|(_, info)| LinkCost::clamp_latency(info.latency, ceiling) != info.latency)
            .map(|(link, info)| InvariantViolation {
                invariant_name: "latency_in_range".to_string(),
                severity: ViolationSeverity::Info,
                message: format!("Link {} reports latency {}, costed as {}", link, info.latency, ceiling),
                affected_switches: vec![link.src, link.dst],
                affected_links: vec![*link],
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::graph::{LinkInfo, LinkType};
    use crate::topology::instance::QueryLimits;
    use crate::topology::links::LinkStore;

    fn triangle() -> TopologyInstance {
        let mut store = LinkStore::new(16, 64);
        for (s, sp, d, dp) in [(1u64, 1u32, 2u64, 1u32), (2, 2, 3, 1), (3, 2, 1, 2)] {
            store.add_or_update_link(Link::new(s, sp, d, dp), 1, LinkType::Direct).unwrap();
            store.add_or_update_link(Link::new(d, dp, s, sp), 1, LinkType::Direct).unwrap();
        }
        TopologyInstance::build(1, &store, true, Vec::new(), QueryLimits::default())
    }

    #[test]
    fn test_empty_instance_has_no_violations() {
        let checker = InvariantChecker::new();
        assert!(checker.check_all(&TopologyInstance::empty(true)).is_empty());
    }

    #[test]
    fn test_built_instance_is_consistent() {
        let instance = triangle();
        let violations = InvariantChecker::new().check_all(&instance);
        assert!(violations.is_empty(), "{:?}", violations);
        InvariantChecker::new().enforce(&instance);
    }

    #[test]
    fn test_out_of_range_latency_is_info() {
        let mut store = LinkStore::new(16, 64);
        store.add_or_update_link(Link::new(1u64, 1u32, 2u64, 1u32), -3, LinkType::Direct).unwrap();
        let instance = TopologyInstance::build(1, &store, true, Vec::new(), QueryLimits::default());

        let violations = InvariantChecker::new().check_all(&instance);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].severity, ViolationSeverity::Info);
        InvariantChecker::new().enforce(&instance);
    }

    #[test]
    fn test_detects_switch_missing_from_clusters() {
        let mut instance = triangle();
        instance.clusters.clear();
        let violations = InvariantChecker::new().check_all(&instance);
        assert_eq!(violations.len(), 3);
        assert!(violations.iter().all(|v| v.severity == ViolationSeverity::Critical));
    }

    #[test]
    fn test_detects_orphan_filtered_link() {
        let mut instance = triangle();
        instance
            .filtered_links
            .insert(Link::new(1u64, 7u32, 9u64, 1u32), LinkInfo::new(LinkType::Direct, 1));
        let violations = InvariantChecker::new().check_all(&instance);
        assert!(violations.iter().any(|v| v.invariant_name == "no_orphan_links"));
    }

    #[test]
    #[should_panic(expected = "critical invariant")]
    fn test_enforce_panics_on_critical() {
        let mut instance = triangle();
        instance.broadcast_domain_ports.insert(crate::topology::graph::NodePortTuple::new(1u64, 1u32));
        InvariantChecker::new().enforce(&instance);
    }
}
