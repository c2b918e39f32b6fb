//! Broadcast-domain detection
//!
//! A port that sees more than one peer is assumed to sit on a shared
//! segment the controller cannot see (a hub or a non-OpenFlow switch).
//! Links on such ports must not form clusters or carry unicast routes.

use super::graph::{Link, LinkInfo, NodePortTuple};
use std::collections::{BTreeMap, BTreeSet};

/// Classifies broadcast-domain ports from a link set
pub struct BroadcastDomainClassifier;

impl BroadcastDomainClassifier {
    /// Compute the broadcast-domain ports of a link set.
    ///
    /// A port qualifies when it ends a MULTIHOP link, when more than two
    /// records are incident on it, or when exactly two are and they are
    /// not each other's reverse. The result depends only on the set of
    /// records, never on the order they were inserted in.
    pub fn classify<'a, I>(links: I) -> BTreeSet<NodePortTuple>
    where
        I: IntoIterator<Item = (&'a Link, &'a LinkInfo)>,
    {
        let mut ports = BTreeSet::new();
        let mut incident: BTreeMap<NodePortTuple, Vec<Link>> = BTreeMap::new();

        for (link, info) in links {
            if info.is_multihop() {
                ports.insert(link.src_npt());
                ports.insert(link.dst_npt());
            }
            incident.entry(link.src_npt()).or_default().push(*link);
            incident.entry(link.dst_npt()).or_default().push(*link);
        }

        let mut additional = Vec::new();
        for (npt, links) in &incident {
            let shared = match links.as_slice() {
                [] | [_] => false,
                [a, b] => !a.is_reverse_of(b),
                _ => true,
            };
            if shared && ports.insert(*npt) {
                additional.push(npt.to_string());
            }
        }

        if !additional.is_empty() {
            tracing::warn!(
                ports = %additional.join(", "),
                "ports with multiple incident links treated as broadcast-domain ports"
            );
        }

        ports
    }

    /// Whether a link may take part in clustering and routing
    pub fn is_eligible(
        link: &Link,
        info: &LinkInfo,
        broadcast_ports: &BTreeSet<NodePortTuple>,
        tunnels_enabled: bool,
    ) -> bool {
        if info.is_multihop() {
            return false;
        }
        if info.is_tunnel() && !tunnels_enabled {
            return false;
        }
        !broadcast_ports.contains(&link.src_npt()) && !broadcast_ports.contains(&link.dst_npt())
    }

    /// The links left once broadcast-domain ports (and, if disabled,
    /// tunnels) are taken out
    pub fn filter_links(
        links: &BTreeMap<Link, LinkInfo>,
        broadcast_ports: &BTreeSet<NodePortTuple>,
        tunnels_enabled: bool,
    ) -> BTreeMap<Link, LinkInfo> {
        links
            .iter()
            .filter(|(link, info)| Self::is_eligible(link, info, broadcast_ports, tunnels_enabled))
            .map(|(link, info)| (*link, info.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::graph::LinkType;

    fn links(spec: &[(u64, u32, u64, u32, LinkType)]) -> BTreeMap<Link, LinkInfo> {
        spec.iter()
            .map(|&(s, sp, d, dp, t)| (Link::new(s, sp, d, dp), LinkInfo::new(t, 0)))
            .collect()
    }

    fn npt(sw: u64, port: u32) -> NodePortTuple {
        NodePortTuple::new(sw, port)
    }

    #[test]
    fn test_single_bidirectional_link_is_not_broadcast() {
        let set = links(&[(1, 1, 2, 1, LinkType::Direct), (2, 1, 1, 1, LinkType::Direct)]);
        assert!(BroadcastDomainClassifier::classify(&set).is_empty());
    }

    #[test]
    fn test_hub_ports_detected() {
        let set = links(&[
            (1, 1, 2, 1, LinkType::Direct),
            (2, 1, 1, 1, LinkType::Direct),
            (1, 2, 3, 1, LinkType::Direct),
            (3, 1, 1, 2, LinkType::Direct),
            (2, 2, 3, 2, LinkType::Direct),
            (3, 2, 2, 2, LinkType::Direct),
            (1, 1, 3, 2, LinkType::Direct),
        ]);
        let ports = BroadcastDomainClassifier::classify(&set);
        assert_eq!(ports, BTreeSet::from([npt(1, 1), npt(3, 2)]));
    }

    #[test]
    fn test_two_unrelated_links_on_one_port() {
        let set = links(&[(1, 1, 2, 1, LinkType::Direct), (3, 1, 1, 1, LinkType::Direct)]);
        let ports = BroadcastDomainClassifier::classify(&set);
        assert_eq!(ports, BTreeSet::from([npt(1, 1)]));
    }

    #[test]
    fn test_multihop_endpoints_are_broadcast() {
        let set = links(&[(1, 1, 2, 1, LinkType::Multihop)]);
        let ports = BroadcastDomainClassifier::classify(&set);
        assert_eq!(ports, BTreeSet::from([npt(1, 1), npt(2, 1)]));
    }

    #[test]
    fn test_classification_is_order_independent() {
        let records = [
            (1, 1, 2, 1, LinkType::Direct),
            (1, 1, 3, 2, LinkType::Direct),
            (3, 2, 2, 2, LinkType::Direct),
            (2, 2, 3, 2, LinkType::Direct),
            (4, 1, 5, 1, LinkType::Multihop),
        ];
        let forward: Vec<(Link, LinkInfo)> = records
            .iter()
            .map(|&(s, sp, d, dp, t)| (Link::new(s, sp, d, dp), LinkInfo::new(t, 0)))
            .collect();
        let mut backward = forward.clone();
        backward.reverse();

        let a = BroadcastDomainClassifier::classify(forward.iter().map(|(l, i)| (l, i)));
        let b = BroadcastDomainClassifier::classify(backward.iter().map(|(l, i)| (l, i)));
        assert_eq!(a, b);
        assert!(a.contains(&npt(1, 1)));
        assert!(a.contains(&npt(4, 1)));
    }

    #[test]
    fn test_filter_links() {
        let set = links(&[
            (1, 1, 2, 1, LinkType::Direct),
            (2, 2, 3, 1, LinkType::Tunnel),
            (3, 2, 4, 1, LinkType::Multihop),
        ]);
        let ports = BroadcastDomainClassifier::classify(&set);

        let with_tunnels = BroadcastDomainClassifier::filter_links(&set, &ports, true);
        assert_eq!(with_tunnels.len(), 2);

        let without_tunnels = BroadcastDomainClassifier::filter_links(&set, &ports, false);
        assert_eq!(without_tunnels.len(), 1);
        assert!(without_tunnels.contains_key(&Link::new(1u64, 1u32, 2u64, 1u32)));
    }
}
