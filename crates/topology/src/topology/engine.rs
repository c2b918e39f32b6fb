//! Topology engine - Shortest and k-shortest path search over directed links

use super::graph::{DatapathId, Link, LinkInfo};
use super::routing::LinkCost;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};

/// A loop-free sequence of links with its total cost
#[derive(Debug, Clone, PartialEq)]
pub struct Path {
    pub links: Vec<Link>,
    pub total_cost: f64,
}

impl Path {
    pub fn new() -> Self {
        Self {
            links: Vec::new(),
            total_cost: 0.0,
        }
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Switches visited, `from` first
    pub fn nodes(&self, from: DatapathId) -> Vec<DatapathId> {
        let mut nodes = Vec::with_capacity(self.links.len() + 1);
        nodes.push(from);
        nodes.extend(self.links.iter().map(|l| l.dst));
        nodes
    }

    /// Ascending cost, then lexicographic link sequence
    fn rank(&self, other: &Self) -> Ordering {
        self.total_cost
            .total_cmp(&other.total_cost)
            .then_with(|| self.links.cmp(&other.links))
    }
}

impl Default for Path {
    fn default() -> Self {
        Self::new()
    }
}

/// Outgoing adjacency of the links a search may use
#[derive(Debug, Clone, Default)]
pub struct RoutingGraph {
    adjacency: BTreeMap<DatapathId, Vec<(Link, LinkInfo)>>,
}

impl RoutingGraph {
    /// Keep only links with both endpoints in `switches`
    pub fn new(links: &BTreeMap<Link, LinkInfo>, switches: &BTreeSet<DatapathId>) -> Self {
        let mut adjacency: BTreeMap<DatapathId, Vec<(Link, LinkInfo)>> =
            switches.iter().map(|sw| (*sw, Vec::new())).collect();

        // BTreeMap iteration keeps each adjacency list sorted
        for (link, info) in links {
            if switches.contains(&link.src) && switches.contains(&link.dst) {
                adjacency.entry(link.src).or_default().push((*link, info.clone()));
            }
        }

        Self { adjacency }
    }

    pub fn contains(&self, switch: DatapathId) -> bool {
        self.adjacency.contains_key(&switch)
    }

    pub fn outgoing(&self, switch: DatapathId) -> &[(Link, LinkInfo)] {
        self.adjacency.get(&switch).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn link_info(&self, link: &Link) -> Option<&LinkInfo> {
        self.outgoing(link.src).iter().find(|(l, _)| l == link).map(|(_, info)| info)
    }

    /// Total cost of a link sequence; links not in the graph cost nothing
    pub fn path_cost(&self, links: &[Link], cost: &LinkCost) -> f64 {
        links
            .iter()
            .filter_map(|l| self.link_info(l))
            .map(|info| cost.cost(info))
            .sum()
    }
}

/// State for Dijkstra's algorithm
#[derive(Clone, PartialEq)]
struct DijkstraState {
    cost: f64,
    node_id: DatapathId,
}

impl Eq for DijkstraState {}

impl Ord for DijkstraState {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap; equal costs pop the lower dpid first
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| other.node_id.cmp(&self.node_id))
    }
}

impl PartialOrd for DijkstraState {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Path search over a [`RoutingGraph`]
pub struct TopologyEngine;

impl TopologyEngine {
    /// Find the cheapest path between two switches using Dijkstra's
    /// algorithm, skipping `excluded_links` and never entering
    /// `excluded_nodes`
    pub fn find_shortest_path(
        graph: &RoutingGraph,
        from: DatapathId,
        to: DatapathId,
        cost: &LinkCost,
        excluded_links: &BTreeSet<Link>,
        excluded_nodes: &BTreeSet<DatapathId>,
    ) -> Option<Path> {
        if !graph.contains(from) || !graph.contains(to) {
            return None;
        }

        if from == to {
            return Some(Path::new());
        }

        let mut dist: BTreeMap<DatapathId, f64> = BTreeMap::new();
        let mut prev: BTreeMap<DatapathId, Link> = BTreeMap::new();
        let mut settled: BTreeSet<DatapathId> = BTreeSet::new();
        let mut heap = BinaryHeap::new();

        dist.insert(from, 0.0);
        heap.push(DijkstraState { cost: 0.0, node_id: from });

        while let Some(DijkstraState { cost: current, node_id }) = heap.pop() {
            if !settled.insert(node_id) {
                continue;
            }

            if node_id == to {
                let mut links = Vec::new();
                let mut cursor = to;
                while cursor != from {
                    let link = prev.get(&cursor)?;
                    links.push(*link);
                    cursor = link.src;
                }
                links.reverse();
                return Some(Path {
                    links,
                    total_cost: current,
                });
            }

            for (link, info) in graph.outgoing(node_id) {
                if excluded_links.contains(link) || excluded_nodes.contains(&link.dst) || settled.contains(&link.dst) {
                    continue;
                }

                let next_cost = current + cost.cost(info);
                if next_cost < *dist.get(&link.dst).unwrap_or(&f64::INFINITY) {
                    dist.insert(link.dst, next_cost);
                    prev.insert(link.dst, *link);
                    heap.push(DijkstraState {
                        cost: next_cost,
                        node_id: link.dst,
                    });
                }
            }
        }

        None
    }

    /// Up to `k` loop-free paths in ascending cost (Yen's algorithm).
    ///
    /// Equal-cost paths are ordered by their link sequence, so the result
    /// is reproducible for a given graph.
    pub fn k_shortest_paths(
        graph: &RoutingGraph,
        from: DatapathId,
        to: DatapathId,
        k: usize,
        cost: &LinkCost,
    ) -> Vec<Path> {
        if k == 0 {
            return Vec::new();
        }

        let no_links = BTreeSet::new();
        let no_nodes = BTreeSet::new();
        let Some(first) = Self::find_shortest_path(graph, from, to, cost, &no_links, &no_nodes) else {
            return Vec::new();
        };
        if first.is_empty() {
            return vec![first];
        }

        let mut accepted: Vec<Path> = vec![first];
        let mut candidates: Vec<Path> = Vec::new();

        while accepted.len() < k {
            let Some(last) = accepted.last().cloned() else {
                break;
            };
            let nodes = last.nodes(from);

            for i in 0..last.links.len() {
                let spur_node = nodes[i];
                let root = &last.links[..i];

                let excluded_links: BTreeSet<Link> = accepted
                    .iter()
                    .filter(|p| p.links.len() > i && p.links[..i] == *root)
                    .map(|p| p.links[i])
                    .collect();
                let excluded_nodes: BTreeSet<DatapathId> = nodes[..i].iter().copied().collect();

                let Some(spur) =
                    Self::find_shortest_path(graph, spur_node, to, cost, &excluded_links, &excluded_nodes)
                else {
                    continue;
                };

                let mut links = root.to_vec();
                links.extend(spur.links);
                if accepted.iter().chain(candidates.iter()).any(|p| p.links == links) {
                    continue;
                }
                let total_cost = graph.path_cost(&links, cost);
                candidates.push(Path { links, total_cost });
            }

            if candidates.is_empty() {
                break;
            }
            candidates.sort_by(|a, b| a.rank(b));
            accepted.push(candidates.remove(0));
        }

        accepted.sort_by(|a, b| a.rank(b));
        accepted
    }
}
