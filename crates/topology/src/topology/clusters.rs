//! Cluster computation - OpenFlow domains, archipelagos and broadcast trees

use super::graph::{DatapathId, Link, LinkInfo, NodePortTuple};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// A set of switches mutually reachable over eligible links
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cluster {
    /// Smallest datapath id in the cluster
    pub id: DatapathId,
    pub switches: BTreeSet<DatapathId>,
    /// Eligible links with both endpoints inside the cluster
    pub links: BTreeSet<Link>,
}

impl Cluster {
    pub fn contains(&self, switch: DatapathId) -> bool {
        self.switches.contains(&switch)
    }

    pub fn len(&self) -> usize {
        self.switches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.switches.is_empty()
    }

    /// Links inside the cluster grouped by destination switch
    pub fn incoming_by_switch(&self) -> BTreeMap<DatapathId, Vec<Link>> {
        let mut incoming: BTreeMap<DatapathId, Vec<Link>> = BTreeMap::new();
        for link in &self.links {
            incoming.entry(link.dst).or_default().push(*link);
        }
        incoming
    }
}

/// Builds clusters from a filtered link set
pub struct ClusterBuilder;

impl ClusterBuilder {
    /// Partition `switches` into strongly connected components of the
    /// directed graph formed by `links`.
    ///
    /// Every switch lands in exactly one cluster; switches without usable
    /// links become singletons. Clusters come back sorted by id.
    pub fn build<I>(switches: I, links: &BTreeMap<Link, LinkInfo>) -> Vec<Cluster>
    where
        I: IntoIterator<Item = DatapathId>,
    {
        let nodes: Vec<DatapathId> = switches.into_iter().collect::<BTreeSet<_>>().into_iter().collect();
        let position: BTreeMap<DatapathId, usize> = nodes.iter().enumerate().map(|(i, sw)| (*sw, i)).collect();

        let mut adjacency: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); nodes.len()];
        for link in links.keys() {
            if let (Some(&s), Some(&d)) = (position.get(&link.src), position.get(&link.dst)) {
                adjacency[s].insert(d);
            }
        }
        let adjacency: Vec<Vec<usize>> = adjacency.into_iter().map(|set| set.into_iter().collect()).collect();

        let components = strongly_connected(&adjacency);

        let mut component_of = vec![0usize; nodes.len()];
        let mut clusters: Vec<Cluster> = Vec::with_capacity(components.len());
        for (c, members) in components.into_iter().enumerate() {
            for &i in &members {
                component_of[i] = c;
            }
            let switches: BTreeSet<DatapathId> = members.iter().map(|&i| nodes[i]).collect();
            let id = switches.iter().next().copied().unwrap_or_default();
            clusters.push(Cluster {
                id,
                switches,
                links: BTreeSet::new(),
            });
        }

        // One pass over the links, each lands in at most one cluster
        for link in links.keys() {
            if let (Some(&s), Some(&d)) = (position.get(&link.src), position.get(&link.dst)) {
                if component_of[s] == component_of[d] {
                    clusters[component_of[s]].links.insert(*link);
                }
            }
        }

        clusters.sort_by_key(|c| c.id);
        clusters
    }

    /// Group switches that are connected when link direction is ignored.
    ///
    /// An archipelago is a union of clusters joined by one-way links; routes
    /// never leave the archipelago of their source.
    pub fn archipelagos<I>(switches: I, links: &BTreeMap<Link, LinkInfo>) -> Vec<BTreeSet<DatapathId>>
    where
        I: IntoIterator<Item = DatapathId>,
    {
        let mut neighbors: BTreeMap<DatapathId, BTreeSet<DatapathId>> =
            switches.into_iter().map(|sw| (sw, BTreeSet::new())).collect();
        for link in links.keys() {
            if neighbors.contains_key(&link.src) && neighbors.contains_key(&link.dst) {
                neighbors.entry(link.src).or_default().insert(link.dst);
                neighbors.entry(link.dst).or_default().insert(link.src);
            }
        }

        let mut visited = BTreeSet::new();
        let mut groups = Vec::new();

        for &start in neighbors.keys() {
            if !visited.insert(start) {
                continue;
            }
            let mut group = BTreeSet::new();
            let mut queue = VecDeque::from([start]);

            while let Some(sw) = queue.pop_front() {
                group.insert(sw);
                for &next in neighbors.get(&sw).into_iter().flatten() {
                    if visited.insert(next) {
                        queue.push_back(next);
                    }
                }
            }
            groups.push(group);
        }

        groups
    }

    /// Hop-count shortest-path tree of a cluster, rooted at the cluster id
    /// and grown over incoming links. Maps each non-root switch to the link
    /// leading from it towards the root.
    pub fn broadcast_tree(cluster: &Cluster) -> BTreeMap<DatapathId, Link> {
        let incoming = cluster.incoming_by_switch();
        let mut parent_link = BTreeMap::new();
        let mut visited = BTreeSet::from([cluster.id]);
        let mut queue = VecDeque::from([cluster.id]);

        while let Some(sw) = queue.pop_front() {
            for link in incoming.get(&sw).into_iter().flatten() {
                if visited.insert(link.src) {
                    parent_link.insert(link.src, *link);
                    queue.push_back(link.src);
                }
            }
        }

        parent_link
    }

    /// Both endpoints of every broadcast-tree link
    pub fn broadcast_ports(cluster: &Cluster) -> BTreeSet<NodePortTuple> {
        Self::broadcast_tree(cluster)
            .values()
            .flat_map(|l| [l.src_npt(), l.dst_npt()])
            .collect()
    }
}

/// Iterative Tarjan over a dense adjacency list. Components are returned in
/// completion order, members unsorted.
fn strongly_connected(adjacency: &[Vec<usize>]) -> Vec<Vec<usize>> {
    let n = adjacency.len();
    let mut index: Vec<Option<usize>> = vec![None; n];
    let mut lowlink = vec![0usize; n];
    let mut on_stack = vec![false; n];
    let mut stack: Vec<usize> = Vec::new();
    let mut components = Vec::new();
    let mut next_index = 0usize;

    for root in 0..n {
        if index[root].is_some() {
            continue;
        }

        // (node, next neighbor to look at)
        let mut call: Vec<(usize, usize)> = vec![(root, 0)];
        index[root] = Some(next_index);
        lowlink[root] = next_index;
        next_index += 1;
        stack.push(root);
        on_stack[root] = true;

        while let Some(&(v, next)) = call.last() {
            if next < adjacency[v].len() {
                if let Some(frame) = call.last_mut() {
                    frame.1 += 1;
                }
                let w = adjacency[v][next];
                match index[w] {
                    None => {
                        index[w] = Some(next_index);
                        lowlink[w] = next_index;
                        next_index += 1;
                        stack.push(w);
                        on_stack[w] = true;
                        call.push((w, 0));
                    }
                    Some(w_index) if on_stack[w] => {
                        lowlink[v] = lowlink[v].min(w_index);
                    }
                    Some(_) => {}
                }
                continue;
            }

            call.pop();
            if let Some(&(parent, _)) = call.last() {
                lowlink[parent] = lowlink[parent].min(lowlink[v]);
            }

            if Some(lowlink[v]) == index[v] {
                let mut component = Vec::new();
                while let Some(w) = stack.pop() {
                    on_stack[w] = false;
                    component.push(w);
                    if w == v {
                        break;
                    }
                }
                components.push(component);
            }
        }
    }

    components
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::graph::LinkType;

    fn links(spec: &[(u64, u32, u64, u32)]) -> BTreeMap<Link, LinkInfo> {
        spec.iter()
            .map(|&(s, sp, d, dp)| (Link::new(s, sp, d, dp), LinkInfo::new(LinkType::Direct, 0)))
            .collect()
    }

    fn ids(switches: &[u64]) -> Vec<DatapathId> {
        switches.iter().map(|&s| DatapathId(s)).collect()
    }

    fn membership(clusters: &[Cluster]) -> Vec<Vec<u64>> {
        clusters
            .iter()
            .map(|c| c.switches.iter().map(|s| s.value()).collect())
            .collect()
    }

    #[test]
    fn test_directed_cycle_forms_one_cluster() {
        let set = links(&[(1, 1, 2, 1), (2, 2, 3, 2), (3, 1, 1, 2), (2, 3, 4, 2), (3, 3, 4, 1)]);
        let clusters = ClusterBuilder::build(ids(&[1, 2, 3, 4]), &set);
        assert_eq!(membership(&clusters), vec![vec![1, 2, 3], vec![4]]);
        assert_eq!(clusters[0].links.len(), 3);
    }

    #[test]
    fn test_one_way_link_does_not_merge() {
        let set = links(&[(5, 3, 6, 1)]);
        let clusters = ClusterBuilder::build(ids(&[5, 6]), &set);
        assert_eq!(membership(&clusters), vec![vec![5], vec![6]]);
    }

    #[test]
    fn test_isolated_switch_is_singleton() {
        let clusters = ClusterBuilder::build(ids(&[9]), &BTreeMap::new());
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].id, DatapathId(9));
        assert!(clusters[0].links.is_empty());
    }

    #[test]
    fn test_every_switch_in_exactly_one_cluster() {
        let set = links(&[(1, 1, 2, 1), (2, 1, 1, 1), (2, 2, 3, 1), (4, 1, 5, 1), (5, 1, 4, 1), (5, 2, 6, 1)]);
        let switches = ids(&[1, 2, 3, 4, 5, 6, 7]);
        let clusters = ClusterBuilder::build(switches.clone(), &set);

        let mut seen: Vec<DatapathId> = clusters.iter().flat_map(|c| c.switches.iter().copied()).collect();
        seen.sort();
        assert_eq!(seen, switches);
    }

    #[test]
    fn test_long_chain_does_not_recurse() {
        let mut spec = Vec::new();
        for i in 1..2000u64 {
            spec.push((i, 1, i + 1, 2));
            spec.push((i + 1, 2, i, 1));
        }
        let set = links(&spec);
        let clusters = ClusterBuilder::build((1..=2000u64).map(DatapathId), &set);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].len(), 2000);
    }

    #[test]
    fn test_archipelago_joins_one_way_links() {
        let set = links(&[(1, 1, 2, 1), (2, 2, 3, 1)]);
        let groups = ClusterBuilder::archipelagos(ids(&[1, 2, 3, 4]), &set);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0], BTreeSet::from([DatapathId(1), DatapathId(2), DatapathId(3)]));
        assert_eq!(groups[1], BTreeSet::from([DatapathId(4)]));
    }

    #[test]
    fn test_broadcast_tree_of_ring() {
        let set = links(&[
            (1, 1, 2, 1),
            (2, 1, 1, 1),
            (1, 2, 3, 1),
            (3, 1, 1, 2),
            (2, 2, 3, 2),
            (3, 2, 2, 2),
        ]);
        let clusters = ClusterBuilder::build(ids(&[1, 2, 3]), &set);
        assert_eq!(clusters.len(), 1);

        let ports = ClusterBuilder::broadcast_ports(&clusters[0]);
        let expected: BTreeSet<NodePortTuple> = [(1, 1), (2, 1), (1, 2), (3, 1)]
            .iter()
            .map(|&(s, p)| NodePortTuple::new(s as u64, p as u32))
            .collect();
        assert_eq!(ports, expected);
    }
}
