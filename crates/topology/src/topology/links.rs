//! Link store - the mutable set of discovered links
//!
//! Discovery events land here. Nothing in this module is visible to readers
//! until the manager freezes the store into a new [`TopologyInstance`].
//!
//! [`TopologyInstance`]: super::instance::TopologyInstance

use super::graph::{DatapathId, Link, LinkInfo, LinkType, NodePortTuple, PortNumber};
use crate::{Result, TopologyChange, TopologyError};
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};

/// Discovered switches, ports and directed link records
#[derive(Debug, Clone)]
pub struct LinkStore {
    /// Ports known per switch. A switch stays known until it is removed,
    /// even after its last link goes down.
    switch_ports: BTreeMap<DatapathId, BTreeSet<PortNumber>>,
    /// Link records incident on each port, as source or destination
    switch_port_links: BTreeMap<NodePortTuple, BTreeSet<Link>>,
    links: BTreeMap<Link, LinkInfo>,
    /// Changes since the last rebuild
    pending: Vec<TopologyChange>,
    dirty: bool,
    max_switches: usize,
    max_links: usize,
}

impl Default for LinkStore {
    fn default() -> Self {
        Self::new(4096, 65536)
    }
}

impl LinkStore {
    pub fn new(max_switches: usize, max_links: usize) -> Self {
        Self {
            switch_ports: BTreeMap::new(),
            switch_port_links: BTreeMap::new(),
            links: BTreeMap::new(),
            pending: Vec::new(),
            dirty: false,
            max_switches,
            max_links,
        }
    }

    /// Insert or replace a link record.
    ///
    /// Returns `Ok(true)` when the record is new or its type or latency
    /// changed. Latency is stored as reported; clamping happens at costing.
    pub fn add_or_update_link(&mut self, link: Link, latency: i64, link_type: LinkType) -> Result<bool> {
        if link.is_self_loop() {
            return Err(TopologyError::SelfLoop(link.src));
        }

        if let Some(info) = self.links.get_mut(&link) {
            let changed = info.link_type != link_type || info.latency != latency;
            info.link_type = link_type;
            info.latency = latency;
            info.last_updated = Utc::now();

            if changed {
                tracing::debug!(%link, %link_type, latency, "link updated");
                self.record(TopologyChange::LinkUpdated { link, link_type, latency });
            }
            return Ok(changed);
        }

        let new_switches = [link.src, link.dst]
            .iter()
            .filter(|sw| !self.switch_ports.contains_key(*sw))
            .count();
        if self.switch_ports.len() + new_switches > self.max_switches {
            tracing::warn!(%link, limit = self.max_switches, "rejecting link: switch limit reached");
            return Err(TopologyError::SwitchLimitExceeded { limit: self.max_switches });
        }
        if self.links.len() >= self.max_links {
            tracing::warn!(%link, limit = self.max_links, "rejecting link: link limit reached");
            return Err(TopologyError::LinkLimitExceeded { limit: self.max_links });
        }

        self.add_port(link.src_npt());
        self.add_port(link.dst_npt());
        self.switch_port_links.entry(link.src_npt()).or_default().insert(link);
        self.switch_port_links.entry(link.dst_npt()).or_default().insert(link);
        self.links.insert(link, LinkInfo::new(link_type, latency));

        tracing::debug!(%link, %link_type, latency, "link added");
        self.record(TopologyChange::LinkUpdated { link, link_type, latency });
        Ok(true)
    }

    /// Remove a link record together with its reverse record.
    ///
    /// Returns whether anything was removed. Endpoint ports stay registered.
    pub fn remove_link(&mut self, link: Link) -> bool {
        let mut removed = false;
        for record in [link, link.reverse()] {
            if self.remove_record(record) {
                tracing::debug!(link = %record, "link removed");
                self.record(TopologyChange::LinkRemoved { link: record });
                removed = true;
            }
        }
        removed
    }

    /// Remove a switch and every link touching it
    pub fn remove_switch(&mut self, switch: DatapathId) -> bool {
        let touching: BTreeSet<Link> = self
            .switch_ports
            .get(&switch)
            .into_iter()
            .flatten()
            .filter_map(|port| self.switch_port_links.get(&NodePortTuple::new(switch, *port)))
            .flatten()
            .copied()
            .collect();
        for link in &touching {
            self.remove_record(*link);
        }

        let known = match self.switch_ports.remove(&switch) {
            Some(ports) => {
                for port in ports {
                    self.switch_port_links.remove(&NodePortTuple::new(switch, port));
                }
                true
            }
            None => false,
        };

        if known || !touching.is_empty() {
            tracing::debug!(%switch, links = touching.len(), "switch removed");
            self.record(TopologyChange::SwitchRemoved { switch });
        }
        known
    }

    /// Update the utilization reading of an existing link. Values are
    /// clamped into `[0, 1]`; unknown links are ignored.
    pub fn set_link_utilization(&mut self, link: Link, utilization: f64) -> bool {
        let Some(info) = self.links.get_mut(&link) else {
            return false;
        };
        let utilization = LinkInfo::sanitize_utilization(utilization);
        if info.utilization != utilization {
            info.utilization = utilization;
            info.last_updated = Utc::now();
            self.dirty = true;
        }
        true
    }

    /// Forget every switch and link
    pub fn clear(&mut self) {
        let switches: Vec<DatapathId> = self.switch_ports.keys().copied().collect();
        self.switch_ports.clear();
        self.switch_port_links.clear();
        self.links.clear();
        for switch in switches {
            self.record(TopologyChange::SwitchRemoved { switch });
        }
        self.dirty = true;
    }

    pub fn switches(&self) -> impl Iterator<Item = DatapathId> + '_ {
        self.switch_ports.keys().copied()
    }

    pub fn switch_ports(&self) -> &BTreeMap<DatapathId, BTreeSet<PortNumber>> {
        &self.switch_ports
    }

    pub fn links(&self) -> &BTreeMap<Link, LinkInfo> {
        &self.links
    }

    pub fn link_info(&self, link: &Link) -> Option<&LinkInfo> {
        self.links.get(link)
    }

    pub fn contains_link(&self, link: &Link) -> bool {
        self.links.contains_key(link)
    }

    /// Link records with `npt` as source or destination
    pub fn incident_links(&self, npt: &NodePortTuple) -> Option<&BTreeSet<Link>> {
        self.switch_port_links.get(npt)
    }

    pub fn switch_port_links(&self) -> &BTreeMap<NodePortTuple, BTreeSet<Link>> {
        &self.switch_port_links
    }

    pub fn switch_count(&self) -> usize {
        self.switch_ports.len()
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    /// Whether anything changed since the last rebuild
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Hand over the changes accumulated since the last rebuild
    pub fn take_pending(&mut self) -> Vec<TopologyChange> {
        self.dirty = false;
        std::mem::take(&mut self.pending)
    }

    fn add_port(&mut self, npt: NodePortTuple) {
        self.switch_ports.entry(npt.switch).or_default().insert(npt.port);
    }

    fn remove_record(&mut self, link: Link) -> bool {
        if self.links.remove(&link).is_none() {
            return false;
        }
        for npt in [link.src_npt(), link.dst_npt()] {
            if let Some(set) = self.switch_port_links.get_mut(&npt) {
                set.remove(&link);
                if set.is_empty() {
                    self.switch_port_links.remove(&npt);
                }
            }
        }
        self.dirty = true;
        true
    }

    fn record(&mut self, change: TopologyChange) {
        self.pending.push(change);
        self.dirty = true;
    }
}
