//! Graph model for the switch topology

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 64-bit datapath identifier of an OpenFlow switch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatapathId(pub u64);

impl DatapathId {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn value(self) -> u64 {
        self.0
    }
}

impl From<u64> for DatapathId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for DatapathId {
    /// Colon-separated hex, the way controllers print dpids
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.0.to_be_bytes();
        for (i, b) in bytes.iter().enumerate() {
            if i > 0 {
                f.write_str(":")?;
            }
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

/// Port number on a switch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PortNumber(pub u32);

impl PortNumber {
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    pub const fn value(self) -> u32 {
        self.0
    }
}

impl From<u32> for PortNumber {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl fmt::Display for PortNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A (switch, port) pair. Ordered by switch, then port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodePortTuple {
    pub switch: DatapathId,
    pub port: PortNumber,
}

impl NodePortTuple {
    pub fn new(switch: impl Into<DatapathId>, port: impl Into<PortNumber>) -> Self {
        Self {
            switch: switch.into(),
            port: port.into(),
        }
    }
}

impl fmt::Display for NodePortTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.switch, self.port)
    }
}

/// How a link was discovered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkType {
    /// Point-to-point link between two OpenFlow ports
    Direct,
    /// Link seen through a non-OpenFlow segment
    Multihop,
    /// Overlay tunnel between two switches
    Tunnel,
}

impl fmt::Display for LinkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LinkType::Direct => "direct",
            LinkType::Multihop => "multihop",
            LinkType::Tunnel => "tunnel",
        };
        f.write_str(s)
    }
}

/// A directed link record `(src, src_port) -> (dst, dst_port)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Link {
    pub src: DatapathId,
    pub src_port: PortNumber,
    pub dst: DatapathId,
    pub dst_port: PortNumber,
}

impl Link {
    pub fn new(
        src: impl Into<DatapathId>,
        src_port: impl Into<PortNumber>,
        dst: impl Into<DatapathId>,
        dst_port: impl Into<PortNumber>,
    ) -> Self {
        Self {
            src: src.into(),
            src_port: src_port.into(),
            dst: dst.into(),
            dst_port: dst_port.into(),
        }
    }

    pub fn src_npt(&self) -> NodePortTuple {
        NodePortTuple::new(self.src, self.src_port)
    }

    pub fn dst_npt(&self) -> NodePortTuple {
        NodePortTuple::new(self.dst, self.dst_port)
    }

    /// The same link in the opposite direction
    pub fn reverse(&self) -> Link {
        Link {
            src: self.dst,
            src_port: self.dst_port,
            dst: self.src,
            dst_port: self.src_port,
        }
    }

    pub fn is_reverse_of(&self, other: &Link) -> bool {
        self.reverse() == *other
    }

    pub fn is_self_loop(&self) -> bool {
        self.src == self.dst
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.src_npt(), self.dst_npt())
    }
}

/// Attributes carried by a link record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkInfo {
    pub link_type: LinkType,
    /// Raw latency as reported by discovery. Clamped when costed, never here.
    pub latency: i64,
    /// Fraction of capacity in use, pushed by the statistics collector
    pub utilization: f64,
    pub first_seen: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl LinkInfo {
    pub fn new(link_type: LinkType, latency: i64) -> Self {
        let now = Utc::now();
        Self {
            link_type,
            latency,
            utilization: 0.0,
            first_seen: now,
            last_updated: now,
        }
    }

    pub fn with_utilization(mut self, utilization: f64) -> Self {
        self.utilization = Self::sanitize_utilization(utilization);
        self
    }

    /// Clamp a utilization reading into `[0, 1]`; NaN reads as idle
    pub fn sanitize_utilization(utilization: f64) -> f64 {
        if utilization.is_nan() {
            0.0
        } else {
            utilization.clamp(0.0, 1.0)
        }
    }

    pub fn is_tunnel(&self) -> bool {
        self.link_type == LinkType::Tunnel
    }

    pub fn is_multihop(&self) -> bool {
        self.link_type == LinkType::Multihop
    }
}

/// Source and destination switch of a route
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteId {
    pub src: DatapathId,
    pub dst: DatapathId,
}

impl RouteId {
    pub fn new(src: impl Into<DatapathId>, dst: impl Into<DatapathId>) -> Self {
        Self {
            src: src.into(),
            dst: dst.into(),
        }
    }
}

/// An ordered list of switch ports from the source's egress port to the
/// destination's ingress port. Two ports per traversed link.
///
/// Equality ignores cost: routes are equal iff their hop sequences are.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    pub id: RouteId,
    pub path: Vec<NodePortTuple>,
}

impl Route {
    /// A zero-length route
    pub fn new(src: impl Into<DatapathId>, dst: impl Into<DatapathId>) -> Self {
        Self {
            id: RouteId::new(src, dst),
            path: Vec::new(),
        }
    }

    pub fn with_path(mut self, path: Vec<NodePortTuple>) -> Self {
        self.path = path;
        self
    }

    /// Build a route from the links it traverses, in order
    pub fn from_links(src: DatapathId, dst: DatapathId, links: &[Link]) -> Self {
        let mut path = Vec::with_capacity(links.len() * 2);
        for link in links {
            path.push(link.src_npt());
            path.push(link.dst_npt());
        }
        Self {
            id: RouteId { src, dst },
            path,
        }
    }

    /// The links this route traverses
    pub fn links(&self) -> Vec<Link> {
        self.path
            .chunks_exact(2)
            .map(|pair| Link {
                src: pair[0].switch,
                src_port: pair[0].port,
                dst: pair[1].switch,
                dst_port: pair[1].port,
            })
            .collect()
    }

    /// Number of links traversed
    pub fn hop_count(&self) -> usize {
        self.path.len() / 2
    }

    pub fn is_empty(&self) -> bool {
        self.path.is_empty()
    }

    /// Switches visited, source first
    pub fn switches(&self) -> Vec<DatapathId> {
        let mut switches = vec![self.id.src];
        for pair in self.path.chunks_exact(2) {
            switches.push(pair[1].switch);
        }
        switches
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Route[{} -> {}: ", self.id.src, self.id.dst)?;
        for (i, npt) in self.path.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", npt)?;
        }
        f.write_str("]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_datapath_id_display() {
        assert_eq!(DatapathId::new(1).to_string(), "00:00:00:00:00:00:00:01");
        assert_eq!(DatapathId::new(0xabcd).to_string(), "00:00:00:00:00:00:ab:cd");
    }

    #[test]
    fn test_link_reverse() {
        let link = Link::new(1u64, 2u32, 3u64, 4u32);
        let rev = link.reverse();
        assert_eq!(rev, Link::new(3u64, 4u32, 1u64, 2u32));
        assert!(link.is_reverse_of(&rev));
        assert!(!link.is_reverse_of(&link));
    }

    #[test]
    fn test_utilization_sanitized() {
        let info = LinkInfo::new(LinkType::Direct, 1);
        assert_eq!(info.clone().with_utilization(f64::NAN).utilization, 0.0);
        assert_eq!(info.clone().with_utilization(-0.5).utilization, 0.0);
        assert_eq!(info.clone().with_utilization(2.0).utilization, 1.0);
        assert_eq!(info.with_utilization(0.25).utilization, 0.25);
    }

    #[test]
    fn test_route_from_links() {
        let links = [Link::new(1u64, 1u32, 2u64, 1u32), Link::new(2u64, 2u32, 3u64, 2u32)];
        let route = Route::from_links(DatapathId(1), DatapathId(3), &links);

        assert_eq!(route.hop_count(), 2);
        assert_eq!(route.switches(), vec![DatapathId(1), DatapathId(2), DatapathId(3)]);
        assert_eq!(route.links(), links.to_vec());
        assert_eq!(route.path[1], NodePortTuple::new(2u64, 1u32));
    }

    #[test]
    fn test_route_equality_ignores_construction() {
        let a = Route::new(1u64, 2u64).with_path(vec![
            NodePortTuple::new(1u64, 1u32),
            NodePortTuple::new(2u64, 1u32),
        ]);
        let b = Route::from_links(DatapathId(1), DatapathId(2), &[Link::new(1u64, 1u32, 2u64, 1u32)]);
        assert_eq!(a, b);
    }
}
