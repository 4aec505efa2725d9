//! Process-wide identity types.
//!
//! `ServerId` and `NodeId` are kept intentionally dumb: they carry no
//! behavior and no liveness information. Liveness lives in the process
//! table (`grove-runtime`) and the membership table (`grove-cluster`).

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque, process-wide unique identity for a server (actor).
///
/// Generated with UUIDv7 so ids sort roughly by creation time, which keeps
/// log output and the observer's process tree readable without needing a
/// separate sequence counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerId(Uuid);

impl ServerId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ServerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a cluster node: `name@host:port`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId {
    name: String,
    host: String,
    port: u16,
}

impl NodeId {
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Deterministic hash used as the global registry's tie-break priority.
    pub fn deterministic_priority(&self) -> u32 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        use std::hash::{Hash, Hasher};
        self.hash(&mut hasher);
        (hasher.finish() & 0xffff_ffff) as u32
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.name, self.host, self.port)
    }
}

impl std::str::FromStr for NodeId {
    type Err = NodeIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, rest) = s.split_once('@').ok_or(NodeIdParseError::MissingAt)?;
        let (host, port) = rest.split_once(':').ok_or(NodeIdParseError::MissingPort)?;
        let port: u16 = port.parse().map_err(|_| NodeIdParseError::BadPort)?;
        if name.is_empty() || host.is_empty() {
            return Err(NodeIdParseError::Empty);
        }
        Ok(Self::new(name, host, port))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NodeIdParseError {
    #[error("node id is missing '@name' separator")]
    MissingAt,
    #[error("node id is missing ':port'")]
    MissingPort,
    #[error("node id port is not a valid u16")]
    BadPort,
    #[error("node id has an empty name or host")]
    Empty,
}

/// Opaque handle to a server. Non-constructible outside the crate that owns
/// the process table; carries only identity, never behavior.
///
/// Locally this is just a `ServerId`. Serialized for wire use it carries the
/// owning `NodeId` too, so a remote peer knows which node to route a reply
/// through.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerRef {
    id: ServerId,
    node: Option<NodeId>,
}

impl ServerRef {
    pub fn local(id: ServerId) -> Self {
        Self { id, node: None }
    }

    pub fn remote(id: ServerId, node: NodeId) -> Self {
        Self {
            id,
            node: Some(node),
        }
    }

    pub fn id(&self) -> ServerId {
        self.id
    }

    pub fn node(&self) -> Option<&NodeId> {
        self.node.as_ref()
    }

    pub fn is_local(&self, here: &NodeId) -> bool {
        matches!(&self.node, None) || self.node.as_ref() == Some(here)
    }
}

impl fmt::Display for ServerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.node {
            Some(node) => write!(f, "{}@{}", self.id, node),
            None => write!(f, "{}", self.id),
        }
    }
}

/// A unique id handed out by `monitor()`, used to correlate a later
/// `demonitor()` or `process_down` delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MonitorId(Uuid);

impl MonitorId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for MonitorId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MonitorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A unique id correlating a remote `call`/`spawn`/`monitor_install` request
/// to its reply frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_round_trips_through_display_and_parse() {
        let node = NodeId::new("alpha", "10.0.0.1", 4369);
        let rendered = node.to_string();
        assert_eq!(rendered, "alpha@10.0.0.1:4369");
        let parsed: NodeId = rendered.parse().unwrap();
        assert_eq!(parsed, node);
    }

    #[test]
    fn node_id_parse_rejects_malformed_input() {
        assert!("no-at-sign".parse::<NodeId>().is_err());
        assert!("name@host-no-port".parse::<NodeId>().is_err());
        assert!("name@host:notaport".parse::<NodeId>().is_err());
        assert!("@host:1234".parse::<NodeId>().is_err());
    }

    #[test]
    fn server_ref_is_local_only_for_none_or_matching_node() {
        let here = NodeId::new("here", "127.0.0.1", 1);
        let there = NodeId::new("there", "127.0.0.1", 2);
        let id = ServerId::new();

        assert!(ServerRef::local(id).is_local(&here));
        assert!(ServerRef::remote(id, here.clone()).is_local(&here));
        assert!(!ServerRef::remote(id, there).is_local(&here));
    }

    #[test]
    fn deterministic_priority_is_stable_for_equal_ids() {
        let a = NodeId::new("alpha", "10.0.0.1", 4369);
        let b = NodeId::new("alpha", "10.0.0.1", 4369);
        assert_eq!(a.deterministic_priority(), b.deterministic_priority());
    }
}
