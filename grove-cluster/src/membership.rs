//! Membership table: each known peer's connection status and health.

use dashmap::DashMap;
use grove_shared::{resilience::ConnectionHealth, NodeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    Connecting,
    Connected,
    Disconnected,
}

/// Why a node transitioned to down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownReason {
    Disconnect,
    Timeout,
    HandshakeFailed,
}

pub struct NodeEntry {
    pub host: String,
    pub port: u16,
    pub status: NodeStatus,
    pub last_heartbeat_ms: u64,
    pub missed_heartbeats: u32,
    pub health: ConnectionHealth,
}

/// Eventually-consistent local view of the cluster's membership.
#[derive(Default)]
pub struct Membership {
    nodes: DashMap<NodeId, NodeEntry>,
}

impl Membership {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_connecting(&self, node: &NodeId) {
        self.nodes
            .entry(node.clone())
            .and_modify(|e| e.status = NodeStatus::Connecting)
            .or_insert_with(|| NodeEntry {
                host: node.host().to_string(),
                port: node.port(),
                status: NodeStatus::Connecting,
                last_heartbeat_ms: 0,
                missed_heartbeats: 0,
                health: ConnectionHealth::new(),
            });
    }

    pub fn mark_connected(&self, node: &NodeId, now_ms: u64) {
        self.nodes
            .entry(node.clone())
            .and_modify(|e| {
                e.status = NodeStatus::Connected;
                e.last_heartbeat_ms = now_ms;
                e.missed_heartbeats = 0;
                e.health.mark_connected();
            })
            .or_insert_with(|| NodeEntry {
                host: node.host().to_string(),
                port: node.port(),
                status: NodeStatus::Connected,
                last_heartbeat_ms: now_ms,
                missed_heartbeats: 0,
                health: ConnectionHealth::new(),
            });
    }

    pub fn record_heartbeat(&self, node: &NodeId, now_ms: u64) {
        if let Some(mut entry) = self.nodes.get_mut(node) {
            entry.last_heartbeat_ms = now_ms;
            entry.missed_heartbeats = 0;
        }
    }

    /// Increment the miss counter for every connected node whose heartbeat
    /// is overdue; returns the ids that just crossed the miss threshold.
    pub fn sweep_missed_heartbeats(&self, now_ms: u64, interval_ms: u64, threshold: u32) -> Vec<NodeId> {
        let mut newly_down = Vec::new();
        for mut entry in self.nodes.iter_mut() {
            if entry.value().status != NodeStatus::Connected {
                continue;
            }
            let overdue = now_ms.saturating_sub(entry.value().last_heartbeat_ms) > interval_ms;
            if overdue {
                entry.value_mut().missed_heartbeats += 1;
                if entry.value().missed_heartbeats >= threshold {
                    entry.value_mut().status = NodeStatus::Disconnected;
                    entry.value_mut().health.mark_disconnected();
                    newly_down.push(entry.key().clone());
                }
            }
        }
        newly_down
    }

    pub fn mark_disconnected(&self, node: &NodeId) {
        if let Some(mut entry) = self.nodes.get_mut(node) {
            entry.status = NodeStatus::Disconnected;
            entry.health.mark_disconnected();
        }
    }

    pub fn is_connected(&self, node: &NodeId) -> bool {
        self.nodes
            .get(node)
            .map(|e| e.status == NodeStatus::Connected)
            .unwrap_or(false)
    }

    pub fn known_nodes(&self) -> Vec<NodeId> {
        self.nodes.iter().map(|e| e.key().clone()).collect()
    }

    pub fn contains(&self, node: &NodeId) -> bool {
        self.nodes.contains_key(node)
    }
}
