//! Monitor/link graph: unidirectional death notifications and symmetric
//! exit propagation between servers.

use std::collections::HashSet;

use dashmap::DashMap;
use grove_shared::{MonitorId, ServerId, ServerRef};

/// One watcher watching one target, unidirectional, at-most-once delivery.
#[derive(Debug, Clone)]
pub struct MonitorRecord {
    pub id: MonitorId,
    pub watcher: ServerRef,
    pub target: ServerId,
}

/// Tracks monitors (unidirectional, at-most-once) and links (symmetric,
/// repeated) between servers. Both graphs are keyed by the *target*/*peer*
/// id so termination can cheaply drain everything referencing a dying
/// server.
#[derive(Default)]
pub struct MonitorGraph {
    /// target id -> monitors watching it
    monitors_by_target: DashMap<ServerId, Vec<MonitorRecord>>,
    /// monitor id -> target id, so `demonitor` can find the right bucket
    monitor_targets: DashMap<MonitorId, ServerId>,
    /// peer id -> set of linked peer ids (always stored on both sides)
    links: DashMap<ServerId, HashSet<ServerId>>,
}

impl MonitorGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_monitor(&self, watcher: ServerRef, target: ServerId) -> MonitorId {
        let id = MonitorId::new();
        self.monitors_by_target
            .entry(target)
            .or_default()
            .push(MonitorRecord {
                id,
                watcher,
                target,
            });
        self.monitor_targets.insert(id, target);
        id
    }

    /// Cancel a pending monitor. Idempotent: demonitoring twice, or
    /// demonitoring after the target already fired, is a no-op.
    pub fn demonitor(&self, monitor_id: MonitorId) {
        if let Some((_, target)) = self.monitor_targets.remove(&monitor_id) {
            if let Some(mut bucket) = self.monitors_by_target.get_mut(&target) {
                bucket.retain(|m| m.id != monitor_id);
            }
        }
    }

    /// Remove and return every monitor watching `target`, for delivery by
    /// the caller. Draining (rather than iterating) guarantees
    /// at-most-once delivery even under concurrent termination retries.
    pub fn drain_monitors_for(&self, target: ServerId) -> Vec<MonitorRecord> {
        let records = self
            .monitors_by_target
            .remove(&target)
            .map(|(_, v)| v)
            .unwrap_or_default();
        for record in &records {
            self.monitor_targets.remove(&record.id);
        }
        records
    }

    pub fn add_link(&self, a: ServerId, b: ServerId) {
        self.links.entry(a).or_default().insert(b);
        self.links.entry(b).or_default().insert(a);
    }

    pub fn remove_link(&self, a: ServerId, b: ServerId) {
        if let Some(mut set) = self.links.get_mut(&a) {
            set.remove(&b);
        }
        if let Some(mut set) = self.links.get_mut(&b) {
            set.remove(&a);
        }
    }

    /// Remove and return every peer linked to `id`, so the caller can
    /// propagate an exit to each of them exactly once.
    pub fn drain_links_for(&self, id: ServerId) -> Vec<ServerId> {
        let peers = self
            .links
            .remove(&id)
            .map(|(_, v)| v.into_iter().collect::<Vec<_>>())
            .unwrap_or_default();
        for peer in &peers {
            if let Some(mut set) = self.links.get_mut(peer) {
                set.remove(&id);
            }
        }
        peers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monitor_fires_at_most_once_even_if_drained_twice() {
        let graph = MonitorGraph::new();
        let watcher = ServerRef::local(ServerId::new());
        let target = ServerId::new();
        graph.add_monitor(watcher, target);

        let first = graph.drain_monitors_for(target);
        let second = graph.drain_monitors_for(target);
        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
    }

    #[test]
    fn demonitor_before_termination_suppresses_delivery() {
        let graph = MonitorGraph::new();
        let watcher = ServerRef::local(ServerId::new());
        let target = ServerId::new();
        let id = graph.add_monitor(watcher, target);
        graph.demonitor(id);

        let drained = graph.drain_monitors_for(target);
        assert!(drained.is_empty());
    }

    #[test]
    fn links_are_symmetric_and_drain_both_sides() {
        let graph = MonitorGraph::new();
        let a = ServerId::new();
        let b = ServerId::new();
        graph.add_link(a, b);

        let peers_of_a = graph.drain_links_for(a);
        assert_eq!(peers_of_a, vec![b]);
        // b's side should have been cleaned up too
        let peers_of_b = graph.drain_links_for(b);
        assert!(peers_of_b.is_empty());
    }
}
