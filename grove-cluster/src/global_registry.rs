//! Gossiped global name registry.

use dashmap::DashMap;
use grove_shared::{GroveError, GroveResult, NodeId, ServerId, ServerRef};

use crate::wire::GlobalEntryWire;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalRegistryEntry {
    pub server_id: ServerId,
    pub node: NodeId,
    pub registered_at_ms: u64,
    pub priority: u32,
}

impl GlobalRegistryEntry {
    /// Total order used for conflict resolution: smaller `(registeredAt,
    /// priority)` wins.
    fn rank(&self) -> (u64, u32) {
        (self.registered_at_ms, self.priority)
    }

    fn wire(&self, name: &str) -> GlobalEntryWire {
        GlobalEntryWire {
            name: name.to_string(),
            server_id: self.server_id,
            node: self.node.clone(),
            registered_at_ms: self.registered_at_ms,
            priority: self.priority,
        }
    }
}

/// Eventually-consistent table of globally registered names.
#[derive(Default)]
pub struct GlobalRegistry {
    entries: DashMap<String, GlobalRegistryEntry>,
}

impl GlobalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name` for a server owned by `here`. Fails with
    /// `GlobalNameConflict` if another node already owns it.
    pub fn register(&self, name: &str, server_id: ServerId, here: NodeId) -> GroveResult<()> {
        if let Some(existing) = self.entries.get(name) {
            if existing.node != here {
                return Err(GroveError::GlobalNameConflict {
                    name: name.to_string(),
                    owner: existing.node.clone(),
                });
            }
        }
        let entry = GlobalRegistryEntry {
            server_id,
            node: here.clone(),
            registered_at_ms: now_ms(),
            priority: here.deterministic_priority(),
        };
        self.entries.insert(name.to_string(), entry);
        Ok(())
    }

    /// Authoritative only for the owning node; no-op for names owned
    /// elsewhere.
    pub fn unregister(&self, name: &str, here: &NodeId) {
        self.entries.remove_if(name, |_, entry| &entry.node == here);
    }

    pub fn whereis(&self, name: &str) -> Option<ServerRef> {
        self.entries
            .get(name)
            .map(|e| ServerRef::remote(e.server_id, e.node.clone()))
    }

    /// Apply an incoming `registry_sync` entry, keeping whichever side wins
    /// the deterministic `(registeredAt, priority)` comparison.
    pub fn apply_incoming(&self, incoming: &GlobalEntryWire) {
        let candidate = GlobalRegistryEntry {
            server_id: incoming.server_id,
            node: incoming.node.clone(),
            registered_at_ms: incoming.registered_at_ms,
            priority: incoming.priority,
        };
        match self.entries.get(&incoming.name) {
            Some(current) if current.rank() <= candidate.rank() => {}
            _ => {
                self.entries.insert(incoming.name.clone(), candidate);
            }
        }
    }

    /// A full-sync frame first evicts every entry owned by the sender
    /// before applying the entries it carries.
    pub fn apply_full_sync(&self, from: &NodeId, entries: &[GlobalEntryWire]) {
        self.entries.retain(|_, entry| &entry.node != from);
        for entry in entries {
            self.apply_incoming(entry);
        }
    }

    /// Remove every entry owned by a node that just went down.
    pub fn evict_node(&self, node: &NodeId) {
        self.entries.retain(|_, entry| &entry.node != node);
    }

    pub fn owned_entries(&self, here: &NodeId, name: &str) -> Option<GlobalEntryWire> {
        self.entries
            .get(name)
            .filter(|e| &e.node == here)
            .map(|e| e.wire(name))
    }

    /// Snapshot of every entry this node owns, for the full-sync frame sent
    /// on `nodeUp`.
    pub fn owned_snapshot(&self, here: &NodeId) -> Vec<GlobalEntryWire> {
        self.entries
            .iter()
            .filter(|e| e.value().node == *here)
            .map(|e| e.value().wire(e.key()))
            .collect()
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn earlier_registered_at_wins_on_conflict() {
        let registry = GlobalRegistry::new();
        let node_a = NodeId::new("a", "127.0.0.1", 1);
        registry
            .entries
            .insert(
                "main".to_string(),
                GlobalRegistryEntry {
                    server_id: ServerId::new(),
                    node: node_a.clone(),
                    registered_at_ms: 100,
                    priority: 5,
                },
            );

        let later = GlobalEntryWire {
            name: "main".to_string(),
            server_id: ServerId::new(),
            node: NodeId::new("b", "127.0.0.1", 2),
            registered_at_ms: 200,
            priority: 1,
        };
        registry.apply_incoming(&later);

        let winner = registry.entries.get("main").unwrap();
        assert_eq!(winner.node, node_a);
    }

    #[test]
    fn ties_are_broken_by_lower_priority() {
        let registry = GlobalRegistry::new();
        let node_a = NodeId::new("a", "127.0.0.1", 1);
        registry.entries.insert(
            "main".to_string(),
            GlobalRegistryEntry {
                server_id: ServerId::new(),
                node: node_a,
                registered_at_ms: 100,
                priority: 9,
            },
        );

        let node_b = NodeId::new("b", "127.0.0.1", 2);
        let challenger = GlobalEntryWire {
            name: "main".to_string(),
            server_id: ServerId::new(),
            node: node_b.clone(),
            registered_at_ms: 100,
            priority: 2,
        };
        registry.apply_incoming(&challenger);

        let winner = registry.entries.get("main").unwrap();
        assert_eq!(winner.node, node_b);
    }
}
