//! Process table bookkeeping: the attributes tracked per running server.
//!
//! The table is type-erased on purpose: it tracks bookkeeping common to
//! every server (lifecycle state, counters, how to reach its control queue)
//! without knowing the server's `Behavior`. The strongly-typed mailbox for
//! `Call`/`Cast` lives only in the `ServerRef<B>` handle returned by
//! `start`, never here.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use grove_shared::ServerId;
use tokio::sync::mpsc;

use crate::mailbox::ControlMsg;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum LifecycleState {
    Starting,
    Running,
    Terminating,
    Terminated,
}

impl LifecycleState {
    fn encode(self) -> u8 {
        match self {
            LifecycleState::Starting => 0,
            LifecycleState::Running => 1,
            LifecycleState::Terminating => 2,
            LifecycleState::Terminated => 3,
        }
    }

    fn decode(byte: u8) -> Self {
        match byte {
            0 => LifecycleState::Starting,
            1 => LifecycleState::Running,
            2 => LifecycleState::Terminating,
            _ => LifecycleState::Terminated,
        }
    }
}

pub(crate) struct ProcessEntry {
    pub name: RwLock<Option<String>>,
    pub behavior_name: &'static str,
    pub control_tx: mpsc::UnboundedSender<ControlMsg>,
    pub state: AtomicU8,
    pub message_count: AtomicU64,
    pub restart_count: AtomicU32,
    pub started_at: DateTime<Utc>,
}

impl ProcessEntry {
    pub fn new(
        behavior_name: &'static str,
        control_tx: mpsc::UnboundedSender<ControlMsg>,
    ) -> Self {
        Self {
            name: RwLock::new(None),
            behavior_name,
            control_tx,
            state: AtomicU8::new(LifecycleState::Starting.encode()),
            message_count: AtomicU64::new(0),
            restart_count: AtomicU32::new(0),
            started_at: Utc::now(),
        }
    }

    pub fn set_name(&self, name: Option<String>) {
        *self.name.write().unwrap_or_else(|p| p.into_inner()) = name;
    }

    pub fn name(&self) -> Option<String> {
        self.name.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn lifecycle_state(&self) -> LifecycleState {
        LifecycleState::decode(self.state.load(Ordering::Acquire))
    }

    pub fn set_lifecycle_state(&self, state: LifecycleState) {
        self.state.store(state.encode(), Ordering::Release);
    }

    pub fn record_message(&self) {
        self.message_count.fetch_add(1, Ordering::Relaxed);
    }
}

/// Snapshot row used by the observer and by tests; a plain-data copy so it
/// can outlive the table entry it was taken from.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ProcessSnapshot {
    pub id: ServerId,
    pub name: Option<String>,
    pub behavior_name: String,
    pub state: LifecycleState,
    pub message_count: u64,
    pub restart_count: u32,
    pub started_at: DateTime<Utc>,
}

/// Type-erased table of every live server, keyed by id.
#[derive(Default)]
pub(crate) struct ProcessTable {
    pub(crate) entries: DashMap<ServerId, Arc<ProcessEntry>>,
}

impl ProcessTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: ServerId, entry: Arc<ProcessEntry>) {
        self.entries.insert(id, entry);
    }

    pub fn remove(&self, id: ServerId) -> Option<Arc<ProcessEntry>> {
        self.entries.remove(&id).map(|(_, v)| v)
    }

    pub fn get(&self, id: ServerId) -> Option<Arc<ProcessEntry>> {
        self.entries.get(&id).map(|e| e.value().clone())
    }

    pub fn is_alive(&self, id: ServerId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn snapshot_all(&self) -> Vec<ProcessSnapshot> {
        self.entries
            .iter()
            .map(|e| {
                let entry = e.value();
                ProcessSnapshot {
                    id: *e.key(),
                    name: entry.name(),
                    behavior_name: entry.behavior_name.to_string(),
                    state: entry.lifecycle_state(),
                    message_count: entry.message_count.load(Ordering::Relaxed),
                    restart_count: entry.restart_count.load(Ordering::Relaxed),
                    started_at: entry.started_at,
                }
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
