//! The `Runtime`: the process table, local registry, monitor/link graph and
//! lifecycle bus bundled together, since termination touches all four in a
//! fixed order: de-register the name, then fire monitors and links, then
//! emit the lifecycle event.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use grove_shared::{ExitReason, MonitorId, ServerId, ServerRef};

use crate::lifecycle_bus::{LifecycleBus, LifecycleEvent};
use crate::monitor::MonitorGraph;
use crate::process_table::{ProcessSnapshot, ProcessTable};
use crate::registry::LocalRegistry;

/// Process-wide counters surfaced by the observer's `snapshot`.
#[derive(Debug, Default)]
pub struct RuntimeCounters {
    pub total_messages: AtomicU64,
    pub total_restarts: AtomicU64,
}

/// The shared runtime context every spawned server task holds an `Arc` to.
/// One `Runtime` is one node's worth of local actor state; `grove-cluster`
/// builds the distributed layer on top of it.
pub struct Runtime {
    pub(crate) processes: ProcessTable,
    pub(crate) registry: LocalRegistry,
    pub(crate) monitors: MonitorGraph,
    pub(crate) lifecycle: LifecycleBus,
    pub(crate) counters: RuntimeCounters,
}

impl Runtime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            processes: ProcessTable::new(),
            registry: LocalRegistry::new(),
            monitors: MonitorGraph::new(),
            lifecycle: LifecycleBus::new(),
            counters: RuntimeCounters::default(),
        })
    }

    pub fn registry(&self) -> &LocalRegistry {
        &self.registry
    }

    pub fn lifecycle_bus(&self) -> &LifecycleBus {
        &self.lifecycle
    }

    pub fn is_alive(&self, id: ServerId) -> bool {
        self.processes.is_alive(id)
    }

    pub fn process_count(&self) -> usize {
        self.processes.len()
    }

    pub fn total_messages(&self) -> u64 {
        self.counters.total_messages.load(Ordering::Relaxed)
    }

    pub fn total_restarts(&self) -> u64 {
        self.counters.total_restarts.load(Ordering::Relaxed)
    }

    pub fn snapshot_processes(&self) -> Vec<ProcessSnapshot> {
        self.processes.snapshot_all()
    }

    /// Record that a server was restarted (called by `grove-supervisor`),
    /// so the node-wide counter in the observer snapshot stays accurate
    /// even though the dead `ServerId`'s own entry is long gone.
    pub fn record_restart(&self) {
        self.counters.total_restarts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_message(&self) {
        self.counters.total_messages.fetch_add(1, Ordering::Relaxed);
    }

    /// Register a monitor. If `target` is already dead, fires immediately
    /// with reason `NoProc`.
    pub fn monitor(&self, watcher: ServerRef, target: ServerId) -> MonitorId {
        let id = self.monitors.add_monitor(watcher.clone(), target);
        if !self.processes.is_alive(target) {
            self.deliver_process_down(id, watcher, ServerRef::local(target), ExitReason::NoProc);
        }
        id
    }

    pub fn demonitor(&self, id: MonitorId) {
        self.monitors.demonitor(id);
    }

    pub fn link(&self, a: ServerId, b: ServerId) {
        self.monitors.add_link(a, b);
    }

    pub fn unlink(&self, a: ServerId, b: ServerId) {
        self.monitors.remove_link(a, b);
    }

    /// Deliver a `process_down` both into the watcher's own control queue
    /// (if it is still alive) and onto the global lifecycle bus, so a
    /// server can react in-band while an external Observer can still see
    /// the event happen.
    ///
    /// Public because `grove-cluster` also calls this directly: a remote
    /// monitor's watcher is a local server even though the target lives on
    /// another node, and a node going down needs to deliver `NoConnection`
    /// the same way a local death delivers its own reason.
    pub fn deliver_process_down(
        &self,
        monitor: MonitorId,
        watcher: ServerRef,
        target: ServerRef,
        reason: ExitReason,
    ) {
        if let Some(entry) = self.processes.get(watcher.id()) {
            let _ = entry
                .control_tx
                .send(crate::mailbox::ControlMsg::ProcessDown(
                    monitor,
                    target.clone(),
                    reason.clone(),
                ));
        }
        self.lifecycle.publish(LifecycleEvent::ProcessDown {
            monitor,
            watcher,
            target,
            reason,
        });
    }

    /// Runs the full termination protocol for `id`, in this fixed order:
    /// de-register its name, drain and fire monitors, propagate abnormal
    /// exits to links, publish `terminated`, then remove it from the
    /// process table.
    pub(crate) fn finalize_termination(&self, id: ServerId, reason: ExitReason) {
        if let Some(entry) = self.processes.get(id) {
            entry
                .set_lifecycle_state(crate::process_table::LifecycleState::Terminated);
            if let Some(name) = entry.name() {
                self.registry.unregister_if_owner(&name, id);
            }
        }

        for record in self.monitors.drain_monitors_for(id) {
            self.deliver_process_down(
                record.id,
                record.watcher,
                ServerRef::local(id),
                reason.clone(),
            );
        }

        if reason.is_abnormal() {
            for peer in self.monitors.drain_links_for(id) {
                if let Some(entry) = self.processes.get(peer) {
                    let _ = entry
                        .control_tx
                        .send(crate::mailbox::ControlMsg::LinkExit(
                            ServerRef::local(id),
                            reason.clone(),
                        ));
                }
            }
        } else {
            // Still drop our side of every link even on a normal exit.
            self.monitors.drain_links_for(id);
        }

        self.lifecycle.publish(LifecycleEvent::Terminated {
            id,
            reason: reason.clone(),
        });

        self.processes.remove(id);
    }
}
