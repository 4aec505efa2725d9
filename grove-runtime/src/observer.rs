//! Read-only introspection over a `Runtime`: a `snapshot`/`subscribe`
//! facade for observability tooling.
//!
//! `grove-supervisor` builds `processTree()` on top of `snapshot()` by
//! joining each row against its own supervision tables; the runtime itself
//! has no notion of parent/child, only of individual servers.

use std::sync::Arc;

use grove_shared::{ExitReason, GroveError, GroveResult, ServerId};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::lifecycle_bus::LifecycleEvent;
use crate::mailbox::ControlMsg;
use crate::process_table::ProcessSnapshot;
use crate::runtime::Runtime;

/// Node-wide counters returned alongside the per-process rows.
#[derive(Debug, Clone, Serialize)]
pub struct SystemMetrics {
    pub process_count: usize,
    pub total_messages: u64,
    pub total_restarts: u64,
}

/// A point-in-time view of every live server on this node.
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeSnapshot {
    pub processes: Vec<ProcessSnapshot>,
    pub metrics: SystemMetrics,
}

/// A cheap, read-only handle over a `Runtime`, handed out to observability
/// tooling that should not get write access to `start`/`call`/`cast`.
#[derive(Clone)]
pub struct Observer {
    runtime: Arc<Runtime>,
}

impl Observer {
    pub fn new(runtime: Arc<Runtime>) -> Self {
        Self { runtime }
    }

    pub fn snapshot(&self) -> RuntimeSnapshot {
        RuntimeSnapshot {
            processes: self.runtime.snapshot_processes(),
            metrics: SystemMetrics {
                process_count: self.runtime.process_count(),
                total_messages: self.runtime.total_messages(),
                total_restarts: self.runtime.total_restarts(),
            },
        }
    }

    /// Subscribe to the node's lifecycle event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.runtime.lifecycle_bus().subscribe()
    }

    pub fn is_alive(&self, id: ServerId) -> bool {
        self.runtime.is_alive(id)
    }

    /// Requests shutdown of any live server by its untyped `ServerId`,
    /// without needing the caller to hold a typed `ServerRef<B>`. Sends on
    /// the same `control_tx` `ServerRef::stop` uses; the server finishes
    /// whatever it is currently handling first.
    pub fn stop_process(&self, id: ServerId, reason: ExitReason) -> GroveResult<()> {
        let entry = self
            .runtime
            .processes
            .get(id)
            .ok_or(GroveError::NoProcess(id))?;
        entry
            .control_tx
            .send(ControlMsg::Stop(reason))
            .map_err(|_| GroveError::NoProcess(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_empty_runtime() {
        let runtime = Runtime::new();
        let observer = Observer::new(runtime);
        let snap = observer.snapshot();
        assert_eq!(snap.metrics.process_count, 0);
        assert!(snap.processes.is_empty());
    }

    #[test]
    fn stop_process_on_an_unknown_id_fails_with_no_process() {
        let runtime = Runtime::new();
        let observer = Observer::new(runtime);
        let err = observer
            .stop_process(ServerId::new(), ExitReason::Killed)
            .unwrap_err();
        assert!(matches!(err, GroveError::NoProcess(_)));
    }
}
