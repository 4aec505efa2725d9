//! `processTree()` support: a snapshot of a supervisor's children and their
//! liveness.
//!
//! `grove-runtime`'s `Observer` only knows about individual servers; a
//! supervisor is the thing that knows parent/child structure, so the forest
//! type lives here and is built by joining a `Supervisor`'s own children
//! list against `Observer::snapshot()`.

use grove_runtime::ProcessSnapshot;
use grove_shared::ServerId;

/// One node in the supervision forest: a child's own snapshot plus its
/// declared id within the supervisor (children never nest further in this
/// model — a child that is itself a supervisor is represented as a plain
/// leaf here; walking into it means asking that supervisor for its own
/// tree).
#[derive(Debug, Clone, serde::Serialize)]
pub struct ChildTreeNode {
    pub child_id: String,
    pub server: Option<ProcessSnapshot>,
    pub restart_count: u32,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SupervisorTree {
    pub children: Vec<ChildTreeNode>,
}

pub(crate) fn build_tree(
    children: &[(String, Option<ServerId>, u32)],
    snapshots: &[ProcessSnapshot],
) -> SupervisorTree {
    let nodes = children
        .iter()
        .map(|(child_id, server_id, restart_count)| {
            let server = server_id.and_then(|id| snapshots.iter().find(|s| s.id == id).cloned());
            ChildTreeNode {
                child_id: child_id.clone(),
                server,
                restart_count: *restart_count,
            }
        })
        .collect();
    SupervisorTree { children: nodes }
}
