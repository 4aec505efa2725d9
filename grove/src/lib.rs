//! `grove`: a Node-agnostic, OTP-inspired actor runtime.
//!
//! This crate is a thin facade over the four layered crates that do the
//! actual work:
//!
//! - [`grove_shared`] — ids, the error taxonomy, configuration, resilience.
//! - [`grove_runtime`] — the local actor runtime (L1): mailbox, server
//!   lifecycle, local registry, monitors/links, lifecycle bus, observer.
//! - [`grove_supervisor`] — supervision trees on top of the runtime (L2).
//! - [`grove_cluster`] — distribution (L3): transport, membership, remote
//!   call/cast, behavior registry, global registry, remote monitors.
//!
//! Applications depend on this crate alone; `bootstrap::Node` brings all
//! four layers up together behind a single entry point.

pub mod bootstrap;

pub use grove_cluster as cluster;
pub use grove_runtime as runtime;
pub use grove_shared as shared;
pub use grove_supervisor as supervisor;

pub use grove_cluster::Cluster;
pub use grove_runtime::{start, Behavior, Observer, Runtime, ServerRef, StartOpts};
pub use grove_shared::{ExitReason, GroveError, GroveResult, NodeConfig, NodeId, ServerId};
pub use grove_supervisor::{start_supervisor, ChildSpec, RestartPolicy, RestartStrategy, SupervisorRef};
