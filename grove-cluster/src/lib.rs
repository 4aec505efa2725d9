//! Distribution layer (grove L3): cluster membership, framed TCP transport
//! with HMAC authentication, correlated remote call/cast, the behavior
//! registry and remote spawn, the gossiped global registry, and remote
//! monitors.
//!
//! `grove-runtime` and `grove-supervisor` know nothing about nodes; this
//! crate is where a `ServerId` becomes reachable cluster-wide through a
//! `{ServerId, NodeId}` pair.

mod behavior_registry;
mod cluster;
mod directory;
mod global_registry;
mod membership;
mod peer;
mod wire;

pub use behavior_registry::BehaviorRegistry;
pub use cluster::{Cluster, NodeEvent};
pub use directory::{DynServerHandle, ServerDirectory};
pub use global_registry::{GlobalRegistry, GlobalRegistryEntry};
pub use membership::{DownReason, NodeStatus};
pub use peer::HandshakeError;
pub use wire::{Frame, GlobalEntryWire, RegistrationKind, SpawnOptions, PROTOCOL_VERSION};
