//! Supervision trees on top of `grove-runtime`: restart strategies,
//! restart-intensity throttling, ordered startup/shutdown and dynamic
//! child management.

mod child;
mod intensity;
mod strategy;
mod supervisor;
mod tree;

pub use child::{child_of, ChildHandle, ChildSpec, RestartPolicy, StartThunk};
pub use intensity::RestartIntensity;
pub use strategy::RestartStrategy;
pub use supervisor::{start_supervisor, SupervisorRef};
pub use tree::{ChildTreeNode, SupervisorTree};
