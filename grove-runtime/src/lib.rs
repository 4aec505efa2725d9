//! Local actor runtime: behaviors, mailboxes, the process table, monitors,
//! links and the lifecycle bus. The distributed layer (`grove-cluster`) and
//! supervision (`grove-supervisor`) are built on top of this crate's public
//! surface, never on its internals.

mod behavior;
mod lifecycle_bus;
mod mailbox;
mod monitor;
mod observer;
mod process_table;
mod registry;
mod runtime;
mod server;

pub use behavior::Behavior;
pub use lifecycle_bus::LifecycleEvent;
pub use observer::{Observer, RuntimeSnapshot, SystemMetrics};
pub use process_table::{LifecycleState, ProcessSnapshot};
pub use registry::LocalRegistry;
pub use runtime::Runtime;
pub use server::{start, ServerRef, StartOpts};
