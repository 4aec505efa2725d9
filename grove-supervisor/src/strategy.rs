//! Restart strategies.

/// How a supervisor reacts to one of its children exiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartStrategy {
    /// Restart only the exited child.
    OneForOne,
    /// Terminate every other child, then restart all of them.
    OneForAll,
    /// Terminate children started after the exited one, then restart it
    /// and all of its terminated successors.
    RestForOne,
}
