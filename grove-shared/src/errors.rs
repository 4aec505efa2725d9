//! Unified error taxonomy.
//!
//! Every failure a caller can observe across the runtime boundary is one of
//! these variants. User exceptions inside callbacks are caught internally
//! and converted to a lifecycle reason or a `CalleeError` before they ever
//! reach here; nothing in this crate panics across an API boundary.

use thiserror::Error;

use crate::ids::{MonitorId, NodeId, ServerId};

pub type GroveResult<T> = Result<T, GroveError>;

#[derive(Debug, Error, Clone)]
pub enum GroveError {
    // ---- Lifecycle (§4.2, §7) ----
    #[error("server failed to initialize: {0}")]
    InitializationError(String),

    #[error("server {0} is terminated")]
    Terminated(ServerId),

    #[error("no such process: {0}")]
    NoProcess(ServerId),

    // ---- Call (§4.2, §4.8, §7) ----
    #[error("call timed out")]
    Timeout,

    #[error("no connection to node {0}")]
    NoConnection(NodeId),

    #[error("callee raised an error: {0}")]
    CalleeError(String),

    // ---- Supervisor (§4.5, §7) ----
    #[error("duplicate child id: {0}")]
    DuplicateChild(String),

    #[error("child not found: {0}")]
    ChildNotFound(String),

    #[error("restart intensity exceeded ({restarts} restarts within {within_ms}ms)")]
    MaxRestartsExceeded { restarts: u32, within_ms: u64 },

    // ---- Registry (§4.3, §4.10, §7) ----
    #[error("name already in use: {0}")]
    NameInUse(String),

    #[error("global name conflict for {name}, owned by {owner}")]
    GlobalNameConflict { name: String, owner: NodeId },

    #[error("global name not found: {0}")]
    GlobalNameNotFound(String),

    // ---- Distribution (§4.6, §4.9, §7) ----
    #[error("handshake failed with {0}: {1}")]
    HandshakeFailed(NodeId, String),

    #[error("unknown node: {0}")]
    UnknownNode(NodeId),

    #[error("behavior not found: {0}")]
    BehaviorNotFound(String),

    #[error("monitor not found: {0}")]
    MonitorNotFound(MonitorId),

    #[error("malformed wire frame: {0}")]
    FrameError(String),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("io error: {0}")]
    Io(String),
}

impl GroveError {
    /// Whether this failure is worth retrying (used by reconnect/backoff
    /// call sites).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            GroveError::Timeout
                | GroveError::NoConnection(_)
                | GroveError::HandshakeFailed(_, _)
                | GroveError::Io(_)
        )
    }
}

impl From<std::io::Error> for GroveError {
    fn from(e: std::io::Error) -> Self {
        GroveError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for GroveError {
    fn from(e: serde_json::Error) -> Self {
        GroveError::FrameError(e.to_string())
    }
}

impl From<config::ConfigError> for GroveError {
    fn from(e: config::ConfigError) -> Self {
        GroveError::ConfigError(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_and_no_connection_are_recoverable() {
        assert!(GroveError::Timeout.is_recoverable());
        assert!(GroveError::NoConnection(NodeId::new("a", "h", 1)).is_recoverable());
    }

    #[test]
    fn name_in_use_is_not_recoverable() {
        assert!(!GroveError::NameInUse("x".into()).is_recoverable());
    }
}
