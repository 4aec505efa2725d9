//! Exit / process-down reasons.

use serde::{Deserialize, Serialize};

/// Why a server terminated, a monitor fired, or a link propagated an exit.
///
/// `Normal` and `Shutdown` are the two reasons a `Transient` child is *not*
/// restarted for; every other reason is "abnormal".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    Normal,
    Shutdown,
    Killed,
    NoProc,
    NoConnection,
    Error(String),
}

impl ExitReason {
    pub fn is_abnormal(&self) -> bool {
        !matches!(self, ExitReason::Normal | ExitReason::Shutdown)
    }

    pub fn as_wire_str(&self) -> String {
        match self {
            ExitReason::Normal => "normal".to_string(),
            ExitReason::Shutdown => "shutdown".to_string(),
            ExitReason::Killed => "killed".to_string(),
            ExitReason::NoProc => "noproc".to_string(),
            ExitReason::NoConnection => "noconnection".to_string(),
            ExitReason::Error(msg) => format!("error({msg})"),
        }
    }
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_wire_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normal_and_shutdown_are_not_abnormal() {
        assert!(!ExitReason::Normal.is_abnormal());
        assert!(!ExitReason::Shutdown.is_abnormal());
        assert!(ExitReason::Killed.is_abnormal());
        assert!(ExitReason::Error("boom".into()).is_abnormal());
    }
}
