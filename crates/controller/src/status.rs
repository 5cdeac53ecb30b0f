use serde::{Deserialize, Serialize};
use std::fmt;

/// Operator-visible unit status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "message", rename_all = "snake_case")]
pub enum UnitStatus {
    Maintenance(String),
    /// Waiting on a dependency; the pending event will be retried.
    Waiting(String),
    Active,
    /// Needs operator intervention. No retry.
    Blocked(String),
}

impl Default for UnitStatus {
    fn default() -> Self {
        UnitStatus::Maintenance("starting".to_string())
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitStatus::Maintenance(msg) => write!(f, "maintenance: {}", msg),
            UnitStatus::Waiting(msg) => write!(f, "waiting: {}", msg),
            UnitStatus::Active => write!(f, "active"),
            UnitStatus::Blocked(msg) => write!(f, "blocked: {}", msg),
        }
    }
}
