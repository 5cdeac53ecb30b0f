use thiserror::Error;

/// Failures reported by a database gateway.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// The server is not reachable yet.
    #[error("database not ready: {0}")]
    NotReady(String),

    /// The server rejected a one-time initialization.
    #[error("{0}")]
    Initialization(String),

    /// The server rejected a membership change.
    #[error("reconfiguration rejected: {0}")]
    Reconfiguration(String),

    #[error("database command failed: {0}")]
    Command(String),
}

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UnitNameError {
    #[error("malformed unit name `{0}`, expected <app>/<ordinal>")]
    Malformed(String),
}
