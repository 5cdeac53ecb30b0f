use common::{GatewayError, UnitNameError};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MembershipError {
    #[error(transparent)]
    InvalidUnitName(#[from] UnitNameError),

    /// A unit of a different application showed up on the peer relation.
    #[error("unit {unit} does not belong to application `{app}`")]
    ForeignApplication { unit: String, app: String },

    /// URIs are never built from a partial credential pair.
    #[error("cluster credentials are not available yet")]
    CredentialsUnavailable,

    #[error("gateway call `{operation}` failed: {source}")]
    Gateway {
        operation: &'static str,
        #[source]
        source: GatewayError,
    },
}

pub type MembershipResult<T> = std::result::Result<T, MembershipError>;
