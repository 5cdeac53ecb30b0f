use membership::MembershipError;
use thiserror::Error;

/// Failures the reconciliation controller can report.
///
/// `NotReady` and `Initialization` are absorbed by deferral; the rest are
/// surfaced through the unit status.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// A dependency is not reachable yet.
    #[error("dependency not ready: {0}")]
    NotReady(String),

    /// The server rejected a one-time operation.
    #[error("replica set initialization failed: {0}")]
    Initialization(String),

    /// Invalid or irreversible configuration change.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Credential data from peers was rejected.
    #[error(transparent)]
    Credentials(#[from] credentials::CredentialError),

    #[error(transparent)]
    Membership(#[from] MembershipError),

    /// A platform collaborator (relation, workload sink, config) failed.
    #[error("platform operation `{operation}` failed: {source}")]
    Platform {
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("state persistence failed: {0}")]
    StateIo(#[from] std::io::Error),

    #[error("state file is corrupt: {0}")]
    StateFormat(#[from] serde_json::Error),
}

pub type ReconcileResult<T> = std::result::Result<T, ReconcileError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_error_message() {
        let err = ReconcileError::Configuration("cannot rename".into());
        assert_eq!(err.to_string(), "configuration error: cannot rename");
    }

    #[test]
    fn test_membership_error_is_transparent() {
        let err: ReconcileError = MembershipError::CredentialsUnavailable.into();
        assert_eq!(err.to_string(), "cluster credentials are not available yet");
    }

    #[test]
    fn test_every_credential_error_maps_to_credentials() {
        use credentials::CredentialError;

        let incomplete: ReconcileError = CredentialError::IncompletePair("empty value").into();
        assert!(matches!(
            incomplete,
            ReconcileError::Credentials(CredentialError::IncompletePair(_))
        ));

        let conflict: ReconcileError = CredentialError::AdoptionConflict {
            field: "root_password",
        }
        .into();
        assert!(matches!(
            conflict,
            ReconcileError::Credentials(CredentialError::AdoptionConflict { .. })
        ));
    }
}
