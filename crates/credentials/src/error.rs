use thiserror::Error;

/// Credential store errors.
///
/// Messages never include secret material.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    /// Peer data disagrees with the secrets this unit already holds.
    #[error("Peer data conflicts with locally held {field}; keeping local value")]
    AdoptionConflict { field: &'static str },

    /// Only one half of the pair was supplied, or a value was empty.
    #[error("Incomplete credential pair: {0}")]
    IncompletePair(&'static str),
}

/// Result type alias for credential operations
pub type Result<T> = std::result::Result<T, CredentialError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CredentialError::AdoptionConflict {
            field: "root_password",
        };
        assert_eq!(
            err.to_string(),
            "Peer data conflicts with locally held root_password; keeping local value"
        );
    }
}
