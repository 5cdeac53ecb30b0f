//! Cluster Credential Store
//!
//! Holds the two cluster-wide secrets: the administrative (root) password and
//! the inter-node security key used as the database key file.
//!
//! ## Lifecycle
//!
//! - A leader that has never seen the secrets calls [`CredentialStore::generate`]
//!   exactly once and publishes the result on the peer relation.
//! - Every other unit calls [`CredentialStore::adopt`] with what it reads from
//!   the relation. Local values always win over conflicting peer data.
//! - The pair is atomic: both are set or neither is.
//!
//! Secrets are zeroized on drop and redacted from `Debug` output.

use rand::distr::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tracing::{debug, info, warn};
use zeroize::{Zeroize, ZeroizeOnDrop};

pub mod error;

pub use error::{CredentialError, Result};

/// Random bytes behind the hex-encoded root password (32 hex chars).
pub const ROOT_PASSWORD_BYTES: usize = 16;

/// Key file length. The database accepts 6..=1024 base64 characters and the
/// alphanumeric alphabet is a subset of base64.
pub const SECURITY_KEY_LEN: usize = 1024;

/// A secret string, cleared from memory on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    fn matches(&self, other: &str) -> bool {
        self.0.as_bytes().ct_eq(other.as_bytes()).into()
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// Borrowed view of a complete credential pair.
#[derive(Clone, Copy)]
pub struct Credentials<'a> {
    pub root_password: &'a str,
    pub security_key: &'a str,
}

impl std::fmt::Debug for Credentials<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("root_password", &"[REDACTED]")
            .field("security_key", &"[REDACTED]")
            .finish()
    }
}

#[derive(Deserialize)]
struct StoredPair {
    #[serde(default)]
    root_password: Option<Secret>,
    #[serde(default)]
    security_key: Option<Secret>,
}

/// Generate-once, adopt-safely storage for the cluster secrets.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(try_from = "StoredPair")]
pub struct CredentialStore {
    root_password: Option<Secret>,
    security_key: Option<Secret>,
}

impl TryFrom<StoredPair> for CredentialStore {
    type Error = CredentialError;

    fn try_from(stored: StoredPair) -> Result<Self> {
        match (stored.root_password, stored.security_key) {
            (Some(password), Some(key)) => {
                if password.expose().is_empty() || key.expose().is_empty() {
                    return Err(CredentialError::IncompletePair("empty value"));
                }
                Ok(Self {
                    root_password: Some(password),
                    security_key: Some(key),
                })
            }
            (None, None) => Ok(Self::default()),
            _ => Err(CredentialError::IncompletePair("only one secret stored")),
        }
    }
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn root_password(&self) -> Option<&str> {
        self.root_password.as_ref().map(Secret::expose)
    }

    pub fn security_key(&self) -> Option<&str> {
        self.security_key.as_ref().map(Secret::expose)
    }

    pub fn is_complete(&self) -> bool {
        self.root_password.is_some() && self.security_key.is_some()
    }

    /// The full pair, or `None` until both secrets are known.
    pub fn credentials(&self) -> Option<Credentials<'_>> {
        match (&self.root_password, &self.security_key) {
            (Some(password), Some(key)) => Some(Credentials {
                root_password: password.expose(),
                security_key: key.expose(),
            }),
            _ => None,
        }
    }

    /// Generate both secrets if neither is held yet.
    ///
    /// Returns `true` when new secrets were produced. Never regenerates.
    pub fn generate(&mut self) -> bool {
        if self.is_complete() {
            debug!("credentials already present, skipping generation");
            return false;
        }

        let mut rng = rand::rng();
        let mut bytes = [0u8; ROOT_PASSWORD_BYTES];
        rng.fill(&mut bytes);
        let password = hex::encode(bytes);
        bytes.zeroize();

        let key: String = (&mut rng)
            .sample_iter(Alphanumeric)
            .take(SECURITY_KEY_LEN)
            .map(char::from)
            .collect();

        self.root_password = Some(Secret::new(password));
        self.security_key = Some(Secret::new(key));
        info!("generated cluster credentials");
        true
    }

    /// Take secrets received from the peer relation.
    ///
    /// Returns `Ok(true)` when the values were adopted and `Ok(false)` when the
    /// unit already holds exactly these values.
    pub fn adopt(&mut self, root_password: &str, security_key: &str) -> Result<bool> {
        if root_password.is_empty() || security_key.is_empty() {
            debug!("ignoring incomplete credential pair from peer data");
            return Err(CredentialError::IncompletePair("empty value"));
        }

        if let (Some(local_password), Some(local_key)) = (&self.root_password, &self.security_key)
        {
            let field = if !local_password.matches(root_password) {
                "root_password"
            } else if !local_key.matches(security_key) {
                "security_key"
            } else {
                return Ok(false);
            };
            warn!(field, "rejecting peer credentials that conflict with local values");
            return Err(CredentialError::AdoptionConflict { field });
        }

        self.root_password = Some(Secret::new(root_password));
        self.security_key = Some(Secret::new(security_key));
        info!("adopted cluster credentials from peer data");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    fn test_new_store_is_empty() {
        let store = CredentialStore::new();
        assert!(store.root_password().is_none());
        assert!(store.security_key().is_none());
        assert!(store.credentials().is_none());
    }

    #[test]
    fn test_generate_produces_pair_once() {
        let mut store = CredentialStore::new();
        assert!(store.generate());

        let password = store.root_password().unwrap().to_string();
        let key = store.security_key().unwrap().to_string();
        assert_eq!(password.len(), ROOT_PASSWORD_BYTES * 2);
        assert!(password.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(key.len(), SECURITY_KEY_LEN);
        assert!(key.chars().all(|c| c.is_ascii_alphanumeric()));

        assert!(!store.generate());
        assert_eq!(store.root_password(), Some(password.as_str()));
        assert_eq!(store.security_key(), Some(key.as_str()));
    }

    #[test]
    fn test_generated_values_differ_between_stores() {
        let mut a = CredentialStore::new();
        let mut b = CredentialStore::new();
        a.generate();
        b.generate();
        assert_ne!(a.root_password(), b.root_password());
    }

    #[test]
    fn test_adopt_into_empty_store() {
        let mut store = CredentialStore::new();
        assert_eq!(store.adopt("some_password", "some_key"), Ok(true));
        assert_eq!(store.root_password(), Some("some_password"));
        assert_eq!(store.security_key(), Some("some_key"));
    }

    #[test]
    fn test_adopt_same_values_is_noop() {
        let mut store = CredentialStore::new();
        store.adopt("pw", "key").unwrap();
        assert_eq!(store.adopt("pw", "key"), Ok(false));
    }

    #[traced_test]
    #[test]
    fn test_adopt_conflict_keeps_local() {
        let mut store = CredentialStore::new();
        store.generate();
        let local = store.root_password().unwrap().to_string();

        let err = store.adopt("stale", "stale-key").unwrap_err();
        assert_eq!(
            err,
            CredentialError::AdoptionConflict {
                field: "root_password"
            }
        );
        assert_eq!(store.root_password(), Some(local.as_str()));
        assert!(logs_contain("rejecting peer credentials"));
    }

    #[test]
    fn test_adopt_rejects_partial_pair() {
        let mut store = CredentialStore::new();
        assert!(matches!(
            store.adopt("pw", ""),
            Err(CredentialError::IncompletePair(_))
        ));
        assert!(store.credentials().is_none());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let mut store = CredentialStore::new();
        store.adopt("hunter2", "key").unwrap();
        let rendered = format!("{:?} {:?}", store, store.credentials().unwrap());
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("REDACTED"));
    }

    #[test]
    fn test_deserialize_enforces_pair() {
        let full = r#"{"root_password":"pw","security_key":"key"}"#;
        let store: CredentialStore = serde_json::from_str(full).unwrap();
        assert!(store.is_complete());

        let empty: CredentialStore = serde_json::from_str("{}").unwrap();
        assert!(!empty.is_complete());

        let half = r#"{"root_password":"pw"}"#;
        assert!(serde_json::from_str::<CredentialStore>(half).is_err());
    }
}
