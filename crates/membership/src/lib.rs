//! Cluster Membership Manager
//!
//! Translates the Peer Directory into replica-set commands and builds the
//! connection URIs other components hand to the database driver.
//!
//! - Membership is always issued in full, never as a diff.
//! - URIs are only built from a complete credential pair.

use common::traits::DatabaseGateway;
use common::{ReplicaSetConfig, UnitConfig};
use credentials::CredentialStore;
use tracing::{debug, info};

pub mod error;
pub mod peers;

pub use error::{MembershipError, MembershipResult};
pub use peers::{PeerDirectory, PeerEntry, PeerSet};

/// Administrative user embedded in connection URIs.
pub const ADMIN_USER: &str = "root";

/// Database the administrative user authenticates against.
pub const AUTH_DATABASE: &str = "admin";

pub struct MembershipManager {
    app_name: String,
    port: u16,
}

impl MembershipManager {
    pub fn new(app_name: impl Into<String>, port: u16) -> Self {
        Self {
            app_name: app_name.into(),
            port,
        }
    }

    pub fn from_config(config: &UnitConfig) -> Self {
        Self::new(config.app_name.clone(), config.port)
    }

    /// URI addressing the application service, used before a replica set
    /// exists.
    pub fn standalone_uri(&self, store: &CredentialStore) -> MembershipResult<String> {
        self.uri_for_host(store, &self.app_name)
    }

    /// URI addressing the lowest-ordinal member. Full-cluster discovery is
    /// left to the driver once connected.
    pub fn replica_set_uri(
        &self,
        store: &CredentialStore,
        peers: &PeerSet,
    ) -> MembershipResult<String> {
        let host = peers
            .first()
            .map(|unit| unit.peer_host())
            .unwrap_or_else(|| self.app_name.clone());
        self.uri_for_host(store, &host)
    }

    pub fn desired_config(&self, name: &str, peers: &PeerSet) -> ReplicaSetConfig {
        ReplicaSetConfig {
            name: name.to_string(),
            members: peers.hosts(),
        }
    }

    /// One-time replica-set initialization with the current membership.
    pub fn initialize_replica_set(
        &self,
        gateway: &dyn DatabaseGateway,
        name: &str,
        peers: &PeerSet,
    ) -> MembershipResult<()> {
        let config = self.desired_config(name, peers);
        debug!(
            replica_set = %config.name,
            members = config.members.len(),
            "initializing replica set"
        );
        gateway
            .initialize_replica_set(&config)
            .map_err(|source| MembershipError::Gateway {
                operation: "initialize_replica_set",
                source,
            })?;
        info!(replica_set = %config.name, "replica set initialized");
        Ok(())
    }

    /// Issue the full desired membership. Returns the member list sent.
    pub fn reconfigure_replica_set(
        &self,
        gateway: &dyn DatabaseGateway,
        peers: &PeerSet,
    ) -> MembershipResult<Vec<String>> {
        let members = peers.hosts();
        gateway
            .reconfigure_replica_set(&members)
            .map_err(|source| MembershipError::Gateway {
                operation: "reconfigure_replica_set",
                source,
            })?;
        info!(members = ?members, "replica set reconfigured");
        Ok(members)
    }

    fn uri_for_host(&self, store: &CredentialStore, host: &str) -> MembershipResult<String> {
        let credentials = store
            .credentials()
            .ok_or(MembershipError::CredentialsUnavailable)?;
        Ok(format!(
            "mongodb://{}:{}@{}:{}/{}",
            ADMIN_USER,
            escape_userinfo(credentials.root_password),
            host,
            self.port,
            AUTH_DATABASE
        ))
    }
}

/// Percent-encode the characters that would break the userinfo section.
fn escape_userinfo(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            ':' | '/' | '?' | '#' | '[' | ']' | '@' | '%' => {
                escaped.push_str(&format!("%{:02X}", c as u32));
            }
            _ => escaped.push(c),
        }
    }
    escaped
}
