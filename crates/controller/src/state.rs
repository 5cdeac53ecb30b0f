use common::UnitName;
use credentials::CredentialStore;
use membership::PeerDirectory;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

use crate::error::{ReconcileError, ReconcileResult};

/// Where the unit is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitPhase {
    #[default]
    Uninitialized,
    /// Workload spec generated, database not started yet.
    Configuring,
    Running,
}

/// Unit-local state, mutated only by the reconciler.
///
/// Leadership is deliberately absent: it is read fresh for every event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterState {
    pub(crate) phase: UnitPhase,
    /// Replica-set name this unit initialized under.
    #[serde(default)]
    pub(crate) initialized_replica_set: Option<String>,
    #[serde(default)]
    pub(crate) credentials: CredentialStore,
    pub(crate) peers: PeerDirectory,
}

impl ClusterState {
    pub fn new(local: UnitName) -> Self {
        Self {
            phase: UnitPhase::default(),
            initialized_replica_set: None,
            credentials: CredentialStore::new(),
            peers: PeerDirectory::new(local),
        }
    }

    /// Load persisted state, or start fresh if nothing was saved yet.
    pub fn open<P: AsRef<Path>>(path: P, local: UnitName) -> ReconcileResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(path = %path.display(), "no persisted state, starting fresh");
            return Ok(Self::new(local));
        }

        let data = fs::read_to_string(path)?;
        let state: ClusterState = serde_json::from_str(&data)?;
        if state.peers.local() != &local {
            warn!(
                stored = %state.peers.local(),
                local = %local,
                "persisted state belongs to another unit"
            );
            return Err(ReconcileError::Configuration(format!(
                "state file {} belongs to unit {}",
                path.display(),
                state.peers.local()
            )));
        }
        Ok(state)
    }

    /// Write the state as pretty JSON, replacing the file atomically.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> ReconcileResult<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn phase(&self) -> UnitPhase {
        self.phase
    }

    pub fn initialized_replica_set(&self) -> Option<&str> {
        self.initialized_replica_set.as_deref()
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    pub fn peers(&self) -> &PeerDirectory {
        &self.peers
    }

    pub fn root_password(&self) -> Option<&str> {
        self.credentials.root_password()
    }

    pub fn security_key(&self) -> Option<&str> {
        self.credentials.security_key()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn scratch_path(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "controller-state-{}-{}.json",
            name,
            std::process::id()
        ));
        let _ = fs::remove_file(&path);
        path
    }

    #[test]
    fn test_open_missing_file_starts_fresh() {
        let path = scratch_path("fresh");
        let state = ClusterState::open(&path, UnitName::new("mongodb", 0)).unwrap();
        assert_eq!(state.phase(), UnitPhase::Uninitialized);
        assert!(state.root_password().is_none());
    }

    #[test]
    fn test_save_and_reload() {
        let path = scratch_path("reload");
        let local = UnitName::new("mongodb", 0);
        let mut state = ClusterState::new(local.clone());
        state.phase = UnitPhase::Running;
        state.initialized_replica_set = Some("rs0".into());
        state.credentials.generate();
        state.peers.join(UnitName::new("mongodb", 1)).unwrap();
        state.save(&path).unwrap();

        let restored = ClusterState::open(&path, local).unwrap();
        assert_eq!(restored.phase(), UnitPhase::Running);
        assert_eq!(restored.initialized_replica_set(), Some("rs0"));
        assert_eq!(restored.root_password(), state.root_password());
        assert_eq!(restored.security_key(), state.security_key());
        assert_eq!(restored.peers(), state.peers());
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_open_rejects_foreign_unit_state() {
        let path = scratch_path("foreign");
        ClusterState::new(UnitName::new("mongodb", 1))
            .save(&path)
            .unwrap();
        let err = ClusterState::open(&path, UnitName::new("mongodb", 0)).unwrap_err();
        assert!(matches!(err, ReconcileError::Configuration(_)));
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_open_rejects_corrupt_file() {
        let path = scratch_path("corrupt");
        fs::write(&path, "not json").unwrap();
        let err = ClusterState::open(&path, UnitName::new("mongodb", 0)).unwrap_err();
        assert!(matches!(err, ReconcileError::StateFormat(_)));
        let _ = fs::remove_file(&path);
    }
}
