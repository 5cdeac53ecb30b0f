//! Simulated database server for exercising the reconciliation controller.
//!
//! `SimulatedMongod` implements [`DatabaseGateway`] in memory. It honours the
//! gateway contract (idempotent initialize/reconfigure) and records every call
//! so tests can assert on exactly what the controller issued.
//!
//! # Example
//!
//! ```
//! use common::traits::DatabaseGateway;
//! use sim_mongod::SimulatedMongod;
//!
//! let mongod = SimulatedMongod::ready();
//! assert!(mongod.is_ready());
//! ```

use common::traits::DatabaseGateway;
use common::{GatewayError, GatewayResult, ReplicaSetConfig};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

/// Configuration for the simulated server.
#[derive(Debug, Clone)]
pub struct SimMongodConfig {
    /// Reported server version.
    pub version: String,
    /// Whether the server accepts connections at startup.
    pub ready: bool,
}

impl Default for SimMongodConfig {
    fn default() -> Self {
        Self {
            version: "4.4.1".to_string(),
            ready: true,
        }
    }
}

/// A gateway call as observed by the simulator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
    IsReady,
    Version,
    Initialize(ReplicaSetConfig),
    Reconfigure(Vec<String>),
}

#[derive(Debug, Default)]
struct SimState {
    ready: bool,
    version: String,
    replica_set: Option<ReplicaSetConfig>,
    config_version: u64,
    initialize_failure: Option<String>,
    reconfigure_failure: Option<String>,
    calls: Vec<GatewayCall>,
}

#[derive(Debug)]
pub struct SimulatedMongod {
    state: Mutex<SimState>,
}

impl SimulatedMongod {
    pub fn new(config: SimMongodConfig) -> Self {
        info!(version = %config.version, ready = config.ready, "starting simulated mongod");
        Self {
            state: Mutex::new(SimState {
                ready: config.ready,
                version: config.version,
                ..SimState::default()
            }),
        }
    }

    pub fn ready() -> Self {
        Self::new(SimMongodConfig::default())
    }

    pub fn not_ready() -> Self {
        Self::new(SimMongodConfig {
            ready: false,
            ..SimMongodConfig::default()
        })
    }

    pub fn set_ready(&self, ready: bool) {
        self.lock().ready = ready;
    }

    /// Make every subsequent initialization fail with `reason` until cleared.
    pub fn fail_initialize_with(&self, reason: Option<&str>) {
        self.lock().initialize_failure = reason.map(str::to_string);
    }

    /// Make every subsequent reconfiguration fail with `reason` until cleared.
    pub fn fail_reconfigure_with(&self, reason: Option<&str>) {
        self.lock().reconfigure_failure = reason.map(str::to_string);
    }

    pub fn calls(&self) -> Vec<GatewayCall> {
        self.lock().calls.clone()
    }

    pub fn initialize_calls(&self) -> Vec<ReplicaSetConfig> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                GatewayCall::Initialize(config) => Some(config.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn reconfigure_calls(&self) -> Vec<Vec<String>> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                GatewayCall::Reconfigure(members) => Some(members.clone()),
                _ => None,
            })
            .collect()
    }

    /// Current replica-set topology, if initialized.
    pub fn replica_set(&self) -> Option<ReplicaSetConfig> {
        self.lock().replica_set.clone()
    }

    /// Bumped on every topology change, like the server's config version.
    pub fn config_version(&self) -> u64 {
        self.lock().config_version
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SimState {
    fn require_ready(&self) -> GatewayResult<()> {
        if self.ready {
            Ok(())
        } else {
            Err(GatewayError::NotReady("connection refused".into()))
        }
    }
}

impl DatabaseGateway for SimulatedMongod {
    fn is_ready(&self) -> bool {
        let mut state = self.lock();
        state.calls.push(GatewayCall::IsReady);
        state.ready
    }

    fn version(&self) -> GatewayResult<String> {
        let mut state = self.lock();
        state.calls.push(GatewayCall::Version);
        state.require_ready()?;
        Ok(state.version.clone())
    }

    fn initialize_replica_set(&self, config: &ReplicaSetConfig) -> GatewayResult<()> {
        let mut state = self.lock();
        state.calls.push(GatewayCall::Initialize(config.clone()));
        state.require_ready()?;
        if let Some(reason) = &state.initialize_failure {
            return Err(GatewayError::Initialization(reason.clone()));
        }

        match &state.replica_set {
            Some(existing) if existing.name == config.name => {
                debug!(replica_set = %config.name, "replica set already initialized");
                Ok(())
            }
            Some(existing) => Err(GatewayError::Initialization(format!(
                "already initialized as `{}`",
                existing.name
            ))),
            None => {
                state.replica_set = Some(config.clone());
                state.config_version = 1;
                info!(replica_set = %config.name, members = config.members.len(), "replSetInitiate");
                Ok(())
            }
        }
    }

    fn reconfigure_replica_set(&self, members: &[String]) -> GatewayResult<()> {
        let mut state = self.lock();
        state.calls.push(GatewayCall::Reconfigure(members.to_vec()));
        state.require_ready()?;
        if let Some(reason) = &state.reconfigure_failure {
            return Err(GatewayError::Reconfiguration(reason.clone()));
        }

        let Some(current) = state.replica_set.as_mut() else {
            return Err(GatewayError::Reconfiguration(
                "replica set not initialized".into(),
            ));
        };
        if current.members == members {
            debug!("membership unchanged, reconfiguration is a no-op");
            return Ok(());
        }
        current.members = members.to_vec();
        state.config_version += 1;
        info!(
            members = members.len(),
            config_version = state.config_version,
            "replSetReconfig"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    fn config(name: &str, members: &[&str]) -> ReplicaSetConfig {
        ReplicaSetConfig {
            name: name.to_string(),
            members: members.iter().map(|m| m.to_string()).collect(),
        }
    }

    #[test]
    fn test_not_ready_rejects_commands() {
        let mongod = SimulatedMongod::not_ready();
        assert!(!mongod.is_ready());
        assert!(matches!(mongod.version(), Err(GatewayError::NotReady(_))));
        assert!(matches!(
            mongod.initialize_replica_set(&config("rs0", &["a"])),
            Err(GatewayError::NotReady(_))
        ));
    }

    #[test]
    fn test_initialize_is_idempotent_for_same_name() {
        let mongod = SimulatedMongod::ready();
        mongod.initialize_replica_set(&config("rs0", &["a"])).unwrap();
        mongod.initialize_replica_set(&config("rs0", &["a"])).unwrap();
        assert_eq!(mongod.config_version(), 1);
        assert_eq!(mongod.initialize_calls().len(), 2);
    }

    #[test]
    fn test_initialize_rejects_different_name() {
        let mongod = SimulatedMongod::ready();
        mongod.initialize_replica_set(&config("rs0", &["a"])).unwrap();
        let err = mongod
            .initialize_replica_set(&config("other", &["a"]))
            .unwrap_err();
        assert_eq!(
            err,
            GatewayError::Initialization("already initialized as `rs0`".into())
        );
    }

    #[test]
    fn test_injected_initialize_failure() {
        let mongod = SimulatedMongod::ready();
        mongod.fail_initialize_with(Some("Not Initialized"));
        let err = mongod
            .initialize_replica_set(&config("rs0", &["a"]))
            .unwrap_err();
        assert_eq!(err.to_string(), "Not Initialized");
        assert!(mongod.replica_set().is_none());

        mongod.fail_initialize_with(None);
        mongod.initialize_replica_set(&config("rs0", &["a"])).unwrap();
        assert!(mongod.replica_set().is_some());
    }

    #[traced_test]
    #[test]
    fn test_reconfigure_bumps_version_only_on_change() {
        let mongod = SimulatedMongod::ready();
        mongod.initialize_replica_set(&config("rs0", &["a"])).unwrap();

        let members = vec!["a".to_string(), "b".to_string()];
        mongod.reconfigure_replica_set(&members).unwrap();
        assert_eq!(mongod.config_version(), 2);
        mongod.reconfigure_replica_set(&members).unwrap();
        assert_eq!(mongod.config_version(), 2);
        assert!(logs_contain("membership unchanged"));
    }

    #[test]
    fn test_reconfigure_requires_initialized_set() {
        let mongod = SimulatedMongod::ready();
        let err = mongod.reconfigure_replica_set(&["a".to_string()]).unwrap_err();
        assert!(matches!(err, GatewayError::Reconfiguration(_)));
    }
}
