//! In-memory orchestration platform.
//!
//! Provides the platform-side collaborators the reconciliation controller
//! consumes: leadership, configuration, the peer relation and a workload sink.
//! Used by tests and by `mongoctl simulate`.

use anyhow::{bail, Result};
use common::traits::{ConfigSource, LeadershipSource, PeerRelation, WorkloadSink};
use common::{PodSpec, RelationBag, UnitConfig, UnitName};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tracing::{debug, info};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Leadership flag that can be flipped at any time.
#[derive(Debug, Default)]
pub struct SimLeadership {
    leader: AtomicBool,
}

impl SimLeadership {
    pub fn new(leader: bool) -> Self {
        Self {
            leader: AtomicBool::new(leader),
        }
    }

    pub fn set_leader(&self, leader: bool) {
        info!(leader, "leadership changed");
        self.leader.store(leader, Ordering::SeqCst);
    }
}

impl LeadershipSource for SimLeadership {
    fn is_leader(&self) -> bool {
        self.leader.load(Ordering::SeqCst)
    }
}

/// Operator configuration, updated in place.
#[derive(Debug, Default)]
pub struct SimConfig {
    config: RwLock<UnitConfig>,
}

impl SimConfig {
    pub fn new(config: UnitConfig) -> Self {
        Self {
            config: RwLock::new(config),
        }
    }

    pub fn update(&self, config: UnitConfig) {
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = config;
    }

    pub fn set_replica_set_name(&self, name: &str) {
        let mut config = self.config.write().unwrap_or_else(PoisonError::into_inner);
        config.replica_set_name = name.to_string();
    }
}

impl ConfigSource for SimConfig {
    fn current(&self) -> Result<UnitConfig> {
        Ok(self
            .config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }
}

/// Peer relation with an application bag and one bag per unit.
///
/// Application-bag writes through [`PeerRelation::set_app_data`] are only
/// accepted while the attached leadership flag is set.
#[derive(Debug)]
pub struct SimRelation {
    leadership: Arc<SimLeadership>,
    app: Mutex<RelationBag>,
    units: Mutex<HashMap<UnitName, RelationBag>>,
}

impl SimRelation {
    pub fn new(leadership: Arc<SimLeadership>) -> Self {
        Self {
            leadership,
            app: Mutex::new(RelationBag::new()),
            units: Mutex::new(HashMap::new()),
        }
    }

    /// Write into the application bag as some other leader would have.
    pub fn seed_app_data(&self, key: &str, value: &str) {
        lock(&self.app).insert(key.to_string(), value.to_string());
    }

    pub fn set_unit_data(&self, unit: &UnitName, key: &str, value: &str) {
        lock(&self.units)
            .entry(unit.clone())
            .or_default()
            .insert(key.to_string(), value.to_string());
    }
}

impl PeerRelation for SimRelation {
    fn app_data(&self) -> RelationBag {
        lock(&self.app).clone()
    }

    fn set_app_data(&self, key: &str, value: &str) -> Result<()> {
        if !self.leadership.is_leader() {
            bail!("only the leader may write application relation data");
        }
        debug!(key, "writing application relation data");
        lock(&self.app).insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn unit_data(&self, unit: &UnitName) -> RelationBag {
        lock(&self.units).get(unit).cloned().unwrap_or_default()
    }
}

/// Keeps every workload spec it receives.
#[derive(Debug, Default)]
pub struct RecordingWorkload {
    applied: Mutex<Vec<PodSpec>>,
}

impl RecordingWorkload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self) -> Option<PodSpec> {
        lock(&self.applied).last().cloned()
    }

    pub fn applied_count(&self) -> usize {
        lock(&self.applied).len()
    }
}

impl WorkloadSink for RecordingWorkload {
    fn apply(&self, spec: PodSpec) -> Result<()> {
        debug!(containers = spec.containers.len(), "workload spec applied");
        lock(&self.applied).push(spec);
        Ok(())
    }
}

/// All platform collaborators for one unit, sharing a leadership flag.
#[derive(Debug, Clone)]
pub struct SimPlatform {
    pub leadership: Arc<SimLeadership>,
    pub config: Arc<SimConfig>,
    pub relation: Arc<SimRelation>,
    pub workload: Arc<RecordingWorkload>,
}

impl SimPlatform {
    pub fn new(config: UnitConfig) -> Self {
        let leadership = Arc::new(SimLeadership::new(false));
        Self {
            relation: Arc::new(SimRelation::new(leadership.clone())),
            leadership,
            config: Arc::new(SimConfig::new(config)),
            workload: Arc::new(RecordingWorkload::new()),
        }
    }
}

impl Default for SimPlatform {
    fn default() -> Self {
        Self::new(UnitConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    fn test_app_data_write_requires_leadership() {
        let platform = SimPlatform::default();
        assert!(platform.relation.set_app_data("k", "v").is_err());

        platform.leadership.set_leader(true);
        platform.relation.set_app_data("k", "v").unwrap();
        assert_eq!(platform.relation.app_data().get("k").map(String::as_str), Some("v"));
    }

    #[test]
    fn test_unit_data_is_per_unit() {
        let platform = SimPlatform::default();
        let unit = UnitName::new("mongodb", 1);
        platform
            .relation
            .set_unit_data(&unit, "private-address", "10.0.0.1");
        assert_eq!(
            platform.relation.unit_data(&unit).get("private-address").map(String::as_str),
            Some("10.0.0.1")
        );
        assert!(platform
            .relation
            .unit_data(&UnitName::new("mongodb", 2))
            .is_empty());
    }

    #[test]
    fn test_config_updates_are_visible() {
        let platform = SimPlatform::default();
        platform.config.set_replica_set_name("new_name");
        assert_eq!(platform.config.current().unwrap().replica_set_name, "new_name");
    }

    #[traced_test]
    #[test]
    fn test_workload_records_specs() {
        let platform = SimPlatform::default();
        platform.workload.apply(PodSpec::default()).unwrap();
        assert_eq!(platform.workload.applied_count(), 1);
        assert!(logs_contain("workload spec applied"));
    }
}
