use anyhow::Result;

use crate::{GatewayResult, PodSpec, RelationBag, ReplicaSetConfig, UnitConfig, UnitName};

/// Capability surface of the database server.
///
/// Both mutating calls must be safe to retry with identical arguments.
pub trait DatabaseGateway: Send + Sync {
    fn is_ready(&self) -> bool;

    fn version(&self) -> GatewayResult<String>;

    fn initialize_replica_set(&self, config: &ReplicaSetConfig) -> GatewayResult<()>;

    /// Replace the full membership. Calling twice with the same list has no
    /// additional effect.
    fn reconfigure_replica_set(&self, members: &[String]) -> GatewayResult<()>;
}

/// Peer relation data channel shared by all units of the application.
pub trait PeerRelation: Send + Sync {
    /// Application-level bag, readable by every unit.
    fn app_data(&self) -> RelationBag;

    /// Write into the application bag. Only the leader may do this.
    fn set_app_data(&self, key: &str, value: &str) -> Result<()>;

    /// Bag published by a single unit.
    fn unit_data(&self, unit: &UnitName) -> RelationBag;
}

/// Leadership signal. Queried fresh on every event.
pub trait LeadershipSource: Send + Sync {
    fn is_leader(&self) -> bool;
}

/// Operator-facing configuration as currently set on the platform.
pub trait ConfigSource: Send + Sync {
    fn current(&self) -> Result<UnitConfig>;
}

/// Receives regenerated workload specifications.
pub trait WorkloadSink: Send + Sync {
    fn apply(&self, spec: PodSpec) -> Result<()>;
}
