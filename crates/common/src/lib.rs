use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub mod config;
pub mod error;
pub mod traits;
pub mod workload;

pub use config::UnitConfig;
pub use error::{GatewayError, GatewayResult, UnitNameError};
pub use workload::{ContainerPort, ContainerSpec, PodSpec};

pub const DEFAULT_REPLICA_SET_NAME: &str = "rs0";
pub const DEFAULT_APP_NAME: &str = "mongodb";
pub const DEFAULT_PORT: u16 = 27017;

// Peer relation keys
pub const PRIVATE_ADDRESS_KEY: &str = "private-address";
pub const ROOT_PASSWORD_KEY: &str = "root_password";
pub const SECURITY_KEY_KEY: &str = "security_key";
pub const REPLICA_SET_NAME_KEY: &str = "replica_set_name";

/// Key/value bag published by a unit (or the application) on the peer relation.
pub type RelationBag = BTreeMap<String, String>;

/// Orchestrator unit name of the form `<app>/<ordinal>`.
///
/// Ordering is by application, then numeric ordinal, so `mongodb/2` sorts
/// before `mongodb/10`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UnitName {
    app: String,
    ordinal: u32,
}

impl UnitName {
    pub fn new(app: impl Into<String>, ordinal: u32) -> Self {
        Self {
            app: app.into(),
            ordinal,
        }
    }

    pub fn app(&self) -> &str {
        &self.app
    }

    pub fn ordinal(&self) -> u32 {
        self.ordinal
    }

    /// Stable in-cluster hostname: `<app>-<ordinal>.<app>-endpoints`.
    pub fn peer_host(&self) -> String {
        format!("{}-{}.{}-endpoints", self.app, self.ordinal, self.app)
    }
}

impl fmt::Display for UnitName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.app, self.ordinal)
    }
}

impl FromStr for UnitName {
    type Err = UnitNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (app, ordinal) = s
            .split_once('/')
            .ok_or_else(|| UnitNameError::Malformed(s.to_string()))?;
        if app.is_empty() {
            return Err(UnitNameError::Malformed(s.to_string()));
        }
        let ordinal = ordinal
            .parse::<u32>()
            .map_err(|_| UnitNameError::Malformed(s.to_string()))?;
        Ok(Self::new(app, ordinal))
    }
}

impl TryFrom<String> for UnitName {
    type Error = UnitNameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<UnitName> for String {
    fn from(value: UnitName) -> Self {
        value.to_string()
    }
}

/// Desired replica-set topology handed to the database gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaSetConfig {
    pub name: String,
    /// Member hosts in deterministic ordinal order.
    pub members: Vec<String>,
}

/// Lifecycle signal delivered by the orchestration platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    ConfigChanged,
    Start,
    PeerJoined {
        unit: UnitName,
    },
    PeerDeparted {
        unit: UnitName,
    },
    LeaderElected,
    /// Peer relation data changed. `unit` is `None` for the application bag.
    RelationChanged {
        #[serde(default)]
        unit: Option<UnitName>,
        #[serde(default)]
        data: RelationBag,
    },
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::ConfigChanged => "config_changed",
            EventKind::Start => "start",
            EventKind::PeerJoined { .. } => "peer_joined",
            EventKind::PeerDeparted { .. } => "peer_departed",
            EventKind::LeaderElected => "leader_elected",
            EventKind::RelationChanged { .. } => "relation_changed",
        }
    }
}

/// A single delivery of a lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationEvent {
    #[serde(flatten)]
    pub kind: EventKind,
    #[serde(default)]
    pub deferred: bool,
}

impl ReconciliationEvent {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            deferred: false,
        }
    }

    /// The same event, marked for re-delivery.
    pub fn into_deferred(self) -> Self {
        Self {
            deferred: true,
            ..self
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }
}

impl From<EventKind> for ReconciliationEvent {
    fn from(kind: EventKind) -> Self {
        Self::new(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_name_parse_and_display() {
        let unit: UnitName = "mongodb/1".parse().unwrap();
        assert_eq!(unit.app(), "mongodb");
        assert_eq!(unit.ordinal(), 1);
        assert_eq!(unit.to_string(), "mongodb/1");
        assert_eq!(unit.peer_host(), "mongodb-1.mongodb-endpoints");
    }

    #[test]
    fn test_unit_name_rejects_malformed() {
        assert!("mongodb".parse::<UnitName>().is_err());
        assert!("/3".parse::<UnitName>().is_err());
        assert!("mongodb/x".parse::<UnitName>().is_err());
        assert!("mongodb/-1".parse::<UnitName>().is_err());
    }

    #[test]
    fn test_unit_name_orders_by_ordinal() {
        let mut units = vec![
            UnitName::new("mongodb", 10),
            UnitName::new("mongodb", 2),
            UnitName::new("mongodb", 0),
        ];
        units.sort();
        let ordinals: Vec<u32> = units.iter().map(UnitName::ordinal).collect();
        assert_eq!(ordinals, vec![0, 2, 10]);
    }

    #[test]
    fn test_deferral_keeps_payload() {
        let event = ReconciliationEvent::new(EventKind::PeerJoined {
            unit: UnitName::new("mongodb", 1),
        });
        let deferred = event.clone().into_deferred();
        assert!(deferred.deferred);
        assert_eq!(deferred.kind, event.kind);
    }

    #[test]
    fn test_event_yaml_shape() {
        let yaml = "kind: peer_joined\nunit: mongodb/3\n";
        let event: ReconciliationEvent = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            event.kind,
            EventKind::PeerJoined {
                unit: UnitName::new("mongodb", 3)
            }
        );
        assert!(!event.deferred);
    }
}
