//! Replica-set reconciliation controller.
//!
//! Converts orchestration lifecycle events into idempotent actions against a
//! database gateway:
//! - ConfigChanged → regenerate the workload spec
//! - Start → initialize the replica set once the database is ready
//! - PeerJoined / PeerDeparted → leader reconfigures full membership
//! - LeaderElected → generate or adopt cluster credentials and publish them
//! - RelationChanged → adopt published credentials, record peer addresses

pub mod error;
pub mod outcome;
pub mod reconciler;
pub mod runtime;
pub mod state;
pub mod status;
pub mod workload;

pub use error::{ReconcileError, ReconcileResult};
pub use outcome::Outcome;
pub use reconciler::{Collaborators, EventContext, ProvidesInfo, Reconciler, Role};
pub use runtime::{EventLoop, PassReport};
pub use state::{ClusterState, UnitPhase};
pub use status::UnitStatus;
