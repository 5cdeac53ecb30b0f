//! Reconciliation Controller
//!
//! Maps each lifecycle event to one deterministic reaction given the unit's
//! `ClusterState`. Leadership and configuration are read once per event into
//! an [`EventContext`] and handed to the handlers read-only.
//!
//! Handlers never wait on the database: a dependency that is not ready turns
//! into [`Outcome::Deferred`] and the event loop decides when to retry.

use common::traits::{
    ConfigSource, DatabaseGateway, LeadershipSource, PeerRelation, WorkloadSink,
};
use common::{
    EventKind, GatewayError, ReconciliationEvent, RelationBag, UnitConfig, UnitName,
    PRIVATE_ADDRESS_KEY, REPLICA_SET_NAME_KEY, ROOT_PASSWORD_KEY, SECURITY_KEY_KEY,
};
use credentials::CredentialError;
use membership::{MembershipError, MembershipManager};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn};

use crate::error::{ReconcileError, ReconcileResult};
use crate::outcome::Outcome;
use crate::state::{ClusterState, UnitPhase};
use crate::status::UnitStatus;
use crate::workload;

/// Whether this unit may mutate shared topology for the current event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Leader,
    Follower,
}

impl Role {
    pub fn is_leader(self) -> bool {
        self == Role::Leader
    }
}

/// Per-event snapshot of the external authorities.
#[derive(Debug, Clone)]
pub struct EventContext {
    pub role: Role,
    pub config: UnitConfig,
}

/// Platform and database collaborators the reconciler talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub gateway: Arc<dyn DatabaseGateway>,
    pub relation: Arc<dyn PeerRelation>,
    pub leadership: Arc<dyn LeadershipSource>,
    pub config: Arc<dyn ConfigSource>,
    pub workload: Arc<dyn WorkloadSink>,
}

/// Payload published to client applications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProvidesInfo {
    pub provides: BTreeMap<String, String>,
}

/// Internal handler verdict, turned into an [`Outcome`] by `handle`.
enum Verdict {
    Done,
    Defer(ReconcileError),
    Fail(ReconcileError),
}

pub struct Reconciler {
    deps: Collaborators,
    state: ClusterState,
    state_path: Option<PathBuf>,
    status: UnitStatus,
}

impl Reconciler {
    pub fn new(local: UnitName, deps: Collaborators) -> Self {
        Self::with_state(ClusterState::new(local), deps)
    }

    pub fn with_state(state: ClusterState, deps: Collaborators) -> Self {
        Self {
            deps,
            state,
            state_path: None,
            status: UnitStatus::default(),
        }
    }

    /// Reconciler whose state is loaded from and saved to `path`.
    pub fn open<P: AsRef<Path>>(
        path: P,
        local: UnitName,
        deps: Collaborators,
    ) -> ReconcileResult<Self> {
        let path = path.as_ref();
        let state = ClusterState::open(path, local)?;
        let mut reconciler = Self::with_state(state, deps);
        reconciler.state_path = Some(path.to_path_buf());
        Ok(reconciler)
    }

    pub fn state(&self) -> &ClusterState {
        &self.state
    }

    pub fn status(&self) -> &UnitStatus {
        &self.status
    }

    /// Connection URI for the local unit. Fails until credentials are known.
    pub fn standalone_uri(&self) -> ReconcileResult<String> {
        let config = self.current_config()?;
        let manager = MembershipManager::from_config(&config);
        Ok(manager.standalone_uri(&self.state.credentials)?)
    }

    /// Connection URI for the first replica-set member.
    pub fn replica_set_uri(&self) -> ReconcileResult<String> {
        let config = self.current_config()?;
        let peers = self.state.peers.members();
        Ok(MembershipManager::from_config(&config)
            .replica_set_uri(&self.state.credentials, &peers)?)
    }

    /// Client relation payload: `{"provides": {"<app>": "<version>"}}`.
    pub fn provides(&self) -> ReconcileResult<ProvidesInfo> {
        let config = self.current_config()?;
        let version = self
            .deps
            .gateway
            .version()
            .map_err(|err| ReconcileError::NotReady(err.to_string()))?;
        let mut provides = BTreeMap::new();
        provides.insert(config.app_name, version);
        Ok(ProvidesInfo { provides })
    }

    /// Process one event delivery to completion.
    pub fn handle(&mut self, event: ReconciliationEvent) -> Outcome {
        let span = info_span!(
            "reconcile",
            event = event.name(),
            deferred = event.deferred,
            unit = %self.state.peers.local()
        );
        let _enter = span.enter();

        let published = self.deps.relation.app_data();
        self.sync_replica_set_name(&published);

        // Role is decided here, once, for the whole event.
        let verdict = match self.current_config() {
            Ok(config) => {
                let ctx = EventContext {
                    role: self.role(),
                    config,
                };
                self.dispatch(&ctx, &event)
            }
            Err(err) => self.dispatch_unconfigured(err, &event),
        };

        let outcome = match verdict {
            Verdict::Done => Outcome::Handled,
            Verdict::Defer(cause) => {
                // Blocked is only cleared by a handler that fixes its cause.
                if !matches!(self.status, UnitStatus::Blocked(_)) {
                    self.status = UnitStatus::Waiting(cause.to_string());
                }
                Outcome::Deferred {
                    event: event.into_deferred(),
                    cause,
                }
            }
            Verdict::Fail(err) => {
                self.status = UnitStatus::Blocked(err.to_string());
                Outcome::Fatal(err)
            }
        };

        match self.persist() {
            Ok(()) => outcome,
            Err(err) => {
                error!(error = %err, "failed to persist unit state");
                self.status = UnitStatus::Blocked(err.to_string());
                Outcome::Fatal(err)
            }
        }
    }

    fn dispatch(&mut self, ctx: &EventContext, event: &ReconciliationEvent) -> Verdict {
        match &event.kind {
            EventKind::ConfigChanged => self.on_config_changed(ctx),
            EventKind::Start => self.on_start(ctx),
            EventKind::PeerJoined { unit } => self.on_peer_joined(ctx, unit, event.deferred),
            EventKind::PeerDeparted { unit } => self.on_peer_departed(ctx, unit, event.deferred),
            EventKind::LeaderElected => self.on_leader_elected(ctx.role),
            EventKind::RelationChanged { unit, data } => {
                self.on_relation_changed(unit.as_ref(), data)
            }
        }
    }

    /// Handlers that still run while the configuration is unreadable or
    /// invalid. Peer changes are recorded and then wait for a valid config
    /// before the leader reconfigures.
    fn dispatch_unconfigured(
        &mut self,
        err: ReconcileError,
        event: &ReconciliationEvent,
    ) -> Verdict {
        error!(error = %err, "unable to read unit configuration");
        self.status = UnitStatus::Blocked(err.to_string());

        match &event.kind {
            EventKind::RelationChanged { unit, data } => {
                self.on_relation_changed(unit.as_ref(), data)
            }
            EventKind::LeaderElected => self.on_leader_elected(self.role()),
            EventKind::PeerJoined { unit } => {
                if !event.deferred {
                    if let Err(join_err) = self.join_peer(unit) {
                        return Verdict::Fail(join_err);
                    }
                }
                Verdict::Defer(err)
            }
            EventKind::PeerDeparted { unit } => {
                if !event.deferred {
                    self.depart_peer(unit);
                }
                Verdict::Defer(err)
            }
            EventKind::ConfigChanged | EventKind::Start => Verdict::Fail(err),
        }
    }

    fn role(&self) -> Role {
        if self.deps.leadership.is_leader() {
            Role::Leader
        } else {
            Role::Follower
        }
    }

    /// Take the replica-set name the leader published, unless this unit
    /// already has one.
    fn sync_replica_set_name(&mut self, data: &RelationBag) {
        let Some(published) = data.get(REPLICA_SET_NAME_KEY).filter(|v| !v.is_empty()) else {
            return;
        };
        match &self.state.initialized_replica_set {
            None => {
                info!(replica_set = %published, "adopted replica set name from peer data");
                self.state.initialized_replica_set = Some(published.clone());
            }
            Some(local) if local != published => {
                warn!(
                    local = %local,
                    published = %published,
                    "ignoring conflicting replica set name from peer data"
                );
            }
            Some(_) => {}
        }
    }

    fn current_config(&self) -> ReconcileResult<UnitConfig> {
        let config = self
            .deps
            .config
            .current()
            .map_err(|source| ReconcileError::Platform {
                operation: "read_config",
                source,
            })?;
        config
            .validate()
            .map_err(|err| ReconcileError::Configuration(err.to_string()))?;
        Ok(config)
    }

    fn persist(&self) -> ReconcileResult<()> {
        match &self.state_path {
            Some(path) => self.state.save(path),
            None => Ok(()),
        }
    }

    fn check_rename(&self, ctx: &EventContext) -> ReconcileResult<()> {
        match &self.state.initialized_replica_set {
            Some(initialized) if *initialized != ctx.config.replica_set_name => {
                Err(ReconcileError::Configuration(format!(
                    "replica set already initialized as `{}`; cannot rename to `{}`",
                    initialized, ctx.config.replica_set_name
                )))
            }
            _ => Ok(()),
        }
    }

    fn on_config_changed(&mut self, ctx: &EventContext) -> Verdict {
        if let Err(err) = self.check_rename(ctx) {
            error!(error = %err, "refusing replica set rename");
            return Verdict::Fail(err);
        }

        let spec = workload::pod_spec(&ctx.config);
        if let Err(source) = self.deps.workload.apply(spec) {
            error!(error = %source, "failed to apply workload spec");
            return Verdict::Fail(ReconcileError::Platform {
                operation: "apply_workload",
                source,
            });
        }

        info!(
            replica_set = %ctx.config.replica_set_name,
            "workload spec regenerated"
        );
        match self.state.phase {
            UnitPhase::Running => self.status = UnitStatus::Active,
            UnitPhase::Uninitialized | UnitPhase::Configuring => {
                self.state.phase = UnitPhase::Configuring;
                self.status = UnitStatus::Maintenance("workload configured".to_string());
            }
        }
        Verdict::Done
    }

    fn on_start(&mut self, ctx: &EventContext) -> Verdict {
        if let Err(err) = self.check_rename(ctx) {
            error!(error = %err, "refusing replica set rename");
            return Verdict::Fail(err);
        }

        if !self.deps.gateway.is_ready() {
            debug!("deferring start: database not ready");
            return Verdict::Defer(ReconcileError::NotReady("database not ready".into()));
        }

        if !ctx.role.is_leader() {
            info!("database ready; replica set is managed by the leader");
            // mongod is now running under this name; it is fixed from here on.
            if self.state.initialized_replica_set.is_none() {
                self.state.initialized_replica_set = Some(ctx.config.replica_set_name.clone());
            }
            self.mark_running();
            return Verdict::Done;
        }

        let manager = MembershipManager::from_config(&ctx.config);
        let peers = self.state.peers.members();
        let name = ctx.config.replica_set_name.as_str();
        match manager.initialize_replica_set(self.deps.gateway.as_ref(), name, &peers) {
            Ok(()) => {
                self.state.initialized_replica_set = Some(name.to_string());
                self.mark_running();
                // Republished on the next LeaderElected if this fails.
                if let Err(err) = self.publish_app_data() {
                    warn!(error = %err, "failed to publish replica set name");
                }
                Verdict::Done
            }
            Err(MembershipError::Gateway {
                source: GatewayError::NotReady(reason),
                ..
            }) => {
                debug!(reason = %reason, "deferring start: database not ready");
                Verdict::Defer(ReconcileError::NotReady(reason))
            }
            Err(MembershipError::Gateway { source, .. }) => {
                info!(error = %source, "deferring start: replica set initialization failed");
                Verdict::Defer(ReconcileError::Initialization(source.to_string()))
            }
            Err(err) => {
                error!(error = %err, "replica set initialization aborted");
                Verdict::Fail(err.into())
            }
        }
    }

    fn mark_running(&mut self) {
        self.state.phase = UnitPhase::Running;
        self.status = UnitStatus::Active;
    }

    /// A re-delivered join only retries the reconfiguration; the directory
    /// change was applied on first delivery and a departure may have
    /// superseded it since.
    fn on_peer_joined(
        &mut self,
        ctx: &EventContext,
        unit: &UnitName,
        redelivery: bool,
    ) -> Verdict {
        if !redelivery {
            if let Err(err) = self.join_peer(unit) {
                return Verdict::Fail(err);
            }
        }
        self.reconcile_membership(ctx)
    }

    fn join_peer(&mut self, unit: &UnitName) -> ReconcileResult<()> {
        if let Err(err) = self.state.peers.join(unit.clone()) {
            warn!(peer = %unit, error = %err, "ignoring peer");
            return Err(err.into());
        }
        let data = self.deps.relation.unit_data(unit);
        if let Some(address) = data.get(PRIVATE_ADDRESS_KEY) {
            if let Err(err) = self.state.peers.record_address(unit, address.as_str()) {
                warn!(peer = %unit, error = %err, "ignoring peer address");
            }
        }
        Ok(())
    }

    fn depart_peer(&mut self, unit: &UnitName) {
        if !self.state.peers.depart(unit) {
            debug!(peer = %unit, "departed peer was not known");
        }
    }

    fn on_peer_departed(
        &mut self,
        ctx: &EventContext,
        unit: &UnitName,
        redelivery: bool,
    ) -> Verdict {
        if !redelivery {
            self.depart_peer(unit);
        }
        self.reconcile_membership(ctx)
    }

    /// Leader-only full-membership reconfiguration.
    fn reconcile_membership(&mut self, ctx: &EventContext) -> Verdict {
        if !ctx.role.is_leader() {
            debug!("peer change recorded; reconfiguration is left to the leader");
            return Verdict::Done;
        }
        // Joins seen before Start are folded into the initial member list.
        if self.state.phase != UnitPhase::Running {
            debug!("replica set not initialized yet; members are applied at initialization");
            return Verdict::Done;
        }

        let manager = MembershipManager::from_config(&ctx.config);
        let peers = self.state.peers.members();
        match manager.reconfigure_replica_set(self.deps.gateway.as_ref(), &peers) {
            Ok(_) => Verdict::Done,
            Err(MembershipError::Gateway {
                source: GatewayError::NotReady(reason),
                ..
            }) => {
                debug!(reason = %reason, "deferring reconfiguration: database not ready");
                Verdict::Defer(ReconcileError::NotReady(reason))
            }
            Err(err @ MembershipError::Gateway { .. }) => {
                info!(error = %err, "deferring reconfiguration: server rejected membership");
                Verdict::Defer(err.into())
            }
            Err(err) => {
                error!(error = %err, "replica set reconfiguration aborted");
                Verdict::Fail(err.into())
            }
        }
    }

    fn on_leader_elected(&mut self, role: Role) -> Verdict {
        if !role.is_leader() {
            debug!("leadership already moved on; nothing to do");
            return Verdict::Done;
        }

        if !self.state.credentials.is_complete() {
            let published = self.deps.relation.app_data();
            match published_pair(&published) {
                Some((password, key)) => {
                    // Another unit led before us; its secrets are authoritative.
                    if let Err(err) = self.state.credentials.adopt(password, key) {
                        return Verdict::Fail(err.into());
                    }
                }
                None => {
                    self.state.credentials.generate();
                }
            }
        }

        match self.publish_app_data() {
            Ok(()) => Verdict::Done,
            Err(err) => {
                error!(error = %err, "failed to publish cluster credentials");
                Verdict::Fail(err)
            }
        }
    }

    /// Write any missing or stale secret, and the initialized replica-set
    /// name, into the application bag.
    fn publish_app_data(&self) -> ReconcileResult<()> {
        let mut entries = Vec::with_capacity(3);
        if let Some(credentials) = self.state.credentials.credentials() {
            entries.push((ROOT_PASSWORD_KEY, credentials.root_password));
            entries.push((SECURITY_KEY_KEY, credentials.security_key));
        }
        if let Some(name) = self.state.initialized_replica_set.as_deref() {
            entries.push((REPLICA_SET_NAME_KEY, name));
        }

        let published = self.deps.relation.app_data();
        for (key, value) in entries {
            if published.get(key).map(String::as_str) == Some(value) {
                continue;
            }
            self.deps
                .relation
                .set_app_data(key, value)
                .map_err(|source| ReconcileError::Platform {
                    operation: "publish_app_data",
                    source,
                })?;
            debug!(key, "published application data to peer relation");
        }
        Ok(())
    }

    fn on_relation_changed(&mut self, unit: Option<&UnitName>, data: &RelationBag) -> Verdict {
        let Some(unit) = unit else {
            return self.adopt_published(data);
        };

        if let Some(address) = data.get(PRIVATE_ADDRESS_KEY) {
            match self.state.peers.record_address(unit, address.as_str()) {
                Ok(true) => {}
                Ok(false) => debug!(peer = %unit, "address from unknown peer ignored"),
                Err(err) => warn!(peer = %unit, error = %err, "ignoring peer address"),
            }
        }
        Verdict::Done
    }

    fn adopt_published(&mut self, data: &RelationBag) -> Verdict {
        self.sync_replica_set_name(data);
        let Some((password, key)) = published_pair(data) else {
            debug!("application data carries no complete credential pair");
            return Verdict::Done;
        };
        match self.state.credentials.adopt(password, key) {
            Ok(_) => Verdict::Done,
            // Logged by the store; local secrets stay authoritative.
            Err(CredentialError::AdoptionConflict { .. }) => Verdict::Done,
            Err(CredentialError::IncompletePair(_)) => Verdict::Done,
        }
    }
}

fn published_pair(data: &RelationBag) -> Option<(&str, &str)> {
    let password = data.get(ROOT_PASSWORD_KEY).filter(|v| !v.is_empty())?;
    let key = data.get(SECURITY_KEY_KEY).filter(|v| !v.is_empty())?;
    Some((password.as_str(), key.as_str()))
}
