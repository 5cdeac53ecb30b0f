//! Event loop driving the reconciler.
//!
//! Events are processed one at a time, to completion. Deferred events go to
//! the back of the queue and are retried on the next scheduling pass: either
//! when a new event arrives or when the redelivery interval fires.

use common::ReconciliationEvent;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::error::ReconcileError;
use crate::outcome::Outcome;
use crate::reconciler::Reconciler;

/// Default period between retries of deferred events.
pub const DEFAULT_REDELIVERY: Duration = Duration::from_secs(5);

/// Tally of a single scheduling pass.
#[derive(Debug, Default)]
pub struct PassReport {
    pub handled: usize,
    pub deferred: usize,
    pub fatal: Vec<ReconcileError>,
}

pub struct EventLoop {
    reconciler: Reconciler,
    pending: VecDeque<ReconciliationEvent>,
    redelivery: Duration,
}

impl EventLoop {
    pub fn new(reconciler: Reconciler) -> Self {
        Self {
            reconciler,
            pending: VecDeque::new(),
            redelivery: DEFAULT_REDELIVERY,
        }
    }

    pub fn with_redelivery(mut self, redelivery: Duration) -> Self {
        self.redelivery = redelivery;
        self
    }

    pub fn submit(&mut self, event: ReconciliationEvent) {
        self.pending.push_back(event);
    }

    pub fn pending(&self) -> impl Iterator<Item = &ReconciliationEvent> {
        self.pending.iter()
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn into_reconciler(self) -> Reconciler {
        self.reconciler
    }

    /// Deliver every event queued at the start of the pass exactly once.
    pub fn run_pass(&mut self) -> PassReport {
        let mut report = PassReport::default();
        let mut deferred = Vec::new();

        for _ in 0..self.pending.len() {
            let Some(event) = self.pending.pop_front() else {
                break;
            };
            match self.reconciler.handle(event) {
                Outcome::Handled => report.handled += 1,
                Outcome::Deferred { event, .. } => {
                    report.deferred += 1;
                    deferred.push(event);
                }
                Outcome::Fatal(err) => report.fatal.push(err),
            }
        }

        self.pending.extend(deferred);
        debug!(
            handled = report.handled,
            deferred = report.deferred,
            fatal = report.fatal.len(),
            "scheduling pass complete"
        );
        report
    }

    /// Consume events until the channel closes, then hand back the
    /// reconciler.
    pub async fn run(mut self, mut events: UnboundedReceiver<ReconciliationEvent>) -> Reconciler {
        info!(unit = %self.reconciler.state().peers().local(), "reconciler started");

        let mut ticker = tokio::time::interval(self.redelivery);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                received = events.recv() => match received {
                    Some(event) => {
                        self.submit(event);
                        while let Ok(event) = events.try_recv() {
                            self.submit(event);
                        }
                        self.run_pass();
                    }
                    None => {
                        info!("event channel closed, shutting down reconciler");
                        break;
                    }
                },
                _ = ticker.tick(), if !self.pending.is_empty() => {
                    self.run_pass();
                }
            }
        }

        self.reconciler
    }
}
