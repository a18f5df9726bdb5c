use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use murmur_types::{Address, DeliveryStatus, SessionEvent};
use tokio::sync::{Mutex, broadcast};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::MurmurError;
use crate::messages::MessageStore;
use crate::oracle::ActivityOracle;

/// Ticks still waiting on the oracle before the loop starts warning.
const STALLED_TICK_WARNING: usize = 3;

/// What one reconciliation tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub checked: usize,
    pub delivered: usize,
    pub inactive: usize,
    /// Lookups that failed; those messages stay `Sent` for the next tick.
    pub inconclusive: usize,
    pub persisted: bool,
    /// The session closed while the tick was running; nothing was applied.
    pub discarded: bool,
}

/// Advances the local identity's `Sent` messages to `Delivered` when the
/// recipient shows ledger activity.
///
/// Lookups run without holding the store lock. Results are applied in one
/// short critical section, and only to messages that are still `Sent`, so a
/// tick never clobbers a message appended or advanced while it was waiting.
pub struct DeliveryReconciler {
    local: Address,
    messages: Arc<Mutex<MessageStore>>,
    oracle: Arc<dyn ActivityOracle>,
    events: broadcast::Sender<SessionEvent>,
    cancel: CancellationToken,
}

impl DeliveryReconciler {
    pub fn new(
        local: Address,
        messages: Arc<Mutex<MessageStore>>,
        oracle: Arc<dyn ActivityOracle>,
        events: broadcast::Sender<SessionEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            local,
            messages,
            oracle,
            events,
            cancel,
        }
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub async fn tick(&self) -> TickReport {
        let mut report = TickReport::default();
        if self.cancel.is_cancelled() {
            report.discarded = true;
            return report;
        }

        let pending = self.messages.lock().await.pending_sent(&self.local);
        report.checked = pending.len();

        // One lookup per pending message, all in flight at once.
        let lookups = join_all(pending.into_iter().map(|(id, recipient)| {
            let oracle = self.oracle.clone();
            async move {
                let result = oracle.check_activity(&recipient).await;
                (id, recipient, result)
            }
        }));

        let results = tokio::select! {
            _ = self.cancel.cancelled() => {
                report.discarded = true;
                return report;
            }
            results = lookups => results,
        };

        let mut store = self.messages.lock().await;
        if self.cancel.is_cancelled() {
            debug!("Session closed mid-tick, discarding {} results", results.len());
            report.discarded = true;
            return report;
        }

        let mut changed = Vec::new();
        for (id, recipient, result) in results {
            let sample = match result {
                Ok(sample) => sample,
                Err(e) => {
                    warn!("Activity check for {} inconclusive: {}", recipient.short(), e);
                    report.inconclusive += 1;
                    continue;
                }
            };

            if !sample.active {
                report.inactive += 1;
                continue;
            }

            // Advanced elsewhere while the lookup was in flight.
            if !store.get(&id).is_some_and(|m| m.status.is_sent()) {
                continue;
            }

            let status = DeliveryStatus::Delivered { evidence: sample };
            match store.advance_status(&id, status.clone()) {
                Ok(true) => {
                    report.delivered += 1;
                    changed.push((id, status));
                }
                Ok(false) => {}
                Err(e @ MurmurError::InvalidTransition { .. }) => warn!("{}", e),
                Err(e) => warn!("Failed to advance {}: {}", id, e),
            }
        }

        if !changed.is_empty() || store.is_dirty() {
            report.persisted = store.persist().is_ok();
        }
        drop(store);

        for (id, status) in changed {
            let _ = self.events.send(SessionEvent::StatusChanged { id, status });
        }

        if report.delivered > 0 {
            info!(
                "Reconciled {} messages: {} delivered, {} inactive, {} inconclusive",
                report.checked, report.delivered, report.inactive, report.inconclusive
            );
        } else {
            debug!("Reconcile tick: {:?}", report);
        }
        report
    }
}

/// Periodic driver for a [`DeliveryReconciler`].
///
/// The first tick fires one full period after spawning. Each tick runs in
/// its own task so a slow ledger does not push back the schedule.
pub struct ReconcilerHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ReconcilerHandle {
    pub fn spawn(reconciler: Arc<DeliveryReconciler>, period: Duration) -> Self {
        let cancel = reconciler.cancel_token().clone();
        let loop_cancel = cancel.clone();

        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut in_flight = JoinSet::new();

            loop {
                tokio::select! {
                    _ = loop_cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let reconciler = reconciler.clone();
                        in_flight.spawn(async move { reconciler.tick().await });
                        if in_flight.len() > STALLED_TICK_WARNING {
                            warn!(
                                "{} reconcile ticks in flight, activity oracle may be stalled",
                                in_flight.len()
                            );
                        }
                    }
                    Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                        if let Err(e) = joined {
                            warn!("Reconcile tick task failed: {}", e);
                        }
                    }
                }
            }

            in_flight.shutdown().await;
            debug!("Reconciler stopped");
        });

        info!("Reconciler started (every {:?})", period);
        Self { cancel, task }
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Cancel the loop and any in-flight tick, then wait for it to wind down.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!("Reconciler task ended abnormally: {}", e);
        }
    }
}
