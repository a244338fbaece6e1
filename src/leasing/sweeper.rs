//! Periodic deadline sweeper.
//!
//! Runs on its own tokio task, never on a request path. Each candidate goes
//! through the same CAS-guarded state-machine entry points API callers use,
//! so a sweep racing a concurrent payment cannot corrupt state: whichever
//! writer wins the CAS proceeds, and the loser observes the new status on
//! revalidation. Failures are logged and retried on the next tick.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::SweeperConfig;

use super::clock::Clock;
use super::domain::{Actor, LeaseEventKind, LeaseNotification};
use super::error::LeaseError;
use super::gateway::NotificationPublisher;
use super::schedule::ScheduleService;
use super::state_machine::LeaseStateMachine;
use super::store::LeaseStore;

/// Tally of one sweep pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub deadlines_expired: usize,
    pub leases_expired: usize,
    pub items_marked_overdue: usize,
    pub lost_races: usize,
    pub failures: usize,
}

pub struct DeadlineSweeper {
    store: Arc<dyn LeaseStore>,
    clock: Arc<dyn Clock>,
    state_machine: Arc<LeaseStateMachine>,
    schedule: Arc<ScheduleService>,
    notifier: Arc<dyn NotificationPublisher>,
    interval: Duration,
}

impl DeadlineSweeper {
    pub fn new(
        store: Arc<dyn LeaseStore>,
        clock: Arc<dyn Clock>,
        state_machine: Arc<LeaseStateMachine>,
        schedule: Arc<ScheduleService>,
        notifier: Arc<dyn NotificationPublisher>,
        config: SweeperConfig,
    ) -> Self {
        Self {
            store,
            clock,
            state_machine,
            schedule,
            notifier,
            interval: Duration::from_secs(config.interval_seconds),
        }
    }

    /// Scheduling loop; spawn with `tokio::spawn(sweeper.run())`.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let report = self.sweep_once();
            if report != SweepReport::default() {
                info!(
                    deadlines_expired = report.deadlines_expired,
                    leases_expired = report.leases_expired,
                    items_marked_overdue = report.items_marked_overdue,
                    lost_races = report.lost_races,
                    failures = report.failures,
                    "sweep pass finished"
                );
            }
        }
    }

    /// One pass over the three working sets. Never fails the process; every
    /// candidate error is tallied and retried on a later tick.
    pub fn sweep_once(&self) -> SweepReport {
        let now = self.clock.now();
        let mut report = SweepReport::default();

        match self.store.awaiting_payment_past_deadline(now) {
            Ok(candidates) => {
                for lease in candidates {
                    match self.state_machine.on_deadline_expired(&lease.id) {
                        Ok(_) => report.deadlines_expired += 1,
                        Err(LeaseError::Conflict(_)) | Err(LeaseError::Concurrency) => {
                            // A payment or another sweep won the race.
                            debug!(lease_id = %lease.id.0, "deadline expiry lost its race");
                            report.lost_races += 1;
                        }
                        Err(err) => {
                            warn!(lease_id = %lease.id.0, error = %err, "deadline expiry failed");
                            report.failures += 1;
                        }
                    }
                }
            }
            Err(err) => {
                warn!(error = %err, "failed to scan acceptance deadlines");
                report.failures += 1;
            }
        }

        match self.store.active_past_end(now) {
            Ok(candidates) => {
                for lease in candidates {
                    match self.state_machine.on_lease_end_reached(&lease.id) {
                        Ok(_) => report.leases_expired += 1,
                        Err(LeaseError::Conflict(_)) | Err(LeaseError::Concurrency) => {
                            debug!(lease_id = %lease.id.0, "lease expiry lost its race");
                            report.lost_races += 1;
                        }
                        Err(err) => {
                            warn!(lease_id = %lease.id.0, error = %err, "lease expiry failed");
                            report.failures += 1;
                        }
                    }
                }
            }
            Err(err) => {
                warn!(error = %err, "failed to scan lease end dates");
                report.failures += 1;
            }
        }

        match self.store.unpaid_items_past_grace(now) {
            Ok(candidates) => {
                for item in candidates {
                    let lease_id = item.lease_id.clone();
                    let item_id = item.id.clone();
                    match self.schedule.refresh(item) {
                        Ok((item, fee_applied_now)) => {
                            if fee_applied_now {
                                report.items_marked_overdue += 1;
                                let notification = LeaseNotification {
                                    kind: LeaseEventKind::PaymentDue,
                                    lease_id: lease_id.clone(),
                                    actor: Actor::System,
                                    occurred_at: now,
                                    detail: Some(format!(
                                        "schedule item {} overdue, late fee {}",
                                        item.id.0, item.late_fee_amount
                                    )),
                                };
                                if let Err(err) = self.notifier.publish(notification) {
                                    warn!(lease_id = %lease_id.0, error = %err, "notification publish failed");
                                }
                            }
                        }
                        Err(err) => {
                            warn!(item_id = %item_id.0, error = %err, "overdue derivation failed");
                            report.failures += 1;
                        }
                    }
                }
            }
            Err(err) => {
                warn!(error = %err, "failed to scan overdue schedule items");
                report.failures += 1;
            }
        }

        report
    }
}
