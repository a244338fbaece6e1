//! Applies money to the one-time acceptance gate, to schedule items, or to
//! the standalone ledger.
//!
//! Money never moves twice for the same idempotency key, never exceeds the
//! outstanding balance, and every application commits as a single atomic
//! store operation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::LeasePolicy;

use super::clock::Clock;
use super::domain::{
    Actor, LeaseAgreement, LeaseEventKind, LeaseId, LeaseNotification, LeaseStatus, MinorUnits,
    Payment, PaymentId, PaymentKind, PaymentStatus, RentScheduleItem, ScheduleItemId,
    ScheduleItemStatus,
};
use super::error::LeaseError;
use super::gateway::NotificationPublisher;
use super::state_machine::LeaseStateMachine;
use super::store::{LeaseStore, StoreError};

static PAYMENT_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_payment_id() -> PaymentId {
    let id = PAYMENT_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    PaymentId(format!("pay-{id:06}"))
}

/// Result of applying an acceptance payment.
#[derive(Debug, Clone, Serialize)]
pub struct AcceptanceOutcome {
    pub payment: Payment,
    pub lease: LeaseAgreement,
    /// Whether this call (or an earlier one, for a replay) activated the lease.
    pub activated: bool,
    /// True when the idempotency key matched a previously applied payment and
    /// nothing was re-credited.
    pub replayed: bool,
}

/// Result of paying against one schedule item.
#[derive(Debug, Clone, Serialize)]
pub struct ItemPaymentOutcome {
    pub payment: Payment,
    pub item: RentScheduleItem,
}

pub struct PaymentReconciler {
    store: Arc<dyn LeaseStore>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn NotificationPublisher>,
    state_machine: Arc<LeaseStateMachine>,
    policy: LeasePolicy,
}

impl PaymentReconciler {
    pub fn new(
        store: Arc<dyn LeaseStore>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn NotificationPublisher>,
        state_machine: Arc<LeaseStateMachine>,
        policy: LeasePolicy,
    ) -> Self {
        Self {
            store,
            clock,
            notifier,
            state_machine,
            policy,
        }
    }

    /// Applies money toward the deposit + first rent gate.
    ///
    /// Partial payments accumulate but never activate; the gate is
    /// all-or-nothing. A replayed idempotency key returns the prior outcome
    /// without crediting again. The acceptance deadline is checked here and
    /// re-checked inside the state machine at activation.
    pub fn apply_acceptance_payment(
        &self,
        lease_id: &LeaseId,
        amount: MinorUnits,
        method: &str,
        idempotency_key: &str,
    ) -> Result<AcceptanceOutcome, LeaseError> {
        if amount <= 0 {
            return Err(LeaseError::Validation(
                "payment amount must be positive".to_string(),
            ));
        }
        let key = idempotency_key.trim();
        if key.is_empty() {
            return Err(LeaseError::Validation(
                "an idempotency key is required".to_string(),
            ));
        }

        let mut attempts = 0;
        let (lease, payment) = loop {
            // Re-checked on every attempt: a rival carrying the same key can
            // commit between this lookup and our write, in which case the
            // store rejects the duplicate and the next pass lands here.
            if let Some(prior) = self.store.find_payment_by_idempotency_key(lease_id, key)? {
                let lease = self
                    .store
                    .fetch_lease(lease_id)?
                    .ok_or(LeaseError::NotFound("lease"))?;
                return Ok(AcceptanceOutcome {
                    activated: lease.status == LeaseStatus::Active,
                    payment: prior,
                    lease,
                    replayed: true,
                });
            }

            let mut lease = self
                .store
                .fetch_lease(lease_id)?
                .ok_or(LeaseError::NotFound("lease"))?;
            if lease.status != LeaseStatus::AwaitingPayment {
                // The sweeper may have terminated the lease for the missed
                // deadline already; late money still gets the deadline error,
                // not a generic status conflict.
                if lease.status == LeaseStatus::Terminated
                    && !(lease.deposit_paid && lease.first_rent_paid)
                {
                    if let Some(deadline) = lease.acceptance_deadline {
                        if self.clock.now() >= deadline {
                            return Err(LeaseError::DeadlineExpired);
                        }
                    }
                }
                return Err(LeaseError::Conflict(format!(
                    "cannot take acceptance payment while lease is {}",
                    lease.status.label()
                )));
            }
            let deadline = lease
                .acceptance_deadline
                .ok_or_else(|| LeaseError::Conflict("lease was never accepted".to_string()))?;
            let now = self.clock.now();
            if now >= deadline {
                return Err(LeaseError::DeadlineExpired);
            }
            let outstanding = lease.acceptance_balance();
            if amount > outstanding {
                return Err(LeaseError::Overpayment {
                    attempted: amount,
                    outstanding,
                });
            }

            lease.total_paid_on_acceptance += amount;
            if lease.total_paid_on_acceptance >= lease.total_due_on_acceptance {
                lease.deposit_paid = true;
                lease.first_rent_paid = true;
            }

            let payment = Payment {
                id: next_payment_id(),
                lease_id: lease_id.clone(),
                schedule_item_id: None,
                amount,
                kind: PaymentKind::Acceptance,
                status: PaymentStatus::Completed,
                payment_date: now,
                method: method.trim().to_string(),
                idempotency_key: Some(key.to_string()),
                description: None,
            };

            match self.store.record_acceptance_payment(lease, payment.clone()) {
                Ok(updated) => break (updated, payment),
                // Conflict means the key (or payment id) landed under us; the
                // next pass resolves it as a replay.
                Err(StoreError::VersionConflict) | Err(StoreError::Conflict) => {
                    attempts += 1;
                    if attempts >= self.policy.cas_retry_budget {
                        return Err(LeaseError::Concurrency);
                    }
                }
                Err(other) => return Err(other.into()),
            }
        };

        info!(
            lease_id = %lease.id.0,
            amount,
            paid = lease.total_paid_on_acceptance,
            due = lease.total_due_on_acceptance,
            "acceptance payment applied"
        );
        self.notify_received(&lease.id, amount, "acceptance payment");

        if lease.deposit_paid && lease.first_rent_paid {
            let active = self.state_machine.on_acceptance_payment_complete(lease_id)?;
            return Ok(AcceptanceOutcome {
                payment,
                lease: active,
                activated: true,
                replayed: false,
            });
        }

        Ok(AcceptanceOutcome {
            payment,
            lease,
            activated: false,
            replayed: false,
        })
    }

    /// Pays toward a single schedule item on an ACTIVE lease. Overpaying the
    /// item's outstanding balance is rejected outright.
    pub fn pay_schedule_item(
        &self,
        lease_id: &LeaseId,
        item_id: &ScheduleItemId,
        amount: MinorUnits,
        method: &str,
    ) -> Result<ItemPaymentOutcome, LeaseError> {
        if amount <= 0 {
            return Err(LeaseError::Validation(
                "payment amount must be positive".to_string(),
            ));
        }
        let lease = self
            .store
            .fetch_lease(lease_id)?
            .ok_or(LeaseError::NotFound("lease"))?;
        if lease.status != LeaseStatus::Active {
            return Err(LeaseError::Conflict(format!(
                "cannot take rent while lease is {}",
                lease.status.label()
            )));
        }

        let mut attempts = 0;
        let (item, payment) = loop {
            let mut item = self
                .store
                .fetch_item(item_id)?
                .ok_or(LeaseError::NotFound("schedule item"))?;
            if &item.lease_id != lease_id {
                return Err(LeaseError::NotFound("schedule item"));
            }
            if item.status == ScheduleItemStatus::Waived {
                return Err(LeaseError::Conflict(
                    "schedule item has been waived".to_string(),
                ));
            }
            let outstanding = item.outstanding();
            if amount > outstanding {
                return Err(LeaseError::Overpayment {
                    attempted: amount,
                    outstanding,
                });
            }

            let now = self.clock.now();
            let payment_id = next_payment_id();
            item.amount_paid += amount;
            if item.amount_paid >= item.amount_due {
                item.status = ScheduleItemStatus::Paid;
                item.paid_at = Some(now);
                item.payment_id = Some(payment_id.clone());
            } else {
                item.status = ScheduleItemStatus::Partial;
            }

            let payment = Payment {
                id: payment_id,
                lease_id: lease_id.clone(),
                schedule_item_id: Some(item_id.clone()),
                amount,
                kind: PaymentKind::Rent,
                status: PaymentStatus::Completed,
                payment_date: now,
                method: method.trim().to_string(),
                idempotency_key: None,
                description: None,
            };

            match self.store.record_item_payment(item, payment.clone()) {
                Ok(updated) => break (updated, payment),
                Err(StoreError::VersionConflict) => {
                    attempts += 1;
                    if attempts >= self.policy.cas_retry_budget {
                        return Err(LeaseError::Concurrency);
                    }
                }
                Err(other) => return Err(other.into()),
            }
        };

        // The stored status lags the clock for a partial that ran past its
        // grace period; respond with the same derived view a read would give.
        let mut item = item;
        item.status = item.status_at(self.clock.now());

        info!(
            lease_id = %lease_id.0,
            item_id = %item.id.0,
            amount,
            paid = item.amount_paid,
            due = item.amount_due,
            "rent payment applied"
        );
        self.notify_received(lease_id, amount, "rent payment");
        Ok(ItemPaymentOutcome { payment, item })
    }

    /// Records a standalone ledger entry (late fee, maintenance fee, other)
    /// with no effect on any schedule item.
    pub fn log_ad_hoc_payment(
        &self,
        lease_id: &LeaseId,
        amount: MinorUnits,
        kind: PaymentKind,
        method: &str,
        description: Option<String>,
    ) -> Result<Payment, LeaseError> {
        if amount <= 0 {
            return Err(LeaseError::Validation(
                "payment amount must be positive".to_string(),
            ));
        }
        if matches!(kind, PaymentKind::Acceptance | PaymentKind::Rent) {
            return Err(LeaseError::Validation(
                "acceptance and rent payments must go through their own endpoints".to_string(),
            ));
        }
        self.store
            .fetch_lease(lease_id)?
            .ok_or(LeaseError::NotFound("lease"))?;

        let payment = Payment {
            id: next_payment_id(),
            lease_id: lease_id.clone(),
            schedule_item_id: None,
            amount,
            kind,
            status: PaymentStatus::Completed,
            payment_date: self.clock.now(),
            method: method.trim().to_string(),
            idempotency_key: None,
            description,
        };
        let payment = self.store.insert_payment(payment)?;
        self.notify_received(lease_id, amount, kind.label());
        Ok(payment)
    }

    pub fn payments_for_lease(&self, lease_id: &LeaseId) -> Result<Vec<Payment>, LeaseError> {
        self.store
            .fetch_lease(lease_id)?
            .ok_or(LeaseError::NotFound("lease"))?;
        Ok(self.store.payments_for_lease(lease_id)?)
    }

    fn notify_received(&self, lease_id: &LeaseId, amount: MinorUnits, detail: &str) {
        let notification = LeaseNotification {
            kind: LeaseEventKind::PaymentReceived,
            lease_id: lease_id.clone(),
            actor: Actor::System,
            occurred_at: self.clock.now(),
            detail: Some(format!("{detail}: {amount}")),
        };
        if let Err(err) = self.notifier.publish(notification) {
            warn!(lease_id = %lease_id.0, error = %err, "notification publish failed");
        }
    }
}
