//! Rent schedule generation and read-time status derivation.
//!
//! The schedule is generated exactly once, atomically with the ACTIVE
//! transition. Afterwards item status is a function of the clock and the
//! persisted amounts; the only pushed writes are the one-time late fee and an
//! explicit waive.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Duration;

use crate::config::LeasePolicy;

use super::clock::Clock;
use super::domain::{
    LeaseAgreement, LeaseId, MinorUnits, RentScheduleItem, ScheduleItemId, ScheduleItemStatus,
};
use super::error::LeaseError;
use super::store::{LeaseStore, StoreError};

/// Fixed billing period length.
pub const PERIOD_DAYS: i64 = 30;

static ITEM_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_item_id() -> ScheduleItemId {
    let id = ITEM_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    ScheduleItemId(format!("rsi-{id:06}"))
}

/// Number of 30-day periods covering `[start_date, end_date)`, rounded up.
pub fn period_count(lease: &LeaseAgreement) -> i64 {
    let span = lease.end_date - lease.start_date;
    let period = Duration::days(PERIOD_DAYS);
    let seconds = span.num_seconds();
    let per = period.num_seconds();
    (seconds + per - 1) / per
}

/// Late fee in minor units: `rent × rate_bps / 10_000`, rounded half up.
pub fn late_fee_for(rent_amount: MinorUnits, late_fee_rate_bps: i64) -> MinorUnits {
    (rent_amount * late_fee_rate_bps + 5_000) / 10_000
}

/// Builds the full batch of schedule items for a lease entering ACTIVE.
pub fn generate_schedule(lease: &LeaseAgreement, policy: &LeasePolicy) -> Vec<RentScheduleItem> {
    let periods = period_count(lease);
    let mut items = Vec::with_capacity(periods as usize);
    for index in 0..periods {
        let period_start = lease.start_date + Duration::days(index * PERIOD_DAYS);
        let period_end = period_start + Duration::days(PERIOD_DAYS);
        items.push(RentScheduleItem {
            id: next_item_id(),
            lease_id: lease.id.clone(),
            period_start,
            period_end,
            due_date: period_start,
            grace_period_ends: period_start + policy.grace_period(),
            amount_due: lease.rent_amount,
            amount_paid: 0,
            status: ScheduleItemStatus::Upcoming,
            late_fee_amount: 0,
            late_fee_applied: false,
            paid_at: None,
            payment_id: None,
            waive_reason: None,
            version: 1,
        });
    }
    items
}

/// Read-side service over the schedule: derived views, the one-time late fee
/// write, and the explicit waive action.
pub struct ScheduleService {
    store: Arc<dyn LeaseStore>,
    clock: Arc<dyn Clock>,
    policy: LeasePolicy,
}

impl ScheduleService {
    pub fn new(store: Arc<dyn LeaseStore>, clock: Arc<dyn Clock>, policy: LeasePolicy) -> Self {
        Self {
            store,
            clock,
            policy,
        }
    }

    /// Fetches the lease's schedule with every item refreshed against the
    /// clock. Items crossing into OVERDUE get their late fee persisted here.
    pub fn schedule_for_lease(
        &self,
        lease_id: &LeaseId,
    ) -> Result<Vec<RentScheduleItem>, LeaseError> {
        self.store
            .fetch_lease(lease_id)?
            .ok_or(LeaseError::NotFound("lease"))?;
        let items = self.store.schedule_for_lease(lease_id)?;
        items
            .into_iter()
            .map(|item| self.refresh(item).map(|(item, _)| item))
            .collect()
    }

    pub fn item(&self, item_id: &ScheduleItemId) -> Result<RentScheduleItem, LeaseError> {
        let item = self
            .store
            .fetch_item(item_id)?
            .ok_or(LeaseError::NotFound("schedule item"))?;
        let (item, _) = self.refresh(item)?;
        Ok(item)
    }

    /// Re-derives an item's status and persists the late fee the first time
    /// the item is observed past its grace period. Returns the refreshed item
    /// and whether the fee was applied by this call.
    pub fn refresh(
        &self,
        item: RentScheduleItem,
    ) -> Result<(RentScheduleItem, bool), LeaseError> {
        let now = self.clock.now();
        let derived = item.status_at(now);
        if derived == ScheduleItemStatus::Overdue && !item.late_fee_applied {
            let item_id = item.id.clone();
            let mut pending = item;
            pending.status = ScheduleItemStatus::Overdue;
            pending.late_fee_amount =
                late_fee_for(pending.amount_due, self.policy.late_fee_rate_bps);
            pending.late_fee_applied = true;
            return match self.store.update_item(pending) {
                Ok(updated) => Ok((updated, true)),
                // Lost the race to a concurrent payment or sweep; the
                // winner's row is authoritative.
                Err(StoreError::VersionConflict) => {
                    let mut current = self
                        .store
                        .fetch_item(&item_id)?
                        .ok_or(LeaseError::NotFound("schedule item"))?;
                    current.status = current.status_at(now);
                    Ok((current, false))
                }
                Err(other) => Err(other.into()),
            };
        }
        let mut item = item;
        item.status = derived;
        Ok((item, false))
    }

    /// Forces an item to WAIVED and pins `amount_due` to what was already
    /// paid. Irreversible; repeating the call is a no-op.
    pub fn waive(
        &self,
        item_id: &ScheduleItemId,
        reason: &str,
    ) -> Result<RentScheduleItem, LeaseError> {
        if reason.trim().is_empty() {
            return Err(LeaseError::Validation(
                "a waive reason is required".to_string(),
            ));
        }
        let mut attempts = 0;
        loop {
            let mut item = self
                .store
                .fetch_item(item_id)?
                .ok_or(LeaseError::NotFound("schedule item"))?;
            if item.status == ScheduleItemStatus::Waived {
                return Ok(item);
            }
            if item.status_at(self.clock.now()) == ScheduleItemStatus::Paid {
                return Err(LeaseError::Conflict(
                    "schedule item is already paid in full".to_string(),
                ));
            }
            item.status = ScheduleItemStatus::Waived;
            item.amount_due = item.amount_paid;
            item.waive_reason = Some(reason.trim().to_string());
            match self.store.update_item(item) {
                Ok(updated) => return Ok(updated),
                Err(StoreError::VersionConflict) => {
                    attempts += 1;
                    if attempts >= self.policy.cas_retry_budget {
                        return Err(LeaseError::Concurrency);
                    }
                }
                Err(other) => return Err(other.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn late_fee_rounds_half_up() {
        // 5% of $2000.00
        assert_eq!(late_fee_for(200_000, 500), 10_000);
        // 2.5% of $10.01 = 25.025 minor units, rounds to 25
        assert_eq!(late_fee_for(1_001, 250), 25);
        // 5% of $0.10 = 0.5, rounds up to 1
        assert_eq!(late_fee_for(10, 500), 1);
    }
}
