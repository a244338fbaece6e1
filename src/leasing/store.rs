use chrono::{DateTime, Utc};

use super::domain::{
    LeaseAgreement, LeaseId, Payment, PaymentId, PropertyId, RentScheduleItem, ScheduleItemId,
};

/// Persistence port for leases, schedule items, and the payment ledger.
///
/// Every mutation of a versioned row goes through compare-and-swap: `update_*`
/// succeeds only when the caller's `version` matches the stored row, and bumps
/// it on commit. A lost race surfaces as [`StoreError::VersionConflict`]; the
/// caller re-reads and re-validates its preconditions before retrying.
pub trait LeaseStore: Send + Sync {
    fn insert_lease(&self, lease: LeaseAgreement) -> Result<LeaseAgreement, StoreError>;
    fn fetch_lease(&self, id: &LeaseId) -> Result<Option<LeaseAgreement>, StoreError>;
    fn update_lease(&self, lease: LeaseAgreement) -> Result<LeaseAgreement, StoreError>;
    /// Any lease on the property still in a non-terminal status.
    fn find_open_lease_for_property(
        &self,
        property_id: &PropertyId,
    ) -> Result<Option<LeaseAgreement>, StoreError>;

    /// Commits the ACTIVE transition and the generated schedule as one atomic
    /// unit; a partial schedule is never observable. The lease write is still
    /// CAS-checked against `version`.
    fn activate_lease_with_schedule(
        &self,
        lease: LeaseAgreement,
        items: Vec<RentScheduleItem>,
    ) -> Result<LeaseAgreement, StoreError>;
    fn fetch_item(&self, id: &ScheduleItemId) -> Result<Option<RentScheduleItem>, StoreError>;
    fn update_item(&self, item: RentScheduleItem) -> Result<RentScheduleItem, StoreError>;
    fn schedule_for_lease(&self, lease_id: &LeaseId) -> Result<Vec<RentScheduleItem>, StoreError>;

    /// Commits the ledger row and the credited lease as one atomic unit; a
    /// payment insert without the lease update (or vice versa) is never
    /// observable. CAS-checked on the lease `version`, and a second row with
    /// the same `(lease_id, idempotency_key)` is rejected with
    /// [`StoreError::Conflict`] in the same atomic step.
    fn record_acceptance_payment(
        &self,
        lease: LeaseAgreement,
        payment: Payment,
    ) -> Result<LeaseAgreement, StoreError>;
    /// Commits the ledger row and the credited schedule item as one atomic
    /// unit. CAS-checked on the item `version`.
    fn record_item_payment(
        &self,
        item: RentScheduleItem,
        payment: Payment,
    ) -> Result<RentScheduleItem, StoreError>;
    fn insert_payment(&self, payment: Payment) -> Result<Payment, StoreError>;
    fn fetch_payment(&self, id: &PaymentId) -> Result<Option<Payment>, StoreError>;
    fn find_payment_by_idempotency_key(
        &self,
        lease_id: &LeaseId,
        key: &str,
    ) -> Result<Option<Payment>, StoreError>;
    fn payments_for_lease(&self, lease_id: &LeaseId) -> Result<Vec<Payment>, StoreError>;

    /// Sweeper working set: AWAITING_PAYMENT leases whose acceptance deadline
    /// has passed.
    fn awaiting_payment_past_deadline(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<LeaseAgreement>, StoreError>;
    /// Sweeper working set: ACTIVE leases whose end date has passed.
    fn active_past_end(&self, now: DateTime<Utc>) -> Result<Vec<LeaseAgreement>, StoreError>;
    /// Sweeper working set: unsettled items past their grace period that have
    /// not had a late fee applied yet.
    fn unpaid_items_past_grace(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<RentScheduleItem>, StoreError>;
}

/// Error enumeration for store failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("row already exists")]
    Conflict,
    #[error("row not found")]
    NotFound,
    #[error("version conflict: concurrent modification detected")]
    VersionConflict,
    #[error("store unavailable: {0}")]
    Unavailable(String),
}
