use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use crate::config::{LeasePolicy, SweeperConfig};
use crate::leasing::clock::ManualClock;
use crate::leasing::domain::{
    ApplicationId, ApprovedApplication, LeaseAgreement, LeaseId, Payment, PaymentId, PropertyId,
    RentScheduleItem, ScheduleItemId, UserId,
};
use crate::leasing::memory::{
    MemoryApplicationDirectory, MemoryLeaseStore, MemoryNotificationPublisher,
    MemoryPropertyDirectory,
};
use crate::leasing::state_machine::LeaseTerms;
use crate::leasing::store::{LeaseStore, StoreError};
use crate::leasing::sweeper::DeadlineSweeper;
use crate::leasing::LeaseEngine;

/// Everything a test needs to drive the engine with a hand-cranked clock.
pub(super) struct Harness {
    pub engine: LeaseEngine,
    pub sweeper: DeadlineSweeper,
    pub store: Arc<MemoryLeaseStore>,
    pub clock: Arc<ManualClock>,
    pub applications: Arc<MemoryApplicationDirectory>,
    pub properties: Arc<MemoryPropertyDirectory>,
    pub notifier: Arc<MemoryNotificationPublisher>,
}

/// A month before the standard lease start.
pub(super) fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2023, 12, 1, 9, 0, 0).unwrap()
}

pub(super) fn lease_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

/// 360 days after start, so the schedule splits into exactly 12 periods.
pub(super) fn lease_end() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 12, 26, 0, 0, 0).unwrap()
}

pub(super) fn terms() -> LeaseTerms {
    LeaseTerms {
        start_date: lease_start(),
        end_date: lease_end(),
        rent_amount: 200_000,
        security_deposit: 200_000,
    }
}

pub(super) fn tenant() -> UserId {
    UserId("ten-501".to_string())
}

pub(super) fn application_id() -> ApplicationId {
    ApplicationId("app-000001".to_string())
}

pub(super) fn harness() -> Harness {
    harness_with_policy(LeasePolicy::default())
}

pub(super) fn harness_with_policy(policy: LeasePolicy) -> Harness {
    let store = Arc::new(MemoryLeaseStore::default());
    let clock = Arc::new(ManualClock::starting_at(epoch()));
    let applications = Arc::new(MemoryApplicationDirectory::default());
    let properties = Arc::new(MemoryPropertyDirectory::default());
    let notifier = Arc::new(MemoryNotificationPublisher::default());

    applications.seed(ApprovedApplication {
        application_id: application_id(),
        property_id: PropertyId("prop-100".to_string()),
        tenant_id: tenant(),
        landlord_id: UserId("lld-900".to_string()),
    });

    let engine = LeaseEngine::new(
        store.clone(),
        clock.clone(),
        applications.clone(),
        properties.clone(),
        notifier.clone(),
        policy,
    );
    let sweeper = DeadlineSweeper::new(
        store.clone(),
        clock.clone(),
        engine.state_machine.clone(),
        engine.schedule.clone(),
        notifier.clone(),
        SweeperConfig::default(),
    );

    Harness {
        engine,
        sweeper,
        store,
        clock,
        applications,
        properties,
        notifier,
    }
}

impl Harness {
    pub(super) fn seed_application(&self, suffix: &str, property: &str) -> ApplicationId {
        let id = ApplicationId(format!("app-{suffix}"));
        self.applications.seed(ApprovedApplication {
            application_id: id.clone(),
            property_id: PropertyId(property.to_string()),
            tenant_id: tenant(),
            landlord_id: UserId("lld-900".to_string()),
        });
        id
    }

    pub(super) fn create_pending(&self) -> LeaseAgreement {
        self.engine
            .state_machine
            .create_lease(&application_id(), terms())
            .expect("lease creates")
    }

    pub(super) fn create_accepted(&self) -> LeaseAgreement {
        let lease = self.create_pending();
        self.engine
            .state_machine
            .tenant_accept(&lease.id, &tenant())
            .expect("lease accepts")
    }

    /// Creates, accepts, and fully pays the acceptance gate.
    pub(super) fn create_active(&self) -> LeaseAgreement {
        let lease = self.create_accepted();
        let outcome = self
            .engine
            .reconciler
            .apply_acceptance_payment(
                &lease.id,
                lease.total_due_on_acceptance,
                "bank_transfer",
                "fixture-acceptance",
            )
            .expect("acceptance payment applies");
        assert!(outcome.activated);
        outcome.lease
    }

    pub(super) fn first_item(&self, lease_id: &LeaseId) -> RentScheduleItem {
        self.store
            .schedule_for_lease(lease_id)
            .expect("schedule loads")
            .into_iter()
            .next()
            .expect("schedule is not empty")
    }
}

/// Wraps the memory store and makes the next `n` versioned writes lose their
/// CAS, so retry behavior can be pinned down deterministically. A staged
/// rival acceptance payment commits just ahead of the caller's write,
/// reproducing a same-key race in a single thread.
#[derive(Default, Clone)]
pub(super) struct ContendedStore {
    inner: MemoryLeaseStore,
    fail_next_writes: Arc<AtomicU32>,
    rival_acceptance: Arc<std::sync::Mutex<Option<Payment>>>,
}

impl ContendedStore {
    pub(super) fn fail_next_writes(&self, count: u32) {
        self.fail_next_writes.store(count, Ordering::SeqCst);
    }

    pub(super) fn stage_rival_acceptance(&self, payment: Payment) {
        *self
            .rival_acceptance
            .lock()
            .expect("rival mutex poisoned") = Some(payment);
    }

    fn steal_failure(&self) -> bool {
        self.fail_next_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (current > 0).then(|| current - 1)
            })
            .is_ok()
    }

    fn commit_staged_rival(&self, lease_id: &LeaseId) -> Result<(), StoreError> {
        let staged = self
            .rival_acceptance
            .lock()
            .expect("rival mutex poisoned")
            .take();
        if let Some(rival) = staged {
            let mut lease = self
                .inner
                .fetch_lease(lease_id)?
                .ok_or(StoreError::NotFound)?;
            lease.total_paid_on_acceptance += rival.amount;
            self.inner.record_acceptance_payment(lease, rival)?;
        }
        Ok(())
    }
}

impl LeaseStore for ContendedStore {
    fn insert_lease(&self, lease: LeaseAgreement) -> Result<LeaseAgreement, StoreError> {
        self.inner.insert_lease(lease)
    }

    fn fetch_lease(&self, id: &LeaseId) -> Result<Option<LeaseAgreement>, StoreError> {
        self.inner.fetch_lease(id)
    }

    fn update_lease(&self, lease: LeaseAgreement) -> Result<LeaseAgreement, StoreError> {
        if self.steal_failure() {
            return Err(StoreError::VersionConflict);
        }
        self.inner.update_lease(lease)
    }

    fn find_open_lease_for_property(
        &self,
        property_id: &PropertyId,
    ) -> Result<Option<LeaseAgreement>, StoreError> {
        self.inner.find_open_lease_for_property(property_id)
    }

    fn activate_lease_with_schedule(
        &self,
        lease: LeaseAgreement,
        items: Vec<RentScheduleItem>,
    ) -> Result<LeaseAgreement, StoreError> {
        if self.steal_failure() {
            return Err(StoreError::VersionConflict);
        }
        self.inner.activate_lease_with_schedule(lease, items)
    }

    fn fetch_item(&self, id: &ScheduleItemId) -> Result<Option<RentScheduleItem>, StoreError> {
        self.inner.fetch_item(id)
    }

    fn update_item(&self, item: RentScheduleItem) -> Result<RentScheduleItem, StoreError> {
        if self.steal_failure() {
            return Err(StoreError::VersionConflict);
        }
        self.inner.update_item(item)
    }

    fn schedule_for_lease(&self, lease_id: &LeaseId) -> Result<Vec<RentScheduleItem>, StoreError> {
        self.inner.schedule_for_lease(lease_id)
    }

    fn record_acceptance_payment(
        &self,
        lease: LeaseAgreement,
        payment: Payment,
    ) -> Result<LeaseAgreement, StoreError> {
        if self.steal_failure() {
            return Err(StoreError::VersionConflict);
        }
        self.commit_staged_rival(&lease.id)?;
        self.inner.record_acceptance_payment(lease, payment)
    }

    fn record_item_payment(
        &self,
        item: RentScheduleItem,
        payment: Payment,
    ) -> Result<RentScheduleItem, StoreError> {
        if self.steal_failure() {
            return Err(StoreError::VersionConflict);
        }
        self.inner.record_item_payment(item, payment)
    }

    fn insert_payment(&self, payment: Payment) -> Result<Payment, StoreError> {
        self.inner.insert_payment(payment)
    }

    fn fetch_payment(&self, id: &PaymentId) -> Result<Option<Payment>, StoreError> {
        self.inner.fetch_payment(id)
    }

    fn find_payment_by_idempotency_key(
        &self,
        lease_id: &LeaseId,
        key: &str,
    ) -> Result<Option<Payment>, StoreError> {
        self.inner.find_payment_by_idempotency_key(lease_id, key)
    }

    fn payments_for_lease(&self, lease_id: &LeaseId) -> Result<Vec<Payment>, StoreError> {
        self.inner.payments_for_lease(lease_id)
    }

    fn awaiting_payment_past_deadline(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<LeaseAgreement>, StoreError> {
        self.inner.awaiting_payment_past_deadline(now)
    }

    fn active_past_end(&self, now: DateTime<Utc>) -> Result<Vec<LeaseAgreement>, StoreError> {
        self.inner.active_past_end(now)
    }

    fn unpaid_items_past_grace(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<RentScheduleItem>, StoreError> {
        self.inner.unpaid_items_past_grace(now)
    }
}

pub(super) async fn read_json_body(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
