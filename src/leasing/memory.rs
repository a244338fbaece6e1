//! In-memory store and collaborator implementations.
//!
//! These back the demo server wiring and the test suites. The store honors the
//! same versioned compare-and-swap contract a database-backed implementation
//! would, so concurrency behavior is exercised identically in both settings.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use super::domain::{
    ApplicationId, ApprovedApplication, LeaseAgreement, LeaseId, LeaseNotification, Payment,
    PaymentId, PropertyId, PropertyStatus, RentScheduleItem, ScheduleItemId,
};
use super::gateway::{ApplicationDirectory, GatewayError, NotificationPublisher, PropertyDirectory};
use super::store::{LeaseStore, StoreError};

#[derive(Default)]
struct StoreInner {
    leases: HashMap<LeaseId, LeaseAgreement>,
    items: HashMap<ScheduleItemId, RentScheduleItem>,
    payments: HashMap<PaymentId, Payment>,
}

/// Mutex-guarded in-memory [`LeaseStore`].
#[derive(Default, Clone)]
pub struct MemoryLeaseStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl MemoryLeaseStore {
    fn locked(&self) -> std::sync::MutexGuard<'_, StoreInner> {
        self.inner.lock().expect("store mutex poisoned")
    }
}

impl LeaseStore for MemoryLeaseStore {
    fn insert_lease(&self, lease: LeaseAgreement) -> Result<LeaseAgreement, StoreError> {
        let mut guard = self.locked();
        if guard.leases.contains_key(&lease.id) {
            return Err(StoreError::Conflict);
        }
        guard.leases.insert(lease.id.clone(), lease.clone());
        Ok(lease)
    }

    fn fetch_lease(&self, id: &LeaseId) -> Result<Option<LeaseAgreement>, StoreError> {
        Ok(self.locked().leases.get(id).cloned())
    }

    fn update_lease(&self, mut lease: LeaseAgreement) -> Result<LeaseAgreement, StoreError> {
        let mut guard = self.locked();
        let current = guard.leases.get(&lease.id).ok_or(StoreError::NotFound)?;
        if current.version != lease.version {
            return Err(StoreError::VersionConflict);
        }
        lease.version += 1;
        guard.leases.insert(lease.id.clone(), lease.clone());
        Ok(lease)
    }

    fn find_open_lease_for_property(
        &self,
        property_id: &PropertyId,
    ) -> Result<Option<LeaseAgreement>, StoreError> {
        let guard = self.locked();
        Ok(guard
            .leases
            .values()
            .find(|lease| &lease.property_id == property_id && !lease.status.is_terminal())
            .cloned())
    }

    fn activate_lease_with_schedule(
        &self,
        mut lease: LeaseAgreement,
        items: Vec<RentScheduleItem>,
    ) -> Result<LeaseAgreement, StoreError> {
        let mut guard = self.locked();
        let current = guard.leases.get(&lease.id).ok_or(StoreError::NotFound)?;
        if current.version != lease.version {
            return Err(StoreError::VersionConflict);
        }
        if items.iter().any(|item| guard.items.contains_key(&item.id)) {
            return Err(StoreError::Conflict);
        }
        lease.version += 1;
        guard.leases.insert(lease.id.clone(), lease.clone());
        for item in items {
            guard.items.insert(item.id.clone(), item);
        }
        Ok(lease)
    }

    fn fetch_item(&self, id: &ScheduleItemId) -> Result<Option<RentScheduleItem>, StoreError> {
        Ok(self.locked().items.get(id).cloned())
    }

    fn update_item(&self, mut item: RentScheduleItem) -> Result<RentScheduleItem, StoreError> {
        let mut guard = self.locked();
        let current = guard.items.get(&item.id).ok_or(StoreError::NotFound)?;
        if current.version != item.version {
            return Err(StoreError::VersionConflict);
        }
        item.version += 1;
        guard.items.insert(item.id.clone(), item.clone());
        Ok(item)
    }

    fn schedule_for_lease(&self, lease_id: &LeaseId) -> Result<Vec<RentScheduleItem>, StoreError> {
        let guard = self.locked();
        let mut items: Vec<_> = guard
            .items
            .values()
            .filter(|item| &item.lease_id == lease_id)
            .cloned()
            .collect();
        items.sort_by_key(|item| item.period_start);
        Ok(items)
    }

    fn record_acceptance_payment(
        &self,
        mut lease: LeaseAgreement,
        payment: Payment,
    ) -> Result<LeaseAgreement, StoreError> {
        let mut guard = self.locked();
        let current = guard.leases.get(&lease.id).ok_or(StoreError::NotFound)?;
        if current.version != lease.version {
            return Err(StoreError::VersionConflict);
        }
        if guard.payments.contains_key(&payment.id) {
            return Err(StoreError::Conflict);
        }
        // One ledger row per (lease, idempotency key), enforced under the
        // same lock as the credit.
        if let Some(key) = payment.idempotency_key.as_deref() {
            let duplicate = guard.payments.values().any(|existing| {
                existing.lease_id == lease.id && existing.idempotency_key.as_deref() == Some(key)
            });
            if duplicate {
                return Err(StoreError::Conflict);
            }
        }
        lease.version += 1;
        guard.leases.insert(lease.id.clone(), lease.clone());
        guard.payments.insert(payment.id.clone(), payment);
        Ok(lease)
    }

    fn record_item_payment(
        &self,
        mut item: RentScheduleItem,
        payment: Payment,
    ) -> Result<RentScheduleItem, StoreError> {
        let mut guard = self.locked();
        let current = guard.items.get(&item.id).ok_or(StoreError::NotFound)?;
        if current.version != item.version {
            return Err(StoreError::VersionConflict);
        }
        if guard.payments.contains_key(&payment.id) {
            return Err(StoreError::Conflict);
        }
        item.version += 1;
        guard.items.insert(item.id.clone(), item.clone());
        guard.payments.insert(payment.id.clone(), payment);
        Ok(item)
    }

    fn insert_payment(&self, payment: Payment) -> Result<Payment, StoreError> {
        let mut guard = self.locked();
        if guard.payments.contains_key(&payment.id) {
            return Err(StoreError::Conflict);
        }
        guard.payments.insert(payment.id.clone(), payment.clone());
        Ok(payment)
    }

    fn fetch_payment(&self, id: &PaymentId) -> Result<Option<Payment>, StoreError> {
        Ok(self.locked().payments.get(id).cloned())
    }

    fn find_payment_by_idempotency_key(
        &self,
        lease_id: &LeaseId,
        key: &str,
    ) -> Result<Option<Payment>, StoreError> {
        let guard = self.locked();
        Ok(guard
            .payments
            .values()
            .find(|payment| {
                &payment.lease_id == lease_id
                    && payment.idempotency_key.as_deref() == Some(key)
            })
            .cloned())
    }

    fn payments_for_lease(&self, lease_id: &LeaseId) -> Result<Vec<Payment>, StoreError> {
        let guard = self.locked();
        let mut payments: Vec<_> = guard
            .payments
            .values()
            .filter(|payment| &payment.lease_id == lease_id)
            .cloned()
            .collect();
        payments.sort_by_key(|payment| payment.payment_date);
        Ok(payments)
    }

    fn awaiting_payment_past_deadline(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<LeaseAgreement>, StoreError> {
        let guard = self.locked();
        Ok(guard
            .leases
            .values()
            .filter(|lease| {
                lease.status == super::domain::LeaseStatus::AwaitingPayment
                    && lease
                        .acceptance_deadline
                        .map(|deadline| deadline <= now)
                        .unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    fn active_past_end(&self, now: DateTime<Utc>) -> Result<Vec<LeaseAgreement>, StoreError> {
        let guard = self.locked();
        Ok(guard
            .leases
            .values()
            .filter(|lease| {
                lease.status == super::domain::LeaseStatus::Active && lease.end_date <= now
            })
            .cloned()
            .collect())
    }

    fn unpaid_items_past_grace(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<RentScheduleItem>, StoreError> {
        let guard = self.locked();
        Ok(guard
            .items
            .values()
            .filter(|item| {
                !item.is_settled() && !item.late_fee_applied && item.grace_period_ends < now
            })
            .cloned()
            .collect())
    }
}

enum DirectoryEntry {
    Approved(ApprovedApplication),
    Attached,
}

/// In-memory application directory seeded with approved applications.
#[derive(Default, Clone)]
pub struct MemoryApplicationDirectory {
    entries: Arc<Mutex<HashMap<ApplicationId, DirectoryEntry>>>,
}

impl MemoryApplicationDirectory {
    pub fn seed(&self, application: ApprovedApplication) {
        self.entries
            .lock()
            .expect("directory mutex poisoned")
            .insert(
                application.application_id.clone(),
                DirectoryEntry::Approved(application),
            );
    }
}

impl ApplicationDirectory for MemoryApplicationDirectory {
    fn approved_application(
        &self,
        id: &ApplicationId,
    ) -> Result<ApprovedApplication, GatewayError> {
        let guard = self.entries.lock().expect("directory mutex poisoned");
        match guard.get(id) {
            Some(DirectoryEntry::Approved(application)) => Ok(application.clone()),
            Some(DirectoryEntry::Attached) => Err(GatewayError::ApplicationAttached),
            None => Err(GatewayError::ApplicationNotFound),
        }
    }

    fn mark_attached(&self, id: &ApplicationId) -> Result<(), GatewayError> {
        let mut guard = self.entries.lock().expect("directory mutex poisoned");
        match guard.get(id) {
            Some(DirectoryEntry::Approved(_)) => {
                guard.insert(id.clone(), DirectoryEntry::Attached);
                Ok(())
            }
            Some(DirectoryEntry::Attached) => Err(GatewayError::ApplicationAttached),
            None => Err(GatewayError::ApplicationNotFound),
        }
    }
}

/// Records property status pushes so tests can assert gateway traffic.
#[derive(Default, Clone)]
pub struct MemoryPropertyDirectory {
    calls: Arc<Mutex<Vec<(PropertyId, PropertyStatus)>>>,
}

impl MemoryPropertyDirectory {
    pub fn calls(&self) -> Vec<(PropertyId, PropertyStatus)> {
        self.calls.lock().expect("property mutex poisoned").clone()
    }
}

impl PropertyDirectory for MemoryPropertyDirectory {
    fn set_status(
        &self,
        property_id: &PropertyId,
        status: PropertyStatus,
    ) -> Result<(), GatewayError> {
        self.calls
            .lock()
            .expect("property mutex poisoned")
            .push((property_id.clone(), status));
        Ok(())
    }
}

/// Collects published notifications for assertions.
#[derive(Default, Clone)]
pub struct MemoryNotificationPublisher {
    events: Arc<Mutex<Vec<LeaseNotification>>>,
}

impl MemoryNotificationPublisher {
    pub fn events(&self) -> Vec<LeaseNotification> {
        self.events.lock().expect("notification mutex poisoned").clone()
    }
}

impl NotificationPublisher for MemoryNotificationPublisher {
    fn publish(&self, notification: LeaseNotification) -> Result<(), GatewayError> {
        self.events
            .lock()
            .expect("notification mutex poisoned")
            .push(notification);
        Ok(())
    }
}
