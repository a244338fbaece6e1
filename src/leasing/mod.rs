//! Lease lifecycle and rent-schedule engine.
//!
//! Turns an approved rental application into a binding, time-boxed financial
//! agreement, enforces the acceptance deadline, reconciles payments against
//! the recurring billing schedule, and retires leases on expiry or
//! termination. Everything outside this module (property CRUD, documents,
//! notifications, auth) is reached only through the gateway ports.

pub mod clock;
pub mod domain;
pub mod error;
pub mod gateway;
pub mod memory;
pub mod reconciler;
pub mod router;
pub mod schedule;
pub mod state_machine;
pub mod store;
pub mod sweeper;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use crate::config::LeasePolicy;

pub use clock::{Clock, ManualClock, SystemClock};
pub use domain::{
    Actor, ApplicationId, ApprovedApplication, DocumentId, LeaseAgreement, LeaseEventKind, LeaseId,
    LeaseNotification, LeaseStatus, MinorUnits, Payment, PaymentId, PaymentKind, PaymentStatus,
    PropertyId, PropertyStatus, RentScheduleItem, ScheduleItemId, ScheduleItemStatus, UserId,
};
pub use error::LeaseError;
pub use gateway::{ApplicationDirectory, GatewayError, NotificationPublisher, PropertyDirectory};
pub use memory::{
    MemoryApplicationDirectory, MemoryLeaseStore, MemoryNotificationPublisher,
    MemoryPropertyDirectory,
};
pub use reconciler::{AcceptanceOutcome, ItemPaymentOutcome, PaymentReconciler};
pub use router::lease_router;
pub use schedule::ScheduleService;
pub use state_machine::{DeadlineStatus, LeaseStateMachine, LeaseTerms};
pub use store::{LeaseStore, StoreError};
pub use sweeper::{DeadlineSweeper, SweepReport};

/// Request-side bundle of the engine's services, shared as router state.
pub struct LeaseEngine {
    pub state_machine: Arc<LeaseStateMachine>,
    pub reconciler: Arc<PaymentReconciler>,
    pub schedule: Arc<ScheduleService>,
}

impl LeaseEngine {
    /// Wires the engine over a store, clock, and collaborator gateways.
    pub fn new(
        store: Arc<dyn LeaseStore>,
        clock: Arc<dyn Clock>,
        applications: Arc<dyn ApplicationDirectory>,
        properties: Arc<dyn PropertyDirectory>,
        notifier: Arc<dyn NotificationPublisher>,
        policy: LeasePolicy,
    ) -> Self {
        let state_machine = Arc::new(LeaseStateMachine::new(
            store.clone(),
            clock.clone(),
            applications,
            properties,
            notifier.clone(),
            policy,
        ));
        let reconciler = Arc::new(PaymentReconciler::new(
            store.clone(),
            clock.clone(),
            notifier,
            state_machine.clone(),
            policy,
        ));
        let schedule = Arc::new(ScheduleService::new(store, clock, policy));
        Self {
            state_machine,
            reconciler,
            schedule,
        }
    }
}
