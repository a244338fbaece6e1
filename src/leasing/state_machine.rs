//! Lease lifecycle state machine.
//!
//! Owns every `LeaseAgreement` transition. The transition graph is:
//!
//! ```text
//! PENDING ──tenant_accept──▶ AWAITING_PAYMENT ──payment complete──▶ ACTIVE
//!    │                            │                                   │
//!    └─tenant_reject─▶ REJECTED   └─deadline expired─▶ TERMINATED ◀───┤ terminate
//!                                                                     │
//!                                                      EXPIRED ◀──────┘ end date
//! ```
//!
//! Every mutation is a bounded compare-and-swap loop: a losing writer
//! re-reads the row and re-validates its precondition before retrying, so a
//! transition that raced the sweeper fails with a conflict instead of
//! clobbering the terminal state. Collaborator calls (property sync,
//! notifications) happen after the store commit and never roll it back.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::LeasePolicy;

use super::clock::Clock;
use super::domain::{
    Actor, ApplicationId, DocumentId, LeaseAgreement, LeaseEventKind, LeaseId, LeaseNotification,
    LeaseStatus, MinorUnits, PropertyStatus, UserId,
};
use super::error::LeaseError;
use super::gateway::{
    ApplicationDirectory, GatewayError, NotificationPublisher, PropertyDirectory,
};
use super::schedule;
use super::store::{LeaseStore, StoreError};

/// Financial terms supplied when drawing up a lease from an approved
/// application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaseTerms {
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub rent_amount: MinorUnits,
    pub security_deposit: MinorUnits,
}

/// Point-in-time view of the acceptance deadline for a lease.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeadlineStatus {
    pub lease_id: LeaseId,
    pub status: LeaseStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acceptance_deadline: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seconds_remaining: Option<i64>,
    pub expired: bool,
}

static LEASE_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_lease_id() -> LeaseId {
    let id = LEASE_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    LeaseId(format!("lease-{id:06}"))
}

pub struct LeaseStateMachine {
    store: Arc<dyn LeaseStore>,
    clock: Arc<dyn Clock>,
    applications: Arc<dyn ApplicationDirectory>,
    properties: Arc<dyn PropertyDirectory>,
    notifier: Arc<dyn NotificationPublisher>,
    policy: LeasePolicy,
}

impl LeaseStateMachine {
    pub fn new(
        store: Arc<dyn LeaseStore>,
        clock: Arc<dyn Clock>,
        applications: Arc<dyn ApplicationDirectory>,
        properties: Arc<dyn PropertyDirectory>,
        notifier: Arc<dyn NotificationPublisher>,
        policy: LeasePolicy,
    ) -> Self {
        Self {
            store,
            clock,
            applications,
            properties,
            notifier,
            policy,
        }
    }

    /// Draws up a PENDING lease from an approved, unattached application.
    pub fn create_lease(
        &self,
        application_id: &ApplicationId,
        terms: LeaseTerms,
    ) -> Result<LeaseAgreement, LeaseError> {
        if terms.start_date >= terms.end_date {
            return Err(LeaseError::Validation(
                "start date must fall before end date".to_string(),
            ));
        }
        if terms.rent_amount <= 0 {
            return Err(LeaseError::Validation(
                "rent amount must be positive".to_string(),
            ));
        }
        if terms.security_deposit <= 0 {
            return Err(LeaseError::Validation(
                "security deposit must be positive".to_string(),
            ));
        }

        let application = self
            .applications
            .approved_application(application_id)
            .map_err(map_application_error)?;

        if let Some(open) = self
            .store
            .find_open_lease_for_property(&application.property_id)?
        {
            return Err(LeaseError::Conflict(format!(
                "property already has lease {} in status {}",
                open.id.0,
                open.status.label()
            )));
        }

        let lease = LeaseAgreement {
            id: next_lease_id(),
            property_id: application.property_id,
            tenant_id: application.tenant_id,
            landlord_id: application.landlord_id,
            start_date: terms.start_date,
            end_date: terms.end_date,
            rent_amount: terms.rent_amount,
            security_deposit: terms.security_deposit,
            status: LeaseStatus::Pending,
            contract_document_id: None,
            accepted_at: None,
            acceptance_deadline: None,
            rejected_at: None,
            rejection_reason: None,
            termination_reason: None,
            deposit_paid: false,
            first_rent_paid: false,
            total_due_on_acceptance: terms.security_deposit + terms.rent_amount,
            total_paid_on_acceptance: 0,
            version: 1,
        };

        let lease = self.store.insert_lease(lease)?;
        if let Err(err) = self.applications.mark_attached(application_id) {
            warn!(lease_id = %lease.id.0, error = %err, "failed to mark application attached");
        }
        info!(lease_id = %lease.id.0, property_id = %lease.property_id.0, "lease created");
        self.emit(
            LeaseEventKind::LeaseCreated,
            &lease,
            Actor::Landlord(lease.landlord_id.clone()),
            None,
        );
        Ok(lease)
    }

    /// Attaches (or replaces) the signed contract reference. Idempotent while
    /// the lease is still PENDING or AWAITING_PAYMENT.
    pub fn attach_contract(
        &self,
        lease_id: &LeaseId,
        document_id: DocumentId,
    ) -> Result<LeaseAgreement, LeaseError> {
        let (lease, _) = self.mutate(lease_id, |lease| {
            match lease.status {
                LeaseStatus::Pending | LeaseStatus::AwaitingPayment => {}
                other => {
                    return Err(LeaseError::Conflict(format!(
                        "cannot attach contract while lease is {}",
                        other.label()
                    )))
                }
            }
            lease.contract_document_id = Some(document_id.clone());
            Ok(())
        })?;
        Ok(lease)
    }

    /// Tenant accepts a PENDING lease; starts the acceptance-payment window.
    pub fn tenant_accept(
        &self,
        lease_id: &LeaseId,
        tenant_id: &UserId,
    ) -> Result<LeaseAgreement, LeaseError> {
        let now = self.clock.now();
        let window = self.policy.acceptance_window();
        let (lease, _) = self.mutate(lease_id, |lease| {
            require_status(lease, LeaseStatus::Pending, "accept")?;
            require_tenant(lease, tenant_id)?;
            lease.status = LeaseStatus::AwaitingPayment;
            lease.accepted_at = Some(now);
            // Set exactly once; accept is only reachable from PENDING.
            lease.acceptance_deadline = Some(now + window);
            Ok(())
        })?;
        info!(lease_id = %lease.id.0, deadline = ?lease.acceptance_deadline, "lease accepted");
        self.emit(
            LeaseEventKind::LeaseAccepted,
            &lease,
            Actor::Tenant(tenant_id.clone()),
            None,
        );
        Ok(lease)
    }

    /// Tenant declines a PENDING lease. The property was never reserved, so
    /// no property-status change is pushed.
    pub fn tenant_reject(
        &self,
        lease_id: &LeaseId,
        tenant_id: &UserId,
        reason: &str,
    ) -> Result<LeaseAgreement, LeaseError> {
        let now = self.clock.now();
        let (lease, _) = self.mutate(lease_id, |lease| {
            require_status(lease, LeaseStatus::Pending, "reject")?;
            require_tenant(lease, tenant_id)?;
            lease.status = LeaseStatus::Rejected;
            lease.rejected_at = Some(now);
            lease.rejection_reason = Some(reason.trim().to_string());
            Ok(())
        })?;
        self.emit(
            LeaseEventKind::LeaseRejected,
            &lease,
            Actor::Tenant(tenant_id.clone()),
            Some(reason.trim().to_string()),
        );
        Ok(lease)
    }

    /// Terminates an ACTIVE lease and releases the property.
    pub fn terminate(
        &self,
        lease_id: &LeaseId,
        actor: Actor,
        reason: &str,
    ) -> Result<LeaseAgreement, LeaseError> {
        let (lease, _) = self.mutate(lease_id, |lease| {
            require_status(lease, LeaseStatus::Active, "terminate")?;
            lease.status = LeaseStatus::Terminated;
            lease.termination_reason = Some(reason.trim().to_string());
            Ok(())
        })?;
        self.release_property(&lease);
        self.emit(
            LeaseEventKind::LeaseTerminated,
            &lease,
            actor,
            Some(reason.trim().to_string()),
        );
        Ok(lease)
    }

    /// Invoked by the reconciler once the acceptance payment fully covers
    /// deposit + first rent. The deadline is re-checked at this boundary, not
    /// trusted from the caller; the ACTIVE transition and schedule generation
    /// commit as one atomic unit.
    pub fn on_acceptance_payment_complete(
        &self,
        lease_id: &LeaseId,
    ) -> Result<LeaseAgreement, LeaseError> {
        let mut attempts = 0;
        loop {
            let mut lease = self
                .store
                .fetch_lease(lease_id)?
                .ok_or(LeaseError::NotFound("lease"))?;
            require_status(&lease, LeaseStatus::AwaitingPayment, "activate")?;
            let deadline = lease
                .acceptance_deadline
                .ok_or_else(|| LeaseError::Conflict("lease was never accepted".to_string()))?;
            if self.clock.now() >= deadline {
                return Err(LeaseError::DeadlineExpired);
            }
            if !(lease.deposit_paid && lease.first_rent_paid) {
                return Err(LeaseError::Conflict(
                    "acceptance payment is not fully covered".to_string(),
                ));
            }

            lease.status = LeaseStatus::Active;
            let items = schedule::generate_schedule(&lease, &self.policy);
            match self.store.activate_lease_with_schedule(lease, items) {
                Ok(active) => {
                    info!(lease_id = %active.id.0, periods = schedule::period_count(&active), "lease activated");
                    self.set_property_status(&active, PropertyStatus::Rented);
                    return Ok(active);
                }
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

    /// Sweeper entry point: force-terminates an AWAITING_PAYMENT lease whose
    /// acceptance deadline has passed.
    pub fn on_deadline_expired(&self, lease_id: &LeaseId) -> Result<LeaseAgreement, LeaseError> {
        let now = self.clock.now();
        let (lease, _) = self.mutate(lease_id, |lease| {
            require_status(lease, LeaseStatus::AwaitingPayment, "expire deadline")?;
            let deadline = lease
                .acceptance_deadline
                .ok_or_else(|| LeaseError::Conflict("lease was never accepted".to_string()))?;
            if now < deadline {
                return Err(LeaseError::Conflict(
                    "acceptance deadline has not passed".to_string(),
                ));
            }
            lease.status = LeaseStatus::Terminated;
            lease.termination_reason = Some("acceptance deadline expired".to_string());
            Ok(())
        })?;
        self.release_property(&lease);
        self.emit(
            LeaseEventKind::LeaseTerminated,
            &lease,
            Actor::System,
            Some("acceptance deadline expired".to_string()),
        );
        Ok(lease)
    }

    /// Sweeper entry point: retires an ACTIVE lease whose end date has passed.
    pub fn on_lease_end_reached(&self, lease_id: &LeaseId) -> Result<LeaseAgreement, LeaseError> {
        let now = self.clock.now();
        let (lease, _) = self.mutate(lease_id, |lease| {
            require_status(lease, LeaseStatus::Active, "expire")?;
            if now < lease.end_date {
                return Err(LeaseError::Conflict(
                    "lease end date has not passed".to_string(),
                ));
            }
            lease.status = LeaseStatus::Expired;
            Ok(())
        })?;
        self.release_property(&lease);
        self.emit(LeaseEventKind::LeaseExpired, &lease, Actor::System, None);
        Ok(lease)
    }

    pub fn get_lease(&self, lease_id: &LeaseId) -> Result<LeaseAgreement, LeaseError> {
        self.store
            .fetch_lease(lease_id)?
            .ok_or(LeaseError::NotFound("lease"))
    }

    /// Deadline countdown as seen by the caller at this instant.
    pub fn deadline_status(&self, lease_id: &LeaseId) -> Result<DeadlineStatus, LeaseError> {
        let lease = self.get_lease(lease_id)?;
        let now = self.clock.now();
        let seconds_remaining = lease
            .acceptance_deadline
            .map(|deadline| (deadline - now).num_seconds().max(0));
        let expired = lease
            .acceptance_deadline
            .map(|deadline| now >= deadline && lease.status == LeaseStatus::AwaitingPayment)
            .unwrap_or(false);
        Ok(DeadlineStatus {
            lease_id: lease.id,
            status: lease.status,
            acceptance_deadline: lease.acceptance_deadline,
            seconds_remaining,
            expired,
        })
    }

    /// Bounded CAS loop. `op` re-runs against a fresh row on every attempt so
    /// preconditions are re-validated after a lost race; a precondition that
    /// no longer holds fails the whole operation instead of looping.
    fn mutate<T>(
        &self,
        lease_id: &LeaseId,
        op: impl Fn(&mut LeaseAgreement) -> Result<T, LeaseError>,
    ) -> Result<(LeaseAgreement, T), LeaseError> {
        let mut attempts = 0;
        loop {
            let mut lease = self
                .store
                .fetch_lease(lease_id)?
                .ok_or(LeaseError::NotFound("lease"))?;
            let out = op(&mut lease)?;
            match self.store.update_lease(lease) {
                Ok(updated) => return Ok((updated, out)),
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

    fn set_property_status(&self, lease: &LeaseAgreement, status: PropertyStatus) {
        if let Err(err) = self.properties.set_status(&lease.property_id, status) {
            warn!(
                lease_id = %lease.id.0,
                property_id = %lease.property_id.0,
                error = %err,
                "property status sync failed"
            );
        }
    }

    fn release_property(&self, lease: &LeaseAgreement) {
        self.set_property_status(lease, PropertyStatus::Available);
    }

    fn emit(&self, kind: LeaseEventKind, lease: &LeaseAgreement, actor: Actor, detail: Option<String>) {
        let notification = LeaseNotification {
            kind,
            lease_id: lease.id.clone(),
            actor,
            occurred_at: self.clock.now(),
            detail,
        };
        if let Err(err) = self.notifier.publish(notification) {
            warn!(lease_id = %lease.id.0, error = %err, "notification publish failed");
        }
    }
}

fn require_status(
    lease: &LeaseAgreement,
    expected: LeaseStatus,
    action: &str,
) -> Result<(), LeaseError> {
    if lease.status != expected {
        return Err(LeaseError::Conflict(format!(
            "cannot {action} lease {} while it is {}",
            lease.id.0,
            lease.status.label()
        )));
    }
    Ok(())
}

fn require_tenant(lease: &LeaseAgreement, tenant_id: &UserId) -> Result<(), LeaseError> {
    if &lease.tenant_id != tenant_id {
        return Err(LeaseError::Validation(
            "caller is not the tenant on this lease".to_string(),
        ));
    }
    Ok(())
}

fn map_application_error(err: GatewayError) -> LeaseError {
    match err {
        GatewayError::ApplicationNotFound => LeaseError::NotFound("application"),
        GatewayError::ApplicationNotApproved => {
            LeaseError::Validation("application is not approved".to_string())
        }
        GatewayError::ApplicationAttached => {
            LeaseError::Conflict("application already attached to a lease".to_string())
        }
        other => LeaseError::Gateway(other),
    }
}
