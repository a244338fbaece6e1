use std::sync::Arc;

use chrono::Duration;

use super::common::*;
use crate::config::LeasePolicy;
use crate::leasing::clock::Clock;
use crate::leasing::domain::{
    Actor, ApplicationId, DocumentId, LeaseEventKind, LeaseId, LeaseStatus, UserId,
};
use crate::leasing::error::LeaseError;
use crate::leasing::store::LeaseStore;
use crate::leasing::LeaseEngine;

#[test]
fn create_lease_validates_terms() {
    let h = harness();

    let mut swapped = terms();
    std::mem::swap(&mut swapped.start_date, &mut swapped.end_date);
    let err = h
        .engine
        .state_machine
        .create_lease(&application_id(), swapped)
        .unwrap_err();
    assert!(matches!(err, LeaseError::Validation(_)));

    let mut free = terms();
    free.rent_amount = 0;
    let err = h
        .engine
        .state_machine
        .create_lease(&application_id(), free)
        .unwrap_err();
    assert!(matches!(err, LeaseError::Validation(_)));

    let mut no_deposit = terms();
    no_deposit.security_deposit = -1;
    let err = h
        .engine
        .state_machine
        .create_lease(&application_id(), no_deposit)
        .unwrap_err();
    assert!(matches!(err, LeaseError::Validation(_)));
}

#[test]
fn create_lease_requires_known_application() {
    let h = harness();
    let err = h
        .engine
        .state_machine
        .create_lease(&ApplicationId("app-missing".to_string()), terms())
        .unwrap_err();
    assert!(matches!(err, LeaseError::NotFound("application")));
}

#[test]
fn create_lease_initializes_acceptance_totals() {
    let h = harness();
    let lease = h.create_pending();
    assert_eq!(lease.status, LeaseStatus::Pending);
    assert_eq!(lease.total_due_on_acceptance, 400_000);
    assert_eq!(lease.total_paid_on_acceptance, 0);
    assert!(!lease.deposit_paid && !lease.first_rent_paid);
    assert!(lease.acceptance_deadline.is_none());

    let events = h.notifier.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, LeaseEventKind::LeaseCreated);
}

#[test]
fn create_lease_conflicts_while_property_has_open_lease() {
    let h = harness();
    h.create_pending();

    let second = h.seed_application("000002", "prop-100");
    let err = h
        .engine
        .state_machine
        .create_lease(&second, terms())
        .unwrap_err();
    assert!(matches!(err, LeaseError::Conflict(_)));
}

#[test]
fn consumed_application_cannot_back_a_second_lease() {
    let h = harness();
    let lease = h.create_pending();
    h.engine
        .state_machine
        .tenant_reject(&lease.id, &tenant(), "changed plans")
        .expect("reject succeeds");

    // Property is free again, but the application was consumed at creation.
    let err = h
        .engine
        .state_machine
        .create_lease(&application_id(), terms())
        .unwrap_err();
    assert!(matches!(err, LeaseError::Conflict(_)));
}

#[test]
fn attach_contract_replaces_reference_idempotently() {
    let h = harness();
    let lease = h.create_pending();

    let lease = h
        .engine
        .state_machine
        .attach_contract(&lease.id, DocumentId("doc-1".to_string()))
        .expect("attach succeeds");
    assert_eq!(
        lease.contract_document_id,
        Some(DocumentId("doc-1".to_string()))
    );

    let lease = h
        .engine
        .state_machine
        .attach_contract(&lease.id, DocumentId("doc-2".to_string()))
        .expect("replace succeeds");
    assert_eq!(
        lease.contract_document_id,
        Some(DocumentId("doc-2".to_string()))
    );
}

#[test]
fn attach_contract_rejected_once_active() {
    let h = harness();
    let lease = h.create_active();
    let err = h
        .engine
        .state_machine
        .attach_contract(&lease.id, DocumentId("doc-late".to_string()))
        .unwrap_err();
    assert!(matches!(err, LeaseError::Conflict(_)));
}

#[test]
fn tenant_accept_sets_deadline_once() {
    let h = harness();
    let lease = h.create_pending();
    let accepted_at = h.clock.now();

    let lease = h
        .engine
        .state_machine
        .tenant_accept(&lease.id, &tenant())
        .expect("accept succeeds");

    assert_eq!(lease.status, LeaseStatus::AwaitingPayment);
    assert_eq!(lease.accepted_at, Some(accepted_at));
    assert_eq!(
        lease.acceptance_deadline,
        Some(accepted_at + Duration::hours(48))
    );

    let err = h
        .engine
        .state_machine
        .tenant_accept(&lease.id, &tenant())
        .unwrap_err();
    assert!(matches!(err, LeaseError::Conflict(_)));

    let unchanged = h.engine.state_machine.get_lease(&lease.id).unwrap();
    assert_eq!(unchanged.acceptance_deadline, lease.acceptance_deadline);
}

#[test]
fn accept_requires_the_lease_tenant() {
    let h = harness();
    let lease = h.create_pending();
    let err = h
        .engine
        .state_machine
        .tenant_accept(&lease.id, &UserId("ten-999".to_string()))
        .unwrap_err();
    assert!(matches!(err, LeaseError::Validation(_)));

    let unchanged = h.engine.state_machine.get_lease(&lease.id).unwrap();
    assert_eq!(unchanged.status, LeaseStatus::Pending);
}

#[test]
fn tenant_reject_records_reason_without_property_calls() {
    let h = harness();
    let lease = h.create_pending();

    let lease = h
        .engine
        .state_machine
        .tenant_reject(&lease.id, &tenant(), "found another place")
        .expect("reject succeeds");

    assert_eq!(lease.status, LeaseStatus::Rejected);
    assert_eq!(
        lease.rejection_reason.as_deref(),
        Some("found another place")
    );
    assert!(lease.rejected_at.is_some());
    // The property was never reserved, so nothing to release.
    assert!(h.properties.calls().is_empty());
}

#[test]
fn terminate_releases_property() {
    let h = harness();
    let lease = h.create_active();

    let lease = h
        .engine
        .state_machine
        .terminate(
            &lease.id,
            Actor::Landlord(UserId("lld-900".to_string())),
            "lease violation",
        )
        .expect("terminate succeeds");

    assert_eq!(lease.status, LeaseStatus::Terminated);
    assert_eq!(lease.termination_reason.as_deref(), Some("lease violation"));

    let calls = h.properties.calls();
    use crate::leasing::domain::PropertyStatus;
    assert_eq!(calls.last().map(|(_, s)| *s), Some(PropertyStatus::Available));
}

#[test]
fn every_undefined_state_event_pair_conflicts_and_leaves_state_alone() {
    // Drive separate leases into each state, then fire every event that has
    // no edge from that state and check nothing moved.
    let h = harness();

    let sm = &h.engine.state_machine;
    let pending = h.create_pending();
    for (name, result) in [
        ("activate", sm.on_acceptance_payment_complete(&pending.id)),
        ("terminate", sm.terminate(&pending.id, Actor::System, "x")),
        ("deadline", sm.on_deadline_expired(&pending.id)),
        ("end", sm.on_lease_end_reached(&pending.id)),
    ] {
        assert!(
            matches!(result, Err(LeaseError::Conflict(_))),
            "event {name} must conflict from PENDING"
        );
    }
    assert_eq!(
        sm.get_lease(&pending.id).unwrap().status,
        LeaseStatus::Pending
    );
    sm.tenant_reject(&pending.id, &tenant(), "cleanup").unwrap();

    let second = h.seed_application("000002", "prop-200");
    let lease = sm.create_lease(&second, terms()).unwrap();
    let awaiting = sm.tenant_accept(&lease.id, &tenant()).unwrap();
    for (name, result) in [
        ("accept", sm.tenant_accept(&awaiting.id, &tenant())),
        ("reject", sm.tenant_reject(&awaiting.id, &tenant(), "x")),
        ("terminate", sm.terminate(&awaiting.id, Actor::System, "x")),
        ("end", sm.on_lease_end_reached(&awaiting.id)),
    ] {
        assert!(
            matches!(result, Err(LeaseError::Conflict(_))),
            "event {name} must conflict from AWAITING_PAYMENT"
        );
    }
    assert_eq!(
        sm.get_lease(&awaiting.id).unwrap().status,
        LeaseStatus::AwaitingPayment
    );

    let third = h.seed_application("000003", "prop-300");
    let lease = sm.create_lease(&third, terms()).unwrap();
    let lease = sm.tenant_accept(&lease.id, &tenant()).unwrap();
    let active = h
        .engine
        .reconciler
        .apply_acceptance_payment(&lease.id, 400_000, "card", "matrix-accept")
        .unwrap()
        .lease;
    for (name, result) in [
        ("accept", sm.tenant_accept(&active.id, &tenant())),
        ("reject", sm.tenant_reject(&active.id, &tenant(), "x")),
        ("activate", sm.on_acceptance_payment_complete(&active.id)),
        ("deadline", sm.on_deadline_expired(&active.id)),
    ] {
        assert!(
            matches!(result, Err(LeaseError::Conflict(_))),
            "event {name} must conflict from ACTIVE"
        );
    }
    assert_eq!(
        sm.get_lease(&active.id).unwrap().status,
        LeaseStatus::Active
    );

    let terminated = sm
        .terminate(&active.id, Actor::System, "matrix cleanup")
        .unwrap();
    for (name, result) in [
        ("accept", sm.tenant_accept(&terminated.id, &tenant())),
        ("reject", sm.tenant_reject(&terminated.id, &tenant(), "x")),
        ("activate", sm.on_acceptance_payment_complete(&terminated.id)),
        ("terminate", sm.terminate(&terminated.id, Actor::System, "x")),
        ("deadline", sm.on_deadline_expired(&terminated.id)),
        ("end", sm.on_lease_end_reached(&terminated.id)),
    ] {
        assert!(
            matches!(result, Err(LeaseError::Conflict(_))),
            "event {name} must conflict from TERMINATED"
        );
    }
    assert_eq!(
        sm.get_lease(&terminated.id).unwrap().status,
        LeaseStatus::Terminated
    );
}

#[test]
fn deadline_status_counts_down_and_flags_expiry() {
    let h = harness();
    let lease = h.create_accepted();

    let status = h.engine.state_machine.deadline_status(&lease.id).unwrap();
    assert!(!status.expired);
    assert_eq!(status.seconds_remaining, Some(48 * 3600));

    h.clock.advance(Duration::hours(48) + Duration::seconds(1));
    let status = h.engine.state_machine.deadline_status(&lease.id).unwrap();
    assert!(status.expired);
    assert_eq!(status.seconds_remaining, Some(0));
}

#[test]
fn lost_cas_retries_within_budget() {
    let store = Arc::new(ContendedStore::default());
    let h = harness();
    // Build a second engine over the contended store sharing the same
    // application directory.
    let engine = LeaseEngine::new(
        store.clone(),
        h.clock.clone(),
        h.applications.clone(),
        h.properties.clone(),
        h.notifier.clone(),
        LeasePolicy::default(),
    );
    let lease = engine
        .state_machine
        .create_lease(&application_id(), terms())
        .expect("lease creates");

    // Two lost races, third attempt wins within the default budget of 3.
    store.fail_next_writes(2);
    let lease = engine
        .state_machine
        .tenant_accept(&lease.id, &tenant())
        .expect("accept retries through contention");
    assert_eq!(lease.status, LeaseStatus::AwaitingPayment);
}

#[test]
fn exhausted_cas_budget_surfaces_concurrency_error() {
    let store = Arc::new(ContendedStore::default());
    let h = harness();
    let engine = LeaseEngine::new(
        store.clone(),
        h.clock.clone(),
        h.applications.clone(),
        h.properties.clone(),
        h.notifier.clone(),
        LeasePolicy::default(),
    );
    let lease = engine
        .state_machine
        .create_lease(&application_id(), terms())
        .expect("lease creates");

    store.fail_next_writes(10);
    let err = engine
        .state_machine
        .tenant_accept(&lease.id, &tenant())
        .unwrap_err();
    assert!(matches!(err, LeaseError::Concurrency));

    let unchanged: crate::leasing::domain::LeaseAgreement = store
        .fetch_lease(&lease.id)
        .unwrap()
        .expect("lease still there");
    assert_eq!(unchanged.status, LeaseStatus::Pending);
}

#[test]
fn get_lease_reports_missing_ids() {
    let h = harness();
    let err = h
        .engine
        .state_machine
        .get_lease(&LeaseId("lease-none".to_string()))
        .unwrap_err();
    assert!(matches!(err, LeaseError::NotFound("lease")));
}
