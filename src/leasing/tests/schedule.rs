use chrono::Duration;

use super::common::*;
use crate::config::LeasePolicy;
use crate::leasing::domain::ScheduleItemStatus;
use crate::leasing::error::LeaseError;
use crate::leasing::schedule::{late_fee_for, PERIOD_DAYS};
use crate::leasing::store::LeaseStore;

#[test]
fn schedule_tiles_the_term_in_thirty_day_periods() {
    let h = harness();
    let lease = h.create_active();

    let schedule = h
        .engine
        .schedule
        .schedule_for_lease(&lease.id)
        .expect("schedule loads");
    assert_eq!(schedule.len(), 12);

    for (index, item) in schedule.iter().enumerate() {
        let expected_start = lease_start() + Duration::days(index as i64 * PERIOD_DAYS);
        assert_eq!(item.period_start, expected_start);
        assert_eq!(item.period_end, expected_start + Duration::days(PERIOD_DAYS));
        assert_eq!(item.due_date, expected_start);
        assert_eq!(item.grace_period_ends, expected_start + Duration::days(5));
        assert_eq!(item.amount_due, 200_000);
        assert_eq!(item.amount_paid, 0);
    }
    assert_eq!(schedule.last().map(|item| item.period_end), Some(lease_end()));
}

#[test]
fn ragged_final_period_still_bills_full_rent() {
    let h = harness();
    // 45 days: one full period plus a 15-day tail.
    let mut short = terms();
    short.end_date = lease_start() + Duration::days(45);
    let app = h.seed_application("000077", "prop-700");
    let lease = h
        .engine
        .state_machine
        .create_lease(&app, short)
        .expect("lease creates");
    let lease = h
        .engine
        .state_machine
        .tenant_accept(&lease.id, &tenant())
        .expect("accepts");
    h.engine
        .reconciler
        .apply_acceptance_payment(&lease.id, lease.total_due_on_acceptance, "card", "short-gate")
        .expect("activates");

    let schedule = h.store.schedule_for_lease(&lease.id).expect("schedule");
    assert_eq!(schedule.len(), 2);
    assert!(schedule.iter().all(|item| item.amount_due == 200_000));
    assert_eq!(
        schedule
            .iter()
            .map(|item| item.amount_due)
            .sum::<i64>(),
        2 * 200_000
    );
}

#[test]
fn statuses_derive_from_the_clock() {
    let h = harness();
    let lease = h.create_active();
    let item = h.first_item(&lease.id);

    // Before the due date.
    h.clock.set(item.due_date - Duration::days(3));
    assert_eq!(
        h.engine.schedule.item(&item.id).unwrap().status,
        ScheduleItemStatus::Upcoming
    );

    // Inside the grace window.
    h.clock.set(item.due_date + Duration::days(2));
    assert_eq!(
        h.engine.schedule.item(&item.id).unwrap().status,
        ScheduleItemStatus::Due
    );

    // Partial inside grace.
    h.engine
        .reconciler
        .pay_schedule_item(&lease.id, &item.id, 50_000, "card")
        .unwrap();
    assert_eq!(
        h.engine.schedule.item(&item.id).unwrap().status,
        ScheduleItemStatus::Partial
    );

    // Past grace with a balance outstanding.
    h.clock.set(item.grace_period_ends + Duration::hours(1));
    assert_eq!(
        h.engine.schedule.item(&item.id).unwrap().status,
        ScheduleItemStatus::Overdue
    );
}

#[test]
fn late_fee_is_persisted_once_and_never_doubled() {
    let h = harness();
    let lease = h.create_active();
    let item = h.first_item(&lease.id);

    h.clock.set(item.grace_period_ends + Duration::days(1));
    let first = h.engine.schedule.item(&item.id).expect("first read");
    assert_eq!(first.status, ScheduleItemStatus::Overdue);
    assert_eq!(first.late_fee_amount, late_fee_for(200_000, 500));
    assert!(first.late_fee_applied);

    // Re-reading must not stack another fee.
    let second = h.engine.schedule.item(&item.id).expect("second read");
    assert_eq!(second.late_fee_amount, first.late_fee_amount);

    let stored = h
        .store
        .fetch_item(&item.id)
        .expect("fetch")
        .expect("item exists");
    assert_eq!(stored.late_fee_amount, 10_000);
}

#[test]
fn late_fee_rate_follows_policy() {
    let policy = LeasePolicy {
        late_fee_rate_bps: 250,
        ..LeasePolicy::default()
    };
    let h = harness_with_policy(policy);
    let lease = h.create_active();
    let item = h.first_item(&lease.id);

    h.clock.set(item.grace_period_ends + Duration::days(1));
    let flagged = h.engine.schedule.item(&item.id).expect("read");
    assert_eq!(flagged.late_fee_amount, 5_000);
}

#[test]
fn waive_pins_the_due_amount_and_is_idempotent() {
    let h = harness();
    let lease = h.create_active();
    let item = h.first_item(&lease.id);

    h.engine
        .reconciler
        .pay_schedule_item(&lease.id, &item.id, 60_000, "card")
        .expect("partial applies");

    let waived = h
        .engine
        .schedule
        .waive(&item.id, "hardship credit")
        .expect("waive succeeds");
    assert_eq!(waived.status, ScheduleItemStatus::Waived);
    assert_eq!(waived.amount_due, 60_000);
    assert_eq!(waived.waive_reason.as_deref(), Some("hardship credit"));

    // Second call is a no-op, not an error.
    let again = h
        .engine
        .schedule
        .waive(&item.id, "different reason")
        .expect("repeat waive succeeds");
    assert_eq!(again.amount_due, 60_000);
    assert_eq!(again.waive_reason.as_deref(), Some("hardship credit"));

    // Sum of amount_due over the schedule reflects the waived remainder.
    let total: i64 = h
        .store
        .schedule_for_lease(&lease.id)
        .expect("schedule")
        .iter()
        .map(|i| i.amount_due)
        .sum();
    assert_eq!(total, 11 * 200_000 + 60_000);
}

#[test]
fn waive_rejects_paid_items_and_blank_reasons() {
    let h = harness();
    let lease = h.create_active();
    let item = h.first_item(&lease.id);

    let err = h.engine.schedule.waive(&item.id, "   ").unwrap_err();
    assert!(matches!(err, LeaseError::Validation(_)));

    h.engine
        .reconciler
        .pay_schedule_item(&lease.id, &item.id, 200_000, "card")
        .expect("full payment applies");
    let err = h
        .engine
        .schedule
        .waive(&item.id, "too late")
        .unwrap_err();
    assert!(matches!(err, LeaseError::Conflict(_)));
}

#[test]
fn waived_and_paid_items_stay_put_as_time_passes() {
    let h = harness();
    let lease = h.create_active();
    let schedule = h.store.schedule_for_lease(&lease.id).expect("schedule");
    let first = &schedule[0];
    let second = &schedule[1];

    h.engine
        .reconciler
        .pay_schedule_item(&lease.id, &first.id, 200_000, "card")
        .expect("pays first");
    h.engine
        .schedule
        .waive(&second.id, "promo month")
        .expect("waives second");

    h.clock.set(lease_end() - Duration::days(1));
    assert_eq!(
        h.engine.schedule.item(&first.id).unwrap().status,
        ScheduleItemStatus::Paid
    );
    let waived = h.engine.schedule.item(&second.id).unwrap();
    assert_eq!(waived.status, ScheduleItemStatus::Waived);
    assert_eq!(waived.late_fee_amount, 0);
}
