//! HTTP surface for the lease engine.
//!
//! The router is the compatibility edge: status enums go out in their
//! canonical upper-case spelling, and legacy lower-case spellings are still
//! accepted on input. Everything past the handlers speaks the one internal
//! enum.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::domain::{
    Actor, ApplicationId, DocumentId, LeaseAgreement, LeaseId, MinorUnits, Payment, PaymentKind,
    RentScheduleItem, ScheduleItemId, UserId,
};
use super::error::LeaseError;
use super::store::StoreError;
use super::LeaseEngine;

pub fn lease_router(engine: Arc<LeaseEngine>) -> Router {
    Router::new()
        .route("/api/v1/leases", post(create_lease))
        .route("/api/v1/leases/:lease_id", get(get_lease))
        .route("/api/v1/leases/:lease_id/accept", patch(accept_lease))
        .route("/api/v1/leases/:lease_id/reject", patch(reject_lease))
        .route("/api/v1/leases/:lease_id/contract", patch(attach_contract))
        .route("/api/v1/leases/:lease_id/terminate", patch(terminate_lease))
        .route(
            "/api/v1/leases/:lease_id/deadline-status",
            get(deadline_status),
        )
        .route("/api/v1/leases/:lease_id/rent-schedule", get(rent_schedule))
        .route(
            "/api/v1/leases/:lease_id/rent-schedule/:item_id/pay",
            post(pay_schedule_item),
        )
        .route(
            "/api/v1/leases/:lease_id/rent-schedule/:item_id/waive",
            patch(waive_schedule_item),
        )
        .route(
            "/api/v1/leases/:lease_id/acceptance-payment",
            post(acceptance_payment),
        )
        .route(
            "/api/v1/leases/:lease_id/payments",
            post(log_payment).get(list_payments),
        )
        .with_state(engine)
}

#[derive(Debug, Deserialize)]
struct CreateLeaseRequest {
    application_id: String,
    start_date: DateTime<Utc>,
    end_date: DateTime<Utc>,
    rent_amount: MinorUnits,
    security_deposit: MinorUnits,
}

#[derive(Debug, Deserialize)]
struct AcceptRequest {
    tenant_id: String,
}

#[derive(Debug, Deserialize)]
struct RejectRequest {
    tenant_id: String,
    reason: String,
}

#[derive(Debug, Deserialize)]
struct ContractRequest {
    document_id: String,
}

#[derive(Debug, Deserialize)]
struct TerminateRequest {
    reason: String,
    #[serde(default)]
    actor: Option<Actor>,
}

#[derive(Debug, Deserialize)]
struct AcceptancePaymentRequest {
    amount: MinorUnits,
    method: String,
    idempotency_key: String,
}

#[derive(Debug, Deserialize)]
struct ItemPaymentRequest {
    amount: MinorUnits,
    method: String,
}

#[derive(Debug, Deserialize)]
struct WaiveRequest {
    reason: String,
}

#[derive(Debug, Deserialize)]
struct AdHocPaymentRequest {
    amount: MinorUnits,
    kind: String,
    method: String,
    #[serde(default)]
    description: Option<String>,
}

/// Wire view of a lease; statuses rendered through `label()` so the edge
/// stays stable if the internal enum gains serde attributes.
#[derive(Debug, Serialize)]
struct LeaseView {
    id: String,
    property_id: String,
    tenant_id: String,
    landlord_id: String,
    start_date: DateTime<Utc>,
    end_date: DateTime<Utc>,
    rent_amount: MinorUnits,
    security_deposit: MinorUnits,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    contract_document_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    accepted_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    acceptance_deadline: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    rejection_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    termination_reason: Option<String>,
    deposit_paid: bool,
    first_rent_paid: bool,
    total_due_on_acceptance: MinorUnits,
    total_paid_on_acceptance: MinorUnits,
}

impl LeaseView {
    fn from(lease: LeaseAgreement) -> Self {
        Self {
            id: lease.id.0,
            property_id: lease.property_id.0,
            tenant_id: lease.tenant_id.0,
            landlord_id: lease.landlord_id.0,
            start_date: lease.start_date,
            end_date: lease.end_date,
            rent_amount: lease.rent_amount,
            security_deposit: lease.security_deposit,
            status: lease.status.label(),
            contract_document_id: lease.contract_document_id.map(|id| id.0),
            accepted_at: lease.accepted_at,
            acceptance_deadline: lease.acceptance_deadline,
            rejection_reason: lease.rejection_reason,
            termination_reason: lease.termination_reason,
            deposit_paid: lease.deposit_paid,
            first_rent_paid: lease.first_rent_paid,
            total_due_on_acceptance: lease.total_due_on_acceptance,
            total_paid_on_acceptance: lease.total_paid_on_acceptance,
        }
    }
}

#[derive(Debug, Serialize)]
struct ScheduleItemView {
    id: String,
    lease_id: String,
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
    due_date: DateTime<Utc>,
    grace_period_ends: DateTime<Utc>,
    amount_due: MinorUnits,
    amount_paid: MinorUnits,
    status: &'static str,
    late_fee_amount: MinorUnits,
    late_fee_applied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    paid_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    payment_id: Option<String>,
}

impl ScheduleItemView {
    fn from(item: RentScheduleItem) -> Self {
        Self {
            id: item.id.0,
            lease_id: item.lease_id.0,
            period_start: item.period_start,
            period_end: item.period_end,
            due_date: item.due_date,
            grace_period_ends: item.grace_period_ends,
            amount_due: item.amount_due,
            amount_paid: item.amount_paid,
            status: item.status.label(),
            late_fee_amount: item.late_fee_amount,
            late_fee_applied: item.late_fee_applied,
            paid_at: item.paid_at,
            payment_id: item.payment_id.map(|id| id.0),
        }
    }
}

#[derive(Debug, Serialize)]
struct PaymentView {
    id: String,
    lease_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    schedule_item_id: Option<String>,
    amount: MinorUnits,
    kind: &'static str,
    payment_date: DateTime<Utc>,
    method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
}

impl PaymentView {
    fn from(payment: Payment) -> Self {
        Self {
            id: payment.id.0,
            lease_id: payment.lease_id.0,
            schedule_item_id: payment.schedule_item_id.map(|id| id.0),
            amount: payment.amount,
            kind: payment.kind.label(),
            payment_date: payment.payment_date,
            method: payment.method,
            description: payment.description,
        }
    }
}

async fn create_lease(
    State(engine): State<Arc<LeaseEngine>>,
    Json(request): Json<CreateLeaseRequest>,
) -> Response {
    let terms = super::state_machine::LeaseTerms {
        start_date: request.start_date,
        end_date: request.end_date,
        rent_amount: request.rent_amount,
        security_deposit: request.security_deposit,
    };
    match engine
        .state_machine
        .create_lease(&ApplicationId(request.application_id), terms)
    {
        Ok(lease) => (StatusCode::CREATED, Json(LeaseView::from(lease))).into_response(),
        Err(err) => error_response(err),
    }
}

async fn get_lease(
    State(engine): State<Arc<LeaseEngine>>,
    Path(lease_id): Path<String>,
) -> Response {
    let lease_id = LeaseId(lease_id);
    match engine.state_machine.get_lease(&lease_id) {
        Ok(lease) => (StatusCode::OK, Json(LeaseView::from(lease))).into_response(),
        Err(err) => error_response(err),
    }
}

async fn accept_lease(
    State(engine): State<Arc<LeaseEngine>>,
    Path(lease_id): Path<String>,
    Json(request): Json<AcceptRequest>,
) -> Response {
    match engine
        .state_machine
        .tenant_accept(&LeaseId(lease_id), &UserId(request.tenant_id))
    {
        Ok(lease) => (StatusCode::OK, Json(LeaseView::from(lease))).into_response(),
        Err(err) => error_response(err),
    }
}

async fn reject_lease(
    State(engine): State<Arc<LeaseEngine>>,
    Path(lease_id): Path<String>,
    Json(request): Json<RejectRequest>,
) -> Response {
    match engine.state_machine.tenant_reject(
        &LeaseId(lease_id),
        &UserId(request.tenant_id),
        &request.reason,
    ) {
        Ok(lease) => (StatusCode::OK, Json(LeaseView::from(lease))).into_response(),
        Err(err) => error_response(err),
    }
}

async fn attach_contract(
    State(engine): State<Arc<LeaseEngine>>,
    Path(lease_id): Path<String>,
    Json(request): Json<ContractRequest>,
) -> Response {
    match engine
        .state_machine
        .attach_contract(&LeaseId(lease_id), DocumentId(request.document_id))
    {
        Ok(lease) => (StatusCode::OK, Json(LeaseView::from(lease))).into_response(),
        Err(err) => error_response(err),
    }
}

async fn terminate_lease(
    State(engine): State<Arc<LeaseEngine>>,
    Path(lease_id): Path<String>,
    Json(request): Json<TerminateRequest>,
) -> Response {
    let actor = request.actor.unwrap_or(Actor::System);
    match engine
        .state_machine
        .terminate(&LeaseId(lease_id), actor, &request.reason)
    {
        Ok(lease) => (StatusCode::OK, Json(LeaseView::from(lease))).into_response(),
        Err(err) => error_response(err),
    }
}

async fn deadline_status(
    State(engine): State<Arc<LeaseEngine>>,
    Path(lease_id): Path<String>,
) -> Response {
    match engine.state_machine.deadline_status(&LeaseId(lease_id)) {
        Ok(status) => (StatusCode::OK, Json(status)).into_response(),
        Err(err) => error_response(err),
    }
}

async fn rent_schedule(
    State(engine): State<Arc<LeaseEngine>>,
    Path(lease_id): Path<String>,
) -> Response {
    match engine.schedule.schedule_for_lease(&LeaseId(lease_id)) {
        Ok(items) => {
            let views: Vec<_> = items.into_iter().map(ScheduleItemView::from).collect();
            (StatusCode::OK, Json(views)).into_response()
        }
        Err(err) => error_response(err),
    }
}

async fn pay_schedule_item(
    State(engine): State<Arc<LeaseEngine>>,
    Path((lease_id, item_id)): Path<(String, String)>,
    Json(request): Json<ItemPaymentRequest>,
) -> Response {
    match engine.reconciler.pay_schedule_item(
        &LeaseId(lease_id),
        &ScheduleItemId(item_id),
        request.amount,
        &request.method,
    ) {
        Ok(outcome) => {
            let payload = json!({
                "payment": PaymentView::from(outcome.payment),
                "item": ScheduleItemView::from(outcome.item),
            });
            (StatusCode::OK, Json(payload)).into_response()
        }
        Err(err) => error_response(err),
    }
}

async fn waive_schedule_item(
    State(engine): State<Arc<LeaseEngine>>,
    Path((lease_id, item_id)): Path<(String, String)>,
    Json(request): Json<WaiveRequest>,
) -> Response {
    let lease_id = LeaseId(lease_id);
    let item_id = ScheduleItemId(item_id);
    match engine.schedule.item(&item_id) {
        Ok(item) if item.lease_id != lease_id => {
            return error_response(LeaseError::NotFound("schedule item"))
        }
        Ok(_) => {}
        Err(err) => return error_response(err),
    }
    match engine.schedule.waive(&item_id, &request.reason) {
        Ok(item) => (StatusCode::OK, Json(ScheduleItemView::from(item))).into_response(),
        Err(err) => error_response(err),
    }
}

async fn log_payment(
    State(engine): State<Arc<LeaseEngine>>,
    Path(lease_id): Path<String>,
    Json(request): Json<AdHocPaymentRequest>,
) -> Response {
    let Some(kind) = PaymentKind::parse(&request.kind) else {
        return error_response(LeaseError::Validation(format!(
            "unknown payment kind '{}'",
            request.kind
        )));
    };
    match engine.reconciler.log_ad_hoc_payment(
        &LeaseId(lease_id),
        request.amount,
        kind,
        &request.method,
        request.description,
    ) {
        Ok(payment) => (StatusCode::CREATED, Json(PaymentView::from(payment))).into_response(),
        Err(err) => error_response(err),
    }
}

async fn list_payments(
    State(engine): State<Arc<LeaseEngine>>,
    Path(lease_id): Path<String>,
) -> Response {
    match engine.reconciler.payments_for_lease(&LeaseId(lease_id)) {
        Ok(payments) => {
            let views: Vec<_> = payments.into_iter().map(PaymentView::from).collect();
            (StatusCode::OK, Json(views)).into_response()
        }
        Err(err) => error_response(err),
    }
}

async fn acceptance_payment(
    State(engine): State<Arc<LeaseEngine>>,
    Path(lease_id): Path<String>,
    Json(request): Json<AcceptancePaymentRequest>,
) -> Response {
    match engine.reconciler.apply_acceptance_payment(
        &LeaseId(lease_id),
        request.amount,
        &request.method,
        &request.idempotency_key,
    ) {
        Ok(outcome) => {
            let payload = json!({
                "payment": PaymentView::from(outcome.payment),
                "lease": LeaseView::from(outcome.lease),
                "activated": outcome.activated,
                "replayed": outcome.replayed,
            });
            (StatusCode::OK, Json(payload)).into_response()
        }
        Err(err) => error_response(err),
    }
}

fn error_response(err: LeaseError) -> Response {
    let status = match &err {
        LeaseError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        LeaseError::NotFound(_) => StatusCode::NOT_FOUND,
        LeaseError::Conflict(_) => StatusCode::CONFLICT,
        LeaseError::DeadlineExpired => StatusCode::GONE,
        LeaseError::Overpayment { .. } => StatusCode::PAYMENT_REQUIRED,
        LeaseError::Concurrency => StatusCode::SERVICE_UNAVAILABLE,
        LeaseError::Store(StoreError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
        LeaseError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        LeaseError::Gateway(_) => StatusCode::BAD_GATEWAY,
    };
    let payload = json!({
        "error": err.to_string(),
        "code": err.code(),
    });
    (status, Json(payload)).into_response()
}
