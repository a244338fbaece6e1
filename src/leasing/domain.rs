use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier wrapper for lease agreements.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeaseId(pub String);

/// Identifier wrapper for rent schedule items.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScheduleItemId(pub String);

/// Identifier wrapper for ledger payments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PaymentId(pub String);

/// Identifier wrapper for rental applications owned by the application service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApplicationId(pub String);

/// Identifier wrapper for properties owned by the property service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PropertyId(pub String);

/// Identifier wrapper for tenant/landlord accounts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

/// Opaque reference into the document service; the engine never inspects content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentId(pub String);

/// Monetary amount in minor units (cents). All money arithmetic is integer-exact.
pub type MinorUnits = i64;

/// Lifecycle status of a lease agreement.
///
/// Terminal states are `Rejected`, `Terminated`, and `Expired`; a lease is
/// never destroyed, only parked in one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LeaseStatus {
    Pending,
    AwaitingPayment,
    Active,
    Rejected,
    Terminated,
    Expired,
}

impl LeaseStatus {
    pub const fn label(self) -> &'static str {
        match self {
            LeaseStatus::Pending => "PENDING",
            LeaseStatus::AwaitingPayment => "AWAITING_PAYMENT",
            LeaseStatus::Active => "ACTIVE",
            LeaseStatus::Rejected => "REJECTED",
            LeaseStatus::Terminated => "TERMINATED",
            LeaseStatus::Expired => "EXPIRED",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            LeaseStatus::Rejected | LeaseStatus::Terminated | LeaseStatus::Expired
        )
    }

    /// Parses both the canonical upper-case spelling and the legacy
    /// lower-case strings still emitted by older clients.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Some(Self::Pending),
            "AWAITING_PAYMENT" => Some(Self::AwaitingPayment),
            "ACTIVE" => Some(Self::Active),
            "REJECTED" => Some(Self::Rejected),
            "TERMINATED" => Some(Self::Terminated),
            "EXPIRED" => Some(Self::Expired),
            _ => None,
        }
    }
}

/// A binding, time-boxed financial agreement derived from an approved application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaseAgreement {
    pub id: LeaseId,
    pub property_id: PropertyId,
    pub tenant_id: UserId,
    pub landlord_id: UserId,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub rent_amount: MinorUnits,
    pub security_deposit: MinorUnits,
    pub status: LeaseStatus,
    pub contract_document_id: Option<DocumentId>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub acceptance_deadline: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub termination_reason: Option<String>,
    pub deposit_paid: bool,
    pub first_rent_paid: bool,
    pub total_due_on_acceptance: MinorUnits,
    pub total_paid_on_acceptance: MinorUnits,
    /// Optimistic-concurrency counter; bumped on every committed mutation.
    pub version: u64,
}

impl LeaseAgreement {
    /// Remaining balance on the one-time acceptance payment gate.
    pub fn acceptance_balance(&self) -> MinorUnits {
        self.total_due_on_acceptance - self.total_paid_on_acceptance
    }
}

/// Stored status of a rent schedule item. `Due` is never persisted; it is
/// derived from the clock whenever an item is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScheduleItemStatus {
    Upcoming,
    Due,
    Partial,
    Overdue,
    Paid,
    Waived,
}

impl ScheduleItemStatus {
    pub const fn label(self) -> &'static str {
        match self {
            ScheduleItemStatus::Upcoming => "UPCOMING",
            ScheduleItemStatus::Due => "DUE",
            ScheduleItemStatus::Partial => "PARTIAL",
            ScheduleItemStatus::Overdue => "OVERDUE",
            ScheduleItemStatus::Paid => "PAID",
            ScheduleItemStatus::Waived => "WAIVED",
        }
    }
}

/// One recurring billing period's due amount and payment state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RentScheduleItem {
    pub id: ScheduleItemId,
    pub lease_id: LeaseId,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    pub grace_period_ends: DateTime<Utc>,
    pub amount_due: MinorUnits,
    pub amount_paid: MinorUnits,
    pub status: ScheduleItemStatus,
    pub late_fee_amount: MinorUnits,
    pub late_fee_applied: bool,
    pub paid_at: Option<DateTime<Utc>>,
    pub payment_id: Option<PaymentId>,
    pub waive_reason: Option<String>,
    pub version: u64,
}

impl RentScheduleItem {
    pub fn outstanding(&self) -> MinorUnits {
        self.amount_due - self.amount_paid
    }

    pub fn is_settled(&self) -> bool {
        matches!(
            self.status,
            ScheduleItemStatus::Paid | ScheduleItemStatus::Waived
        )
    }

    /// Clock-derived status. Persisted amounts plus `now` fully determine the
    /// answer; nothing pushes DUE/OVERDUE transitions into storage ahead of
    /// the sweeper.
    pub fn status_at(&self, now: DateTime<Utc>) -> ScheduleItemStatus {
        if self.status == ScheduleItemStatus::Waived {
            return ScheduleItemStatus::Waived;
        }
        if self.amount_paid >= self.amount_due {
            return ScheduleItemStatus::Paid;
        }
        if self.amount_paid > 0 {
            if now > self.grace_period_ends {
                return ScheduleItemStatus::Overdue;
            }
            return ScheduleItemStatus::Partial;
        }
        if now > self.grace_period_ends {
            ScheduleItemStatus::Overdue
        } else if now >= self.due_date {
            ScheduleItemStatus::Due
        } else {
            ScheduleItemStatus::Upcoming
        }
    }
}

/// Kind of ledger entry recorded by the reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentKind {
    Acceptance,
    Rent,
    LateFee,
    MaintenanceFee,
    Other,
}

impl PaymentKind {
    pub const fn label(self) -> &'static str {
        match self {
            PaymentKind::Acceptance => "ACCEPTANCE",
            PaymentKind::Rent => "RENT",
            PaymentKind::LateFee => "LATE_FEE",
            PaymentKind::MaintenanceFee => "MAINTENANCE_FEE",
            PaymentKind::Other => "OTHER",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "ACCEPTANCE" => Some(Self::Acceptance),
            "RENT" => Some(Self::Rent),
            "LATE_FEE" => Some(Self::LateFee),
            "MAINTENANCE_FEE" => Some(Self::MaintenanceFee),
            "OTHER" => Some(Self::Other),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Completed,
    Failed,
    Refunded,
}

/// Append-only ledger entry. Never mutated after creation except a status
/// flip to `Refunded`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub lease_id: LeaseId,
    /// `None` for acceptance payments and ad-hoc fees.
    pub schedule_item_id: Option<ScheduleItemId>,
    pub amount: MinorUnits,
    pub kind: PaymentKind,
    pub status: PaymentStatus,
    pub payment_date: DateTime<Utc>,
    pub method: String,
    pub idempotency_key: Option<String>,
    pub description: Option<String>,
}

/// Who triggered a transition; used for audit and notification attribution
/// only, never for dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Actor {
    Tenant(UserId),
    Landlord(UserId),
    Manager(UserId),
    System,
}

/// Snapshot handed back by the application service for an approved application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovedApplication {
    pub application_id: ApplicationId,
    pub property_id: PropertyId,
    pub tenant_id: UserId,
    pub landlord_id: UserId,
}

/// Property availability states the engine pushes to the property service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PropertyStatus {
    Available,
    Rented,
}

/// Fire-and-forget event kinds emitted to the notification service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LeaseEventKind {
    LeaseCreated,
    LeaseAccepted,
    LeaseRejected,
    PaymentDue,
    PaymentReceived,
    LeaseTerminated,
    LeaseExpired,
}

/// Notification payload; delivery mechanics live entirely behind the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaseNotification {
    pub kind: LeaseEventKind,
    pub lease_id: LeaseId,
    pub actor: Actor,
    pub occurred_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}
