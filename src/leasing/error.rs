use super::domain::MinorUnits;
use super::gateway::GatewayError;
use super::store::StoreError;

/// Error taxonomy surfaced by the lease engine.
///
/// Validation/not-found/conflict/deadline/overpayment errors carry a stable
/// code and are returned to the caller as-is; `Concurrency` is produced only
/// after the internal CAS retry budget is exhausted and is safe to retry.
#[derive(Debug, thiserror::Error)]
pub enum LeaseError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("acceptance deadline has expired")]
    DeadlineExpired,
    #[error("payment of {attempted} exceeds outstanding balance of {outstanding}")]
    Overpayment {
        attempted: MinorUnits,
        outstanding: MinorUnits,
    },
    #[error("concurrent modification persisted across retries")]
    Concurrency,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

impl LeaseError {
    /// Stable machine-readable code included in API error payloads.
    pub const fn code(&self) -> &'static str {
        match self {
            LeaseError::Validation(_) => "VALIDATION_ERROR",
            LeaseError::NotFound(_) => "NOT_FOUND",
            LeaseError::Conflict(_) => "CONFLICT",
            LeaseError::DeadlineExpired => "DEADLINE_EXPIRED",
            LeaseError::Overpayment { .. } => "OVERPAYMENT",
            LeaseError::Concurrency => "CONCURRENCY",
            LeaseError::Store(_) => "STORE_ERROR",
            LeaseError::Gateway(_) => "GATEWAY_ERROR",
        }
    }
}
