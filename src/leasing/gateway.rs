use super::domain::{ApplicationId, ApprovedApplication, LeaseNotification, PropertyId, PropertyStatus};

/// Application-service port: the engine consumes approved applications and
/// marks them attached so the same approval cannot back two leases.
pub trait ApplicationDirectory: Send + Sync {
    fn approved_application(
        &self,
        id: &ApplicationId,
    ) -> Result<ApprovedApplication, GatewayError>;
    fn mark_attached(&self, id: &ApplicationId) -> Result<(), GatewayError>;
}

/// Property-service port; invoked after activate/terminate/expire commits.
pub trait PropertyDirectory: Send + Sync {
    fn set_status(&self, property_id: &PropertyId, status: PropertyStatus)
        -> Result<(), GatewayError>;
}

/// Fire-and-forget notification port. Publish failures are logged by callers
/// and never roll back lease or payment state.
pub trait NotificationPublisher: Send + Sync {
    fn publish(&self, notification: LeaseNotification) -> Result<(), GatewayError>;
}

/// Error enumeration for collaborator failures.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("application not found")]
    ApplicationNotFound,
    #[error("application is not approved")]
    ApplicationNotApproved,
    #[error("application already attached to a lease")]
    ApplicationAttached,
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),
}
