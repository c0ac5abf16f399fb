use thiserror::Error;

use crate::billing::tier::SubscriptionTier;

/// Errors raised by the profile/payment stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Conflicting record: {0}")]
    Conflict(String),

    #[error("Stored value is invalid: {0}")]
    Corrupt(String),
}

/// Entitlement and checkout failures.
///
/// Duplicate deliveries and partial application are outcomes, not errors;
/// see `billing::engine::ApplyOutcome`.
#[derive(Debug, Error)]
pub enum BillingError {
    #[error("email is required")]
    MissingEmail,

    #[error("planType is required")]
    MissingPlanType,

    #[error("{0}")]
    Validation(String),

    #[error("Unknown plan type '{0}'")]
    UnknownPlan(String),

    #[error("No user matches {0}")]
    UserNotFound(String),

    #[error("Payment provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Payment provider request failed: {reason}")]
    ProviderRequestFailed { reason: String, retryable: bool },

    #[error("Webhook signature rejected: {0}")]
    InvalidSignature(String),

    #[error("Invalid API credential")]
    InvalidCredential,

    #[error("Tier '{0}' is not authorized for this API")]
    TierNotAuthorized(SubscriptionTier),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl BillingError {
    /// Whether repeating the same request could succeed. Unknown plans and
    /// missing users never fix themselves.
    pub fn is_retryable(&self) -> bool {
        match self {
            BillingError::ProviderRequestFailed { retryable, .. } => *retryable,
            BillingError::Store(StoreError::Database(e)) => is_transient(e),
            _ => false,
        }
    }
}

/// Connection loss, pool exhaustion, serialization failures and deadlocks.
/// Constraint violations and decode errors repeat on every attempt.
fn is_transient(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db) => matches!(db.code().as_deref(), Some("40001" | "40P01")),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryability() {
        assert!(BillingError::ProviderRequestFailed {
            reason: "timeout".into(),
            retryable: true
        }
        .is_retryable());
        assert!(!BillingError::UnknownPlan("x".into()).is_retryable());
        assert!(!BillingError::UserNotFound("a@x.com".into()).is_retryable());
        assert!(BillingError::Store(StoreError::Database(sqlx::Error::PoolTimedOut)).is_retryable());
    }

    #[test]
    fn test_permanent_store_errors_are_not_retryable() {
        assert!(!BillingError::Store(StoreError::Database(sqlx::Error::RowNotFound)).is_retryable());
        assert!(!BillingError::Store(StoreError::Corrupt("tier".into())).is_retryable());
        assert!(!BillingError::Store(StoreError::Conflict("evt_1".into())).is_retryable());
    }
}
