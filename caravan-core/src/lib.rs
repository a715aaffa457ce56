pub mod clock;
pub mod events;
pub mod identity;
pub mod payment;

pub use clock::{Clock, ManualClock, SystemClock};
pub use events::EventPublisher;
pub use identity::Actor;

/// Failure kinds surfaced by the hold manager and the pool coordinator.
///
/// Every variant is scoped to a single request; none is fatal to the process.
#[derive(Debug, thiserror::Error)]
pub enum DomainError {
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Expired: {0}")]
    Expired(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid: {0}")]
    Invalid(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Group is full: {0}")]
    Full(String),
    #[error("Duplicate: {0}")]
    Duplicate(String),
    #[error("Too early: {0}")]
    TooEarly(String),
    #[error("Not all members have paid: {0}")]
    NotAllPaid(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("Payment processor failure: {0}")]
    Upstream(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl DomainError {
    /// Stable machine-readable kind, used as the `error` field of API responses.
    pub fn kind(&self) -> &'static str {
        match self {
            DomainError::Conflict(_) => "conflict",
            DomainError::Expired(_) => "expired",
            DomainError::NotFound(_) => "not_found",
            DomainError::Invalid(_) => "invalid",
            DomainError::InvalidState(_) => "invalid_state",
            DomainError::Full(_) => "full",
            DomainError::Duplicate(_) => "duplicate",
            DomainError::TooEarly(_) => "too_early",
            DomainError::NotAllPaid(_) => "not_all_paid",
            DomainError::Forbidden(_) => "forbidden",
            DomainError::Validation(_) => "validation_error",
            DomainError::Upstream(_) => "upstream_error",
            DomainError::Store(_) => "internal_error",
        }
    }

    /// `Conflict` is the only kind a client may retry after refetching state.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DomainError::Conflict(_))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

pub type DomainResult<T> = Result<T, DomainError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(DomainError::Conflict("A1".into()).kind(), "conflict");
        assert_eq!(DomainError::NotAllPaid("g".into()).kind(), "not_all_paid");
        assert_eq!(
            DomainError::from(StoreError::Backend("down".into())).kind(),
            "internal_error"
        );
        assert!(DomainError::Conflict("A1".into()).is_retryable());
        assert!(!DomainError::Expired("t".into()).is_retryable());
    }
}
