//! Error taxonomy of the booking consistency core.
//!
//! Callers branch on the variant, never on message text:
//!
//! - `NotFound`, `ConcurrencyConflict`, `OverlapConflict`, `Validation` are
//!   client-class outcomes. Conflicts may succeed if the caller re-reads and
//!   retries with fresh input.
//! - `TransientStore` is a connection/timeout class failure; retrying the same
//!   call unchanged may succeed.
//! - `Store` is everything else the store reported (constraint violations,
//!   corrupt rows, misuse of a session).

use thiserror::Error;

use gala_booking::{ProviderAssignment, TimeSlot};
use gala_core::DomainError;

use crate::session::StoreError;

pub type BookingResult<T> = Result<T, BookingError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BookingError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    /// Stale expected version, or a version-guarded write that matched no row
    /// (`current` is `None` when the stored version is unknown).
    #[error("{entity} {id} was modified concurrently (expected version {expected}, current {})", fmt_current(.current))]
    ConcurrencyConflict {
        entity: &'static str,
        id: String,
        expected: u64,
        current: Option<u64>,
    },

    #[error("slot {requested} overlaps booking {} of provider {} ({})", .conflicting.id, .conflicting.provider_id, .conflicting.slot)]
    OverlapConflict {
        conflicting: Box<ProviderAssignment>,
        requested: TimeSlot,
    },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("transient store failure: {0}")]
    TransientStore(StoreError),

    #[error(transparent)]
    Store(StoreError),
}

fn fmt_current(current: &Option<u64>) -> String {
    match current {
        Some(v) => v.to_string(),
        None => "unknown".to_string(),
    }
}

impl BookingError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn overlap(conflicting: ProviderAssignment, requested: TimeSlot) -> Self {
        Self::OverlapConflict {
            conflicting: Box::new(conflicting),
            requested,
        }
    }

    /// Version or scheduling conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            BookingError::ConcurrencyConflict { .. } | BookingError::OverlapConflict { .. }
        )
    }

    /// Worth retrying the same call unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BookingError::TransientStore(_))
    }

    /// 4xx-class outcome: the request itself cannot succeed as stated.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            BookingError::NotFound { .. }
                | BookingError::ConcurrencyConflict { .. }
                | BookingError::OverlapConflict { .. }
                | BookingError::Validation(_)
        )
    }
}

impl From<StoreError> for BookingError {
    fn from(value: StoreError) -> Self {
        if value.is_transient() {
            BookingError::TransientStore(value)
        } else {
            BookingError::Store(value)
        }
    }
}

impl From<DomainError> for BookingError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg)
            | DomainError::InvariantViolation(msg)
            | DomainError::InvalidId(msg) => BookingError::Validation(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use gala_booking::{AssignmentId, EventId, ProviderId};

    #[test]
    fn transient_store_errors_are_retryable() {
        let err: BookingError = StoreError::Timeout("pool".to_string()).into();
        assert!(err.is_retryable());
        assert!(!err.is_client_error());

        let err: BookingError = StoreError::constraint("guests_email_check", "bad email").into();
        assert!(matches!(err, BookingError::Store(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn conflicts_are_client_errors_but_not_retryable() {
        let err = BookingError::ConcurrencyConflict {
            entity: "event",
            id: "e1".to_string(),
            expected: 3,
            current: Some(4),
        };
        assert!(err.is_conflict());
        assert!(err.is_client_error());
        assert!(!err.is_retryable());
        assert_eq!(
            err.to_string(),
            "event e1 was modified concurrently (expected version 3, current 4)"
        );
    }

    #[test]
    fn overlap_message_names_the_existing_booking() {
        let at = |h| Utc.with_ymd_and_hms(2026, 5, 1, h, 0, 0).unwrap();
        let existing = ProviderAssignment {
            id: AssignmentId::new(),
            event_id: EventId::new(),
            provider_id: ProviderId::new(),
            slot: TimeSlot::new(at(10), at(12)).unwrap(),
            created_at: at(9),
        };
        let err = BookingError::overlap(existing.clone(), TimeSlot::new(at(11), at(13)).unwrap());
        assert!(err.to_string().contains(&existing.id.to_string()));
        assert!(err.is_conflict());
    }

    #[test]
    fn domain_failures_become_validation_errors() {
        let err: BookingError = DomainError::invalid_id("nope").into();
        assert_eq!(err, BookingError::Validation("nope".to_string()));
    }
}
