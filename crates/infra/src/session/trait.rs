use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use gala_booking::{
    Event, EventAggregate, EventId, Guest, Invoice, Payment, PaymentId, PaymentStatus,
    ProviderAssignment, ProviderAssignmentFeature, ProviderId, Reservation, ReservationId,
    ReservationStatus, SubComponent, TimeSlot,
};
use gala_core::ExpectedVersion;

/// Storage-layer error.
///
/// These are **infrastructure errors** as opposed to domain errors. The split
/// that matters to callers is [`StoreError::is_transient`]: transient errors
/// (connection loss, timeouts, serialization failures) may succeed on retry,
/// everything else will fail the same way again.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store timed out: {0}")]
    Timeout(String),

    /// Serialization failure or deadlock detected by the store.
    #[error("transaction serialization failure: {0}")]
    Serialization(String),

    #[error("constraint '{constraint}' violated: {message}")]
    Constraint { constraint: String, message: String },

    /// Session used out of order (e.g. commit without begin).
    #[error("invalid transaction state: {0}")]
    TransactionState(String),

    /// A stored row could not be decoded into its domain record.
    #[error("corrupt row in {table}: {message}")]
    CorruptRow { table: &'static str, message: String },

    #[error("storage error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn constraint(constraint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Constraint {
            constraint: constraint.into(),
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::Unavailable(_) | StoreError::Timeout(_) | StoreError::Serialization(_)
        )
    }
}

/// One exclusive connection to the store, used by exactly one in-flight
/// transaction.
///
/// The session is **released when dropped**. A session dropped with an open
/// transaction never hands that transaction to the next user: the in-memory
/// store discards the work, the Postgres store closes the connection instead
/// of returning it to the pool.
///
/// ## Typed operations
///
/// The schema is fixed, so the session exposes one typed operation per
/// statement the consistency core needs instead of a generic `execute`.
/// Every operation runs inside the transaction opened by [`Session::begin`].
///
/// ## Row counts
///
/// Guarded writes report how many rows they touched (or return the written
/// row) so callers can tell "nothing matched" apart from success.
#[async_trait]
pub trait Session: Send {
    async fn begin(&mut self) -> Result<(), StoreError>;
    async fn commit(&mut self) -> Result<(), StoreError>;
    async fn rollback(&mut self) -> Result<(), StoreError>;

    async fn savepoint(&mut self, name: &str) -> Result<(), StoreError>;
    async fn release_savepoint(&mut self, name: &str) -> Result<(), StoreError>;
    async fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), StoreError>;

    // Event aggregate

    async fn insert_event(&mut self, event: &Event) -> Result<(), StoreError>;

    async fn insert_component(&mut self, component: &SubComponent) -> Result<(), StoreError>;

    /// Read an event while taking an exclusive row lock held until the
    /// transaction ends (`SELECT ... FOR UPDATE`).
    async fn lock_event(&mut self, id: EventId) -> Result<Option<Event>, StoreError>;

    async fn find_event(&mut self, id: EventId) -> Result<Option<Event>, StoreError>;

    /// Write the descriptive fields of `next` and bump the version by one,
    /// only if the stored version still equals `expected`.
    ///
    /// Returns `None` when no row matched (`WHERE id = ? AND version = ?`).
    async fn update_event(
        &mut self,
        next: &Event,
        expected: ExpectedVersion,
    ) -> Result<Option<Event>, StoreError>;

    /// Delete an event; owned rows go with it (cascade). Returns rows affected.
    async fn delete_event(&mut self, id: EventId) -> Result<u64, StoreError>;

    /// Read the composed aggregate (event + sub-components).
    async fn load_event_aggregate(&mut self, id: EventId) -> Result<Option<EventAggregate>, StoreError>;

    // Provider scheduling

    /// Transaction-scoped exclusive lock on a provider, serialising booking
    /// creation for that provider until commit/rollback.
    async fn lock_provider(&mut self, provider_id: ProviderId) -> Result<(), StoreError>;

    /// Any booking of `provider_id` whose slot intersects `slot`.
    async fn find_overlapping_assignment(
        &mut self,
        provider_id: ProviderId,
        slot: &TimeSlot,
    ) -> Result<Option<ProviderAssignment>, StoreError>;

    async fn insert_assignment(&mut self, assignment: &ProviderAssignment) -> Result<(), StoreError>;

    async fn list_assignments(&mut self, provider_id: ProviderId) -> Result<Vec<ProviderAssignment>, StoreError>;

    /// Insert, or overwrite the value fields of the row with the same
    /// (event, provider, feature) key. Returns the stored row.
    async fn upsert_assignment_feature(
        &mut self,
        feature: &ProviderAssignmentFeature,
    ) -> Result<ProviderAssignmentFeature, StoreError>;

    // Reservation → payment → invoice

    async fn insert_reservation(&mut self, reservation: &Reservation) -> Result<(), StoreError>;

    async fn set_reservation_status(
        &mut self,
        id: ReservationId,
        status: ReservationStatus,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    async fn find_reservation(&mut self, id: ReservationId) -> Result<Option<Reservation>, StoreError>;

    async fn insert_payment(&mut self, payment: &Payment) -> Result<(), StoreError>;

    async fn set_payment_status(
        &mut self,
        id: PaymentId,
        status: PaymentStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<u64, StoreError>;

    async fn find_payment(&mut self, id: PaymentId) -> Result<Option<Payment>, StoreError>;

    async fn insert_invoice(&mut self, invoice: &Invoice) -> Result<(), StoreError>;

    async fn find_invoice_for_reservation(
        &mut self,
        reservation_id: ReservationId,
    ) -> Result<Option<Invoice>, StoreError>;

    // Guests

    async fn insert_guest(&mut self, guest: &Guest) -> Result<(), StoreError>;

    async fn list_guests(&mut self, event_id: EventId) -> Result<Vec<Guest>, StoreError>;
}

/// Source of exclusive sessions (a connection pool).
#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn acquire(&self) -> Result<Box<dyn Session>, StoreError>;
}

#[async_trait]
impl<S> SessionProvider for Arc<S>
where
    S: SessionProvider + ?Sized,
{
    async fn acquire(&self) -> Result<Box<dyn Session>, StoreError> {
        (**self).acquire().await
    }
}
