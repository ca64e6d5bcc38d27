//! Optimistic concurrency on aggregate roots.
//!
//! An update first locks the stored row and compares versions
//! ([`lock_and_check_version`]); the write itself then re-states the version
//! predicate, and a write that matched no row is reported through
//! [`require_guarded_write`]. Both failures surface as
//! [`BookingError::ConcurrencyConflict`].

use futures::future::BoxFuture;
use tracing::warn;

use gala_booking::Event;
use gala_core::{AggregateRoot, ExpectedVersion};

use crate::error::{BookingError, BookingResult};
use crate::session::{Session, StoreError};

/// An aggregate root that can be read under an exclusive row lock.
pub trait Lockable: AggregateRoot + Sized {
    /// Entity name used in error payloads.
    const ENTITY: &'static str;

    /// `SELECT ... FOR UPDATE`; the lock is held until the transaction ends.
    fn lock_for_update<'s>(
        session: &'s mut dyn Session,
        id: Self::Id,
    ) -> BoxFuture<'s, Result<Option<Self>, StoreError>>;
}

impl Lockable for Event {
    const ENTITY: &'static str = "event";

    fn lock_for_update<'s>(
        session: &'s mut dyn Session,
        id: Self::Id,
    ) -> BoxFuture<'s, Result<Option<Self>, StoreError>> {
        session.lock_event(id)
    }
}

/// Lock `id` and fail unless its stored version equals `expected`.
///
/// Nothing is written here; on success the caller holds the row lock and may
/// issue its version-guarded update.
pub async fn lock_and_check_version<A>(
    session: &mut dyn Session,
    id: A::Id,
    expected: ExpectedVersion,
) -> BookingResult<A>
where
    A: Lockable,
{
    let current = A::lock_for_update(session, id.clone())
        .await?
        .ok_or_else(|| BookingError::not_found(A::ENTITY, &id))?;

    if !expected.matches(current.version()) {
        warn!(
            entity = A::ENTITY,
            id = %id,
            expected = expected.get(),
            current = current.version(),
            "stale expected version"
        );
        return Err(BookingError::ConcurrencyConflict {
            entity: A::ENTITY,
            id: id.to_string(),
            expected: expected.get(),
            current: Some(current.version()),
        });
    }

    Ok(current)
}

/// Turn the result of a `WHERE id = ? AND version = ?` write into the written
/// row, or a conflict when nothing matched.
pub fn require_guarded_write<A>(
    written: Option<A>,
    id: &A::Id,
    expected: ExpectedVersion,
) -> BookingResult<A>
where
    A: Lockable,
{
    written.ok_or_else(|| {
        warn!(entity = A::ENTITY, id = %id, expected = expected.get(), "guarded write matched no row");
        BookingError::ConcurrencyConflict {
            entity: A::ENTITY,
            id: id.to_string(),
            expected: expected.get(),
            current: None,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{InMemoryStore, SessionProvider};
    use chrono::Utc;
    use gala_booking::EventId;
    use gala_core::UserId;

    fn event(version: u64) -> Event {
        let now = Utc::now();
        let actor = UserId::new();
        Event {
            id: EventId::new(),
            name: "Gala".to_string(),
            description: None,
            event_date: now,
            location: None,
            version,
            created_by: actor,
            modified_by: actor,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn matching_versions_return_the_locked_row() {
        let store = InMemoryStore::new();
        let mut session = store.acquire().await.unwrap();
        session.begin().await.unwrap();
        let row = event(4);
        session.insert_event(&row).await.unwrap();

        let locked = lock_and_check_version::<Event>(session.as_mut(), row.id, ExpectedVersion::new(4))
            .await
            .unwrap();
        assert_eq!(locked, row);
    }

    #[tokio::test]
    async fn stale_versions_report_both_sides() {
        let store = InMemoryStore::new();
        let mut session = store.acquire().await.unwrap();
        session.begin().await.unwrap();
        let row = event(4);
        session.insert_event(&row).await.unwrap();

        let err = lock_and_check_version::<Event>(session.as_mut(), row.id, ExpectedVersion::new(3))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            BookingError::ConcurrencyConflict {
                entity: "event",
                id: row.id.to_string(),
                expected: 3,
                current: Some(4),
            }
        );
    }

    #[tokio::test]
    async fn missing_rows_are_not_found() {
        let store = InMemoryStore::new();
        let mut session = store.acquire().await.unwrap();
        session.begin().await.unwrap();

        let err = lock_and_check_version::<Event>(session.as_mut(), EventId::new(), ExpectedVersion::new(1))
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::NotFound { entity: "event", .. }));
    }

    #[test]
    fn zero_row_writes_are_conflicts_with_unknown_current_version() {
        let id = EventId::new();
        let err = require_guarded_write::<Event>(None, &id, ExpectedVersion::new(2)).unwrap_err();
        assert!(matches!(err, BookingError::ConcurrencyConflict { current: None, expected: 2, .. }));
    }
}
