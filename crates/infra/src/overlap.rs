//! Scheduling conflicts between bookings of the same provider.
//!
//! Slots that touch at an edge count as overlapping (see
//! [`TimeSlot::overlaps`]); the store query uses the same comparator.

use tracing::warn;

use gala_booking::{ProviderAssignment, ProviderId, TimeSlot};

use crate::error::{BookingError, BookingResult};
use crate::session::Session;

/// Fail with `OverlapConflict` if any stored booking of `provider_id`
/// intersects `slot`.
///
/// Must run in the same transaction as the insert it guards.
pub async fn assert_no_overlap(
    session: &mut dyn Session,
    provider_id: ProviderId,
    slot: &TimeSlot,
) -> BookingResult<()> {
    match session.find_overlapping_assignment(provider_id, slot).await? {
        Some(existing) => {
            warn!(
                provider_id = %provider_id,
                requested = %slot,
                conflicting = %existing.id,
                "booking overlaps an existing assignment"
            );
            Err(BookingError::overlap(existing, *slot))
        }
        None => Ok(()),
    }
}

/// Check candidate bookings against each other. For each overlapping pair the
/// earlier item is reported as the conflicting booking.
pub fn assert_disjoint(candidates: &[ProviderAssignment]) -> BookingResult<()> {
    for (later_idx, later) in candidates.iter().enumerate() {
        let earlier = candidates[..later_idx]
            .iter()
            .find(|c| c.provider_id == later.provider_id && c.slot.overlaps(&later.slot));
        if let Some(earlier) = earlier {
            warn!(
                provider_id = %later.provider_id,
                requested = %later.slot,
                conflicting = %earlier.id,
                "batch items overlap each other"
            );
            return Err(BookingError::overlap(earlier.clone(), later.slot));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{InMemoryStore, SessionProvider};
    use chrono::{DateTime, TimeZone, Utc};
    use gala_booking::{AssignmentId, Event, EventId};
    use gala_core::UserId;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, hour, 0, 0).unwrap()
    }

    fn booking(provider_id: ProviderId, start: u32, end: u32) -> ProviderAssignment {
        ProviderAssignment {
            id: AssignmentId::new(),
            event_id: EventId::new(),
            provider_id,
            slot: TimeSlot::new(at(start), at(end)).unwrap(),
            created_at: at(0),
        }
    }

    #[test]
    fn batch_items_for_different_providers_never_conflict() {
        let items = vec![booking(ProviderId::new(), 10, 12), booking(ProviderId::new(), 10, 12)];
        assert!(assert_disjoint(&items).is_ok());
    }

    #[test]
    fn batch_conflicts_name_the_earlier_item() {
        let provider = ProviderId::new();
        let items = vec![
            booking(provider, 8, 9),
            booking(provider, 10, 12),
            booking(provider, 11, 13),
        ];
        match assert_disjoint(&items).unwrap_err() {
            BookingError::OverlapConflict { conflicting, requested } => {
                assert_eq!(conflicting.id, items[1].id);
                assert_eq!(requested, items[2].slot);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn stored_bookings_block_intersecting_slots() {
        let store = InMemoryStore::new();
        let mut session = store.acquire().await.unwrap();
        session.begin().await.unwrap();

        let now = Utc::now();
        let actor = UserId::new();
        let event = Event {
            id: EventId::new(),
            name: "Gala".to_string(),
            description: None,
            event_date: now,
            location: None,
            version: 1,
            created_by: actor,
            modified_by: actor,
            created_at: now,
            updated_at: now,
        };
        session.insert_event(&event).await.unwrap();

        let provider = ProviderId::new();
        let mut existing = booking(provider, 10, 12);
        existing.event_id = event.id;
        session.insert_assignment(&existing).await.unwrap();

        let touching = TimeSlot::new(at(12), at(14)).unwrap();
        let err = assert_no_overlap(session.as_mut(), provider, &touching).await.unwrap_err();
        assert!(matches!(err, BookingError::OverlapConflict { ref conflicting, .. } if conflicting.id == existing.id));

        let later = TimeSlot::new(at(13), at(14)).unwrap();
        assert!(assert_no_overlap(session.as_mut(), provider, &later).await.is_ok());
        assert!(assert_no_overlap(session.as_mut(), ProviderId::new(), &touching).await.is_ok());
    }
}
