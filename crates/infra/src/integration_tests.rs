//! Integration tests for the booking core against the in-memory store.
//!
//! Tests: Service → TransactionGuard → Session → store
//!
//! Verifies:
//! - Aggregates are written all-or-nothing
//! - Stale versions and overlapping slots are rejected without side effects
//! - Guest imports isolate per-item failures
//! - Sessions are released on every exit path

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use anyhow::Context;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use proptest::prelude::*;

    use gala_booking::{
        EventChanges, EventId, FeatureId, NewAssignmentFeature, NewBookingWithPayment,
        NewCatering, NewDecoration, NewEvent, NewGuest, NewMusic, NewProviderAssignment, NewVenue,
        PaymentMethod, PaymentStatus, ProviderId, ReservationStatus, TaxRate,
    };
    use gala_core::{ExpectedVersion, UserId};

    use crate::error::BookingError;
    use crate::service::EventBookingService;
    use crate::session::{FaultPoint, InMemoryStore, SessionProvider, StoreError};

    type Service = EventBookingService<Arc<InMemoryStore>>;

    fn setup() -> (Service, Arc<InMemoryStore>) {
        let store = InMemoryStore::arc();
        (EventBookingService::new(store.clone(), TaxRate::DEFAULT), store)
    }

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 9, 12, hour, 0, 0).unwrap()
    }

    fn bare_event(name: &str) -> NewEvent {
        NewEvent {
            name: name.to_string(),
            description: Some("Annual fundraiser".to_string()),
            event_date: at(19),
            location: Some("Harbour hall".to_string()),
            created_by: UserId::new(),
            music: None,
            catering: None,
            decoration: None,
            venue: None,
        }
    }

    fn full_event(name: &str) -> NewEvent {
        NewEvent {
            music: Some(NewMusic {
                genre: "jazz".to_string(),
                performer: Some("Blue Note Trio".to_string()),
                duration_minutes: 90,
            }),
            catering: Some(NewCatering {
                menu: "tasting".to_string(),
                servings: 120,
                dietary_notes: None,
            }),
            decoration: Some(NewDecoration {
                theme: "nautical".to_string(),
                color_palette: Some("navy, white".to_string()),
            }),
            venue: Some(NewVenue {
                name: "Harbour hall".to_string(),
                address: "1 Quay St".to_string(),
                capacity: 200,
            }),
            ..bare_event(name)
        }
    }

    async fn create(service: &Service, name: &str) -> EventId {
        service
            .create_event_complete(bare_event(name))
            .await
            .unwrap()
            .event
            .id
    }

    fn slot(event_id: EventId, provider_id: ProviderId, start: u32, end: u32) -> NewProviderAssignment {
        NewProviderAssignment {
            event_id,
            provider_id,
            starts_at: at(start),
            ends_at: at(end),
        }
    }

    fn rename(to: &str) -> EventChanges {
        let mut changes = EventChanges::new(UserId::new());
        changes.name = Some(to.to_string());
        changes
    }

    // Event aggregate

    #[tokio::test]
    async fn event_is_created_with_every_opted_in_component() {
        let (service, store) = setup();

        let aggregate = service.create_event_complete(full_event("Gala")).await.unwrap();

        assert_eq!(aggregate.event.version, 1);
        assert_eq!(aggregate.component_count(), 4);
        assert_eq!(aggregate.music.as_ref().map(|m| m.genre.as_str()), Some("jazz"));
        let counts = store.row_counts().await;
        assert_eq!(counts.events, 1);
        assert_eq!(counts.components, 4);

        let read_back = service.get_event_aggregate(aggregate.event.id).await.unwrap();
        assert_eq!(read_back, aggregate);
    }

    #[tokio::test]
    async fn failing_component_insert_leaves_no_partial_aggregate() {
        let (service, store) = setup();
        store.fail_on(
            FaultPoint::InsertComponent(gala_booking::ComponentKind::Decoration),
            StoreError::Backend("disk full".to_string()),
        );

        let err = service.create_event_complete(full_event("Gala")).await.unwrap_err();

        assert!(matches!(err, BookingError::Store(StoreError::Backend(_))));
        let counts = store.row_counts().await;
        assert_eq!(counts.events, 0);
        assert_eq!(counts.components, 0);
        assert_eq!(store.open_sessions(), 0);
    }

    #[tokio::test]
    async fn venue_capacity_check_rolls_back_the_whole_event() {
        let (service, store) = setup();
        let mut input = full_event("Gala");
        if let Some(venue) = input.venue.as_mut() {
            venue.capacity = 0;
        }

        let err = service.create_event_complete(input).await.unwrap_err();

        match err {
            BookingError::Store(StoreError::Constraint { constraint, .. }) => {
                assert_eq!(constraint, "event_venue_capacity_check");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(store.row_counts().await.events, 0);
    }

    #[tokio::test]
    async fn invalid_input_is_rejected_before_a_session_is_acquired() {
        let (service, store) = setup();

        let err = service.create_event_complete(bare_event("  ")).await.unwrap_err();

        assert!(matches!(err, BookingError::Validation(_)));
        assert_eq!(store.sessions_acquired(), 0);
    }

    #[tokio::test]
    async fn missing_aggregates_are_not_found() {
        let (service, _store) = setup();
        let err = service.get_event_aggregate(EventId::new()).await.unwrap_err();
        assert!(matches!(err, BookingError::NotFound { entity: "event", .. }));
    }

    // Optimistic locking

    #[tokio::test]
    async fn successful_update_increments_version_by_one() {
        let (service, _store) = setup();
        let id = create(&service, "Gala").await;

        let updated = service
            .update_event_with_version(id, rename("Winter gala"), ExpectedVersion::new(1))
            .await
            .unwrap();

        assert_eq!(updated.version, 2);
        assert_eq!(updated.name, "Winter gala");
        assert_eq!(updated.location.as_deref(), Some("Harbour hall"));
        let stored = service.get_event_aggregate(id).await.unwrap().event;
        assert_eq!(stored, updated);
    }

    #[tokio::test]
    async fn stale_expected_version_conflicts_and_leaves_the_row_unchanged() {
        let (service, _store) = setup();
        let id = create(&service, "Gala").await;
        for (expected, name) in [(1, "v2"), (2, "v3"), (3, "v4")] {
            service
                .update_event_with_version(id, rename(name), ExpectedVersion::new(expected))
                .await
                .unwrap();
        }
        let before = service.get_event_aggregate(id).await.unwrap().event;
        assert_eq!(before.version, 4);

        let err = service
            .update_event_with_version(id, rename("lost update"), ExpectedVersion::new(3))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            BookingError::ConcurrencyConflict {
                entity: "event",
                id: id.to_string(),
                expected: 3,
                current: Some(4),
            }
        );
        assert!(err.is_conflict() && !err.is_retryable());
        let after = service.get_event_aggregate(id).await.unwrap().event;
        assert_eq!(after, before);
    }

    #[tokio::test]
    async fn updating_a_missing_event_is_not_found() {
        let (service, _store) = setup();
        let err = service
            .update_event_with_version(EventId::new(), rename("x"), ExpectedVersion::new(1))
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::NotFound { .. }));
    }

    #[tokio::test]
    async fn concurrent_updates_with_the_same_version_let_exactly_one_win() {
        let (service, _store) = setup();
        let id = create(&service, "Gala").await;

        let (a, b) = tokio::join!(
            service.update_event_with_version(id, rename("a"), ExpectedVersion::new(1)),
            service.update_event_with_version(id, rename("b"), ExpectedVersion::new(1)),
        );

        let results = [a, b];
        let winners = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1);
        let loser = results.iter().find_map(|r| r.as_ref().err()).unwrap();
        assert!(matches!(
            loser,
            BookingError::ConcurrencyConflict { expected: 1, current: Some(2), .. }
        ));
        assert_eq!(service.get_event_aggregate(id).await.unwrap().event.version, 2);
    }

    #[tokio::test]
    async fn transient_failures_are_retryable_and_roll_back() {
        let (service, store) = setup();
        let id = create(&service, "Gala").await;
        store.fail_on(FaultPoint::UpdateEvent, StoreError::Serialization("40001".to_string()));

        let err = service
            .update_event_with_version(id, rename("retry me"), ExpectedVersion::new(1))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(service.get_event_aggregate(id).await.unwrap().event.version, 1);

        let updated = service
            .update_event_with_version(id, rename("retry me"), ExpectedVersion::new(1))
            .await
            .unwrap();
        assert_eq!(updated.version, 2);
    }

    // Deletion

    #[tokio::test]
    async fn delete_cascades_to_everything_the_event_owns() {
        let (service, store) = setup();
        let id = service.create_event_complete(full_event("Gala")).await.unwrap().event.id;
        let provider = ProviderId::new();
        service.create_bookings_batch(vec![slot(id, provider, 10, 12)]).await.unwrap();
        service
            .import_guests(id, vec![NewGuest::new("Ada", "ada@example.com")])
            .await
            .unwrap();

        let summary = service.delete_event_complete(id).await.unwrap();

        assert_eq!(summary.event_id, id);
        assert_eq!(summary.rows_affected, 1);
        let counts = store.row_counts().await;
        assert_eq!(counts.events, 0);
        assert_eq!(counts.components, 0);
        assert_eq!(counts.assignments, 0);
        assert_eq!(counts.guests, 0);

        let err = service.delete_event_complete(id).await.unwrap_err();
        assert!(matches!(err, BookingError::NotFound { .. }));
    }

    #[tokio::test]
    async fn events_with_reservations_cannot_be_deleted() {
        let (service, store) = setup();
        let id = create(&service, "Gala").await;
        service
            .create_booking_with_payment(NewBookingWithPayment {
                event_id: id,
                user_id: UserId::new(),
                amount_cents: 5_000,
                method: PaymentMethod::Cash,
            })
            .await
            .unwrap();

        let err = service.delete_event_complete(id).await.unwrap_err();

        assert!(matches!(err, BookingError::Store(StoreError::Constraint { .. })));
        assert_eq!(store.row_counts().await.events, 1);
    }

    // Reservation → payment → invoice

    #[tokio::test]
    async fn booking_with_payment_confirms_and_invoices_atomically() -> anyhow::Result<()> {
        let (service, store) = setup();
        let id = create(&service, "Gala").await;

        let receipt = service
            .create_booking_with_payment(NewBookingWithPayment {
                event_id: id,
                user_id: UserId::new(),
                amount_cents: 10_000,
                method: PaymentMethod::Card,
            })
            .await?;

        assert_eq!(receipt.amounts.subtotal_cents, 10_000);
        assert_eq!(receipt.amounts.tax_cents, 1_600);
        assert_eq!(receipt.amounts.total_cents, 11_600);
        assert!(receipt.invoice_number.starts_with("INV-"));

        let mut session = store.acquire().await?;
        session.begin().await?;
        let reservation = session
            .find_reservation(receipt.reservation_id)
            .await?
            .context("reservation missing")?;
        let payment = session
            .find_payment(receipt.payment_id)
            .await?
            .context("payment missing")?;
        let invoice = session
            .find_invoice_for_reservation(receipt.reservation_id)
            .await?
            .context("invoice missing")?;

        assert_eq!(reservation.status, ReservationStatus::Confirmed);
        assert_eq!(payment.status, PaymentStatus::Completed);
        assert!(payment.completed_at.is_some());
        assert_eq!(payment.amount_cents, 11_600);
        assert_eq!(invoice.id, receipt.invoice_id);
        assert_eq!(invoice.total_cents, invoice.subtotal_cents + invoice.tax_cents);
        Ok(())
    }

    #[tokio::test]
    async fn failed_invoice_leaves_no_reservation_or_payment() {
        let (service, store) = setup();
        let id = create(&service, "Gala").await;
        store.fail_on(FaultPoint::InsertInvoice, StoreError::Unavailable("reset".to_string()));

        let err = service
            .create_booking_with_payment(NewBookingWithPayment {
                event_id: id,
                user_id: UserId::new(),
                amount_cents: 10_000,
                method: PaymentMethod::BankTransfer,
            })
            .await
            .unwrap_err();

        assert!(err.is_retryable());
        let counts = store.row_counts().await;
        assert_eq!(counts.reservations, 0);
        assert_eq!(counts.payments, 0);
        assert_eq!(counts.invoices, 0);
    }

    #[tokio::test]
    async fn booking_an_unknown_event_is_not_found() {
        let (service, store) = setup();
        let err = service
            .create_booking_with_payment(NewBookingWithPayment {
                event_id: EventId::new(),
                user_id: UserId::new(),
                amount_cents: 10_000,
                method: PaymentMethod::Card,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::NotFound { entity: "event", .. }));
        assert_eq!(store.row_counts().await.reservations, 0);
    }

    // Guest import

    #[tokio::test]
    async fn guest_import_isolates_the_invalid_email() {
        let (service, _store) = setup();
        let id = create(&service, "Gala").await;
        let guests = vec![
            NewGuest::new("Ada", "ada@example.com"),
            NewGuest::new("Brian", "brian@example.com"),
            NewGuest::new("Carmen", "carmen-at-example.com"),
            NewGuest::new("Dmitri", "dmitri@example.com"),
            NewGuest::new("Eun", "eun@example.com"),
        ];

        let report = service.import_guests(id, guests).await.unwrap();

        assert_eq!(report.total, 5);
        assert_eq!(report.succeeded, 4);
        assert_eq!(report.failed, 1);
        assert_eq!(report.succeeded + report.failed, report.total);
        let failed = &report.details[2];
        assert_eq!(failed.index, 2);
        assert!(!failed.success);
        assert!(failed.error.as_deref().unwrap_or_default().contains("guests_email_check"));

        let stored = service.list_guests(id).await.unwrap();
        assert_eq!(stored.len(), 4);
        assert!(stored.iter().all(|g| g.email != "carmen-at-example.com"));
    }

    #[tokio::test]
    async fn unnamed_guests_fail_individually() {
        let (service, _store) = setup();
        let id = create(&service, "Gala").await;

        let report = service
            .import_guests(
                id,
                vec![NewGuest::new("", "nobody@example.com"), NewGuest::new("Ada", "ada@example.com")],
            )
            .await
            .unwrap();

        assert_eq!((report.succeeded, report.failed), (1, 1));
        assert!(report.details[0].error.as_deref().unwrap_or_default().contains("validation"));
    }

    #[tokio::test]
    async fn importing_into_an_unknown_event_is_not_found() {
        let (service, store) = setup();
        let err = service
            .import_guests(EventId::new(), vec![NewGuest::new("Ada", "ada@example.com")])
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::NotFound { .. }));
        assert_eq!(store.row_counts().await.guests, 0);
    }

    #[test]
    fn import_report_serializes_for_callers() {
        let report = crate::service::GuestImportReport {
            event_id: EventId::new(),
            total: 0,
            succeeded: 0,
            failed: 0,
            details: Vec::new(),
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["total"], 0);
        assert!(json["details"].as_array().unwrap().is_empty());
    }

    // Provider scheduling

    #[tokio::test]
    async fn overlapping_booking_names_the_existing_one() {
        let (service, _store) = setup();
        let event_a = create(&service, "A").await;
        let event_b = create(&service, "B").await;
        let provider = ProviderId::new();

        let first = service
            .create_bookings_batch(vec![slot(event_a, provider, 10, 12)])
            .await
            .unwrap();

        let err = service
            .create_bookings_batch(vec![slot(event_b, provider, 11, 13)])
            .await
            .unwrap_err();

        match err {
            BookingError::OverlapConflict { conflicting, requested } => {
                assert_eq!(conflicting.id, first[0].id);
                assert_eq!(conflicting.event_id, event_a);
                assert_eq!(requested.start(), at(11));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(service.list_assignments(provider).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn slots_touching_at_the_boundary_count_as_overlapping() {
        let (service, _store) = setup();
        let event = create(&service, "A").await;
        let provider = ProviderId::new();
        service
            .create_bookings_batch(vec![slot(event, provider, 10, 12)])
            .await
            .unwrap();

        let err = service
            .create_bookings_batch(vec![slot(event, provider, 12, 14)])
            .await
            .unwrap_err();

        assert!(matches!(err, BookingError::OverlapConflict { .. }));
    }

    #[tokio::test]
    async fn disjoint_bookings_and_other_providers_succeed() {
        let (service, store) = setup();
        let event = create(&service, "A").await;
        let provider = ProviderId::new();

        service
            .create_bookings_batch(vec![slot(event, provider, 10, 12)])
            .await
            .unwrap();
        service
            .create_bookings_batch(vec![
                slot(event, provider, 13, 14),
                slot(event, ProviderId::new(), 10, 12),
            ])
            .await
            .unwrap();

        assert_eq!(store.row_counts().await.assignments, 3);
        let listed = service.list_assignments(provider).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed[0].slot.start() < listed[1].slot.start());
    }

    #[tokio::test]
    async fn one_conflict_aborts_the_whole_batch() {
        let (service, store) = setup();
        let event = create(&service, "A").await;
        let provider = ProviderId::new();
        service
            .create_bookings_batch(vec![slot(event, provider, 10, 12)])
            .await
            .unwrap();

        let err = service
            .create_bookings_batch(vec![
                slot(event, ProviderId::new(), 8, 9),
                slot(event, provider, 11, 12),
            ])
            .await
            .unwrap_err();

        assert!(matches!(err, BookingError::OverlapConflict { .. }));
        assert_eq!(store.row_counts().await.assignments, 1);
    }

    #[tokio::test]
    async fn items_of_one_batch_may_not_overlap_each_other() {
        let (service, store) = setup();
        let event = create(&service, "A").await;
        let provider = ProviderId::new();

        let err = service
            .create_bookings_batch(vec![slot(event, provider, 10, 12), slot(event, provider, 11, 13)])
            .await
            .unwrap_err();

        assert!(matches!(err, BookingError::OverlapConflict { .. }));
        assert_eq!(store.row_counts().await.assignments, 0);
    }

    #[tokio::test]
    async fn inverted_slots_are_validation_errors() {
        let (service, store) = setup();
        let event = EventId::new();
        let err = service
            .create_bookings_batch(vec![slot(event, ProviderId::new(), 12, 10)])
            .await
            .unwrap_err();
        assert!(matches!(err, BookingError::Validation(_)));
        assert_eq!(store.sessions_acquired(), 0);
    }

    #[tokio::test]
    async fn validate_bookings_checks_without_inserting() {
        let (service, store) = setup();
        let event = create(&service, "A").await;
        let provider = ProviderId::new();
        service
            .create_bookings_batch(vec![slot(event, provider, 10, 12)])
            .await
            .unwrap();

        service
            .validate_bookings(vec![slot(event, provider, 14, 15)])
            .await
            .unwrap();
        let err = service
            .validate_bookings(vec![slot(event, provider, 9, 10)])
            .await
            .unwrap_err();

        assert!(matches!(err, BookingError::OverlapConflict { .. }));
        assert_eq!(store.row_counts().await.assignments, 1);
    }

    // Features

    #[tokio::test]
    async fn upserting_the_same_feature_key_overwrites_in_place() {
        let (service, store) = setup();
        let event_id = create(&service, "A").await;
        let provider_id = ProviderId::new();
        let feature_id = FeatureId::new();
        let feature = |quantity, unit_price_cents| NewAssignmentFeature {
            event_id,
            provider_id,
            feature_id,
            quantity,
            unit_price_cents,
            notes: None,
        };

        service.upsert_booking_features(vec![feature(2, 1_500)]).await.unwrap();
        let rows = service.upsert_booking_features(vec![feature(3, 1_250)]).await.unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].quantity, 3);
        assert_eq!(rows[0].unit_price_cents, 1_250);
        assert_eq!(store.row_counts().await.features, 1);

        let err = service.upsert_booking_features(vec![feature(1, -1)]).await.unwrap_err();
        assert!(matches!(err, BookingError::Validation(_)));
    }

    // Session hygiene

    #[tokio::test]
    async fn every_path_releases_its_session() {
        let (service, store) = setup();
        let id = create(&service, "A").await;
        let provider = ProviderId::new();

        let _ = service.create_bookings_batch(vec![slot(id, provider, 10, 12)]).await;
        let _ = service.create_bookings_batch(vec![slot(id, provider, 10, 12)]).await;
        let _ = service
            .update_event_with_version(id, rename("x"), ExpectedVersion::new(9))
            .await;
        let _ = service.delete_event_complete(EventId::new()).await;
        store.fail_on(FaultPoint::Commit, StoreError::Timeout("commit".to_string()));
        let _ = service.create_event_complete(bare_event("B")).await;

        assert!(store.sessions_acquired() >= 6);
        assert_eq!(store.open_sessions(), 0);
    }

    #[tokio::test]
    async fn cancelled_operations_do_not_leak_their_transaction() {
        let (service, store) = setup();

        // Holding a session blocks the service until the timeout cancels it.
        let held = store.acquire().await.unwrap();
        let pending = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            service.create_event_complete(bare_event("A")),
        )
        .await;
        assert!(pending.is_err());
        drop(held);

        assert_eq!(store.open_sessions(), 0);
        assert_eq!(store.row_counts().await.events, 0);
        create(&service, "B").await;
        assert_eq!(store.row_counts().await.events, 1);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn each_successful_update_bumps_the_version_once(updates in 1usize..8, offset in 0i64..48) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async {
                let (service, _store) = setup();
                let mut input = bare_event("Gala");
                input.event_date = at(0) + Duration::hours(offset);
                let id = service.create_event_complete(input).await.unwrap().event.id;

                for n in 0..updates {
                    let expected = ExpectedVersion::new(n as u64 + 1);
                    let updated = service
                        .update_event_with_version(id, rename(&format!("v{n}")), expected)
                        .await
                        .unwrap();
                    assert_eq!(updated.version, expected.next());
                }
                let stored = service.get_event_aggregate(id).await.unwrap().event;
                assert_eq!(stored.version, updates as u64 + 1);
            });
        }
    }
}
