//! Aggregate composition: the booking operations exposed to callers.
//!
//! Every public operation runs in exactly one transaction obtained from the
//! [`TransactionGuard`]. Inputs are validated before a session is acquired,
//! so malformed requests never touch the store.
//!
//! ## Operation map
//!
//! | Operation | Writes | Failure modes |
//! |-----------|--------|---------------|
//! | `create_event_complete` | event + opted-in components | `Validation`, store |
//! | `update_event_with_version` | event (version + 1) | `NotFound`, `ConcurrencyConflict` |
//! | `delete_event_complete` | event (cascade) | `NotFound` |
//! | `create_booking_with_payment` | reservation, payment, 2 status updates, invoice | `NotFound`, `Validation` |
//! | `import_guests` | one guest per savepoint | `NotFound` (event); per-guest failures are reported |
//! | `create_bookings_batch` | all assignments or none | `OverlapConflict`, `Validation` |
//! | `upsert_booking_features` | one row per feature key | `Validation`, store |

use std::collections::BTreeSet;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use gala_booking::{
    AssignmentId, BookingReceipt, Event, EventAggregate, EventChanges, EventId, Guest, GuestId,
    Invoice, InvoiceAmounts, InvoiceId, NewAssignmentFeature, NewBookingWithPayment, NewEvent,
    NewGuest, NewProviderAssignment, Payment, PaymentId, PaymentStatus, ProviderAssignment,
    ProviderAssignmentFeature, ProviderId, Reservation, ReservationId, ReservationStatus,
    SubComponent, TaxRate,
};
use gala_core::ExpectedVersion;

use crate::concurrency::{lock_and_check_version, require_guarded_write};
use crate::config::CoreConfig;
use crate::error::{BookingError, BookingResult};
use crate::overlap::{assert_disjoint, assert_no_overlap};
use crate::session::{Session, SessionProvider, StoreError};
use crate::transaction::{execute_batch, BatchOperation, OperationOutcome, TransactionGuard};

/// Result of `delete_event_complete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionSummary {
    pub event_id: EventId,
    pub rows_affected: u64,
}

/// Per-guest line of an import report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestImportDetail {
    /// Position in the submitted list.
    pub index: usize,
    pub email: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guest_id: Option<GuestId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of `import_guests`. `succeeded + failed == total`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestImportReport {
    pub event_id: EventId,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub details: Vec<GuestImportDetail>,
}

impl GuestImportReport {
    fn from_outcomes(
        event_id: EventId,
        emails: Vec<String>,
        outcomes: Vec<OperationOutcome<GuestId, BookingError>>,
    ) -> Self {
        let details: Vec<GuestImportDetail> = outcomes
            .into_iter()
            .zip(emails)
            .map(|(outcome, email)| match outcome.result {
                Ok(guest_id) => GuestImportDetail {
                    index: outcome.index,
                    email,
                    success: true,
                    guest_id: Some(guest_id),
                    error: None,
                },
                Err(err) => GuestImportDetail {
                    index: outcome.index,
                    email,
                    success: false,
                    guest_id: None,
                    error: Some(err.to_string()),
                },
            })
            .collect();

        let succeeded = details.iter().filter(|d| d.success).count();
        Self {
            event_id,
            total: details.len(),
            succeeded,
            failed: details.len() - succeeded,
            details,
        }
    }
}

/// Booking operations over one session provider.
#[derive(Debug, Clone)]
pub struct EventBookingService<P> {
    guard: TransactionGuard<P>,
    tax_rate: TaxRate,
}

impl<P> EventBookingService<P> {
    pub fn new(provider: P, tax_rate: TaxRate) -> Self {
        Self {
            guard: TransactionGuard::new(provider),
            tax_rate,
        }
    }

    pub fn from_config(provider: P, config: &CoreConfig) -> Self {
        Self::new(provider, config.tax_rate)
    }

    pub fn guard(&self) -> &TransactionGuard<P> {
        &self.guard
    }

    pub fn tax_rate(&self) -> TaxRate {
        self.tax_rate
    }
}

impl<P> EventBookingService<P>
where
    P: SessionProvider,
{
    /// Create an event with its opted-in sub-components and return the
    /// composed aggregate as stored. Nothing is persisted if any insert fails.
    #[instrument(skip(self, input), fields(event_id = tracing::field::Empty), err)]
    pub async fn create_event_complete(&self, input: NewEvent) -> BookingResult<EventAggregate> {
        input.validate()?;
        let id = EventId::new();
        tracing::Span::current().record("event_id", tracing::field::display(id));

        let (event, components) = input.into_records(id, Utc::now());
        let aggregate = self
            .guard
            .run_in_transaction(move |session| Box::pin(insert_aggregate(session, event, components)))
            .await?;

        info!(event_id = %id, components = aggregate.component_count(), "event created");
        Ok(aggregate)
    }

    /// Apply `changes` if the stored version still equals `expected`.
    /// Returns the event at version `expected + 1`.
    #[instrument(skip(self, changes), fields(event_id = %id, expected_version = %expected), err)]
    pub async fn update_event_with_version(
        &self,
        id: EventId,
        changes: EventChanges,
        expected: ExpectedVersion,
    ) -> BookingResult<Event> {
        changes.validate()?;
        let updated = self
            .guard
            .run_in_transaction(move |session| {
                Box::pin(update_versioned(session, id, changes, expected))
            })
            .await?;

        info!(event_id = %id, version = updated.version, "event updated");
        Ok(updated)
    }

    /// Delete an event and everything it owns.
    #[instrument(skip(self), fields(event_id = %id), err)]
    pub async fn delete_event_complete(&self, id: EventId) -> BookingResult<DeletionSummary> {
        let rows_affected = self
            .guard
            .run_in_transaction(move |session| Box::pin(delete_event(session, id)))
            .await?;

        info!(event_id = %id, "event deleted");
        Ok(DeletionSummary {
            event_id: id,
            rows_affected,
        })
    }

    /// Reservation, payment and invoice in one atomic unit.
    #[instrument(
        skip(self, input),
        fields(event_id = %input.event_id, amount_cents = input.amount_cents),
        err
    )]
    pub async fn create_booking_with_payment(
        &self,
        input: NewBookingWithPayment,
    ) -> BookingResult<BookingReceipt> {
        input.validate()?;
        let amounts = self.tax_rate.invoice_amounts(input.amount_cents)?;

        let receipt = self
            .guard
            .run_in_transaction(move |session| Box::pin(book_with_payment(session, input, amounts)))
            .await?;

        info!(
            reservation_id = %receipt.reservation_id,
            invoice_number = %receipt.invoice_number,
            total_cents = receipt.amounts.total_cents,
            "booking confirmed"
        );
        Ok(receipt)
    }

    /// Insert each guest under its own savepoint; failed guests are reported,
    /// not fatal. Fails as a whole only if the event does not exist.
    #[instrument(skip(self, guests), fields(event_id = %event_id, total = guests.len()), err)]
    pub async fn import_guests(
        &self,
        event_id: EventId,
        guests: Vec<NewGuest>,
    ) -> BookingResult<GuestImportReport> {
        let report = self
            .guard
            .run_in_transaction(move |session| Box::pin(import_into(session, event_id, guests)))
            .await?;

        if report.failed > 0 {
            warn!(
                event_id = %event_id,
                succeeded = report.succeeded,
                failed = report.failed,
                "guest import completed with failures"
            );
        } else {
            info!(event_id = %event_id, succeeded = report.succeeded, "guest import completed");
        }
        Ok(report)
    }

    /// All-or-nothing booking of providers. Fails fast on the first conflict,
    /// against stored bookings first and then between the items themselves.
    #[instrument(skip(self, items), fields(items = items.len()), err)]
    pub async fn create_bookings_batch(
        &self,
        items: Vec<NewProviderAssignment>,
    ) -> BookingResult<Vec<ProviderAssignment>> {
        let candidates = prepare_assignments(items)?;
        let inserted = self
            .guard
            .run_in_transaction(move |session| Box::pin(insert_assignments(session, candidates)))
            .await?;

        info!(inserted = inserted.len(), "bookings created");
        Ok(inserted)
    }

    /// Dry run of `create_bookings_batch`: same checks, nothing inserted.
    #[instrument(skip(self, items), fields(items = items.len()), err)]
    pub async fn validate_bookings(&self, items: Vec<NewProviderAssignment>) -> BookingResult<()> {
        let candidates = prepare_assignments(items)?;
        self.guard
            .run_in_transaction(move |session| {
                Box::pin(async move { check_assignments(session, &candidates).await })
            })
            .await
    }

    /// Insert or overwrite one feature row per (event, provider, feature).
    #[instrument(skip(self, items), fields(items = items.len()), err)]
    pub async fn upsert_booking_features(
        &self,
        items: Vec<NewAssignmentFeature>,
    ) -> BookingResult<Vec<ProviderAssignmentFeature>> {
        for item in &items {
            item.validate()?;
        }
        let now = Utc::now();
        let features: Vec<ProviderAssignmentFeature> =
            items.into_iter().map(|item| item.into_feature(now)).collect();

        self.guard
            .run_in_transaction(move |session| Box::pin(upsert_features(session, features)))
            .await
    }

    #[instrument(skip(self), fields(event_id = %id), err)]
    pub async fn get_event_aggregate(&self, id: EventId) -> BookingResult<EventAggregate> {
        self.guard
            .run_in_transaction(move |session| {
                Box::pin(async move {
                    session
                        .load_event_aggregate(id)
                        .await?
                        .ok_or_else(|| BookingError::not_found("event", id))
                })
            })
            .await
    }

    pub async fn list_guests(&self, event_id: EventId) -> BookingResult<Vec<Guest>> {
        self.guard
            .run_in_transaction(move |session| {
                Box::pin(async move { Ok::<_, BookingError>(session.list_guests(event_id).await?) })
            })
            .await
    }

    pub async fn list_assignments(&self, provider_id: ProviderId) -> BookingResult<Vec<ProviderAssignment>> {
        self.guard
            .run_in_transaction(move |session| {
                Box::pin(async move {
                    Ok::<_, BookingError>(session.list_assignments(provider_id).await?)
                })
            })
            .await
    }
}

// Units of work. Each runs on the session of an already-open transaction.

async fn insert_aggregate(
    session: &mut dyn Session,
    event: Event,
    components: Vec<SubComponent>,
) -> BookingResult<EventAggregate> {
    session.insert_event(&event).await?;
    for component in &components {
        session.insert_component(component).await?;
    }
    session.load_event_aggregate(event.id).await?.ok_or_else(|| {
        BookingError::Store(StoreError::Backend(format!(
            "event {} missing right after insert",
            event.id
        )))
    })
}

async fn update_versioned(
    session: &mut dyn Session,
    id: EventId,
    changes: EventChanges,
    expected: ExpectedVersion,
) -> BookingResult<Event> {
    let current = lock_and_check_version::<Event>(&mut *session, id, expected).await?;
    let next = changes.apply_to(&current, Utc::now());
    let written = session.update_event(&next, expected).await?;
    require_guarded_write::<Event>(written, &id, expected)
}

async fn delete_event(session: &mut dyn Session, id: EventId) -> BookingResult<u64> {
    match session.delete_event(id).await? {
        0 => Err(BookingError::not_found("event", id)),
        rows => Ok(rows),
    }
}

fn require_one(rows: u64, entity: &'static str, id: impl ToString) -> BookingResult<()> {
    if rows == 0 {
        Err(BookingError::not_found(entity, id))
    } else {
        Ok(())
    }
}

async fn book_with_payment(
    session: &mut dyn Session,
    input: NewBookingWithPayment,
    amounts: InvoiceAmounts,
) -> BookingResult<BookingReceipt> {
    if session.find_event(input.event_id).await?.is_none() {
        return Err(BookingError::not_found("event", input.event_id));
    }

    let now = Utc::now();
    let reservation = Reservation {
        id: ReservationId::new(),
        event_id: input.event_id,
        user_id: input.user_id,
        status: ReservationStatus::Pending,
        total_cents: input.amount_cents,
        created_at: now,
        updated_at: now,
    };
    session.insert_reservation(&reservation).await?;

    let payment = Payment {
        id: PaymentId::new(),
        reservation_id: reservation.id,
        amount_cents: amounts.total_cents,
        method: input.method,
        status: PaymentStatus::Processing,
        created_at: now,
        completed_at: None,
    };
    session.insert_payment(&payment).await?;

    let rows = session
        .set_payment_status(payment.id, PaymentStatus::Completed, Some(Utc::now()))
        .await?;
    require_one(rows, "payment", payment.id)?;

    let rows = session
        .set_reservation_status(reservation.id, ReservationStatus::Confirmed, Utc::now())
        .await?;
    require_one(rows, "reservation", reservation.id)?;

    let invoice = Invoice::issue(InvoiceId::new(), reservation.id, amounts, Utc::now());
    session.insert_invoice(&invoice).await?;

    Ok(BookingReceipt {
        reservation_id: reservation.id,
        payment_id: payment.id,
        invoice_id: invoice.id,
        invoice_number: invoice.invoice_number,
        amounts,
    })
}

async fn import_into(
    session: &mut dyn Session,
    event_id: EventId,
    guests: Vec<NewGuest>,
) -> BookingResult<GuestImportReport> {
    if session.find_event(event_id).await?.is_none() {
        return Err(BookingError::not_found("event", event_id));
    }

    let now = Utc::now();
    let emails: Vec<String> = guests.iter().map(|g| g.email.clone()).collect();
    let operations: Vec<BatchOperation<GuestId, BookingError>> = guests
        .into_iter()
        .enumerate()
        .map(|(index, guest)| {
            BatchOperation::new(format!("guest[{index}]"), move |session| {
                Box::pin(insert_guest(session, guest, event_id, now))
            })
        })
        .collect();

    let outcomes = execute_batch(session, operations).await?;
    Ok(GuestImportReport::from_outcomes(event_id, emails, outcomes))
}

async fn insert_guest(
    session: &mut dyn Session,
    guest: NewGuest,
    event_id: EventId,
    now: chrono::DateTime<Utc>,
) -> BookingResult<GuestId> {
    let guest = guest.into_guest(GuestId::new(), event_id, now)?;
    session.insert_guest(&guest).await?;
    Ok(guest.id)
}

fn prepare_assignments(items: Vec<NewProviderAssignment>) -> BookingResult<Vec<ProviderAssignment>> {
    let now = Utc::now();
    items
        .into_iter()
        .map(|item| {
            item.into_assignment(AssignmentId::new(), now)
                .map_err(BookingError::from)
        })
        .collect()
}

/// Lock every provider involved (sorted, so concurrent batches cannot
/// deadlock), then check stored bookings and the batch itself.
async fn check_assignments(
    session: &mut dyn Session,
    candidates: &[ProviderAssignment],
) -> BookingResult<()> {
    let providers: BTreeSet<ProviderId> = candidates.iter().map(|c| c.provider_id).collect();
    for provider_id in providers {
        session.lock_provider(provider_id).await?;
    }
    for candidate in candidates {
        assert_no_overlap(&mut *session, candidate.provider_id, &candidate.slot).await?;
    }
    assert_disjoint(candidates)
}

async fn insert_assignments(
    session: &mut dyn Session,
    candidates: Vec<ProviderAssignment>,
) -> BookingResult<Vec<ProviderAssignment>> {
    check_assignments(&mut *session, &candidates).await?;
    for candidate in &candidates {
        session.insert_assignment(candidate).await?;
    }
    Ok(candidates)
}

async fn upsert_features(
    session: &mut dyn Session,
    features: Vec<ProviderAssignmentFeature>,
) -> BookingResult<Vec<ProviderAssignmentFeature>> {
    let mut stored = Vec::with_capacity(features.len());
    for feature in &features {
        stored.push(session.upsert_assignment_feature(feature).await?);
    }
    Ok(stored)
}
