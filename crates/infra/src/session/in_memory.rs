use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use gala_booking::{
    AssignmentId, Catering, ComponentKind, Decoration, Event, EventAggregate, EventId, FeatureKey,
    Guest, GuestId, Invoice, InvoiceId, Music, Payment, PaymentId, PaymentStatus,
    ProviderAssignment, ProviderAssignmentFeature, ProviderId, Reservation, ReservationId,
    ReservationStatus, SubComponent, TimeSlot, Venue,
};
use gala_core::ExpectedVersion;

use super::r#trait::{Session, SessionProvider, StoreError};

/// Statement at which an armed fault fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    Begin,
    Commit,
    InsertEvent,
    InsertComponent(ComponentKind),
    UpdateEvent,
    InsertAssignment,
    UpsertFeature,
    InsertReservation,
    InsertPayment,
    InsertInvoice,
    InsertGuest,
}

/// Number of committed rows per table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RowCounts {
    pub events: usize,
    pub components: usize,
    pub assignments: usize,
    pub features: usize,
    pub reservations: usize,
    pub payments: usize,
    pub invoices: usize,
    pub guests: usize,
}

#[derive(Debug, Clone, Default)]
struct Tables {
    events: BTreeMap<EventId, Event>,
    music: HashMap<EventId, Music>,
    catering: HashMap<EventId, Catering>,
    decoration: HashMap<EventId, Decoration>,
    venues: HashMap<EventId, Venue>,
    assignments: BTreeMap<AssignmentId, ProviderAssignment>,
    features: BTreeMap<FeatureKey, ProviderAssignmentFeature>,
    reservations: BTreeMap<ReservationId, Reservation>,
    payments: BTreeMap<PaymentId, Payment>,
    invoices: BTreeMap<InvoiceId, Invoice>,
    guests: BTreeMap<GuestId, Guest>,
}

impl Tables {
    fn require_event(&self, id: EventId, constraint: &str) -> Result<(), StoreError> {
        if self.events.contains_key(&id) {
            Ok(())
        } else {
            Err(StoreError::constraint(
                constraint,
                format!("event {id} does not exist"),
            ))
        }
    }

    fn counts(&self) -> RowCounts {
        RowCounts {
            events: self.events.len(),
            components: self.music.len()
                + self.catering.len()
                + self.decoration.len()
                + self.venues.len(),
            assignments: self.assignments.len(),
            features: self.features.len(),
            reservations: self.reservations.len(),
            payments: self.payments.len(),
            invoices: self.invoices.len(),
            guests: self.guests.len(),
        }
    }
}

/// `^[^@\s]+@[^@\s]+\.[^@\s]+$`, the guests e-mail CHECK of the schema.
fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    let clean = |s: &str| !s.is_empty() && !s.contains('@') && !s.chars().any(char::is_whitespace);
    if !clean(local) || !clean(domain) {
        return false;
    }
    match domain.rsplit_once('.') {
        Some((host, tld)) => !host.is_empty() && !tld.is_empty(),
        None => false,
    }
}

#[derive(Debug, Default)]
struct Shared {
    faults: Mutex<Vec<(FaultPoint, StoreError)>>,
    acquired: AtomicUsize,
    released: AtomicUsize,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
}

impl Shared {
    fn trip(&self, point: FaultPoint) -> Result<(), StoreError> {
        let mut faults = self
            .faults
            .lock()
            .map_err(|_| StoreError::Backend("fault registry lock poisoned".to_string()))?;
        match faults.iter().position(|(p, _)| *p == point) {
            Some(idx) => Err(faults.remove(idx).1),
            None => Ok(()),
        }
    }
}

/// In-memory store standing in for the connection pool in tests/dev.
///
/// Enforces the same constraints as the Postgres schema (foreign keys, the
/// guest e-mail and venue capacity CHECKs, unique keys) and supports
/// savepoints. A session holds the whole store exclusively from `acquire`
/// until it is dropped, so transactions are fully serialised: concurrent
/// callers queue on `acquire` the way they would queue on a row lock.
///
/// Not optimized for performance.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<AsyncMutex<Tables>>,
    shared: Arc<Shared>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Arm a one-shot fault: the next statement reaching `point` fails with `error`.
    pub fn fail_on(&self, point: FaultPoint, error: StoreError) {
        if let Ok(mut faults) = self.shared.faults.lock() {
            faults.push((point, error));
        }
    }

    /// Sessions acquired and not yet released.
    pub fn open_sessions(&self) -> usize {
        let released = self.shared.released.load(Ordering::SeqCst);
        self.shared.acquired.load(Ordering::SeqCst).saturating_sub(released)
    }

    pub fn sessions_acquired(&self) -> usize {
        self.shared.acquired.load(Ordering::SeqCst)
    }

    pub fn commits(&self) -> usize {
        self.shared.commits.load(Ordering::SeqCst)
    }

    pub fn rollbacks(&self) -> usize {
        self.shared.rollbacks.load(Ordering::SeqCst)
    }

    /// Committed row counts. Waits for the current session, if any, to be released.
    pub async fn row_counts(&self) -> RowCounts {
        self.tables.lock().await.counts()
    }
}

#[async_trait]
impl SessionProvider for InMemoryStore {
    async fn acquire(&self) -> Result<Box<dyn Session>, StoreError> {
        let committed = self.tables.clone().lock_owned().await;
        self.shared.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(InMemorySession {
            committed,
            working: None,
            savepoints: Vec::new(),
            shared: self.shared.clone(),
        }))
    }
}

/// Session over an [`InMemoryStore`].
///
/// A transaction works on a private copy of the tables; commit swaps it in,
/// rollback throws it away. Savepoints are snapshots of that copy.
pub struct InMemorySession {
    committed: OwnedMutexGuard<Tables>,
    working: Option<Tables>,
    savepoints: Vec<(String, Tables)>,
    shared: Arc<Shared>,
}

impl InMemorySession {
    fn tx(&mut self) -> Result<&mut Tables, StoreError> {
        self.working
            .as_mut()
            .ok_or_else(|| StoreError::TransactionState("no open transaction".to_string()))
    }

    fn savepoint_index(&self, name: &str) -> Result<usize, StoreError> {
        self.savepoints
            .iter()
            .rposition(|(n, _)| n == name)
            .ok_or_else(|| StoreError::TransactionState(format!("savepoint '{name}' does not exist")))
    }
}

impl Drop for InMemorySession {
    fn drop(&mut self) {
        if self.working.take().is_some() {
            self.shared.rollbacks.fetch_add(1, Ordering::SeqCst);
        }
        self.shared.released.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Session for InMemorySession {
    async fn begin(&mut self) -> Result<(), StoreError> {
        self.shared.trip(FaultPoint::Begin)?;
        if self.working.is_some() {
            return Err(StoreError::TransactionState(
                "transaction already open".to_string(),
            ));
        }
        self.working = Some((*self.committed).clone());
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        self.tx()?;
        if let Err(e) = self.shared.trip(FaultPoint::Commit) {
            // A failed COMMIT leaves nothing applied.
            self.working = None;
            self.savepoints.clear();
            self.shared.rollbacks.fetch_add(1, Ordering::SeqCst);
            return Err(e);
        }
        if let Some(tables) = self.working.take() {
            *self.committed = tables;
        }
        self.savepoints.clear();
        self.shared.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        if self.working.take().is_some() {
            self.shared.rollbacks.fetch_add(1, Ordering::SeqCst);
        }
        self.savepoints.clear();
        Ok(())
    }

    async fn savepoint(&mut self, name: &str) -> Result<(), StoreError> {
        let snapshot = self.tx()?.clone();
        self.savepoints.push((name.to_string(), snapshot));
        Ok(())
    }

    async fn release_savepoint(&mut self, name: &str) -> Result<(), StoreError> {
        self.tx()?;
        let idx = self.savepoint_index(name)?;
        self.savepoints.truncate(idx);
        Ok(())
    }

    async fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), StoreError> {
        self.tx()?;
        let idx = self.savepoint_index(name)?;
        let snapshot = self.savepoints[idx].1.clone();
        self.savepoints.truncate(idx + 1);
        self.working = Some(snapshot);
        Ok(())
    }

    async fn insert_event(&mut self, event: &Event) -> Result<(), StoreError> {
        self.shared.trip(FaultPoint::InsertEvent)?;
        let tables = self.tx()?;
        if tables.events.contains_key(&event.id) {
            return Err(StoreError::constraint(
                "events_pkey",
                format!("event {} already exists", event.id),
            ));
        }
        tables.events.insert(event.id, event.clone());
        Ok(())
    }

    async fn insert_component(&mut self, component: &SubComponent) -> Result<(), StoreError> {
        let kind = component.kind();
        self.shared.trip(FaultPoint::InsertComponent(kind))?;
        let tables = self.tx()?;
        let event_id = component.event_id();
        tables.require_event(event_id, &format!("event_{kind}_event_id_fkey"))?;

        let duplicate = match component {
            SubComponent::Music(_) => tables.music.contains_key(&event_id),
            SubComponent::Catering(_) => tables.catering.contains_key(&event_id),
            SubComponent::Decoration(_) => tables.decoration.contains_key(&event_id),
            SubComponent::Venue(_) => tables.venues.contains_key(&event_id),
        };
        if duplicate {
            return Err(StoreError::constraint(
                format!("event_{kind}_pkey"),
                format!("event {event_id} already has {kind}"),
            ));
        }

        match component {
            SubComponent::Music(m) => {
                tables.music.insert(event_id, m.clone());
            }
            SubComponent::Catering(c) => {
                tables.catering.insert(event_id, c.clone());
            }
            SubComponent::Decoration(d) => {
                tables.decoration.insert(event_id, d.clone());
            }
            SubComponent::Venue(v) => {
                if v.capacity <= 0 {
                    return Err(StoreError::constraint(
                        "event_venue_capacity_check",
                        format!("capacity must be positive, got {}", v.capacity),
                    ));
                }
                tables.venues.insert(event_id, v.clone());
            }
        }
        Ok(())
    }

    async fn lock_event(&mut self, id: EventId) -> Result<Option<Event>, StoreError> {
        // The session already holds the whole store exclusively.
        self.find_event(id).await
    }

    async fn find_event(&mut self, id: EventId) -> Result<Option<Event>, StoreError> {
        Ok(self.tx()?.events.get(&id).cloned())
    }

    async fn update_event(
        &mut self,
        next: &Event,
        expected: ExpectedVersion,
    ) -> Result<Option<Event>, StoreError> {
        self.shared.trip(FaultPoint::UpdateEvent)?;
        let tables = self.tx()?;
        let Some(stored) = tables.events.get_mut(&next.id) else {
            return Ok(None);
        };
        if !expected.matches(stored.version) {
            return Ok(None);
        }
        stored.name = next.name.clone();
        stored.description = next.description.clone();
        stored.event_date = next.event_date;
        stored.location = next.location.clone();
        stored.modified_by = next.modified_by;
        stored.updated_at = next.updated_at;
        stored.version += 1;
        Ok(Some(stored.clone()))
    }

    async fn delete_event(&mut self, id: EventId) -> Result<u64, StoreError> {
        let tables = self.tx()?;
        if !tables.events.contains_key(&id) {
            return Ok(0);
        }
        if tables.reservations.values().any(|r| r.event_id == id) {
            return Err(StoreError::constraint(
                "reservations_event_id_fkey",
                format!("event {id} still has reservations"),
            ));
        }
        tables.events.remove(&id);
        tables.music.remove(&id);
        tables.catering.remove(&id);
        tables.decoration.remove(&id);
        tables.venues.remove(&id);
        tables.assignments.retain(|_, a| a.event_id != id);
        tables.features.retain(|k, _| k.event_id != id);
        tables.guests.retain(|_, g| g.event_id != id);
        Ok(1)
    }

    async fn load_event_aggregate(&mut self, id: EventId) -> Result<Option<EventAggregate>, StoreError> {
        let tables = self.tx()?;
        Ok(tables.events.get(&id).map(|event| EventAggregate {
            event: event.clone(),
            music: tables.music.get(&id).cloned(),
            catering: tables.catering.get(&id).cloned(),
            decoration: tables.decoration.get(&id).cloned(),
            venue: tables.venues.get(&id).cloned(),
        }))
    }

    async fn lock_provider(&mut self, _provider_id: ProviderId) -> Result<(), StoreError> {
        self.tx()?;
        Ok(())
    }

    async fn find_overlapping_assignment(
        &mut self,
        provider_id: ProviderId,
        slot: &TimeSlot,
    ) -> Result<Option<ProviderAssignment>, StoreError> {
        let tables = self.tx()?;
        Ok(tables
            .assignments
            .values()
            .filter(|a| a.provider_id == provider_id && a.slot.overlaps(slot))
            .min_by_key(|a| (a.slot.start(), a.id))
            .cloned())
    }

    async fn insert_assignment(&mut self, assignment: &ProviderAssignment) -> Result<(), StoreError> {
        self.shared.trip(FaultPoint::InsertAssignment)?;
        let tables = self.tx()?;
        tables.require_event(assignment.event_id, "provider_assignments_event_id_fkey")?;
        if tables.assignments.contains_key(&assignment.id) {
            return Err(StoreError::constraint(
                "provider_assignments_pkey",
                format!("assignment {} already exists", assignment.id),
            ));
        }
        tables.assignments.insert(assignment.id, assignment.clone());
        Ok(())
    }

    async fn list_assignments(&mut self, provider_id: ProviderId) -> Result<Vec<ProviderAssignment>, StoreError> {
        let tables = self.tx()?;
        let mut rows: Vec<_> = tables
            .assignments
            .values()
            .filter(|a| a.provider_id == provider_id)
            .cloned()
            .collect();
        rows.sort_by_key(|a| (a.slot.start(), a.id));
        Ok(rows)
    }

    async fn upsert_assignment_feature(
        &mut self,
        feature: &ProviderAssignmentFeature,
    ) -> Result<ProviderAssignmentFeature, StoreError> {
        self.shared.trip(FaultPoint::UpsertFeature)?;
        let tables = self.tx()?;
        tables.require_event(feature.event_id, "provider_assignment_features_event_id_fkey")?;
        tables.features.insert(feature.key(), feature.clone());
        Ok(feature.clone())
    }

    async fn insert_reservation(&mut self, reservation: &Reservation) -> Result<(), StoreError> {
        self.shared.trip(FaultPoint::InsertReservation)?;
        let tables = self.tx()?;
        tables.require_event(reservation.event_id, "reservations_event_id_fkey")?;
        tables.reservations.insert(reservation.id, reservation.clone());
        Ok(())
    }

    async fn set_reservation_status(
        &mut self,
        id: ReservationId,
        status: ReservationStatus,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let tables = self.tx()?;
        match tables.reservations.get_mut(&id) {
            Some(r) => {
                r.status = status;
                r.updated_at = at;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn find_reservation(&mut self, id: ReservationId) -> Result<Option<Reservation>, StoreError> {
        Ok(self.tx()?.reservations.get(&id).cloned())
    }

    async fn insert_payment(&mut self, payment: &Payment) -> Result<(), StoreError> {
        self.shared.trip(FaultPoint::InsertPayment)?;
        let tables = self.tx()?;
        if !tables.reservations.contains_key(&payment.reservation_id) {
            return Err(StoreError::constraint(
                "payments_reservation_id_fkey",
                format!("reservation {} does not exist", payment.reservation_id),
            ));
        }
        tables.payments.insert(payment.id, payment.clone());
        Ok(())
    }

    async fn set_payment_status(
        &mut self,
        id: PaymentId,
        status: PaymentStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<u64, StoreError> {
        let tables = self.tx()?;
        match tables.payments.get_mut(&id) {
            Some(p) => {
                p.status = status;
                p.completed_at = completed_at;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn find_payment(&mut self, id: PaymentId) -> Result<Option<Payment>, StoreError> {
        Ok(self.tx()?.payments.get(&id).cloned())
    }

    async fn insert_invoice(&mut self, invoice: &Invoice) -> Result<(), StoreError> {
        self.shared.trip(FaultPoint::InsertInvoice)?;
        let tables = self.tx()?;
        if !tables.reservations.contains_key(&invoice.reservation_id) {
            return Err(StoreError::constraint(
                "invoices_reservation_id_fkey",
                format!("reservation {} does not exist", invoice.reservation_id),
            ));
        }
        if tables
            .invoices
            .values()
            .any(|i| i.reservation_id == invoice.reservation_id)
        {
            return Err(StoreError::constraint(
                "invoices_reservation_id_key",
                format!("reservation {} is already invoiced", invoice.reservation_id),
            ));
        }
        if tables
            .invoices
            .values()
            .any(|i| i.invoice_number == invoice.invoice_number)
        {
            return Err(StoreError::constraint(
                "invoices_invoice_number_key",
                format!("invoice number {} is taken", invoice.invoice_number),
            ));
        }
        tables.invoices.insert(invoice.id, invoice.clone());
        Ok(())
    }

    async fn find_invoice_for_reservation(
        &mut self,
        reservation_id: ReservationId,
    ) -> Result<Option<Invoice>, StoreError> {
        Ok(self
            .tx()?
            .invoices
            .values()
            .find(|i| i.reservation_id == reservation_id)
            .cloned())
    }

    async fn insert_guest(&mut self, guest: &Guest) -> Result<(), StoreError> {
        self.shared.trip(FaultPoint::InsertGuest)?;
        let tables = self.tx()?;
        tables.require_event(guest.event_id, "guests_event_id_fkey")?;
        if !is_valid_email(&guest.email) {
            return Err(StoreError::constraint(
                "guests_email_check",
                format!("'{}' is not a valid e-mail address", guest.email),
            ));
        }
        tables.guests.insert(guest.id, guest.clone());
        Ok(())
    }

    async fn list_guests(&mut self, event_id: EventId) -> Result<Vec<Guest>, StoreError> {
        Ok(self
            .tx()?
            .guests
            .values()
            .filter(|g| g.event_id == event_id)
            .cloned()
            .collect())
    }
}
