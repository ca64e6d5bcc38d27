//! Event-booking domain module.
//!
//! Records and input types for the event aggregate, its owned sub-components,
//! provider scheduling, the reservation/payment/invoice chain and guests,
//! implemented as deterministic domain logic (no IO, no storage).

pub mod components;
pub mod event;
pub mod guest;
pub mod ids;
pub mod reservation;
pub mod schedule;

pub use components::{
    Catering, ComponentKind, Decoration, Music, NewCatering, NewDecoration, NewMusic, NewVenue,
    SubComponent, Venue,
};
pub use event::{Event, EventAggregate, EventChanges, NewEvent};
pub use guest::{Guest, NewGuest};
pub use ids::{
    AssignmentId, EventId, FeatureId, GuestId, InvoiceId, PaymentId, ProviderId, ReservationId,
};
pub use reservation::{
    BookingReceipt, Invoice, InvoiceAmounts, NewBookingWithPayment, Payment, PaymentMethod,
    PaymentStatus, Reservation, ReservationStatus, TaxRate,
};
pub use schedule::{
    FeatureKey, NewAssignmentFeature, NewProviderAssignment, ProviderAssignment,
    ProviderAssignmentFeature, TimeSlot,
};
