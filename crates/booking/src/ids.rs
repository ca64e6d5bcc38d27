//! Identifiers of the booking domain.

use gala_core::uuid_id;

uuid_id! {
    /// Identifier of an event (the aggregate root).
    pub struct EventId;
}

uuid_id! {
    /// Identifier of a bookable provider (band, caterer, decorator, ...).
    pub struct ProviderId;
}

uuid_id! {
    /// Identifier of a provider feature (e.g. "extra hour", "vegan menu").
    pub struct FeatureId;
}

uuid_id! {
    pub struct AssignmentId;
}

uuid_id! {
    pub struct ReservationId;
}

uuid_id! {
    pub struct PaymentId;
}

uuid_id! {
    pub struct InvoiceId;
}

uuid_id! {
    pub struct GuestId;
}
