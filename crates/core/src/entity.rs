//! Records with identity but no version of their own.

/// A record owned by an aggregate root (guest, booking, reservation).
///
/// Two entities are the same entity when their ids match, whatever their
/// other fields hold.
pub trait Entity {
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    fn id(&self) -> &Self::Id;

    fn same_identity(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}
