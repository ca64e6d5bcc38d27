//! Aggregate root trait and optimistic concurrency expectations.

use serde::{Deserialize, Serialize};

/// Aggregate root marker + minimal interface.
///
/// An aggregate root owns its sub-entities; its `version` governs concurrency
/// control for itself and everything it owns.
pub trait AggregateRoot {
    /// Strongly-typed aggregate identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug + core::fmt::Display;

    /// Returns the aggregate identifier.
    fn id(&self) -> &Self::Id;

    /// Monotonically increasing version of the aggregate's state.
    ///
    /// Starts at 1 on creation and grows by exactly 1 per successful update.
    fn version(&self) -> u64;
}

/// The version a writer believes an aggregate is at.
///
/// Writers read an aggregate, let a user work on it, and send the version they
/// read back with their change. The write only goes through if nobody else
/// changed the aggregate in between.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExpectedVersion(u64);

impl ExpectedVersion {
    pub fn new(version: u64) -> Self {
        Self(version)
    }

    pub fn get(self) -> u64 {
        self.0
    }

    pub fn matches(self, actual: u64) -> bool {
        self.0 == actual
    }

    /// The version the aggregate will carry once the guarded write succeeds.
    pub fn next(self) -> u64 {
        self.0 + 1
    }
}

impl From<u64> for ExpectedVersion {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl core::fmt::Display for ExpectedVersion {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}
