//! Provider scheduling: time slots, assignments and per-assignment features.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use gala_core::{DomainError, DomainResult, Entity, ValueObject};

use crate::ids::{AssignmentId, EventId, FeatureId, ProviderId};

/// Booked interval of a provider.
///
/// Two slots overlap unless one ends strictly before the other starts, so
/// slots that merely touch (`a.end == b.start`) count as overlapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeSlot {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl ValueObject for TimeSlot {}

impl TimeSlot {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> DomainResult<Self> {
        if start >= end {
            return Err(DomainError::validation(format!(
                "time slot must end after it starts (start: {start}, end: {end})"
            )));
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    /// `NOT (a.end < b.start OR a.start > b.end)`.
    pub fn overlaps(&self, other: &TimeSlot) -> bool {
        !(self.end < other.start || self.start > other.end)
    }
}

impl core::fmt::Display for TimeSlot {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "[{}, {})", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

/// A provider booked for an event during a time slot.
///
/// Never mutated in place; re-booking means delete + recreate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderAssignment {
    pub id: AssignmentId,
    pub event_id: EventId,
    pub provider_id: ProviderId,
    pub slot: TimeSlot,
    pub created_at: DateTime<Utc>,
}

impl Entity for ProviderAssignment {
    type Id = AssignmentId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Input item of a booking batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProviderAssignment {
    pub event_id: EventId,
    pub provider_id: ProviderId,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

impl NewProviderAssignment {
    pub fn slot(&self) -> DomainResult<TimeSlot> {
        TimeSlot::new(self.starts_at, self.ends_at)
    }

    pub fn into_assignment(self, id: AssignmentId, now: DateTime<Utc>) -> DomainResult<ProviderAssignment> {
        let slot = self.slot()?;
        Ok(ProviderAssignment {
            id,
            event_id: self.event_id,
            provider_id: self.provider_id,
            slot,
            created_at: now,
        })
    }
}

/// Unique key of a feature row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FeatureKey {
    pub event_id: EventId,
    pub provider_id: ProviderId,
    pub feature_id: FeatureId,
}

/// Feature booked with a provider for an event. Upserted by its key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderAssignmentFeature {
    pub event_id: EventId,
    pub provider_id: ProviderId,
    pub feature_id: FeatureId,
    pub quantity: u32,
    /// Price in smallest currency unit (e.g., cents).
    pub unit_price_cents: i64,
    pub notes: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ProviderAssignmentFeature {
    pub fn key(&self) -> FeatureKey {
        FeatureKey {
            event_id: self.event_id,
            provider_id: self.provider_id,
            feature_id: self.feature_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAssignmentFeature {
    pub event_id: EventId,
    pub provider_id: ProviderId,
    pub feature_id: FeatureId,
    pub quantity: u32,
    pub unit_price_cents: i64,
    #[serde(default)]
    pub notes: Option<String>,
}

impl NewAssignmentFeature {
    pub fn validate(&self) -> DomainResult<()> {
        if self.unit_price_cents < 0 {
            return Err(DomainError::validation("unit_price_cents must not be negative"));
        }
        Ok(())
    }

    pub fn into_feature(self, now: DateTime<Utc>) -> ProviderAssignmentFeature {
        ProviderAssignmentFeature {
            event_id: self.event_id,
            provider_id: self.provider_id,
            feature_id: self.feature_id,
            quantity: self.quantity,
            unit_price_cents: self.unit_price_cents,
            notes: self.notes,
            updated_at: now,
        }
    }
}
