//! Event aggregate root and its composed read model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use gala_core::{AggregateRoot, DomainError, DomainResult, UserId};

use crate::components::{
    Catering, Decoration, Music, NewCatering, NewDecoration, NewMusic, NewVenue, SubComponent,
    Venue,
};
use crate::ids::EventId;

/// Aggregate root: Event.
///
/// Only the version-checked update path mutates a stored event; every
/// successful update bumps `version` by exactly one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub name: String,
    pub description: Option<String>,
    pub event_date: DateTime<Utc>,
    pub location: Option<String>,
    pub version: u64,
    pub created_by: UserId,
    pub modified_by: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AggregateRoot for Event {
    type Id = EventId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Input of `create_event_complete`: the event plus the sub-components the
/// caller opted into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEvent {
    pub name: String,
    pub description: Option<String>,
    pub event_date: DateTime<Utc>,
    pub location: Option<String>,
    pub created_by: UserId,
    #[serde(default)]
    pub music: Option<NewMusic>,
    #[serde(default)]
    pub catering: Option<NewCatering>,
    #[serde(default)]
    pub decoration: Option<NewDecoration>,
    #[serde(default)]
    pub venue: Option<NewVenue>,
}

impl NewEvent {
    pub fn validate(&self) -> DomainResult<()> {
        DomainError::require_non_blank("name", &self.name)?;
        if let Some(music) = &self.music {
            music.validate()?;
        }
        if let Some(catering) = &self.catering {
            catering.validate()?;
        }
        if let Some(decoration) = &self.decoration {
            decoration.validate()?;
        }
        if let Some(venue) = &self.venue {
            venue.validate()?;
        }
        Ok(())
    }

    /// Splits the input into the version-1 event row and its sub-component rows.
    pub fn into_records(self, id: EventId, now: DateTime<Utc>) -> (Event, Vec<SubComponent>) {
        let event = Event {
            id,
            name: self.name,
            description: self.description,
            event_date: self.event_date,
            location: self.location,
            version: 1,
            created_by: self.created_by,
            modified_by: self.created_by,
            created_at: now,
            updated_at: now,
        };

        let mut components = Vec::with_capacity(4);
        if let Some(music) = self.music {
            components.push(SubComponent::Music(music.attach(id)));
        }
        if let Some(catering) = self.catering {
            components.push(SubComponent::Catering(catering.attach(id)));
        }
        if let Some(decoration) = self.decoration {
            components.push(SubComponent::Decoration(decoration.attach(id)));
        }
        if let Some(venue) = self.venue {
            components.push(SubComponent::Venue(venue.attach(id)));
        }

        (event, components)
    }
}

/// Descriptive changes to an event. `None` keeps the stored value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventChanges {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub event_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub location: Option<String>,
    pub modified_by: UserId,
}

impl EventChanges {
    pub fn new(modified_by: UserId) -> Self {
        Self {
            name: None,
            description: None,
            event_date: None,
            location: None,
            modified_by,
        }
    }

    pub fn validate(&self) -> DomainResult<()> {
        if let Some(name) = &self.name {
            DomainError::require_non_blank("name", name)?;
        }
        Ok(())
    }

    /// The state `current` should have after this change, one version later.
    pub fn apply_to(&self, current: &Event, now: DateTime<Utc>) -> Event {
        Event {
            id: current.id,
            name: self.name.clone().unwrap_or_else(|| current.name.clone()),
            description: self.description.clone().or_else(|| current.description.clone()),
            event_date: self.event_date.unwrap_or(current.event_date),
            location: self.location.clone().or_else(|| current.location.clone()),
            version: current.version + 1,
            created_by: current.created_by,
            modified_by: self.modified_by,
            created_at: current.created_at,
            updated_at: now,
        }
    }
}

/// Fully composed event: the root plus whichever sub-components exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventAggregate {
    pub event: Event,
    pub music: Option<Music>,
    pub catering: Option<Catering>,
    pub decoration: Option<Decoration>,
    pub venue: Option<Venue>,
}

impl EventAggregate {
    pub fn bare(event: Event) -> Self {
        Self {
            event,
            music: None,
            catering: None,
            decoration: None,
            venue: None,
        }
    }

    /// Number of sub-components present.
    pub fn component_count(&self) -> usize {
        [
            self.music.is_some(),
            self.catering.is_some(),
            self.decoration.is_some(),
            self.venue.is_some(),
        ]
        .into_iter()
        .filter(|present| *present)
        .count()
    }
}
