//! Sub-components owned by an event.
//!
//! Each kind exists at most once per event, only when the caller opted in at
//! creation time, and disappears with the event (cascade delete).

use serde::{Deserialize, Serialize};

use gala_core::{DomainError, DomainResult};

use crate::ids::EventId;

/// Kind of an owned sub-component (one table per kind).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    Music,
    Catering,
    Decoration,
    Venue,
}

impl ComponentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ComponentKind::Music => "music",
            ComponentKind::Catering => "catering",
            ComponentKind::Decoration => "decoration",
            ComponentKind::Venue => "venue",
        }
    }
}

impl core::fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Music {
    pub event_id: EventId,
    pub genre: String,
    pub performer: Option<String>,
    pub duration_minutes: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catering {
    pub event_id: EventId,
    pub menu: String,
    pub servings: u32,
    pub dietary_notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decoration {
    pub event_id: EventId,
    pub theme: String,
    pub color_palette: Option<String>,
}

/// Venue of an event.
///
/// `capacity` is checked by the store (`CHECK (capacity > 0)`), not here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Venue {
    pub event_id: EventId,
    pub name: String,
    pub address: String,
    pub capacity: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMusic {
    pub genre: String,
    pub performer: Option<String>,
    pub duration_minutes: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCatering {
    pub menu: String,
    pub servings: u32,
    pub dietary_notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDecoration {
    pub theme: String,
    pub color_palette: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewVenue {
    pub name: String,
    pub address: String,
    pub capacity: i32,
}

impl NewMusic {
    pub fn validate(&self) -> DomainResult<()> {
        DomainError::require_non_blank("music.genre", &self.genre)?;
        if self.duration_minutes == 0 {
            return Err(DomainError::validation("music.duration_minutes must be positive"));
        }
        Ok(())
    }

    pub fn attach(self, event_id: EventId) -> Music {
        Music {
            event_id,
            genre: self.genre,
            performer: self.performer,
            duration_minutes: self.duration_minutes,
        }
    }
}

impl NewCatering {
    pub fn validate(&self) -> DomainResult<()> {
        DomainError::require_non_blank("catering.menu", &self.menu)
    }

    pub fn attach(self, event_id: EventId) -> Catering {
        Catering {
            event_id,
            menu: self.menu,
            servings: self.servings,
            dietary_notes: self.dietary_notes,
        }
    }
}

impl NewDecoration {
    pub fn validate(&self) -> DomainResult<()> {
        DomainError::require_non_blank("decoration.theme", &self.theme)
    }

    pub fn attach(self, event_id: EventId) -> Decoration {
        Decoration {
            event_id,
            theme: self.theme,
            color_palette: self.color_palette,
        }
    }
}

impl NewVenue {
    pub fn validate(&self) -> DomainResult<()> {
        DomainError::require_non_blank("venue.name", &self.name)?;
        DomainError::require_non_blank("venue.address", &self.address)
    }

    pub fn attach(self, event_id: EventId) -> Venue {
        Venue {
            event_id,
            name: self.name,
            address: self.address,
            capacity: self.capacity,
        }
    }
}

/// One owned sub-component row, ready to be inserted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SubComponent {
    Music(Music),
    Catering(Catering),
    Decoration(Decoration),
    Venue(Venue),
}

impl SubComponent {
    pub fn kind(&self) -> ComponentKind {
        match self {
            SubComponent::Music(_) => ComponentKind::Music,
            SubComponent::Catering(_) => ComponentKind::Catering,
            SubComponent::Decoration(_) => ComponentKind::Decoration,
            SubComponent::Venue(_) => ComponentKind::Venue,
        }
    }

    pub fn event_id(&self) -> EventId {
        match self {
            SubComponent::Music(m) => m.event_id,
            SubComponent::Catering(c) => c.event_id,
            SubComponent::Decoration(d) => d.event_id,
            SubComponent::Venue(v) => v.event_id,
        }
    }
}
