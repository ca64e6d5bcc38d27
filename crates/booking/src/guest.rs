//! Guests of an event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use gala_core::{DomainError, DomainResult, Entity};

use crate::ids::{EventId, GuestId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guest {
    pub id: GuestId,
    pub event_id: EventId,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Entity for Guest {
    type Id = GuestId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// One row of a guest import.
///
/// Only the name is checked here; the e-mail format is enforced by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewGuest {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
}

impl NewGuest {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            phone: None,
        }
    }

    pub fn into_guest(self, id: GuestId, event_id: EventId, now: DateTime<Utc>) -> DomainResult<Guest> {
        DomainError::require_non_blank("guest.name", &self.name)?;
        Ok(Guest {
            id,
            event_id,
            name: self.name.trim().to_string(),
            email: self.email.trim().to_string(),
            phone: self.phone,
            created_at: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guest_fields_are_trimmed() {
        let guest = NewGuest::new("  Ada ", " ada@example.com ")
            .into_guest(GuestId::new(), EventId::new(), Utc::now())
            .unwrap();
        assert_eq!(guest.name, "Ada");
        assert_eq!(guest.email, "ada@example.com");
    }

    #[test]
    fn unnamed_guests_are_rejected() {
        let err = NewGuest::new("", "x@example.com")
            .into_guest(GuestId::new(), EventId::new(), Utc::now())
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn import_rows_deserialize_without_phone() {
        let row: NewGuest =
            serde_json::from_str(r#"{"name":"Ada","email":"ada@example.com"}"#).unwrap();
        assert_eq!(row.phone, None);
    }
}
