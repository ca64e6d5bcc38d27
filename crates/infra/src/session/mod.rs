//! Session-provider boundary.
//!
//! A [`SessionProvider`] hands out exclusive [`Session`]s (one pooled
//! connection each). Every write of the booking core runs inside one session's
//! transaction; nothing here knows about retries or business rules.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::{FaultPoint, InMemorySession, InMemoryStore, RowCounts};
pub use postgres::{PostgresSession, PostgresStore};
pub use r#trait::{Session, SessionProvider, StoreError};
