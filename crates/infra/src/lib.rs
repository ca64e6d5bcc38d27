//! Infrastructure layer of the booking core: sessions, transactions,
//! concurrency guards and the composed booking operations.

pub mod concurrency;
pub mod config;
pub mod error;
pub mod overlap;
pub mod service;
pub mod session;
pub mod transaction;

#[cfg(test)]
mod integration_tests;

pub use concurrency::{lock_and_check_version, require_guarded_write, Lockable};
pub use config::{ConfigError, CoreConfig, StoreConfig};
pub use error::{BookingError, BookingResult};
pub use overlap::{assert_disjoint, assert_no_overlap};
pub use service::{DeletionSummary, EventBookingService, GuestImportDetail, GuestImportReport};
pub use session::{
    FaultPoint, InMemorySession, InMemoryStore, PostgresSession, PostgresStore, RowCounts, Session,
    SessionProvider, StoreError,
};
pub use transaction::{
    execute_batch, run_with_savepoints, BatchOperation, OperationOutcome, TransactionGuard,
};
