//! Transaction scoping.
//!
//! [`TransactionGuard`] owns the acquire/begin/commit/rollback/release cycle
//! of one session. The savepoint executor runs a list of independent
//! sub-operations inside a transaction the guard already holds.

pub mod guard;
pub mod savepoint;

use futures::future::BoxFuture;

use crate::session::Session;

pub use guard::TransactionGuard;
pub use savepoint::{execute_batch, run_with_savepoints, BatchOperation, OperationOutcome};

/// Boxed unit of work bound to the session it was handed.
pub type UnitOfWork<'s, T, E> = BoxFuture<'s, Result<T, E>>;

/// Type-erased sub-operation of a savepoint batch.
pub type SessionOp<T, E> =
    Box<dyn for<'s> FnOnce(&'s mut dyn Session) -> UnitOfWork<'s, T, E> + Send>;
