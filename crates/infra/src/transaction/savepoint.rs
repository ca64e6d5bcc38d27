//! Per-item failure isolation inside one transaction.
//!
//! Each [`BatchOperation`] runs between `SAVEPOINT` and `RELEASE SAVEPOINT`.
//! A failing operation is rolled back to its savepoint so its siblings keep
//! their effects; a failing *critical* operation aborts the whole batch (the
//! error is returned and the enclosing transaction rolls back).

use tracing::{debug, warn};
use uuid::Uuid;

use crate::session::{Session, SessionProvider, StoreError};

use super::{SessionOp, TransactionGuard, UnitOfWork};

/// One sub-operation of a savepoint batch.
pub struct BatchOperation<T, E> {
    label: String,
    critical: bool,
    run: SessionOp<T, E>,
}

impl<T, E> BatchOperation<T, E> {
    pub fn new<F>(label: impl Into<String>, run: F) -> Self
    where
        F: for<'s> FnOnce(&'s mut dyn Session) -> UnitOfWork<'s, T, E> + Send + 'static,
    {
        Self {
            label: label.into(),
            critical: false,
            run: Box::new(run),
        }
    }

    /// Failure of this operation aborts the whole batch.
    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_critical(&self) -> bool {
        self.critical
    }
}

impl<T, E> core::fmt::Debug for BatchOperation<T, E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BatchOperation")
            .field("label", &self.label)
            .field("critical", &self.critical)
            .finish_non_exhaustive()
    }
}

/// Result of one non-aborting operation, in submission order.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationOutcome<T, E> {
    pub index: usize,
    pub label: String,
    pub result: Result<T, E>,
}

impl<T, E> OperationOutcome<T, E> {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Run `operations` in order on a session whose transaction is already open.
///
/// Savepoint names are `sp_<batch uuid>_<index>`, unique per call.
pub async fn execute_batch<T, E>(
    session: &mut dyn Session,
    operations: Vec<BatchOperation<T, E>>,
) -> Result<Vec<OperationOutcome<T, E>>, E>
where
    E: From<StoreError> + core::fmt::Display,
{
    let batch = Uuid::now_v7().simple();
    let mut outcomes = Vec::with_capacity(operations.len());

    for (index, operation) in operations.into_iter().enumerate() {
        let BatchOperation {
            label,
            critical,
            run,
        } = operation;
        let savepoint = format!("sp_{batch}_{index}");

        session.savepoint(&savepoint).await?;
        debug!(savepoint = %savepoint, operation = %label, "savepoint created");

        match run(&mut *session).await {
            Ok(value) => {
                session.release_savepoint(&savepoint).await?;
                outcomes.push(OperationOutcome {
                    index,
                    label,
                    result: Ok(value),
                });
            }
            Err(err) => {
                session.rollback_to_savepoint(&savepoint).await?;
                session.release_savepoint(&savepoint).await?;

                if critical {
                    warn!(operation = %label, error = %err, "critical batch operation failed; aborting batch");
                    return Err(err);
                }

                debug!(savepoint = %savepoint, operation = %label, error = %err, "rolled back to savepoint");
                outcomes.push(OperationOutcome {
                    index,
                    label,
                    result: Err(err),
                });
            }
        }
    }

    Ok(outcomes)
}

/// [`execute_batch`] in a transaction of its own.
///
/// Returns the per-operation outcomes once the transaction has committed.
/// A critical failure returns that operation's error with nothing persisted.
pub async fn run_with_savepoints<P, T, E>(
    guard: &TransactionGuard<P>,
    operations: Vec<BatchOperation<T, E>>,
) -> Result<Vec<OperationOutcome<T, E>>, E>
where
    P: SessionProvider,
    T: Send + 'static,
    E: From<StoreError> + core::fmt::Display + Send + 'static,
{
    guard
        .run_in_transaction(move |session| Box::pin(execute_batch(session, operations)))
        .await
}
