use tracing::{debug, warn};

use crate::session::{Session, SessionProvider, StoreError};

use super::UnitOfWork;

/// Runs units of work in their own transaction on one exclusive session.
///
/// `run_in_transaction` acquires a session, begins, runs the unit, then
/// commits on `Ok` or rolls back on `Err`, returning the unit's error
/// unchanged. The session is released on every path (including a failing
/// `COMMIT` or `ROLLBACK`) because it is owned by this call and dropped when
/// the call returns.
///
/// Nesting is not supported; use savepoints inside one unit instead.
#[derive(Debug, Clone)]
pub struct TransactionGuard<P> {
    provider: P,
}

impl<P> TransactionGuard<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn into_inner(self) -> P {
        self.provider
    }
}

impl<P> TransactionGuard<P>
where
    P: SessionProvider,
{
    pub async fn run_in_transaction<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: for<'s> FnOnce(&'s mut dyn Session) -> UnitOfWork<'s, T, E> + Send,
        T: Send,
        E: From<StoreError> + core::fmt::Display + Send,
    {
        let mut session = self.provider.acquire().await?;
        session.begin().await?;

        match work(session.as_mut()).await {
            Ok(value) => {
                if let Err(err) = session.commit().await {
                    warn!(error = %err, "commit failed; transaction discarded");
                    return Err(err.into());
                }
                debug!("transaction committed");
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = session.rollback().await {
                    warn!(
                        error = %err,
                        rollback_error = %rollback_err,
                        "rollback failed; session will be discarded"
                    );
                } else {
                    debug!(error = %err, "transaction rolled back");
                }
                Err(err)
            }
        }
    }
}
