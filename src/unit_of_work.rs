//! Unit of Work
//!
//! Runs an operation inside exactly one storage transaction:
//!
//! ```text
//! begin ──▶ op(&mut tx) ──Ok──▶ commit ──▶ Ok(value) | Err(CommitFailure)
//!                 │
//!                 └──Err──▶ rollback ──▶ Err(op error) | Err(RollbackFailure)
//! ```
//!
//! Dropping the future returned by [`UnitOfWork::execute`] drops the open
//! transaction, which is how callers cancel a unit of work that is blocked on
//! a lock. The backend must then end the transaction and release its row
//! locks on its own: the memory store drops its lock guards, and the
//! PostgreSQL store cancels the interrupted statement on the server so the
//! queued rollback can run.

use std::time::Duration;

use futures::future::BoxFuture;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::store::{Database, Transaction};

/// Transaction boundary over a [`Database`]
#[derive(Clone)]
pub struct UnitOfWork<D> {
    db: D,
}

impl<D: Database> UnitOfWork<D> {
    pub fn new(db: D) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &D {
        &self.db
    }

    /// Run `op` in a new transaction.
    ///
    /// Commits when `op` succeeds. When `op` fails the transaction is rolled
    /// back and the operation's error is returned unchanged, unless the
    /// rollback fails too, in which case both errors are returned as
    /// [`Error::RollbackFailure`].
    pub async fn execute<T, F>(&self, op: F) -> Result<T>
    where
        T: Send,
        F: for<'t> FnOnce(&'t mut D::Tx) -> BoxFuture<'t, Result<T>> + Send,
    {
        let mut tx = self.db.begin().await?;

        match op(&mut tx).await {
            Ok(value) => {
                tx.commit().await.map_err(|e| {
                    warn!(error = %e, "Commit failed");
                    Error::CommitFailure(Box::new(e))
                })?;
                debug!("Transaction committed");
                Ok(value)
            }
            Err(err) => match tx.rollback().await {
                Ok(()) => {
                    debug!(error = %err, "Transaction rolled back");
                    Err(err)
                }
                Err(rb_err) => {
                    warn!(error = %err, rollback_error = %rb_err, "Rollback failed");
                    Err(Error::RollbackFailure {
                        source: Box::new(err),
                        rollback: Box::new(rb_err),
                    })
                }
            },
        }
    }

    /// [`execute`](Self::execute) with a deadline.
    ///
    /// On expiry the in-flight transaction is dropped (rolled back) and
    /// [`Error::Timeout`] is returned.
    pub async fn execute_with_timeout<T, F>(&self, timeout: Duration, op: F) -> Result<T>
    where
        T: Send,
        F: for<'t> FnOnce(&'t mut D::Tx) -> BoxFuture<'t, Result<T>> + Send,
    {
        match tokio::time::timeout(timeout, self.execute(op)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(timeout_ms = timeout.as_millis() as u64, "Unit of work timed out");
                Err(Error::Timeout(timeout.as_millis() as u64))
            }
        }
    }
}
