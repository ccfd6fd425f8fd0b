//! PostgreSQL storage backend
//!
//! [`PgQueries`] runs every query on whatever connection it wraps: a pooled
//! connection for autocommit reads, or an open transaction for units of work.
//!
//! Dropping a sqlx query future does not stop the statement on the server. A
//! transaction handle therefore remembers its backend pid, and a statement
//! dropped before it completes sends `pg_cancel_backend` from another pooled
//! connection. The cancelled statement fails, the queued rollback runs and the
//! row locks the transaction held are released.

use std::future::Future;
use std::ops::DerefMut;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::pool::PoolConnection;
use sqlx::{PgConnection, PgPool, Postgres};
use tracing::{debug, warn};

use super::models::{
    Account, CreateAccountParams, CreateEntryParams, CreateTransferParams, Entry,
    ListTransfersParams, Page, Transfer, UpdateAccountParams,
};
use super::{Database, Queries, Transaction};
use crate::core_types::{AccountId, EntryId, TransferId};
use crate::error::{Entity, Error, Result};

/// Queries bound to one PostgreSQL connection
pub struct PgQueries<C> {
    conn: C,
    cancel: Option<BackendCancel>,
}

/// Autocommit handle checked out of the pool
pub type PgConn = PgQueries<PoolConnection<Postgres>>;

/// Handle bound to an open transaction
pub type PgTx = PgQueries<sqlx::Transaction<'static, Postgres>>;

impl<C> PgQueries<C>
where
    C: DerefMut<Target = PgConnection> + Send,
{
    pub fn new(conn: C) -> Self {
        Self { conn, cancel: None }
    }

    pub fn into_inner(self) -> C {
        self.conn
    }

    /// Server process running this handle's statements, when known
    pub fn backend_pid(&self) -> Option<i32> {
        self.cancel.as_ref().map(|c| c.pid)
    }
}

/// Identifies one transaction on one server process.
///
/// `xact_start` keeps a late cancel from hitting whatever the pooled
/// connection runs next.
#[derive(Clone)]
struct BackendCancel {
    pool: PgPool,
    pid: i32,
    xact_start: DateTime<Utc>,
}

impl BackendCancel {
    fn spawn(self) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(pid = self.pid, "No runtime to cancel interrupted statement");
            return;
        };
        handle.spawn(async move {
            let cancelled = sqlx::query_scalar::<_, bool>(
                r#"
                SELECT pg_cancel_backend(pid)
                FROM pg_stat_activity
                WHERE pid = $1 AND xact_start = $2
                "#,
            )
            .bind(self.pid)
            .bind(self.xact_start)
            .fetch_optional(&self.pool)
            .await;

            match cancelled {
                Ok(Some(true)) => debug!(pid = self.pid, "Cancelled interrupted statement"),
                Ok(_) => debug!(pid = self.pid, "Interrupted statement already finished"),
                Err(e) => warn!(pid = self.pid, error = %e, "Failed to cancel interrupted statement"),
            }
        });
    }
}

/// Sends the cancel unless disarmed
struct StatementGuard(Option<BackendCancel>);

impl StatementGuard {
    fn disarm(mut self) {
        self.0 = None;
    }
}

impl Drop for StatementGuard {
    fn drop(&mut self) {
        if let Some(cancel) = self.0.take() {
            cancel.spawn();
        }
    }
}

/// Await `statement`; if the caller drops this future first, cancel the
/// statement on the server.
async fn cancel_on_drop<F: Future>(cancel: &Option<BackendCancel>, statement: F) -> F::Output {
    let guard = StatementGuard(cancel.clone());
    let output = statement.await;
    guard.disarm();
    output
}

#[async_trait]
impl<C> Queries for PgQueries<C>
where
    C: DerefMut<Target = PgConnection> + Send,
{
    async fn create_account(&mut self, arg: CreateAccountParams) -> Result<Account> {
        let account = cancel_on_drop(
            &self.cancel,
            sqlx::query_as::<_, Account>(
                r#"
                INSERT INTO accounts (owner, balance, currency)
                VALUES ($1, $2, $3)
                RETURNING id, owner, balance, currency, created_at
                "#,
            )
            .bind(&arg.owner)
            .bind(arg.balance)
            .bind(&arg.currency)
            .fetch_one(&mut *self.conn),
        )
        .await?;

        Ok(account)
    }

    async fn get_account(&mut self, id: AccountId) -> Result<Account> {
        cancel_on_drop(
            &self.cancel,
            sqlx::query_as::<_, Account>(
                r#"
                SELECT id, owner, balance, currency, created_at
                FROM accounts
                WHERE id = $1
                "#,
            )
            .bind(id)
            .fetch_optional(&mut *self.conn),
        )
        .await?
        .ok_or(Error::not_found(Entity::Account, id))
    }

    async fn get_account_for_update(&mut self, id: AccountId) -> Result<Account> {
        // NO KEY UPDATE: does not block the FOR KEY SHARE taken by entry inserts
        cancel_on_drop(
            &self.cancel,
            sqlx::query_as::<_, Account>(
                r#"
                SELECT id, owner, balance, currency, created_at
                FROM accounts
                WHERE id = $1
                FOR NO KEY UPDATE
                "#,
            )
            .bind(id)
            .fetch_optional(&mut *self.conn),
        )
        .await?
        .ok_or(Error::not_found(Entity::Account, id))
    }

    async fn update_account(&mut self, arg: UpdateAccountParams) -> Result<Account> {
        cancel_on_drop(
            &self.cancel,
            sqlx::query_as::<_, Account>(
                r#"
                UPDATE accounts
                SET balance = $2
                WHERE id = $1
                RETURNING id, owner, balance, currency, created_at
                "#,
            )
            .bind(arg.id)
            .bind(arg.balance)
            .fetch_optional(&mut *self.conn),
        )
        .await?
        .ok_or(Error::not_found(Entity::Account, arg.id))
    }

    async fn list_accounts(&mut self, page: Page) -> Result<Vec<Account>> {
        let rows = cancel_on_drop(
            &self.cancel,
            sqlx::query_as::<_, Account>(
                r#"
                SELECT id, owner, balance, currency, created_at
                FROM accounts
                ORDER BY id
                LIMIT $1 OFFSET $2
                "#,
            )
            .bind(page.limit)
            .bind(page.offset)
            .fetch_all(&mut *self.conn),
        )
        .await?;

        Ok(rows)
    }

    async fn create_entry(&mut self, arg: CreateEntryParams) -> Result<Entry> {
        let entry = cancel_on_drop(
            &self.cancel,
            sqlx::query_as::<_, Entry>(
                r#"
                INSERT INTO entries (account_id, amount)
                VALUES ($1, $2)
                RETURNING id, account_id, amount, created_at
                "#,
            )
            .bind(arg.account_id)
            .bind(arg.amount)
            .fetch_one(&mut *self.conn),
        )
        .await?;

        Ok(entry)
    }

    async fn get_entry(&mut self, id: EntryId) -> Result<Entry> {
        cancel_on_drop(
            &self.cancel,
            sqlx::query_as::<_, Entry>(
                "SELECT id, account_id, amount, created_at FROM entries WHERE id = $1",
            )
            .bind(id)
            .fetch_optional(&mut *self.conn),
        )
        .await?
        .ok_or(Error::not_found(Entity::Entry, id))
    }

    async fn list_entries(&mut self, account_id: AccountId, page: Page) -> Result<Vec<Entry>> {
        let rows = cancel_on_drop(
            &self.cancel,
            sqlx::query_as::<_, Entry>(
                r#"
                SELECT id, account_id, amount, created_at
                FROM entries
                WHERE account_id = $1
                ORDER BY id
                LIMIT $2 OFFSET $3
                "#,
            )
            .bind(account_id)
            .bind(page.limit)
            .bind(page.offset)
            .fetch_all(&mut *self.conn),
        )
        .await?;

        Ok(rows)
    }

    async fn delete_entry(&mut self, id: EntryId) -> Result<Entry> {
        cancel_on_drop(
            &self.cancel,
            sqlx::query_as::<_, Entry>(
                "DELETE FROM entries WHERE id = $1 RETURNING id, account_id, amount, created_at",
            )
            .bind(id)
            .fetch_optional(&mut *self.conn),
        )
        .await?
        .ok_or(Error::not_found(Entity::Entry, id))
    }

    async fn create_transfer(&mut self, arg: CreateTransferParams) -> Result<Transfer> {
        let transfer = cancel_on_drop(
            &self.cancel,
            sqlx::query_as::<_, Transfer>(
                r#"
                INSERT INTO transfers (from_account_id, to_account_id, amount)
                VALUES ($1, $2, $3)
                RETURNING id, from_account_id, to_account_id, amount, created_at
                "#,
            )
            .bind(arg.from_account_id)
            .bind(arg.to_account_id)
            .bind(arg.amount)
            .fetch_one(&mut *self.conn),
        )
        .await?;

        Ok(transfer)
    }

    async fn get_transfer(&mut self, id: TransferId) -> Result<Transfer> {
        cancel_on_drop(
            &self.cancel,
            sqlx::query_as::<_, Transfer>(
                r#"
                SELECT id, from_account_id, to_account_id, amount, created_at
                FROM transfers
                WHERE id = $1
                "#,
            )
            .bind(id)
            .fetch_optional(&mut *self.conn),
        )
        .await?
        .ok_or(Error::not_found(Entity::Transfer, id))
    }

    async fn list_transfers(&mut self, arg: ListTransfersParams) -> Result<Vec<Transfer>> {
        let rows = cancel_on_drop(
            &self.cancel,
            sqlx::query_as::<_, Transfer>(
                r#"
                SELECT id, from_account_id, to_account_id, amount, created_at
                FROM transfers
                WHERE from_account_id = $1 OR to_account_id = $2
                ORDER BY id
                LIMIT $3 OFFSET $4
                "#,
            )
            .bind(arg.from_account_id)
            .bind(arg.to_account_id)
            .bind(arg.page.limit)
            .bind(arg.page.offset)
            .fetch_all(&mut *self.conn),
        )
        .await?;

        Ok(rows)
    }
}

#[async_trait]
impl Transaction for PgTx {
    async fn commit(self) -> Result<()> {
        self.conn.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        self.conn.rollback().await?;
        Ok(())
    }
}

/// PostgreSQL [`Database`] over a connection pool
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    lock_timeout: Option<Duration>,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lock_timeout: None,
        }
    }

    /// Abort lock waits inside transactions after `timeout`
    /// (reported as [`Error::LockConflict`]).
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Database for PgStore {
    type Conn = PgConn;
    type Tx = PgTx;

    async fn acquire(&self) -> Result<PgConn> {
        Ok(PgQueries::new(self.pool.acquire().await?))
    }

    async fn begin(&self) -> Result<PgTx> {
        let mut tx = self.pool.begin().await?;
        if let Some(timeout) = self.lock_timeout {
            // SET does not take bind parameters; the value is an integer we format
            let stmt = format!("SET LOCAL lock_timeout = '{}ms'", timeout.as_millis());
            sqlx::query(&stmt).execute(&mut *tx).await?;
        }
        // now() is the transaction start, same as pg_stat_activity.xact_start
        let (pid, xact_start) =
            sqlx::query_as::<_, (i32, DateTime<Utc>)>("SELECT pg_backend_pid(), now()")
                .fetch_one(&mut *tx)
                .await?;
        Ok(PgQueries {
            conn: tx,
            cancel: Some(BackendCancel {
                pool: self.pool.clone(),
                pid,
                xact_start,
            }),
        })
    }
}
