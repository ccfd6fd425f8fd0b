//! Ledger storage
//!
//! The transfer engine talks to storage only through the traits in this
//! module. Two backends implement them:
//!
//! - [`postgres`] - sqlx over a PostgreSQL pool (production)
//! - [`memory`] - in-process tables with real row-lock semantics
//!
//! # Handles
//!
//! ```text
//! Database ──begin()──▶ Transaction (Queries + commit/rollback)
//!     │
//!     └────acquire()──▶ Conn (Queries, autocommit)
//! ```
//!
//! A transaction handle that is dropped without `commit` is rolled back,
//! releasing every row lock it holds.

pub mod memory;
pub mod models;
pub mod postgres;

use async_trait::async_trait;

use crate::core_types::{AccountId, EntryId, TransferId};
use crate::error::Result;

pub use models::{
    Account, CreateAccountParams, CreateEntryParams, CreateTransferParams, Entry,
    ListTransfersParams, Page, Transfer, UpdateAccountParams,
};

/// Row-level operations on accounts, entries and transfers.
///
/// Missing rows are reported as [`Error::NotFound`](crate::Error::NotFound).
#[async_trait]
pub trait Queries: Send {
    async fn create_account(&mut self, arg: CreateAccountParams) -> Result<Account>;

    /// Plain read, takes no lock
    async fn get_account(&mut self, id: AccountId) -> Result<Account>;

    /// Read-for-update: waits for any concurrent holder of the row lock,
    /// then returns the latest committed row while holding the lock until
    /// the enclosing transaction ends.
    async fn get_account_for_update(&mut self, id: AccountId) -> Result<Account>;

    async fn update_account(&mut self, arg: UpdateAccountParams) -> Result<Account>;

    async fn list_accounts(&mut self, page: Page) -> Result<Vec<Account>>;

    async fn create_entry(&mut self, arg: CreateEntryParams) -> Result<Entry>;

    async fn get_entry(&mut self, id: EntryId) -> Result<Entry>;

    async fn list_entries(&mut self, account_id: AccountId, page: Page) -> Result<Vec<Entry>>;

    /// Administrative removal; returns the deleted row
    async fn delete_entry(&mut self, id: EntryId) -> Result<Entry>;

    async fn create_transfer(&mut self, arg: CreateTransferParams) -> Result<Transfer>;

    async fn get_transfer(&mut self, id: TransferId) -> Result<Transfer>;

    async fn list_transfers(&mut self, arg: ListTransfersParams) -> Result<Vec<Transfer>>;
}

/// Transaction-scoped [`Queries`] handle.
///
/// Both ends consume the handle, so nothing can be issued after the
/// transaction is finished.
#[async_trait]
pub trait Transaction: Queries + Sized {
    async fn commit(self) -> Result<()>;

    async fn rollback(self) -> Result<()>;
}

/// Source of transactions and plain connections
#[async_trait]
pub trait Database: Send + Sync {
    type Conn: Queries;
    type Tx: Transaction;

    /// Non-transactional handle for plain reads and administrative writes
    async fn acquire(&self) -> Result<Self::Conn>;

    /// Open a new transaction. Never nests.
    async fn begin(&self) -> Result<Self::Tx>;
}
