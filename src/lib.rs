//! Simple Bank - transactional transfers between ledger accounts
//!
//! Every transfer runs as one relational transaction that writes a
//! transfer record, two offsetting ledger entries and both account
//! balances, or writes nothing at all.
//!
//! # Modules
//!
//! - [`core_types`] - Id and amount aliases
//! - [`error`] - Crate error taxonomy
//! - [`store`] - Storage traits and the PostgreSQL / in-memory backends
//! - [`db`] - PostgreSQL pool management and schema bootstrap
//! - [`unit_of_work`] - Commit/rollback boundary around an operation
//! - [`transfer`] - Transfer orchestration with ordered row locking
//! - [`util`] - Seedable random test data
//! - [`config`] / [`logging`] - Ambient setup for the host process

// Core types - must be first!
pub mod core_types;
pub mod error;

// Storage
pub mod db;
pub mod store;

// Transactions
pub mod transfer;
pub mod unit_of_work;

pub mod config;
pub mod logging;
pub mod util;

// Convenient re-exports at crate root
pub use core_types::{AccountId, Amount, EntryId, TransferId};
pub use error::{Entity, Error, Result};
pub use store::memory::MemoryStore;
pub use store::postgres::PgStore;
pub use store::{Account, Database, Entry, Queries, Transaction, Transfer};
pub use transfer::{TransferOrchestrator, TransferState, TransferTxParams, TransferTxResult};
pub use unit_of_work::UnitOfWork;
