//! Account-to-Account Transfers
//!
//! One transfer = one transaction writing five rows:
//!
//! ```text
//! transfers  +1 (from, to, amount)
//! entries    +2 (from: -amount, to: +amount)
//! accounts   ~2 (balance -= amount / balance += amount)
//! ```
//!
//! # Safety Invariants
//!
//! 1. **Conservation**: the two entries of a transfer sum to zero
//! 2. **Ledger consistency**: balances change only in the transaction that
//!    writes the matching entries
//! 3. **Locked reads**: every balance update is computed from a row read
//!    under its row lock, so concurrent transfers never start from the same
//!    stale balance
//! 4. **Lock order**: rows are locked by ascending account id, whatever the
//!    transfer direction, so opposite-direction transfers cannot deadlock

pub mod lock_order;
pub mod orchestrator;
pub mod state;
pub mod types;


pub use lock_order::{BalanceUpdate, LockOrder};
pub use orchestrator::TransferOrchestrator;
pub use state::TransferState;
pub use types::{TransferTxParams, TransferTxResult};
