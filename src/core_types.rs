//! Core types used throughout the system
//!
//! Identifiers map directly onto PostgreSQL `BIGSERIAL` columns.

/// Account ID - primary key of `accounts`.
///
/// # Constraints:
/// - **Immutable**: Once assigned, NEVER changes
/// - **Totally ordered**: Used as the row-lock acquisition key, lower id first
pub type AccountId = i64;

/// Entry ID - primary key of `entries`
pub type EntryId = i64;

/// Transfer ID - primary key of `transfers`
pub type TransferId = i64;

/// Signed amount in minor currency units (cents).
///
/// Negative entry amounts are debits, positive are credits.
pub type Amount = i64;
