//! Error Types
//!
//! One taxonomy for the whole crate: input validation, storage failures
//! and transaction-boundary failures.

use std::fmt;

use thiserror::Error;

/// Kind of row referenced by a [`Error::NotFound`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Account,
    Entry,
    Transfer,
}

impl Entity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Entity::Account => "Account",
            Entity::Entry => "Entry",
            Entity::Transfer => "Transfer",
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Crate error type
#[derive(Error, Debug, Clone)]
pub enum Error {
    // === Validation Errors ===
    #[error("Amount must be greater than zero")]
    InvalidAmount,

    #[error("Source and destination account cannot be the same")]
    SameAccount,

    // === Storage Errors ===
    #[error("{entity} not found: {id}")]
    NotFound { entity: Entity, id: i64 },

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// Deadlock, lock-wait timeout or serialization failure reported by the
    /// storage engine. The transaction was aborted; retrying may succeed.
    #[error("Lock conflict: {0}")]
    LockConflict(String),

    #[error("Balance overflow on account {0}")]
    Overflow(i64),

    #[error("Database error: {0}")]
    Database(String),

    // === Transaction Boundary Errors ===
    #[error("Commit failed: {0}")]
    CommitFailure(Box<Error>),

    /// The operation failed and the rollback that followed failed too.
    #[error("tx err: {source}, rb err: {rollback}")]
    RollbackFailure {
        source: Box<Error>,
        rollback: Box<Error>,
    },

    #[error("Unit of work timed out after {0} ms")]
    Timeout(u64),

    // === System Errors ===
    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn not_found(entity: Entity, id: i64) -> Self {
        Error::NotFound { entity, id }
    }

    /// Get the stable error code
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidAmount => "INVALID_AMOUNT",
            Error::SameAccount => "SAME_ACCOUNT",
            Error::NotFound { .. } => "NOT_FOUND",
            Error::ConstraintViolation(_) => "CONSTRAINT_VIOLATION",
            Error::LockConflict(_) => "LOCK_CONFLICT",
            Error::Overflow(_) => "OVERFLOW",
            Error::Database(_) => "DATABASE_ERROR",
            Error::CommitFailure(_) => "COMMIT_FAILURE",
            Error::RollbackFailure { .. } => "ROLLBACK_FAILURE",
            Error::Timeout(_) => "TIMEOUT",
            Error::Config(_) => "CONFIG_ERROR",
        }
    }

    /// Whether the caller may reasonably retry the whole unit of work.
    ///
    /// Nothing in this crate retries on its own.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::LockConflict(_) | Error::Timeout(_) => true,
            Error::RollbackFailure { source, .. } => source.is_retryable(),
            _ => false,
        }
    }
}

/// SQLSTATE codes that mean "aborted by concurrency control"
const LOCK_CONFLICT_CODES: [&str; 3] = [
    "40P01", // deadlock_detected
    "55P03", // lock_not_available (lock_timeout)
    "40001", // serialization_failure
];

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &e
            && let Some(code) = db_err.code()
        {
            if code.starts_with("23") {
                return Error::ConstraintViolation(db_err.message().to_string());
            }
            if LOCK_CONFLICT_CODES.contains(&&*code) {
                return Error::LockConflict(db_err.message().to_string());
            }
        }
        Error::Database(e.to_string())
    }
}
