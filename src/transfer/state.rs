//! Transfer lifecycle states

use std::fmt;

/// Lifecycle of one transfer attempt.
///
/// ```text
/// PENDING ──▶ COMMITTED
///    │
///    └──────▶ ABORTED
/// ```
///
/// Nothing between the two terminal states is ever observable outside the
/// transaction: either every write of the attempt is durable or none is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferState {
    /// Transaction open, steps in flight
    Pending,

    /// Terminal: all writes durable, result returned
    Committed,

    /// Terminal: a step, the commit or the deadline failed; all writes discarded
    Aborted,
}

impl TransferState {
    /// Check if this is a terminal state (no more transitions possible)
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferState::Committed | TransferState::Aborted)
    }

    /// State reached by finishing a pending transfer with `outcome`
    pub fn finish<T, E>(outcome: &Result<T, E>) -> Self {
        match outcome {
            Ok(_) => TransferState::Committed,
            Err(_) => TransferState::Aborted,
        }
    }

    /// Get human-readable state name
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferState::Pending => "PENDING",
            TransferState::Committed => "COMMITTED",
            TransferState::Aborted => "ABORTED",
        }
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
