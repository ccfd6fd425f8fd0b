//! Row-lock acquisition order
//!
//! Two transfers between the same pair of accounts, running in opposite
//! directions, deadlock if each locks its own source first. Locking by
//! ascending account id gives every transfer the same global order.

use crate::core_types::{AccountId, Amount};
use crate::error::Result;
use crate::store::Account;

use super::types::TransferTxParams;

/// Balance change applied to one account while its row is locked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceUpdate {
    pub account_id: AccountId,
    pub delta: Amount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockOrder {
    first: BalanceUpdate,
    second: BalanceUpdate,
    /// Whether the source account is locked first
    source_first: bool,
}

impl LockOrder {
    /// Plan the two balance updates of a transfer.
    ///
    /// Rejects the same inputs as [`TransferTxParams::validate`]; a positive
    /// amount always has a negation.
    pub fn new(params: &TransferTxParams) -> Result<Self> {
        params.validate()?;

        let debit = BalanceUpdate {
            account_id: params.from_account_id,
            delta: -params.amount,
        };
        let credit = BalanceUpdate {
            account_id: params.to_account_id,
            delta: params.amount,
        };

        Ok(if params.from_account_id < params.to_account_id {
            Self {
                first: debit,
                second: credit,
                source_first: true,
            }
        } else {
            Self {
                first: credit,
                second: debit,
                source_first: false,
            }
        })
    }

    /// Updates in the order their rows must be locked
    pub fn updates(&self) -> [BalanceUpdate; 2] {
        [self.first, self.second]
    }

    /// Map (first-locked, second-locked) back to (source, destination)
    pub fn assign(&self, first: Account, second: Account) -> (Account, Account) {
        if self.source_first {
            (first, second)
        } else {
            (second, first)
        }
    }
}
