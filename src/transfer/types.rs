//! Transfer request and result types

use serde::{Deserialize, Serialize};

use crate::core_types::{AccountId, Amount};
use crate::error::{Error, Result};
use crate::store::{Account, Entry, Transfer};

/// Input of one transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferTxParams {
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub amount: Amount,
}

impl TransferTxParams {
    pub fn new(from_account_id: AccountId, to_account_id: AccountId, amount: Amount) -> Self {
        Self {
            from_account_id,
            to_account_id,
            amount,
        }
    }

    /// Reject requests that must never reach the database
    pub fn validate(&self) -> Result<()> {
        if self.amount <= 0 {
            return Err(Error::InvalidAmount);
        }
        if self.from_account_id == self.to_account_id {
            return Err(Error::SameAccount);
        }
        Ok(())
    }
}

/// Everything a committed transfer wrote
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferTxResult {
    pub transfer: Transfer,
    pub from_account: Account,
    pub to_account: Account,
    pub from_entry: Entry,
    pub to_entry: Entry,
}
