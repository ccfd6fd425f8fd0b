//! Row types and query parameters for the ledger tables

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::core_types::{AccountId, Amount, EntryId, TransferId};

/// Balance-holding account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Account {
    pub id: AccountId,
    pub owner: String,
    pub balance: Amount,
    pub currency: String,
    pub created_at: DateTime<Utc>,
}

/// Append-only ledger line
///
/// `account_id` is `None` once the referenced account has been deleted
/// (`ON DELETE SET NULL`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Entry {
    pub id: EntryId,
    pub account_id: Option<AccountId>,
    pub amount: Amount,
    pub created_at: DateTime<Utc>,
}

/// Immutable record of one fund movement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Transfer {
    pub id: TransferId,
    pub from_account_id: Option<AccountId>,
    pub to_account_id: Option<AccountId>,
    pub amount: Amount,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateAccountParams {
    pub owner: String,
    pub balance: Amount,
    pub currency: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateAccountParams {
    pub id: AccountId,
    pub balance: Amount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateEntryParams {
    pub account_id: AccountId,
    pub amount: Amount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTransferParams {
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub amount: Amount,
}

/// Filter for [`list_transfers`](super::Queries::list_transfers):
/// transfers from `account_id` or to `account_id`, newest id last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListTransfersParams {
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub page: Page,
}

/// LIMIT/OFFSET pagination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub limit: i64,
    pub offset: i64,
}

impl Page {
    pub fn new(limit: i64, offset: i64) -> Self {
        Self { limit, offset }
    }

    /// Range of indices selected from an ordered result of length `len`
    pub(crate) fn bounds(&self, len: usize) -> std::ops::Range<usize> {
        let start = (self.offset.max(0) as usize).min(len);
        let end = start.saturating_add(self.limit.max(0) as usize).min(len);
        start..end
    }
}

impl Default for Page {
    fn default() -> Self {
        Self {
            limit: 100,
            offset: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_bounds() {
        assert_eq!(Page::new(5, 0).bounds(3), 0..3);
        assert_eq!(Page::new(2, 1).bounds(10), 1..3);
        assert_eq!(Page::new(5, 20).bounds(10), 10..10);
        assert_eq!(Page::new(-1, -1).bounds(10), 0..0);
    }

    #[test]
    fn test_entry_json_uses_column_names() {
        let entry = Entry {
            id: 1,
            account_id: Some(9),
            amount: -10,
            created_at: Utc::now(),
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["account_id"], 9);
        assert_eq!(json["amount"], -10);
    }

    #[test]
    fn test_orphaned_entry_serializes_null_account() {
        let entry = Entry {
            id: 2,
            account_id: None,
            amount: 5,
            created_at: Utc::now(),
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert!(json["account_id"].is_null());
    }
}
