//! In-process storage backend
//!
//! Behaves like the PostgreSQL backend as far as the transfer engine can
//! observe:
//!
//! - writes are staged per session and published atomically on commit
//! - `get_account_for_update` / `update_account` take an exclusive row lock
//!   held until the session commits, rolls back or is dropped
//! - lock waits honour an optional lock timeout ([`Error::LockConflict`])
//! - ids come from sequences that are not rolled back
//! - entries and transfers must reference existing accounts
//!
//! A plain connection is a session that commits after every statement.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::OwnedMutexGuard;
use tracing::trace;

use super::models::{
    Account, CreateAccountParams, CreateEntryParams, CreateTransferParams, Entry,
    ListTransfersParams, Page, Transfer, UpdateAccountParams,
};
use super::{Database, Queries, Transaction};
use crate::core_types::{AccountId, EntryId, TransferId};
use crate::error::{Entity, Error, Result};

type RowLock = Arc<tokio::sync::Mutex<()>>;

#[derive(Default)]
struct Tables {
    accounts: BTreeMap<AccountId, Account>,
    entries: BTreeMap<EntryId, Entry>,
    transfers: BTreeMap<TransferId, Transfer>,
    account_seq: AccountId,
    entry_seq: EntryId,
    transfer_seq: TransferId,
}

#[derive(Default)]
struct Shared {
    tables: Mutex<Tables>,
    row_locks: Mutex<HashMap<AccountId, RowLock>>,
    lock_timeout: Option<Duration>,
}

impl Shared {
    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn row_lock(&self, id: AccountId) -> RowLock {
        let mut locks = self.row_locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(id).or_default().clone()
    }

    /// Forget row locks that no session holds or waits on
    fn prune_row_locks(&self) {
        let mut locks = self.row_locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }
}

/// In-memory [`Database`]. Clones share the same tables.
#[derive(Clone, Default)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Give up waiting for a row lock after `timeout`
    pub fn with_lock_timeout(timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                lock_timeout: Some(timeout),
                ..Shared::default()
            }),
        }
    }

    #[cfg(test)]
    pub(crate) fn row_lock_count(&self) -> usize {
        self.shared
            .row_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn session(&self, autocommit: bool) -> MemorySession {
        MemorySession {
            shared: self.shared.clone(),
            autocommit,
            held: HashMap::new(),
            staged: Staged::default(),
        }
    }
}

#[async_trait]
impl Database for MemoryStore {
    type Conn = MemorySession;
    type Tx = MemorySession;

    async fn acquire(&self) -> Result<MemorySession> {
        Ok(self.session(true))
    }

    async fn begin(&self) -> Result<MemorySession> {
        Ok(self.session(false))
    }
}

/// Uncommitted writes of one session
#[derive(Default)]
struct Staged {
    accounts: BTreeMap<AccountId, Account>,
    /// `None` marks a deleted entry
    entries: BTreeMap<EntryId, Option<Entry>>,
    transfers: BTreeMap<TransferId, Transfer>,
}

impl Staged {
    fn is_empty(&self) -> bool {
        self.accounts.is_empty() && self.entries.is_empty() && self.transfers.is_empty()
    }
}

/// Connection or transaction on a [`MemoryStore`]
pub struct MemorySession {
    shared: Arc<Shared>,
    autocommit: bool,
    held: HashMap<AccountId, OwnedMutexGuard<()>>,
    staged: Staged,
}

impl MemorySession {
    /// Account as seen by this session (own writes first)
    fn account(&self, id: AccountId) -> Option<Account> {
        if let Some(account) = self.staged.accounts.get(&id) {
            return Some(account.clone());
        }
        self.shared.tables().accounts.get(&id).cloned()
    }

    fn entry(&self, id: EntryId) -> Option<Entry> {
        match self.staged.entries.get(&id) {
            Some(staged) => staged.clone(),
            None => self.shared.tables().entries.get(&id).cloned(),
        }
    }

    fn require_account(&self, id: AccountId) -> Result<()> {
        if self.account(id).is_none() {
            return Err(Error::ConstraintViolation(format!(
                "account {} referenced by foreign key does not exist",
                id
            )));
        }
        Ok(())
    }

    async fn lock_row(&mut self, id: AccountId) -> Result<()> {
        if self.held.contains_key(&id) {
            return Ok(());
        }

        let lock = self.shared.row_lock(id);
        let guard = match self.shared.lock_timeout {
            Some(timeout) => {
                let acquired = tokio::time::timeout(timeout, lock.lock_owned()).await;
                let Ok(guard) = acquired else {
                    self.shared.prune_row_locks();
                    return Err(Error::LockConflict(format!(
                        "lock timeout after {} ms on account {}",
                        timeout.as_millis(),
                        id
                    )));
                };
                guard
            }
            None => lock.lock_owned().await,
        };

        trace!(account_id = id, "Row lock acquired");
        self.held.insert(id, guard);
        Ok(())
    }

    /// Publish staged writes, then release row locks
    fn publish(&mut self) {
        let staged = std::mem::take(&mut self.staged);
        if !staged.is_empty() {
            let mut tables = self.shared.tables();
            tables.accounts.extend(staged.accounts);
            for (id, entry) in staged.entries {
                match entry {
                    Some(entry) => {
                        tables.entries.insert(id, entry);
                    }
                    None => {
                        tables.entries.remove(&id);
                    }
                }
            }
            tables.transfers.extend(staged.transfers);
        }
        self.release_locks();
    }

    fn release_locks(&mut self) {
        if !self.held.is_empty() {
            self.held.clear();
            self.shared.prune_row_locks();
        }
    }

    /// Statement boundary: autocommit sessions publish immediately
    fn end_statement<T>(&mut self, value: T) -> Result<T> {
        if self.autocommit {
            self.publish();
        }
        Ok(value)
    }
}

#[async_trait]
impl Queries for MemorySession {
    async fn create_account(&mut self, arg: CreateAccountParams) -> Result<Account> {
        let id = {
            let mut tables = self.shared.tables();
            tables.account_seq += 1;
            tables.account_seq
        };
        let account = Account {
            id,
            owner: arg.owner,
            balance: arg.balance,
            currency: arg.currency,
            created_at: Utc::now(),
        };
        self.staged.accounts.insert(id, account.clone());
        self.end_statement(account)
    }

    async fn get_account(&mut self, id: AccountId) -> Result<Account> {
        self.account(id)
            .ok_or(Error::not_found(Entity::Account, id))
    }

    async fn get_account_for_update(&mut self, id: AccountId) -> Result<Account> {
        if self.account(id).is_none() {
            return Err(Error::not_found(Entity::Account, id));
        }
        self.lock_row(id).await?;
        // Re-read: the previous lock holder may have committed a new balance
        let account = self
            .account(id)
            .ok_or(Error::not_found(Entity::Account, id))?;
        self.end_statement(account)
    }

    async fn update_account(&mut self, arg: UpdateAccountParams) -> Result<Account> {
        if self.account(arg.id).is_none() {
            return Err(Error::not_found(Entity::Account, arg.id));
        }
        self.lock_row(arg.id).await?;
        let mut account = self
            .account(arg.id)
            .ok_or(Error::not_found(Entity::Account, arg.id))?;
        account.balance = arg.balance;
        self.staged.accounts.insert(arg.id, account.clone());
        self.end_statement(account)
    }

    async fn list_accounts(&mut self, page: Page) -> Result<Vec<Account>> {
        let mut merged = self.shared.tables().accounts.clone();
        merged.extend(self.staged.accounts.clone());
        let rows: Vec<Account> = merged.into_values().collect();
        Ok(rows[page.bounds(rows.len())].to_vec())
    }

    async fn create_entry(&mut self, arg: CreateEntryParams) -> Result<Entry> {
        self.require_account(arg.account_id)?;
        let id = {
            let mut tables = self.shared.tables();
            tables.entry_seq += 1;
            tables.entry_seq
        };
        let entry = Entry {
            id,
            account_id: Some(arg.account_id),
            amount: arg.amount,
            created_at: Utc::now(),
        };
        self.staged.entries.insert(id, Some(entry.clone()));
        self.end_statement(entry)
    }

    async fn get_entry(&mut self, id: EntryId) -> Result<Entry> {
        self.entry(id).ok_or(Error::not_found(Entity::Entry, id))
    }

    async fn list_entries(&mut self, account_id: AccountId, page: Page) -> Result<Vec<Entry>> {
        let mut merged: BTreeMap<EntryId, Option<Entry>> = self
            .shared
            .tables()
            .entries
            .iter()
            .map(|(id, entry)| (*id, Some(entry.clone())))
            .collect();
        merged.extend(self.staged.entries.clone());
        let rows: Vec<Entry> = merged
            .into_values()
            .flatten()
            .filter(|entry| entry.account_id == Some(account_id))
            .collect();
        Ok(rows[page.bounds(rows.len())].to_vec())
    }

    async fn delete_entry(&mut self, id: EntryId) -> Result<Entry> {
        let entry = self.entry(id).ok_or(Error::not_found(Entity::Entry, id))?;
        self.staged.entries.insert(id, None);
        self.end_statement(entry)
    }

    async fn create_transfer(&mut self, arg: CreateTransferParams) -> Result<Transfer> {
        if arg.amount <= 0 {
            return Err(Error::ConstraintViolation(
                "transfers_amount_check: amount must be positive".to_string(),
            ));
        }
        self.require_account(arg.from_account_id)?;
        self.require_account(arg.to_account_id)?;
        let id = {
            let mut tables = self.shared.tables();
            tables.transfer_seq += 1;
            tables.transfer_seq
        };
        let transfer = Transfer {
            id,
            from_account_id: Some(arg.from_account_id),
            to_account_id: Some(arg.to_account_id),
            amount: arg.amount,
            created_at: Utc::now(),
        };
        self.staged.transfers.insert(id, transfer.clone());
        self.end_statement(transfer)
    }

    async fn get_transfer(&mut self, id: TransferId) -> Result<Transfer> {
        if let Some(transfer) = self.staged.transfers.get(&id) {
            return Ok(transfer.clone());
        }
        self.shared
            .tables()
            .transfers
            .get(&id)
            .cloned()
            .ok_or(Error::not_found(Entity::Transfer, id))
    }

    async fn list_transfers(&mut self, arg: ListTransfersParams) -> Result<Vec<Transfer>> {
        let mut merged = self.shared.tables().transfers.clone();
        merged.extend(self.staged.transfers.clone());
        let rows: Vec<Transfer> = merged
            .into_values()
            .filter(|t| {
                t.from_account_id == Some(arg.from_account_id)
                    || t.to_account_id == Some(arg.to_account_id)
            })
            .collect();
        Ok(rows[arg.page.bounds(rows.len())].to_vec())
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.release_locks();
    }
}

#[async_trait]
impl Transaction for MemorySession {
    async fn commit(mut self) -> Result<()> {
        self.publish();
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        // Dropping discards staged writes and releases row locks
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account_params(owner: &str, balance: i64) -> CreateAccountParams {
        CreateAccountParams {
            owner: owner.to_string(),
            balance,
            currency: "USD".to_string(),
        }
    }

    #[tokio::test]
    async fn test_uncommitted_writes_are_invisible() {
        let store = MemoryStore::new();
        let mut conn = store.acquire().await.unwrap();
        let account = conn.create_account(account_params("alice", 100)).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.update_account(UpdateAccountParams {
            id: account.id,
            balance: 40,
        })
        .await
        .unwrap();
        assert_eq!(tx.get_account(account.id).await.unwrap().balance, 40);
        assert_eq!(conn.get_account(account.id).await.unwrap().balance, 100);

        tx.commit().await.unwrap();
        assert_eq!(conn.get_account(account.id).await.unwrap().balance, 40);
    }

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let store = MemoryStore::new();
        let mut conn = store.acquire().await.unwrap();
        let account = conn.create_account(account_params("bob", 10)).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let entry = tx
            .create_entry(CreateEntryParams {
                account_id: account.id,
                amount: 5,
            })
            .await
            .unwrap();
        tx.rollback().await.unwrap();

        assert!(matches!(
            conn.get_entry(entry.id).await,
            Err(Error::NotFound {
                entity: Entity::Entry,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_entry_requires_existing_account() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let err = tx
            .create_entry(CreateEntryParams {
                account_id: 999,
                amount: 1,
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "CONSTRAINT_VIOLATION");
    }

    #[tokio::test]
    async fn test_lock_timeout_reports_conflict() {
        let store = MemoryStore::with_lock_timeout(Duration::from_millis(50));
        let mut conn = store.acquire().await.unwrap();
        let account = conn.create_account(account_params("carol", 1)).await.unwrap();

        let mut holder = store.begin().await.unwrap();
        holder.get_account_for_update(account.id).await.unwrap();

        let mut waiter = store.begin().await.unwrap();
        let err = waiter.get_account_for_update(account.id).await.unwrap_err();
        assert!(matches!(err, Error::LockConflict(_)));

        drop(holder);
        waiter.get_account_for_update(account.id).await.unwrap();
        drop(waiter);
        assert_eq!(store.row_lock_count(), 0);
    }

    #[tokio::test]
    async fn test_row_locks_are_forgotten_after_release() {
        let store = MemoryStore::new();
        let mut conn = store.acquire().await.unwrap();
        let mut ids = Vec::new();
        for i in 0..20 {
            ids.push(conn.create_account(account_params("hank", i)).await.unwrap().id);
        }

        let mut tx = store.begin().await.unwrap();
        for id in &ids[..10] {
            tx.get_account_for_update(*id).await.unwrap();
        }
        assert_eq!(store.row_lock_count(), 10);
        tx.commit().await.unwrap();
        assert_eq!(store.row_lock_count(), 0);

        let mut tx = store.begin().await.unwrap();
        for id in &ids[10..] {
            tx.update_account(UpdateAccountParams { id: *id, balance: 0 })
                .await
                .unwrap();
        }
        tx.rollback().await.unwrap();
        assert_eq!(store.row_lock_count(), 0);

        // autocommit updates lock and release per statement
        conn.update_account(UpdateAccountParams { id: ids[0], balance: 5 })
            .await
            .unwrap();
        assert_eq!(store.row_lock_count(), 0);
    }

    #[tokio::test]
    async fn test_row_lock_kept_while_contended() {
        let store = MemoryStore::new();
        let mut conn = store.acquire().await.unwrap();
        let account = conn.create_account(account_params("ivy", 1)).await.unwrap();

        let mut holder = store.begin().await.unwrap();
        holder.get_account_for_update(account.id).await.unwrap();

        let waiter = {
            let store = store.clone();
            tokio::spawn(async move {
                let mut tx = store.begin().await.unwrap();
                tx.get_account_for_update(account.id).await.unwrap();
                tx.commit().await.unwrap();
            })
        };
        tokio::task::yield_now().await;

        holder.commit().await.unwrap();
        waiter.await.unwrap();
        assert_eq!(store.row_lock_count(), 0);
    }

    #[tokio::test]
    async fn test_locked_read_sees_latest_commit() {
        let store = MemoryStore::new();
        let mut conn = store.acquire().await.unwrap();
        let account = conn.create_account(account_params("dave", 100)).await.unwrap();

        let mut first = store.begin().await.unwrap();
        first.get_account_for_update(account.id).await.unwrap();

        let waiter_store = store.clone();
        let waiter = tokio::spawn(async move {
            let mut second = waiter_store.begin().await.unwrap();
            let seen = second.get_account_for_update(account.id).await.unwrap();
            second.commit().await.unwrap();
            seen.balance
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        first
            .update_account(UpdateAccountParams {
                id: account.id,
                balance: 70,
            })
            .await
            .unwrap();
        first.commit().await.unwrap();

        assert_eq!(waiter.await.unwrap(), 70);
    }

    #[tokio::test]
    async fn test_sequences_survive_rollback() {
        let store = MemoryStore::new();
        let mut conn = store.acquire().await.unwrap();
        let a = conn.create_account(account_params("erin", 0)).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.create_account(account_params("ghost", 0)).await.unwrap();
        tx.rollback().await.unwrap();

        let b = conn.create_account(account_params("frank", 0)).await.unwrap();
        assert_eq!(b.id, a.id + 2);
        assert_eq!(conn.list_accounts(Page::default()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_delete_entry() {
        let store = MemoryStore::new();
        let mut conn = store.acquire().await.unwrap();
        let account = conn.create_account(account_params("gina", 0)).await.unwrap();
        let entry = conn
            .create_entry(CreateEntryParams {
                account_id: account.id,
                amount: 3,
            })
            .await
            .unwrap();

        let deleted = conn.delete_entry(entry.id).await.unwrap();
        assert_eq!(deleted, entry);
        assert!(conn.get_entry(entry.id).await.is_err());
        assert!(conn.delete_entry(entry.id).await.is_err());
    }
}
