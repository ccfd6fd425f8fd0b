//! Transfer Orchestrator
//!
//! Sequences one transfer inside a single unit of work.

use futures::FutureExt;
use tracing::{debug, info, warn};

use super::lock_order::{BalanceUpdate, LockOrder};
use super::state::TransferState;
use super::types::{TransferTxParams, TransferTxResult};
use crate::error::{Error, Result};
use crate::store::{
    Account, CreateEntryParams, CreateTransferParams, Database, Queries, UpdateAccountParams,
};
use crate::unit_of_work::UnitOfWork;

/// Moves funds between two accounts atomically.
///
/// Holds no in-process locks; concurrent transfers are serialized by the
/// storage engine's row locks, always taken in ascending account-id order.
/// Worker labels for diagnostics belong on the caller's span
/// (`tracing::Instrument`), not in the request.
#[derive(Clone)]
pub struct TransferOrchestrator<D> {
    uow: UnitOfWork<D>,
}

impl<D: Database> TransferOrchestrator<D> {
    pub fn new(db: D) -> Self {
        Self {
            uow: UnitOfWork::new(db),
        }
    }

    pub fn unit_of_work(&self) -> &UnitOfWork<D> {
        &self.uow
    }

    /// Execute one transfer.
    ///
    /// # Steps (one transaction)
    /// 1. create the transfer record
    /// 2. create the debit entry (-amount) for the source
    /// 3. create the credit entry (+amount) for the destination
    /// 4. lock, re-read and update the lower-id account
    /// 5. lock, re-read and update the higher-id account
    ///
    /// Any failure aborts the whole transfer; nothing it wrote survives.
    /// Lock conflicts are returned to the caller, never retried here.
    pub async fn transfer(&self, params: TransferTxParams) -> Result<TransferTxResult> {
        let order = LockOrder::new(&params)?;
        debug!(
            from = params.from_account_id,
            to = params.to_account_id,
            amount = params.amount,
            state = %TransferState::Pending,
            "Transfer started"
        );

        let outcome = self
            .uow
            .execute(move |tx| run_transfer(tx, params, order).boxed())
            .await;

        let state = TransferState::finish(&outcome);
        match &outcome {
            Ok(result) => info!(
                transfer_id = result.transfer.id,
                from = params.from_account_id,
                to = params.to_account_id,
                amount = params.amount,
                from_balance = result.from_account.balance,
                to_balance = result.to_account.balance,
                state = %state,
                "Transfer committed"
            ),
            Err(e) => warn!(
                from = params.from_account_id,
                to = params.to_account_id,
                amount = params.amount,
                code = e.code(),
                error = %e,
                state = %state,
                "Transfer aborted"
            ),
        }

        outcome
    }
}

async fn run_transfer<Q: Queries>(
    q: &mut Q,
    params: TransferTxParams,
    order: LockOrder,
) -> Result<TransferTxResult> {
    debug!(from = params.from_account_id, "Create transfer");
    let transfer = q
        .create_transfer(CreateTransferParams {
            from_account_id: params.from_account_id,
            to_account_id: params.to_account_id,
            amount: params.amount,
        })
        .await?;

    debug!(transfer_id = transfer.id, "Create from entry");
    let from_entry = q
        .create_entry(CreateEntryParams {
            account_id: params.from_account_id,
            amount: -params.amount,
        })
        .await?;

    debug!(transfer_id = transfer.id, "Create to entry");
    let to_entry = q
        .create_entry(CreateEntryParams {
            account_id: params.to_account_id,
            amount: params.amount,
        })
        .await?;

    let [first, second] = order.updates();
    let first = add_balance(q, first).await?;
    let second = add_balance(q, second).await?;
    let (from_account, to_account) = order.assign(first, second);

    Ok(TransferTxResult {
        transfer,
        from_account,
        to_account,
        from_entry,
        to_entry,
    })
}

/// Lock the row, then write `locked balance + delta`
async fn add_balance<Q: Queries>(q: &mut Q, update: BalanceUpdate) -> Result<Account> {
    debug!(account_id = update.account_id, "Get account for update");
    let locked = q.get_account_for_update(update.account_id).await?;

    let balance = locked
        .balance
        .checked_add(update.delta)
        .ok_or(Error::Overflow(update.account_id))?;

    debug!(
        account_id = update.account_id,
        old_balance = locked.balance,
        new_balance = balance,
        "Update account"
    );
    q.update_account(UpdateAccountParams {
        id: update.account_id,
        balance,
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::CreateAccountParams;
    use crate::store::memory::MemoryStore;

    async fn setup(balances: [i64; 2]) -> (TransferOrchestrator<MemoryStore>, Account, Account) {
        let store = MemoryStore::new();
        let mut conn = store.acquire().await.unwrap();
        let mut accounts = Vec::new();
        for (owner, balance) in [("alice", balances[0]), ("bob", balances[1])] {
            let account = conn
                .create_account(CreateAccountParams {
                    owner: owner.to_string(),
                    balance,
                    currency: "USD".to_string(),
                })
                .await
                .unwrap();
            accounts.push(account);
        }
        let b = accounts.pop().unwrap();
        let a = accounts.pop().unwrap();
        (TransferOrchestrator::new(store), a, b)
    }

    #[tokio::test]
    async fn test_transfer_happy_path() {
        let (orchestrator, x, y) = setup([100, 50]).await;

        let result = orchestrator
            .transfer(TransferTxParams::new(x.id, y.id, 10))
            .await
            .unwrap();

        assert_eq!(result.transfer.from_account_id, Some(x.id));
        assert_eq!(result.transfer.to_account_id, Some(y.id));
        assert_eq!(result.transfer.amount, 10);
        assert_eq!(result.from_entry.account_id, Some(x.id));
        assert_eq!(result.from_entry.amount, -10);
        assert_eq!(result.to_entry.account_id, Some(y.id));
        assert_eq!(result.to_entry.amount, 10);
        assert_eq!(result.from_account.id, x.id);
        assert_eq!(result.from_account.balance, 90);
        assert_eq!(result.to_account.id, y.id);
        assert_eq!(result.to_account.balance, 60);
    }

    #[tokio::test]
    async fn test_transfer_towards_lower_id() {
        let (orchestrator, x, y) = setup([100, 50]).await;

        let result = orchestrator
            .transfer(TransferTxParams::new(y.id, x.id, 30))
            .await
            .unwrap();

        assert_eq!(result.from_account.id, y.id);
        assert_eq!(result.from_account.balance, 20);
        assert_eq!(result.to_account.id, x.id);
        assert_eq!(result.to_account.balance, 130);
    }

    #[tokio::test]
    async fn test_negative_balance_is_allowed() {
        let (orchestrator, x, y) = setup([5, 0]).await;

        let result = orchestrator
            .transfer(TransferTxParams::new(x.id, y.id, 10))
            .await
            .unwrap();
        assert_eq!(result.from_account.balance, -5);
    }

    #[tokio::test]
    async fn test_rejects_invalid_input_before_touching_storage() {
        let (orchestrator, x, y) = setup([100, 50]).await;

        let err = orchestrator
            .transfer(TransferTxParams::new(x.id, x.id, 10))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SameAccount));

        let err = orchestrator
            .transfer(TransferTxParams::new(x.id, y.id, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidAmount));

        let mut conn = orchestrator.unit_of_work().db().acquire().await.unwrap();
        assert_eq!(conn.get_account(x.id).await.unwrap().balance, 100);
    }

    #[tokio::test]
    async fn test_overflow_aborts() {
        let (orchestrator, x, y) = setup([100, i64::MAX]).await;

        let err = orchestrator
            .transfer(TransferTxParams::new(x.id, y.id, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Overflow(id) if id == y.id));

        let mut conn = orchestrator.unit_of_work().db().acquire().await.unwrap();
        assert_eq!(conn.get_account(x.id).await.unwrap().balance, 100);
    }
}
