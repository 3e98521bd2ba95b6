//! Treasury pool handle and the balance guard consulted before money leaves it.

use crate::error::BankOpsError;
use crate::storage::{BankStore, DisbursementCommit, DisbursementOutcome};
use crate::types::AccountId;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::warn;

/// The pool loan principal is disbursed from.
///
/// One read path and one exclusive update. The update is the only way the
/// treasury balance decreases, and it must refuse to overdraw.
#[async_trait]
pub trait TreasuryLedger: Send + Sync {
    fn account_id(&self) -> &AccountId;

    /// Balance read fresh from the datastore on every call.
    async fn current_balance(&self) -> Result<Decimal, BankOpsError>;

    /// Debit the pool and apply the rest of the disbursement as one unit.
    async fn disburse(&self, commit: &DisbursementCommit)
        -> Result<DisbursementOutcome, BankOpsError>;
}

/// Treasury ledger backed by a treasury account row in a [`BankStore`].
pub struct StoreTreasury {
    account_id: AccountId,
    store: Arc<dyn BankStore>,
}

impl StoreTreasury {
    pub fn new(account_id: AccountId, store: Arc<dyn BankStore>) -> Self {
        Self { account_id, store }
    }
}

#[async_trait]
impl TreasuryLedger for StoreTreasury {
    fn account_id(&self) -> &AccountId {
        &self.account_id
    }

    async fn current_balance(&self) -> Result<Decimal, BankOpsError> {
        self.store
            .load_account(&self.account_id)
            .await?
            .map(|account| account.balance)
            .ok_or_else(|| BankOpsError::not_found("treasury account", self.account_id.as_str()))
    }

    async fn disburse(
        &self,
        commit: &DisbursementCommit,
    ) -> Result<DisbursementOutcome, BankOpsError> {
        self.store.apply_disbursement(&self.account_id, commit).await
    }
}

/// Early-rejection check against the treasury balance.
///
/// This does not serialize concurrent disbursements; the conditional debit in
/// [`TreasuryLedger::disburse`] does. A passing check is a hint, not a hold.
#[derive(Clone)]
pub struct TreasuryGuard {
    ledger: Arc<dyn TreasuryLedger>,
}

impl TreasuryGuard {
    pub fn new(ledger: Arc<dyn TreasuryLedger>) -> Self {
        Self { ledger }
    }

    pub fn ledger(&self) -> &Arc<dyn TreasuryLedger> {
        &self.ledger
    }

    pub async fn current_balance(&self) -> Result<Decimal, BankOpsError> {
        self.ledger.current_balance().await
    }

    pub async fn can_afford(&self, amount: Decimal) -> Result<bool, BankOpsError> {
        Ok(amount <= self.current_balance().await?)
    }

    /// Fail `InsufficientTreasury` unless `amount` fits in the current balance.
    pub async fn ensure_affordable(&self, amount: Decimal) -> Result<Decimal, BankOpsError> {
        let available = self.current_balance().await?;
        if amount > available {
            warn!(
                treasury = %self.ledger.account_id(),
                requested = %amount,
                available = %available,
                "treasury cannot cover request"
            );
            return Err(BankOpsError::InsufficientTreasury {
                requested: amount,
                available,
            });
        }
        Ok(available)
    }
}
