//! Account Activation Gate.

use crate::deposits::DepositSummary;
use crate::effects::{Notice, SideEffects, SYSTEM_ACTOR};
use crate::error::BankOpsError;
use crate::flow::{AccountAction, AccountLifecycle};
use crate::notify::NotificationEvent;
use crate::storage::BankStore;
use crate::types::{Account, AccountId, AccountStatus, NewAccount};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountView {
    pub account: Account,
    pub deposit: DepositSummary,
}

pub struct AccountActivationGate {
    store: Arc<dyn BankStore>,
    effects: SideEffects,
}

impl AccountActivationGate {
    pub(crate) fn new(store: Arc<dyn BankStore>, effects: SideEffects) -> Self {
        Self { store, effects }
    }

    pub async fn open(&self, request: NewAccount) -> Result<Account, BankOpsError> {
        let account = request.into_account(AccountId::generate(), Utc::now())?;
        self.store.insert_account(&account).await?;
        info!(
            account_id = %account.id,
            user_id = %account.user_id,
            status = account.status.as_str(),
            min_deposit = %account.min_deposit,
            "account opened"
        );
        self.effects
            .committed(
                SYSTEM_ACTOR,
                "open",
                account.id.as_str(),
                &serde_json::Value::Null,
                &account,
                None,
            )
            .await;
        Ok(account)
    }

    pub async fn load(&self, account_id: &AccountId) -> Result<Account, BankOpsError> {
        self.store
            .load_account(account_id)
            .await?
            .ok_or_else(|| BankOpsError::not_found("account", account_id.as_str()))
    }

    /// Activate once verified deposits cover the minimum.
    ///
    /// Deposits are re-read at call time; a record rejected a moment ago no
    /// longer counts.
    pub async fn activate(&self, account_id: &AccountId) -> Result<Account, BankOpsError> {
        self.transition(account_id, AccountAction::Activate, None)
            .await
    }

    pub async fn suspend(
        &self,
        account_id: &AccountId,
        reason: &str,
    ) -> Result<Account, BankOpsError> {
        self.transition(account_id, AccountAction::Suspend, Some(reason))
            .await
    }

    pub async fn close(&self, account_id: &AccountId, reason: &str) -> Result<Account, BankOpsError> {
        self.transition(account_id, AccountAction::Close, Some(reason))
            .await
    }

    pub async fn reject(
        &self,
        account_id: &AccountId,
        reason: &str,
    ) -> Result<Account, BankOpsError> {
        self.transition(account_id, AccountAction::Reject, Some(reason))
            .await
    }

    pub async fn view(&self, account_id: &AccountId) -> Result<AccountView, BankOpsError> {
        let account = self.load(account_id).await?;
        let deposit = self.deposit_summary(&account).await?;
        Ok(AccountView { account, deposit })
    }

    async fn transition(
        &self,
        account_id: &AccountId,
        action: AccountAction,
        reason: Option<&str>,
    ) -> Result<Account, BankOpsError> {
        let result = self.try_transition(account_id, action, reason).await;
        if let Err(err) = &result {
            self.effects
                .refused(SYSTEM_ACTOR, action.name(), account_id.as_str(), err)
                .await;
        }
        result
    }

    async fn try_transition(
        &self,
        account_id: &AccountId,
        action: AccountAction,
        reason: Option<&str>,
    ) -> Result<Account, BankOpsError> {
        let account = self.load(account_id).await?;
        let status = AccountLifecycle::advance(account.status, action)?;

        if action == AccountAction::Activate {
            let deposit = self.deposit_summary(&account).await?;
            if !deposit.is_met() {
                return Err(BankOpsError::DepositNotMet {
                    required: deposit.required,
                    deposited: deposit.total_deposited,
                });
            }
        }

        let now = Utc::now();
        let mut next = account.clone();
        next.status = status;
        next.status_reason = reason.map(str::to_string);
        next.status_changed_at = Some(now);
        next.version = account.version + 1;
        next.updated_at = now;

        if !self.store.update_account(&next, account.version).await? {
            return Err(BankOpsError::Conflict {
                entity: "account",
                id: account.id.to_string(),
            });
        }
        info!(
            account_id = %next.id,
            from = account.status.as_str(),
            to = next.status.as_str(),
            reason = reason.unwrap_or(""),
            "account status changed"
        );

        self.effects
            .committed(
                SYSTEM_ACTOR,
                action.name(),
                next.id.as_str(),
                &account,
                &next,
                Some(Notice {
                    user_id: &next.user_id,
                    event: notification_for(status),
                    payload: json!({
                        "account_id": next.id,
                        "status": next.status,
                        "reason": reason,
                    }),
                }),
            )
            .await;
        Ok(next)
    }

    async fn deposit_summary(&self, account: &Account) -> Result<DepositSummary, BankOpsError> {
        let records = self.store.deposits_for(account.id.as_str()).await?;
        Ok(DepositSummary::project(account.min_deposit, &records))
    }
}

fn notification_for(status: AccountStatus) -> NotificationEvent {
    match status {
        AccountStatus::Suspended => NotificationEvent::AccountSuspended,
        AccountStatus::Closed => NotificationEvent::AccountClosed,
        AccountStatus::Rejected => NotificationEvent::AccountRejected,
        _ => NotificationEvent::AccountActivated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::LedgerAuditSink;
    use crate::notify::OutboxNotifier;
    use crate::storage::MemoryStore;
    use crate::types::{DepositRecord, DepositStatus};
    use rust_decimal_macros::dec;

    fn gate() -> (Arc<dyn BankStore>, AccountActivationGate, Arc<OutboxNotifier>) {
        let store: Arc<dyn BankStore> = Arc::new(MemoryStore::new());
        let outbox = Arc::new(OutboxNotifier::new());
        let gate = AccountActivationGate::new(
            store.clone(),
            SideEffects::new(Arc::new(LedgerAuditSink::new()), outbox.clone()),
        );
        (store, gate, outbox)
    }

    #[tokio::test]
    async fn activation_waits_for_verified_deposits() {
        let (store, gate, outbox) = gate();
        let account = gate
            .open(NewAccount::new("user-1", "checking").with_min_deposit(dec!(500)))
            .await
            .unwrap();
        assert_eq!(account.status, AccountStatus::PendingFunding);

        let pending = DepositRecord::new(account.id.as_str(), dec!(500), DepositStatus::Pending).unwrap();
        store.insert_deposit(&pending).await.unwrap();
        let err = gate.activate(&account.id).await.unwrap_err();
        assert!(matches!(err, BankOpsError::DepositNotMet { .. }));

        store
            .update_deposit_status(&pending.id, DepositStatus::Completed, Utc::now())
            .await
            .unwrap();
        let active = gate.activate(&account.id).await.unwrap();
        assert_eq!(active.status, AccountStatus::Active);
        assert!(active.status_changed_at.is_some());
        assert_eq!(outbox.pending()[0].event, NotificationEvent::AccountActivated);
    }

    #[tokio::test]
    async fn zero_minimum_activates_without_deposits() {
        let (_, gate, _) = gate();
        let account = gate.open(NewAccount::new("user-1", "savings")).await.unwrap();
        assert_eq!(account.status, AccountStatus::Approved);
        assert_eq!(gate.activate(&account.id).await.unwrap().status, AccountStatus::Active);
    }

    #[tokio::test]
    async fn suspend_and_close_record_reason() {
        let (_, gate, outbox) = gate();
        let account = gate.open(NewAccount::new("user-1", "savings")).await.unwrap();

        let suspended = gate.suspend(&account.id, "kyc review").await.unwrap();
        assert_eq!(suspended.status, AccountStatus::Suspended);
        assert_eq!(suspended.status_reason.as_deref(), Some("kyc review"));

        assert!(matches!(
            gate.activate(&account.id).await,
            Err(BankOpsError::InvalidTransition { .. })
        ));

        let closed = gate.close(&account.id, "customer request").await.unwrap();
        assert_eq!(closed.status, AccountStatus::Closed);
        assert!(gate.reject(&account.id, "late").await.is_err());

        let events: Vec<_> = outbox.pending().into_iter().map(|n| n.event).collect();
        assert_eq!(
            events,
            vec![NotificationEvent::AccountSuspended, NotificationEvent::AccountClosed]
        );
    }

    #[tokio::test]
    async fn view_projects_deposits() {
        let (store, gate, _) = gate();
        let account = gate
            .open(NewAccount::new("user-1", "checking").with_min_deposit(dec!(100)))
            .await
            .unwrap();
        let deposit = DepositRecord::new(account.id.as_str(), dec!(40), DepositStatus::Approved).unwrap();
        store.insert_deposit(&deposit).await.unwrap();

        let view = gate.view(&account.id).await.unwrap();
        assert_eq!(view.deposit.total_deposited, dec!(40));
        assert_eq!(view.deposit.shortfall(), dec!(60));
    }
}
