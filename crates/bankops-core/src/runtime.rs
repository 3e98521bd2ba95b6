use crate::accounts::{AccountActivationGate, AccountView};
use crate::auth::{OperatorAuthority, OperatorCredential};
use crate::effects::SideEffects;
use crate::error::{ActionError, BankOpsError};
use crate::ledger::{AuditEntry, LedgerAuditSink};
use crate::loans::{LoanLifecycleEngine, LoanView, PaymentReceipt};
use crate::notify::{Notifier, TracingNotifier};
use crate::storage::{open_store, BankStore, StorageConfig};
use crate::treasury::{StoreTreasury, TreasuryGuard};
use crate::types::{
    Account, AccountActionResponse, AccountId, AccountStatus, CreateLoanResponse, DepositId,
    DepositRecord, DepositStatus, Loan, LoanActionResponse, LoanId, LoanPayment, LoanStatus, NewAccount,
    NewLoan, PaymentResponse, UserId,
};
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tracing::{info, warn};

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct BankOpsConfig {
    pub treasury_account_id: String,
    /// Seeds the treasury row only when it does not exist yet.
    pub treasury_opening_balance: Decimal,
    /// `(operator_id, secret)` pairs allowed to approve loans. Empty by
    /// default, in which case no loan can be approved.
    pub operators: Vec<(String, String)>,
    pub storage: StorageConfig,
}

impl Default for BankOpsConfig {
    fn default() -> Self {
        Self {
            treasury_account_id: "treasury".to_string(),
            treasury_opening_balance: dec!(1000000),
            operators: Vec::new(),
            storage: StorageConfig::Memory,
        }
    }
}

impl BankOpsConfig {
    pub fn with_operator(
        mut self,
        operator_id: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        self.operators.push((operator_id.into(), secret.into()));
        self
    }
}

/// Facade over the lifecycle engines, exposing the inbound operations.
///
/// Inbound operations never return `Err`: failures are folded into the
/// response's `error` field together with the status the row is left in.
pub struct BankOpsEngine {
    store: Arc<dyn BankStore>,
    loans: LoanLifecycleEngine,
    accounts: AccountActivationGate,
    guard: TreasuryGuard,
    authority: Arc<OperatorAuthority>,
    audit: Arc<LedgerAuditSink>,
    config: BankOpsConfig,
}

impl BankOpsEngine {
    /// Open the configured store and wire the engines with log-only notifications.
    pub async fn bootstrap(config: BankOpsConfig) -> Result<Self, BankOpsError> {
        let store = open_store(config.storage.clone()).await?;
        Self::with_parts(config, store, Arc::new(TracingNotifier)).await
    }

    pub async fn with_parts(
        config: BankOpsConfig,
        store: Arc<dyn BankStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, BankOpsError> {
        let treasury_id = AccountId::new(config.treasury_account_id.clone());
        ensure_treasury(store.as_ref(), &treasury_id, config.treasury_opening_balance).await?;

        let mut authority = OperatorAuthority::new();
        for (operator_id, secret) in &config.operators {
            authority.register(operator_id.clone(), secret.clone());
        }
        let authority = Arc::new(authority);
        if config.operators.is_empty() {
            warn!("no operators registered; loan approvals will be refused");
        }

        let audit = Arc::new(LedgerAuditSink::new());
        let effects = SideEffects::new(audit.clone(), notifier);
        let guard = TreasuryGuard::new(Arc::new(StoreTreasury::new(treasury_id, store.clone())));

        let loans = LoanLifecycleEngine::new(
            store.clone(),
            guard.clone(),
            authority.clone(),
            effects.clone(),
        );
        let accounts = AccountActivationGate::new(store.clone(), effects);

        info!(
            backend = store.backend_label(),
            treasury = %config.treasury_account_id,
            operators = config.operators.len(),
            "bankops engine ready"
        );

        Ok(Self {
            store,
            loans,
            accounts,
            guard,
            authority,
            audit,
            config,
        })
    }

    pub fn config(&self) -> &BankOpsConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn BankStore> {
        &self.store
    }

    pub fn loans(&self) -> &LoanLifecycleEngine {
        &self.loans
    }

    pub fn accounts(&self) -> &AccountActivationGate {
        &self.accounts
    }

    pub fn issue_credential(&self, operator_id: &str) -> Result<OperatorCredential, BankOpsError> {
        self.authority.issue(operator_id)
    }

    pub fn login_operator(
        &self,
        operator_id: &str,
        secret: &str,
    ) -> Result<OperatorCredential, BankOpsError> {
        self.authority.login(operator_id, secret)
    }

    pub async fn create_loan(&self, request: NewLoan) -> CreateLoanResponse {
        match self.loans.create(request).await {
            Ok(loan) => CreateLoanResponse {
                loan_id: Some(loan.id),
                error: None,
            },
            Err(err) => CreateLoanResponse {
                loan_id: None,
                error: Some(ActionError::from(&err)),
            },
        }
    }

    pub async fn approve_loan(
        &self,
        loan_id: &LoanId,
        credential: &OperatorCredential,
    ) -> LoanActionResponse {
        let result = self.loans.approve(loan_id, credential).await;
        self.loan_response(loan_id, result).await
    }

    pub async fn disburse_loan(&self, loan_id: &LoanId) -> LoanActionResponse {
        let result = self.loans.disburse(loan_id).await;
        self.loan_response(loan_id, result).await
    }

    pub async fn reject_loan(&self, loan_id: &LoanId, reason: &str) -> LoanActionResponse {
        let result = self.loans.reject(loan_id, reason).await;
        self.loan_response(loan_id, result).await
    }

    pub async fn record_loan_payment(
        &self,
        loan_id: &LoanId,
        amount: Decimal,
        note: Option<&str>,
    ) -> PaymentResponse {
        match self.loans.record_payment(loan_id, amount, note).await {
            Ok(PaymentReceipt {
                loan,
                months_covered,
                warnings,
                ..
            }) => PaymentResponse {
                loan_id: loan.id,
                status: Some(loan.status),
                new_balance: Some(loan.remaining_balance),
                months_covered,
                warnings: warnings.iter().map(ToString::to_string).collect(),
                error: None,
            },
            Err(err) => {
                let current = self.store.load_loan(loan_id).await.ok().flatten();
                PaymentResponse {
                    loan_id: loan_id.clone(),
                    status: current.as_ref().map(|loan| loan.status),
                    new_balance: current.map(|loan| loan.remaining_balance),
                    months_covered: 0,
                    warnings: Vec::new(),
                    error: Some(ActionError::from(&err)),
                }
            }
        }
    }

    pub async fn open_account(&self, request: NewAccount) -> Result<Account, BankOpsError> {
        self.accounts.open(request).await
    }

    pub async fn activate_account(&self, account_id: &AccountId) -> AccountActionResponse {
        let result = self.accounts.activate(account_id).await;
        self.account_response(account_id, result).await
    }

    pub async fn suspend_account(
        &self,
        account_id: &AccountId,
        reason: &str,
    ) -> AccountActionResponse {
        let result = self.accounts.suspend(account_id, reason).await;
        self.account_response(account_id, result).await
    }

    pub async fn close_account(&self, account_id: &AccountId, reason: &str) -> AccountActionResponse {
        let result = self.accounts.close(account_id, reason).await;
        self.account_response(account_id, result).await
    }

    pub async fn reject_account(
        &self,
        account_id: &AccountId,
        reason: &str,
    ) -> AccountActionResponse {
        let result = self.accounts.reject(account_id, reason).await;
        self.account_response(account_id, result).await
    }

    /// Append a deposit record to a loan or an account.
    pub async fn record_deposit(
        &self,
        parent_id: &str,
        amount: Decimal,
        status: DepositStatus,
    ) -> Result<DepositRecord, BankOpsError> {
        let loan_parent = self.store.load_loan(&LoanId::new(parent_id)).await?.is_some();
        if !loan_parent
            && self
                .store
                .load_account(&AccountId::new(parent_id))
                .await?
                .is_none()
        {
            return Err(BankOpsError::not_found("deposit parent", parent_id));
        }

        let record = DepositRecord::new(parent_id, amount, status)?;
        self.store.insert_deposit(&record).await?;
        info!(
            deposit_id = %record.id,
            parent_id,
            amount = %record.amount,
            status = record.status.as_str(),
            "deposit recorded"
        );
        Ok(record)
    }

    pub async fn review_deposit(
        &self,
        deposit_id: &DepositId,
        status: DepositStatus,
    ) -> Result<DepositRecord, BankOpsError> {
        if !self
            .store
            .update_deposit_status(deposit_id, status, Utc::now())
            .await?
        {
            return Err(BankOpsError::not_found("deposit", deposit_id.as_str()));
        }
        let record = self
            .store
            .load_deposit(deposit_id)
            .await?
            .ok_or_else(|| BankOpsError::not_found("deposit", deposit_id.as_str()))?;
        info!(deposit_id = %record.id, status = record.status.as_str(), "deposit reviewed");
        Ok(record)
    }

    pub async fn deposits(&self, parent_id: &str) -> Result<Vec<DepositRecord>, BankOpsError> {
        self.store.deposits_for(parent_id).await
    }

    pub async fn loan_view(&self, loan_id: &LoanId) -> Result<LoanView, BankOpsError> {
        self.loans.view(loan_id).await
    }

    pub async fn loan_payments(&self, loan_id: &LoanId) -> Result<Vec<LoanPayment>, BankOpsError> {
        self.loans.payments(loan_id).await
    }

    pub async fn account_view(&self, account_id: &AccountId) -> Result<AccountView, BankOpsError> {
        self.accounts.view(account_id).await
    }

    pub async fn treasury_balance(&self) -> Result<Decimal, BankOpsError> {
        self.guard.current_balance().await
    }

    pub async fn audit_entries(&self) -> Vec<AuditEntry> {
        self.audit.entries().await
    }

    pub async fn audit_entries_for(&self, subject_id: &str) -> Vec<AuditEntry> {
        self.audit.entries_for(subject_id).await
    }

    pub async fn verify_audit_chain(&self) -> bool {
        self.audit.verify_chain().await
    }

    async fn loan_response(
        &self,
        loan_id: &LoanId,
        result: Result<Loan, BankOpsError>,
    ) -> LoanActionResponse {
        match result {
            Ok(loan) => LoanActionResponse {
                loan_id: loan.id,
                status: Some(loan.status),
                error: None,
            },
            Err(err) => LoanActionResponse {
                loan_id: loan_id.clone(),
                status: self.current_loan_status(loan_id).await,
                error: Some(ActionError::from(&err)),
            },
        }
    }

    async fn account_response(
        &self,
        account_id: &AccountId,
        result: Result<Account, BankOpsError>,
    ) -> AccountActionResponse {
        match result {
            Ok(account) => AccountActionResponse {
                account_id: account.id,
                status: Some(account.status),
                error: None,
            },
            Err(err) => AccountActionResponse {
                account_id: account_id.clone(),
                status: self
                    .store
                    .load_account(account_id)
                    .await
                    .ok()
                    .flatten()
                    .map(|account| account.status),
                error: Some(ActionError::from(&err)),
            },
        }
    }

    async fn current_loan_status(&self, loan_id: &LoanId) -> Option<LoanStatus> {
        self.store
            .load_loan(loan_id)
            .await
            .ok()
            .flatten()
            .map(|loan| loan.status)
    }
}

async fn ensure_treasury(
    store: &dyn BankStore,
    treasury_id: &AccountId,
    opening_balance: Decimal,
) -> Result<(), BankOpsError> {
    if store.load_account(treasury_id).await?.is_some() {
        return Ok(());
    }
    if opening_balance < Decimal::ZERO {
        return Err(BankOpsError::InvalidAmount(format!(
            "treasury opening balance must not be negative, got {opening_balance}"
        )));
    }

    let now = Utc::now();
    let treasury = Account {
        id: treasury_id.clone(),
        user_id: UserId::new("bank"),
        account_type: "treasury".to_string(),
        status: AccountStatus::Active,
        min_deposit: Decimal::ZERO,
        balance: opening_balance,
        status_reason: None,
        status_changed_at: None,
        version: 0,
        created_at: now,
        updated_at: now,
    };
    store.insert_account(&treasury).await?;
    info!(treasury = %treasury_id, balance = %opening_balance, "treasury account seeded");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::notify::OutboxNotifier;
    use crate::storage::MemoryStore;
    use crate::types::LoanType;

    async fn engine(treasury: Decimal) -> BankOpsEngine {
        let config = BankOpsConfig {
            treasury_opening_balance: treasury,
            ..BankOpsConfig::default()
        }
        .with_operator("operator-local", "local-secret");
        BankOpsEngine::with_parts(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(OutboxNotifier::new()),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn bootstrap_seeds_treasury_once() {
        let store: Arc<dyn BankStore> = Arc::new(MemoryStore::new());
        let config = BankOpsConfig {
            treasury_opening_balance: dec!(250),
            ..BankOpsConfig::default()
        };
        let first = BankOpsEngine::with_parts(config.clone(), store.clone(), Arc::new(TracingNotifier))
            .await
            .unwrap();
        assert_eq!(first.treasury_balance().await.unwrap(), dec!(250));

        let reseeded = BankOpsConfig {
            treasury_opening_balance: dec!(999),
            ..config
        };
        let second = BankOpsEngine::with_parts(reseeded, store, Arc::new(TracingNotifier))
            .await
            .unwrap();
        assert_eq!(second.treasury_balance().await.unwrap(), dec!(250));
    }

    #[tokio::test]
    async fn responses_carry_status_and_error() {
        let engine = engine(dec!(500)).await;
        let account = engine
            .open_account(NewAccount::new("user-1", "checking"))
            .await
            .unwrap();
        let created = engine
            .create_loan(NewLoan::new(
                "user-1",
                account.id.as_str(),
                LoanType::Home,
                dec!(800),
                dec!(4),
                24,
            ))
            .await;
        let loan_id = created.loan_id.unwrap();

        let credential = engine.issue_credential("operator-local").unwrap();
        let response = engine.approve_loan(&loan_id, &credential).await;
        assert_eq!(response.status, Some(LoanStatus::Pending));
        let error = response.error.unwrap();
        assert_eq!(error.kind, ErrorKind::InsufficientTreasury);
        assert!(!error.retryable);

        let response = engine.disburse_loan(&loan_id).await;
        assert_eq!(response.error.unwrap().kind, ErrorKind::InvalidTransition);

        let response = engine.reject_loan(&loan_id, "treasury exhausted").await;
        assert_eq!(response.status, Some(LoanStatus::Rejected));
        assert!(response.error.is_none());
    }

    #[tokio::test]
    async fn default_config_registers_no_operator() {
        let engine = BankOpsEngine::with_parts(
            BankOpsConfig::default(),
            Arc::new(MemoryStore::new()),
            Arc::new(OutboxNotifier::new()),
        )
        .await
        .unwrap();
        assert!(engine.config().operators.is_empty());
        assert!(matches!(
            engine.issue_credential("operator-local"),
            Err(BankOpsError::Unauthorized(_))
        ));
        assert!(engine
            .login_operator("operator-local", "bankops-local-dev-secret")
            .is_err());
    }

    #[tokio::test]
    async fn create_loan_reports_invalid_terms() {
        let engine = engine(dec!(500)).await;
        let response = engine
            .create_loan(NewLoan::new("u", "a", LoanType::Personal, dec!(-1), dec!(5), 12))
            .await;
        assert!(response.loan_id.is_none());
        assert_eq!(response.error.unwrap().kind, ErrorKind::InvalidAmount);
    }

    #[tokio::test]
    async fn deposits_need_an_existing_parent() {
        let engine = engine(dec!(500)).await;
        let err = engine
            .record_deposit("ghost", dec!(10), DepositStatus::Approved)
            .await
            .unwrap_err();
        assert!(matches!(err, BankOpsError::NotFound { .. }));

        let account = engine
            .open_account(NewAccount::new("user-1", "checking").with_min_deposit(dec!(10)))
            .await
            .unwrap();
        let deposit = engine
            .record_deposit(account.id.as_str(), dec!(10), DepositStatus::Pending)
            .await
            .unwrap();
        let reviewed = engine
            .review_deposit(&deposit.id, DepositStatus::Approved)
            .await
            .unwrap();
        assert_eq!(reviewed.status, DepositStatus::Approved);

        let response = engine.activate_account(&account.id).await;
        assert_eq!(response.status, Some(AccountStatus::Active));
        assert!(engine.verify_audit_chain().await);
    }
}
