use super::{BankStore, DisbursementCommit, DisbursementOutcome};
use crate::error::BankOpsError;
use crate::types::{
    Account, AccountId, DepositId, DepositRecord, DepositStatus, Loan, LoanId, LoanPayment,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct MemoryState {
    loans: HashMap<LoanId, Loan>,
    payments: HashMap<LoanId, Vec<LoanPayment>>,
    accounts: HashMap<AccountId, Account>,
    deposits: HashMap<DepositId, DepositRecord>,
}

/// In-process store. One mutex covers every table, so each call is atomic.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, BankOpsError> {
        self.state
            .lock()
            .map_err(|_| BankOpsError::Storage("memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl BankStore for MemoryStore {
    fn backend_label(&self) -> &'static str {
        "memory"
    }

    async fn insert_loan(&self, loan: &Loan) -> Result<(), BankOpsError> {
        let mut state = self.lock()?;
        if state.loans.contains_key(&loan.id) {
            return Err(BankOpsError::Storage(format!(
                "loan '{}' already exists",
                loan.id
            )));
        }
        state.loans.insert(loan.id.clone(), loan.clone());
        Ok(())
    }

    async fn load_loan(&self, id: &LoanId) -> Result<Option<Loan>, BankOpsError> {
        Ok(self.lock()?.loans.get(id).cloned())
    }

    async fn update_loan(&self, loan: &Loan, expected_version: i64) -> Result<bool, BankOpsError> {
        let mut state = self.lock()?;
        match state.loans.get_mut(&loan.id) {
            Some(stored) if stored.version == expected_version => {
                *stored = loan.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_loan_payment(
        &self,
        loan: &Loan,
        expected_version: i64,
        payment: &LoanPayment,
    ) -> Result<bool, BankOpsError> {
        let mut state = self.lock()?;
        match state.loans.get_mut(&loan.id) {
            Some(stored) if stored.version == expected_version => {
                *stored = loan.clone();
            }
            _ => return Ok(false),
        }
        state
            .payments
            .entry(loan.id.clone())
            .or_default()
            .push(payment.clone());
        Ok(true)
    }

    async fn loan_payments(&self, id: &LoanId) -> Result<Vec<LoanPayment>, BankOpsError> {
        Ok(self.lock()?.payments.get(id).cloned().unwrap_or_default())
    }

    async fn insert_account(&self, account: &Account) -> Result<(), BankOpsError> {
        let mut state = self.lock()?;
        if state.accounts.contains_key(&account.id) {
            return Err(BankOpsError::Storage(format!(
                "account '{}' already exists",
                account.id
            )));
        }
        state.accounts.insert(account.id.clone(), account.clone());
        Ok(())
    }

    async fn load_account(&self, id: &AccountId) -> Result<Option<Account>, BankOpsError> {
        Ok(self.lock()?.accounts.get(id).cloned())
    }

    async fn update_account(
        &self,
        account: &Account,
        expected_version: i64,
    ) -> Result<bool, BankOpsError> {
        let mut state = self.lock()?;
        match state.accounts.get_mut(&account.id) {
            Some(stored) if stored.version == expected_version => {
                *stored = account.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn insert_deposit(&self, deposit: &DepositRecord) -> Result<(), BankOpsError> {
        let mut state = self.lock()?;
        if state.deposits.contains_key(&deposit.id) {
            return Err(BankOpsError::Storage(format!(
                "deposit '{}' already exists",
                deposit.id
            )));
        }
        state.deposits.insert(deposit.id.clone(), deposit.clone());
        Ok(())
    }

    async fn load_deposit(&self, id: &DepositId) -> Result<Option<DepositRecord>, BankOpsError> {
        Ok(self.lock()?.deposits.get(id).cloned())
    }

    async fn update_deposit_status(
        &self,
        id: &DepositId,
        status: DepositStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, BankOpsError> {
        let mut state = self.lock()?;
        match state.deposits.get_mut(id) {
            Some(deposit) => {
                deposit.status = status;
                deposit.updated_at = at;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn deposits_for(&self, parent_id: &str) -> Result<Vec<DepositRecord>, BankOpsError> {
        let state = self.lock()?;
        let mut records: Vec<DepositRecord> = state
            .deposits
            .values()
            .filter(|deposit| deposit.parent_id == parent_id)
            .cloned()
            .collect();
        records.sort_by_key(|deposit| deposit.created_at);
        Ok(records)
    }

    async fn apply_disbursement(
        &self,
        treasury: &AccountId,
        commit: &DisbursementCommit,
    ) -> Result<DisbursementOutcome, BankOpsError> {
        let mut state = self.lock()?;

        // Check every leg before touching any row.
        let loan_ready = state.loans.get(&commit.loan.id).map(|stored| {
            stored.version == commit.expected_version
                && stored.status == crate::types::LoanStatus::Approved
                && stored.disbursed_at.is_none()
        });
        if loan_ready != Some(true) {
            return Ok(DisbursementOutcome::AlreadyDisbursed);
        }

        let treasury_balance = match state.accounts.get(treasury) {
            Some(account) if account.balance >= commit.amount => account.balance - commit.amount,
            _ => return Ok(DisbursementOutcome::TreasuryShort),
        };
        let destination_balance = match state.accounts.get(&commit.destination) {
            Some(account) if &account.id != treasury => account.balance + commit.amount,
            _ => return Ok(DisbursementOutcome::DestinationMissing),
        };

        let now = commit.loan.updated_at;
        // Balance moves bump the row version so stale whole-row writes cannot undo them.
        if let Some(account) = state.accounts.get_mut(treasury) {
            account.balance = treasury_balance;
            account.version += 1;
            account.updated_at = now;
        }
        if let Some(account) = state.accounts.get_mut(&commit.destination) {
            account.balance = destination_balance;
            account.version += 1;
            account.updated_at = now;
        }
        state.loans.insert(commit.loan.id.clone(), commit.loan.clone());

        Ok(DisbursementOutcome::Committed {
            treasury_balance,
            destination_balance,
        })
    }
}
