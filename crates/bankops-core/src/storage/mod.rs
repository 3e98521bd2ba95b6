//! Datastore seam for loans, accounts and deposit records.
//!
//! Rows are read and written whole. Every whole-row update is conditioned on
//! the row version the caller read, and the two compound operations
//! (`apply_disbursement`, `record_loan_payment`) commit as one unit or not at all.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use crate::error::BankOpsError;
use crate::types::{
    Account, AccountId, DepositId, DepositRecord, DepositStatus, Loan, LoanId, LoanPayment,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::info;

/// Datastore backend configuration.
///
/// Covers loans, accounts, deposits and payment history. The audit chain is
/// not part of it and stays in process memory with either backend.
#[derive(Debug, Clone, Default)]
pub enum StorageConfig {
    /// Keep every row in process memory only.
    #[default]
    Memory,
    /// Persist rows in PostgreSQL.
    Postgres {
        database_url: String,
        max_connections: u32,
    },
}

impl StorageConfig {
    pub fn memory() -> Self {
        Self::Memory
    }

    pub fn postgres(database_url: impl Into<String>, max_connections: u32) -> Self {
        Self::Postgres {
            database_url: database_url.into(),
            max_connections,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Postgres { .. } => "postgres",
        }
    }
}

/// Open the configured backend, creating the schema when needed.
pub async fn open_store(config: StorageConfig) -> Result<Arc<dyn BankStore>, BankOpsError> {
    let label = config.label();
    let store: Arc<dyn BankStore> = match config {
        StorageConfig::Memory => Arc::new(MemoryStore::new()),
        StorageConfig::Postgres {
            database_url,
            max_connections,
        } => {
            let store = PostgresStore::connect(&database_url, max_connections).await?;
            store.ensure_schema().await?;
            Arc::new(store)
        }
    };
    info!(backend = label, "bank store ready");
    Ok(store)
}

/// Everything `disburse` changes, applied atomically by the store.
#[derive(Debug, Clone)]
pub struct DisbursementCommit {
    /// Loan row as it must look after disbursement (active, `disbursed_at` set).
    pub loan: Loan,
    /// Version of the approved row the engine read.
    pub expected_version: i64,
    pub destination: AccountId,
    pub amount: Decimal,
}

/// Result of the atomic debit/credit/loan update.
///
/// Anything but `Committed` means no row was changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisbursementOutcome {
    Committed {
        treasury_balance: Decimal,
        destination_balance: Decimal,
    },
    /// The conditional debit matched no row: balance moved below the principal.
    TreasuryShort,
    /// The loan is no longer approved-and-undisbursed.
    AlreadyDisbursed,
    /// The credit leg had no destination row to land on.
    DestinationMissing,
}

#[async_trait]
pub trait BankStore: Send + Sync {
    fn backend_label(&self) -> &'static str;

    async fn insert_loan(&self, loan: &Loan) -> Result<(), BankOpsError>;

    async fn load_loan(&self, id: &LoanId) -> Result<Option<Loan>, BankOpsError>;

    /// Replace the loan row if its stored version is still `expected_version`.
    async fn update_loan(&self, loan: &Loan, expected_version: i64) -> Result<bool, BankOpsError>;

    /// Replace the loan row and append a payment history line together.
    async fn record_loan_payment(
        &self,
        loan: &Loan,
        expected_version: i64,
        payment: &LoanPayment,
    ) -> Result<bool, BankOpsError>;

    async fn loan_payments(&self, id: &LoanId) -> Result<Vec<LoanPayment>, BankOpsError>;

    async fn insert_account(&self, account: &Account) -> Result<(), BankOpsError>;

    async fn load_account(&self, id: &AccountId) -> Result<Option<Account>, BankOpsError>;

    async fn update_account(
        &self,
        account: &Account,
        expected_version: i64,
    ) -> Result<bool, BankOpsError>;

    async fn insert_deposit(&self, deposit: &DepositRecord) -> Result<(), BankOpsError>;

    async fn load_deposit(&self, id: &DepositId) -> Result<Option<DepositRecord>, BankOpsError>;

    async fn update_deposit_status(
        &self,
        id: &DepositId,
        status: DepositStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, BankOpsError>;

    /// Every deposit record for a loan or account, oldest first.
    async fn deposits_for(&self, parent_id: &str) -> Result<Vec<DepositRecord>, BankOpsError>;

    async fn apply_disbursement(
        &self,
        treasury: &AccountId,
        commit: &DisbursementCommit,
    ) -> Result<DisbursementOutcome, BankOpsError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_labels() {
        assert_eq!(StorageConfig::memory().label(), "memory");
        assert_eq!(
            StorageConfig::postgres("postgres://localhost/bank", 4).label(),
            "postgres"
        );
        assert_eq!(StorageConfig::default().label(), "memory");
    }

    #[tokio::test]
    async fn memory_config_opens_memory_store() {
        let store = open_store(StorageConfig::Memory).await.unwrap();
        assert_eq!(store.backend_label(), "memory");
    }
}
