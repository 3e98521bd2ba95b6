//! Loan and account money-movement lifecycle for retail-banking operations.
//!
//! Loans move pending -> approved -> active -> closed (or rejected) under
//! deposit, treasury and credential preconditions. Accounts activate only once
//! verified deposits cover their minimum. Principal leaves the treasury through
//! a single conditional debit, so the pool can never be overdrawn.

#![deny(unsafe_code)]

pub mod accounts;
pub mod auth;
pub mod deposits;
mod effects;
pub mod error;
pub mod flow;
pub mod ledger;
pub mod loans;
pub mod notify;
pub mod payment;
pub mod runtime;
pub mod storage;
pub mod treasury;
pub mod types;

pub use accounts::{AccountActivationGate, AccountView};
pub use auth::{OperatorAuthority, OperatorCredential};
pub use deposits::DepositSummary;
pub use effects::SYSTEM_ACTOR;
pub use error::{ActionError, BankOpsError, ErrorKind};
pub use flow::{AccountAction, AccountLifecycle, LoanAction, LoanLifecycle};
pub use ledger::{AppendOnlyLedger, AuditEntry, AuditEntryKind, AuditRecord, AuditSink, LedgerAuditSink};
pub use loans::{LoanLifecycleEngine, LoanView, PaymentReceipt};
pub use notify::{NotificationEvent, Notifier, OutboundNotification, OutboxNotifier, TracingNotifier};
pub use payment::{PaymentBreakdown, PaymentStatus, PaymentWarning, ScheduleState};
pub use runtime::{BankOpsConfig, BankOpsEngine};
pub use storage::{
    open_store, BankStore, DisbursementCommit, DisbursementOutcome, MemoryStore, PostgresStore,
    StorageConfig,
};
pub use treasury::{StoreTreasury, TreasuryGuard, TreasuryLedger};
pub use types::{
    Account, AccountActionResponse, AccountId, AccountStatus, CreateLoanResponse, DepositId,
    DepositRecord, DepositStatus, Loan, LoanActionResponse, LoanId, LoanPayment, LoanStatus,
    LoanType, NewAccount, NewLoan, PaymentResponse, UserId,
};
