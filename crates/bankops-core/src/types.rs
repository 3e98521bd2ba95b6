use crate::error::{ActionError, BankOpsError};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn generate() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

string_id!(
    /// Loan row identifier.
    LoanId
);
string_id!(
    /// Account row identifier. The treasury pool is an account too.
    AccountId
);
string_id!(
    /// Owning customer identifier.
    UserId
);
string_id!(
    /// Deposit record identifier.
    DepositId
);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LoanType {
    Personal,
    Home,
    Auto,
    Business,
    Student,
}

impl LoanType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Personal => "personal",
            Self::Home => "home",
            Self::Auto => "auto",
            Self::Business => "business",
            Self::Student => "student",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "personal" => Some(Self::Personal),
            "home" => Some(Self::Home),
            "auto" => Some(Self::Auto),
            "business" => Some(Self::Business),
            "student" => Some(Self::Student),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LoanStatus {
    Pending,
    Approved,
    Active,
    Rejected,
    Closed,
}

impl LoanStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Active => "active",
            Self::Rejected => "rejected",
            Self::Closed => "closed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "active" => Some(Self::Active),
            "rejected" => Some(Self::Rejected),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Rejected | Self::Closed)
    }
}

/// Loan row.
///
/// `is_late` is deliberately absent: it is derived from `payments_made` and
/// `disbursed_at` at read time (see [`crate::payment::payment_status`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Loan {
    pub id: LoanId,
    pub user_id: UserId,
    pub account_id: AccountId,
    pub loan_type: LoanType,
    pub principal: Decimal,
    /// Annual rate in percent, e.g. `12` for 12%.
    pub interest_rate: Decimal,
    pub term_months: u32,
    pub monthly_payment: Decimal,
    pub deposit_required: Decimal,
    pub status: LoanStatus,
    pub remaining_balance: Decimal,
    pub payments_made: u32,
    pub next_payment_date: Option<DateTime<Utc>>,
    pub disbursed_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Loan {
    pub fn is_late_at(&self, now: DateTime<Utc>) -> bool {
        self.status == LoanStatus::Active
            && crate::payment::payment_status(self.payments_made, self.disbursed_at, now)
                .is_behind()
    }

    pub fn is_late(&self) -> bool {
        self.is_late_at(Utc::now())
    }

    /// Installments left on the term. At least 1, so a balance that outlives
    /// its term still advances one month per payment.
    pub fn remaining_term(&self) -> u32 {
        self.term_months.saturating_sub(self.payments_made).max(1)
    }
}

/// Highest annual rate, in percent, a loan may be written at.
pub const MAX_ANNUAL_RATE_PERCENT: Decimal = Decimal::ONE_HUNDRED;

/// Operator request for a new loan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewLoan {
    pub user_id: UserId,
    pub account_id: AccountId,
    pub loan_type: LoanType,
    pub principal: Decimal,
    pub interest_rate: Decimal,
    pub term_months: u32,
    /// Derived from the amortisation formula when absent.
    #[serde(default)]
    pub monthly_payment: Option<Decimal>,
    #[serde(default)]
    pub deposit_required: Decimal,
}

impl NewLoan {
    pub fn new(
        user_id: impl Into<String>,
        account_id: impl Into<String>,
        loan_type: LoanType,
        principal: Decimal,
        interest_rate: Decimal,
        term_months: u32,
    ) -> Self {
        Self {
            user_id: UserId::new(user_id),
            account_id: AccountId::new(account_id),
            loan_type,
            principal,
            interest_rate,
            term_months,
            monthly_payment: None,
            deposit_required: Decimal::ZERO,
        }
    }

    pub fn with_monthly_payment(mut self, monthly_payment: Decimal) -> Self {
        self.monthly_payment = Some(monthly_payment);
        self
    }

    pub fn with_deposit_required(mut self, deposit_required: Decimal) -> Self {
        self.deposit_required = deposit_required;
        self
    }

    /// Validate terms and build the pending loan row.
    pub fn into_loan(self, now: DateTime<Utc>) -> Result<Loan, BankOpsError> {
        if self.principal <= Decimal::ZERO {
            return Err(BankOpsError::InvalidAmount(format!(
                "principal must be positive, got {}",
                self.principal
            )));
        }
        if self.interest_rate < Decimal::ZERO {
            return Err(BankOpsError::InvalidAmount(format!(
                "interest rate must not be negative, got {}",
                self.interest_rate
            )));
        }
        if self.interest_rate > MAX_ANNUAL_RATE_PERCENT {
            return Err(BankOpsError::InvalidAmount(format!(
                "interest rate must not exceed {MAX_ANNUAL_RATE_PERCENT}%, got {}",
                self.interest_rate
            )));
        }
        if self.term_months == 0 {
            return Err(BankOpsError::InvalidAmount(
                "term must be at least one month".to_string(),
            ));
        }
        if self.deposit_required < Decimal::ZERO {
            return Err(BankOpsError::InvalidAmount(format!(
                "deposit requirement must not be negative, got {}",
                self.deposit_required
            )));
        }

        let monthly_payment = match self.monthly_payment {
            Some(value) if value <= Decimal::ZERO => {
                return Err(BankOpsError::InvalidAmount(format!(
                    "monthly payment must be positive, got {value}"
                )))
            }
            Some(value) => value,
            None => crate::payment::amortized_monthly_payment(
                self.principal,
                self.interest_rate,
                self.term_months,
            )?,
        };

        Ok(Loan {
            id: LoanId::generate(),
            user_id: self.user_id,
            account_id: self.account_id,
            loan_type: self.loan_type,
            principal: self.principal,
            interest_rate: self.interest_rate,
            term_months: self.term_months,
            monthly_payment,
            deposit_required: self.deposit_required,
            status: LoanStatus::Pending,
            remaining_balance: self.principal,
            payments_made: 0,
            next_payment_date: None,
            disbursed_at: None,
            rejection_reason: None,
            version: 0,
            created_at: now,
            updated_at: now,
        })
    }
}

/// Persisted history line for one applied loan payment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoanPayment {
    pub id: String,
    pub loan_id: LoanId,
    pub amount: Decimal,
    pub principal: Decimal,
    pub interest: Decimal,
    pub months_covered: u32,
    pub balance_after: Decimal,
    pub note: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DepositStatus {
    Pending,
    Approved,
    Completed,
    Rejected,
}

impl DepositStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Completed => "completed",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "completed" => Some(Self::Completed),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    /// Verified deposits count toward a requirement; pending and rejected do not.
    pub fn is_verified(self) -> bool {
        matches!(self, Self::Approved | Self::Completed)
    }
}

/// Deposit made against a loan or an account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositRecord {
    pub id: DepositId,
    /// Loan id or account id the deposit belongs to.
    pub parent_id: String,
    pub amount: Decimal,
    pub status: DepositStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DepositRecord {
    pub fn new(
        parent_id: impl Into<String>,
        amount: Decimal,
        status: DepositStatus,
    ) -> Result<Self, BankOpsError> {
        if amount <= Decimal::ZERO {
            return Err(BankOpsError::InvalidAmount(format!(
                "deposit amount must be positive, got {amount}"
            )));
        }
        let now = Utc::now();
        Ok(Self {
            id: DepositId::generate(),
            parent_id: parent_id.into(),
            amount,
            status,
            created_at: now,
            updated_at: now,
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    PendingFunding,
    Approved,
    Active,
    Suspended,
    Closed,
    Rejected,
}

impl AccountStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PendingFunding => "pending_funding",
            Self::Approved => "approved",
            Self::Active => "active",
            Self::Suspended => "suspended",
            Self::Closed => "closed",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending_funding" => Some(Self::PendingFunding),
            "approved" => Some(Self::Approved),
            "active" => Some(Self::Active),
            "suspended" => Some(Self::Suspended),
            "closed" => Some(Self::Closed),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Rejected)
    }
}

/// Deposit account row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub user_id: UserId,
    pub account_type: String,
    pub status: AccountStatus,
    pub min_deposit: Decimal,
    pub balance: Decimal,
    pub status_reason: Option<String>,
    pub status_changed_at: Option<DateTime<Utc>>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Operator request for a new deposit account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAccount {
    pub user_id: UserId,
    pub account_type: String,
    #[serde(default)]
    pub min_deposit: Decimal,
    #[serde(default)]
    pub opening_balance: Decimal,
}

impl NewAccount {
    pub fn new(user_id: impl Into<String>, account_type: impl Into<String>) -> Self {
        Self {
            user_id: UserId::new(user_id),
            account_type: account_type.into(),
            min_deposit: Decimal::ZERO,
            opening_balance: Decimal::ZERO,
        }
    }

    pub fn with_min_deposit(mut self, min_deposit: Decimal) -> Self {
        self.min_deposit = min_deposit;
        self
    }

    pub fn with_opening_balance(mut self, opening_balance: Decimal) -> Self {
        self.opening_balance = opening_balance;
        self
    }

    /// Accounts without a deposit requirement start approved, others wait for funding.
    pub fn into_account(self, id: AccountId, now: DateTime<Utc>) -> Result<Account, BankOpsError> {
        if self.min_deposit < Decimal::ZERO {
            return Err(BankOpsError::InvalidAmount(format!(
                "minimum deposit must not be negative, got {}",
                self.min_deposit
            )));
        }
        if self.opening_balance < Decimal::ZERO {
            return Err(BankOpsError::InvalidAmount(format!(
                "opening balance must not be negative, got {}",
                self.opening_balance
            )));
        }

        let status = if self.min_deposit.is_zero() {
            AccountStatus::Approved
        } else {
            AccountStatus::PendingFunding
        };

        Ok(Account {
            id,
            user_id: self.user_id,
            account_type: self.account_type,
            status,
            min_deposit: self.min_deposit,
            balance: self.opening_balance,
            status_reason: None,
            status_changed_at: None,
            version: 0,
            created_at: now,
            updated_at: now,
        })
    }
}

/// Response of `approveLoan`, `disburseLoan`, `rejectLoan`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoanActionResponse {
    pub loan_id: LoanId,
    /// Status after the attempt; absent when the loan could not be read.
    pub status: Option<LoanStatus>,
    pub error: Option<ActionError>,
}

/// Response of `recordLoanPayment`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentResponse {
    pub loan_id: LoanId,
    pub status: Option<LoanStatus>,
    pub new_balance: Option<Decimal>,
    pub months_covered: u32,
    pub warnings: Vec<String>,
    pub error: Option<ActionError>,
}

/// Response of `activateAccount` and the other account transitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountActionResponse {
    pub account_id: AccountId,
    pub status: Option<AccountStatus>,
    pub error: Option<ActionError>,
}

/// Response of `createLoan`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateLoanResponse {
    pub loan_id: Option<LoanId>,
    pub error: Option<ActionError>,
}
