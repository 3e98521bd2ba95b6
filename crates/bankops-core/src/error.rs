use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle engine errors.
///
/// Precondition failures never leave partial state behind. `TreasuryRace`,
/// `PartialDisbursement` and `Conflict` are safe to retry because disbursement
/// is idempotent on `disbursed_at` and whole-row updates are version-guarded.
#[derive(Debug, Error)]
pub enum BankOpsError {
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("payment {amount} exceeds remaining balance {remaining}")]
    ExceedsBalance { amount: Decimal, remaining: Decimal },

    #[error("deposit requirement not met: required {required}, deposited {deposited}")]
    DepositNotMet {
        required: Decimal,
        deposited: Decimal,
    },

    #[error("insufficient treasury balance: requested {requested}, available {available}")]
    InsufficientTreasury {
        requested: Decimal,
        available: Decimal,
    },

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("treasury balance moved during disbursement of loan '{loan_id}'")]
    TreasuryRace { loan_id: String },

    #[error("disbursement of loan '{loan_id}' could not commit both legs: {message}")]
    PartialDisbursement { loan_id: String, message: String },

    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    #[error("cannot {action} {entity} in status '{from}'")]
    InvalidTransition {
        entity: &'static str,
        action: &'static str,
        from: String,
    },

    #[error("{entity} '{id}' was modified concurrently")]
    Conflict { entity: &'static str, id: String },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("ledger error: {0}")]
    Ledger(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Wire-level classification of [`BankOpsError`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidAmount,
    ExceedsBalance,
    DepositNotMet,
    InsufficientTreasury,
    Unauthorized,
    TreasuryRace,
    PartialDisbursement,
    NotFound,
    InvalidTransition,
    Conflict,
    Storage,
    Ledger,
    Serialization,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidAmount => "invalid_amount",
            Self::ExceedsBalance => "exceeds_balance",
            Self::DepositNotMet => "deposit_not_met",
            Self::InsufficientTreasury => "insufficient_treasury",
            Self::Unauthorized => "unauthorized",
            Self::TreasuryRace => "treasury_race",
            Self::PartialDisbursement => "partial_disbursement",
            Self::NotFound => "not_found",
            Self::InvalidTransition => "invalid_transition",
            Self::Conflict => "conflict",
            Self::Storage => "storage",
            Self::Ledger => "ledger",
            Self::Serialization => "serialization",
        }
    }
}

impl BankOpsError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidAmount(_) => ErrorKind::InvalidAmount,
            Self::ExceedsBalance { .. } => ErrorKind::ExceedsBalance,
            Self::DepositNotMet { .. } => ErrorKind::DepositNotMet,
            Self::InsufficientTreasury { .. } => ErrorKind::InsufficientTreasury,
            Self::Unauthorized(_) => ErrorKind::Unauthorized,
            Self::TreasuryRace { .. } => ErrorKind::TreasuryRace,
            Self::PartialDisbursement { .. } => ErrorKind::PartialDisbursement,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::Storage(_) => ErrorKind::Storage,
            Self::Ledger(_) => ErrorKind::Ledger,
            Self::Serialization(_) => ErrorKind::Serialization,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::TreasuryRace | ErrorKind::PartialDisbursement | ErrorKind::Conflict
        )
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn invalid_transition(
        entity: &'static str,
        action: &'static str,
        from: impl Into<String>,
    ) -> Self {
        Self::InvalidTransition {
            entity,
            action,
            from: from.into(),
        }
    }
}

/// Error payload returned alongside inbound operation responses.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActionError {
    pub kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
}

impl From<&BankOpsError> for ActionError {
    fn from(err: &BankOpsError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
            retryable: err.is_retryable(),
        }
    }
}
