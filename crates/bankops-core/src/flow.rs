use crate::error::BankOpsError;
use crate::types::{AccountStatus, LoanStatus};

/// Operator actions that move a loan along its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoanAction {
    Approve,
    Reject,
    Disburse,
    RecordPayment,
}

impl LoanAction {
    pub fn name(self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::Disburse => "disburse",
            Self::RecordPayment => "record payment on",
        }
    }

    /// The single status this action may start from.
    pub fn required_status(self) -> LoanStatus {
        match self {
            Self::Approve | Self::Reject => LoanStatus::Pending,
            Self::Disburse => LoanStatus::Approved,
            Self::RecordPayment => LoanStatus::Active,
        }
    }
}

/// Enforces pending -> {approved -> active -> closed | rejected}.
///
/// Transitions never move backward; terminal statuses accept no action.
pub struct LoanLifecycle;

impl LoanLifecycle {
    pub fn ensure_allowed(current: LoanStatus, action: LoanAction) -> Result<(), BankOpsError> {
        if current != action.required_status() {
            return Err(BankOpsError::invalid_transition(
                "loan",
                action.name(),
                current.as_str(),
            ));
        }
        Ok(())
    }

    /// Status after `action` commits. `paid_off` only matters for payments.
    pub fn advance(
        current: LoanStatus,
        action: LoanAction,
        paid_off: bool,
    ) -> Result<LoanStatus, BankOpsError> {
        Self::ensure_allowed(current, action)?;
        let next = match action {
            LoanAction::Approve => LoanStatus::Approved,
            LoanAction::Reject => LoanStatus::Rejected,
            LoanAction::Disburse => LoanStatus::Active,
            LoanAction::RecordPayment if paid_off => LoanStatus::Closed,
            LoanAction::RecordPayment => LoanStatus::Active,
        };
        debug_assert!(Self::is_forward(current, next));
        Ok(next)
    }

    /// True when `next` is reachable from `current` without moving backward.
    pub fn is_forward(current: LoanStatus, next: LoanStatus) -> bool {
        use LoanStatus::*;
        matches!(
            (current, next),
            (Pending, Approved)
                | (Pending, Rejected)
                | (Approved, Active)
                | (Active, Active)
                | (Active, Closed)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountAction {
    Activate,
    Suspend,
    Close,
    Reject,
}

impl AccountAction {
    pub fn name(self) -> &'static str {
        match self {
            Self::Activate => "activate",
            Self::Suspend => "suspend",
            Self::Close => "close",
            Self::Reject => "reject",
        }
    }

    pub fn target(self) -> AccountStatus {
        match self {
            Self::Activate => AccountStatus::Active,
            Self::Suspend => AccountStatus::Suspended,
            Self::Close => AccountStatus::Closed,
            Self::Reject => AccountStatus::Rejected,
        }
    }
}

/// Account transition rules. Deposit gating is checked separately by the gate.
pub struct AccountLifecycle;

impl AccountLifecycle {
    pub fn advance(
        current: AccountStatus,
        action: AccountAction,
    ) -> Result<AccountStatus, BankOpsError> {
        let allowed = match action {
            AccountAction::Activate => matches!(
                current,
                AccountStatus::Approved | AccountStatus::PendingFunding
            ),
            AccountAction::Suspend | AccountAction::Close | AccountAction::Reject => {
                !current.is_terminal()
            }
        };

        if !allowed {
            return Err(BankOpsError::invalid_transition(
                "account",
                action.name(),
                current.as_str(),
            ));
        }
        Ok(action.target())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loan_follows_forward_path() {
        let approved = LoanLifecycle::advance(LoanStatus::Pending, LoanAction::Approve, false)
            .unwrap();
        let active = LoanLifecycle::advance(approved, LoanAction::Disburse, false).unwrap();
        let still_active =
            LoanLifecycle::advance(active, LoanAction::RecordPayment, false).unwrap();
        let closed = LoanLifecycle::advance(still_active, LoanAction::RecordPayment, true).unwrap();
        assert_eq!(closed, LoanStatus::Closed);
    }

    #[test]
    fn loan_rejects_skips_and_backward_moves() {
        let err = LoanLifecycle::advance(LoanStatus::Pending, LoanAction::Disburse, false)
            .unwrap_err();
        assert!(err
            .to_string()
            .contains("cannot disburse loan in status 'pending'"));

        assert!(LoanLifecycle::advance(LoanStatus::Active, LoanAction::Approve, false).is_err());
        assert!(LoanLifecycle::advance(LoanStatus::Approved, LoanAction::Reject, false).is_err());
        assert!(LoanLifecycle::advance(LoanStatus::Closed, LoanAction::RecordPayment, false).is_err());
        assert!(LoanLifecycle::advance(LoanStatus::Rejected, LoanAction::Approve, false).is_err());
        assert!(!LoanLifecycle::is_forward(LoanStatus::Active, LoanStatus::Approved));
    }

    #[test]
    fn account_activation_only_from_funding_states() {
        assert_eq!(
            AccountLifecycle::advance(AccountStatus::PendingFunding, AccountAction::Activate)
                .unwrap(),
            AccountStatus::Active
        );
        assert!(AccountLifecycle::advance(AccountStatus::Suspended, AccountAction::Activate).is_err());
        assert!(AccountLifecycle::advance(AccountStatus::Active, AccountAction::Activate).is_err());
    }

    #[test]
    fn account_terminal_states_accept_nothing() {
        for action in [
            AccountAction::Activate,
            AccountAction::Suspend,
            AccountAction::Close,
            AccountAction::Reject,
        ] {
            assert!(AccountLifecycle::advance(AccountStatus::Closed, action).is_err());
            assert!(AccountLifecycle::advance(AccountStatus::Rejected, action).is_err());
        }
        assert_eq!(
            AccountLifecycle::advance(AccountStatus::Suspended, AccountAction::Close).unwrap(),
            AccountStatus::Closed
        );
    }
}
