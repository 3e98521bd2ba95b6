//! Loan Lifecycle Engine.
//!
//! Every action reloads the loan row, checks its preconditions against fresh
//! datastore state, and commits through a version-guarded whole-row update.
//! Disbursement is the one compound write and goes through the treasury.

use crate::auth::{OperatorAuthority, OperatorCredential};
use crate::deposits::DepositSummary;
use crate::effects::{Notice, SideEffects, SYSTEM_ACTOR};
use crate::error::BankOpsError;
use crate::flow::{LoanAction, LoanLifecycle};
use crate::notify::NotificationEvent;
use crate::payment::{self, PaymentBreakdown, PaymentStatus, PaymentWarning};
use crate::storage::{BankStore, DisbursementCommit, DisbursementOutcome};
use crate::treasury::TreasuryGuard;
use crate::types::{Loan, LoanId, LoanPayment, LoanStatus, NewLoan};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Result of a successfully applied payment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentReceipt {
    pub loan: Loan,
    pub breakdown: PaymentBreakdown,
    pub months_covered: u32,
    pub warnings: Vec<PaymentWarning>,
}

/// Read model; `is_late` and the schedule are derived at read time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoanView {
    pub loan: Loan,
    pub is_late: bool,
    pub payment_status: PaymentStatus,
    pub deposit: DepositSummary,
}

pub struct LoanLifecycleEngine {
    store: Arc<dyn BankStore>,
    guard: TreasuryGuard,
    authority: Arc<OperatorAuthority>,
    effects: SideEffects,
}

impl LoanLifecycleEngine {
    pub(crate) fn new(
        store: Arc<dyn BankStore>,
        guard: TreasuryGuard,
        authority: Arc<OperatorAuthority>,
        effects: SideEffects,
    ) -> Self {
        Self {
            store,
            guard,
            authority,
            effects,
        }
    }

    /// Validate terms and store a pending loan. The destination account must exist.
    pub async fn create(&self, request: NewLoan) -> Result<Loan, BankOpsError> {
        let loan = request.into_loan(Utc::now())?;
        if self.store.load_account(&loan.account_id).await?.is_none() {
            return Err(BankOpsError::not_found("account", loan.account_id.as_str()));
        }
        self.store.insert_loan(&loan).await?;
        info!(
            loan_id = %loan.id,
            user_id = %loan.user_id,
            principal = %loan.principal,
            monthly_payment = %loan.monthly_payment,
            "loan created"
        );
        self.effects
            .committed(
                SYSTEM_ACTOR,
                "create",
                loan.id.as_str(),
                &serde_json::Value::Null,
                &loan,
                None,
            )
            .await;
        Ok(loan)
    }

    pub async fn load(&self, loan_id: &LoanId) -> Result<Loan, BankOpsError> {
        self.store
            .load_loan(loan_id)
            .await?
            .ok_or_else(|| BankOpsError::not_found("loan", loan_id.as_str()))
    }

    /// Pending to approved. Checks deposit, then treasury, then credential.
    pub async fn approve(
        &self,
        loan_id: &LoanId,
        credential: &OperatorCredential,
    ) -> Result<Loan, BankOpsError> {
        let result = self.try_approve(loan_id, credential).await;
        if let Err(err) = &result {
            self.effects
                .refused(&credential.operator_id, "approve", loan_id.as_str(), err)
                .await;
        }
        result
    }

    async fn try_approve(
        &self,
        loan_id: &LoanId,
        credential: &OperatorCredential,
    ) -> Result<Loan, BankOpsError> {
        let loan = self.load(loan_id).await?;
        let status = LoanLifecycle::advance(loan.status, LoanAction::Approve, false)?;

        if loan.deposit_required > Decimal::ZERO {
            let deposit = self.deposit_summary(&loan).await?;
            if !deposit.is_met() {
                return Err(BankOpsError::DepositNotMet {
                    required: deposit.required,
                    deposited: deposit.total_deposited,
                });
            }
        }
        self.guard.ensure_affordable(loan.principal).await?;
        self.authority.verify(credential)?;

        let mut next = loan.clone();
        next.status = status;
        let approved = self.commit(&loan, next).await?;
        info!(
            loan_id = %approved.id,
            operator_id = %credential.operator_id,
            principal = %approved.principal,
            "loan approved"
        );

        self.effects
            .committed(
                &credential.operator_id,
                "approve",
                approved.id.as_str(),
                &loan,
                &approved,
                Some(Notice {
                    user_id: &approved.user_id,
                    event: NotificationEvent::LoanApproved,
                    payload: json!({
                        "loan_id": approved.id,
                        "principal": approved.principal,
                    }),
                }),
            )
            .await;
        Ok(approved)
    }

    /// Approved to active. Moves principal from the treasury exactly once.
    pub async fn disburse(&self, loan_id: &LoanId) -> Result<Loan, BankOpsError> {
        let result = self.try_disburse(loan_id).await;
        if let Err(err) = &result {
            self.effects
                .refused(SYSTEM_ACTOR, "disburse", loan_id.as_str(), err)
                .await;
        }
        result
    }

    async fn try_disburse(&self, loan_id: &LoanId) -> Result<Loan, BankOpsError> {
        let loan = self.load(loan_id).await?;
        let status = LoanLifecycle::advance(loan.status, LoanAction::Disburse, false)?;
        if loan.disbursed_at.is_some() {
            return Err(BankOpsError::invalid_transition(
                "loan",
                LoanAction::Disburse.name(),
                "already disbursed",
            ));
        }

        // Balance may have moved since approval.
        self.guard.ensure_affordable(loan.principal).await?;

        let now = Utc::now();
        let mut next = loan.clone();
        next.status = status;
        next.disbursed_at = Some(now);
        next.remaining_balance = loan.principal;
        next.next_payment_date = Some(payment::next_payment_date(None, 1, now)?);
        next.version = loan.version + 1;
        next.updated_at = now;

        let commit = DisbursementCommit {
            loan: next,
            expected_version: loan.version,
            destination: loan.account_id.clone(),
            amount: loan.principal,
        };

        match self.guard.ledger().disburse(&commit).await? {
            DisbursementOutcome::Committed {
                treasury_balance,
                destination_balance,
            } => {
                let disbursed = commit.loan;
                info!(
                    loan_id = %disbursed.id,
                    destination = %disbursed.account_id,
                    amount = %disbursed.principal,
                    treasury_balance = %treasury_balance,
                    destination_balance = %destination_balance,
                    "loan disbursed"
                );
                self.effects
                    .committed(
                        SYSTEM_ACTOR,
                        "disburse",
                        disbursed.id.as_str(),
                        &loan,
                        &disbursed,
                        Some(Notice {
                            user_id: &disbursed.user_id,
                            event: NotificationEvent::LoanDisbursed,
                            payload: json!({
                                "loan_id": disbursed.id,
                                "account_id": disbursed.account_id,
                                "amount": disbursed.principal,
                            }),
                        }),
                    )
                    .await;
                Ok(disbursed)
            }
            DisbursementOutcome::TreasuryShort => Err(BankOpsError::TreasuryRace {
                loan_id: loan.id.to_string(),
            }),
            DisbursementOutcome::AlreadyDisbursed => {
                let current = self.load(loan_id).await?;
                if current.disbursed_at.is_some() || current.status != LoanStatus::Approved {
                    Err(BankOpsError::invalid_transition(
                        "loan",
                        LoanAction::Disburse.name(),
                        current.status.as_str(),
                    ))
                } else {
                    Err(BankOpsError::Conflict {
                        entity: "loan",
                        id: loan.id.to_string(),
                    })
                }
            }
            DisbursementOutcome::DestinationMissing => Err(BankOpsError::PartialDisbursement {
                loan_id: loan.id.to_string(),
                message: format!("destination account '{}' not found", loan.account_id),
            }),
        }
    }

    /// Pending to rejected, with the operator's reason.
    pub async fn reject(&self, loan_id: &LoanId, reason: &str) -> Result<Loan, BankOpsError> {
        let result = self.try_reject(loan_id, reason).await;
        if let Err(err) = &result {
            self.effects
                .refused(SYSTEM_ACTOR, "reject", loan_id.as_str(), err)
                .await;
        }
        result
    }

    async fn try_reject(&self, loan_id: &LoanId, reason: &str) -> Result<Loan, BankOpsError> {
        let loan = self.load(loan_id).await?;
        let status = LoanLifecycle::advance(loan.status, LoanAction::Reject, false)?;

        let mut next = loan.clone();
        next.status = status;
        next.rejection_reason = Some(reason.to_string());
        let rejected = self.commit(&loan, next).await?;
        info!(loan_id = %rejected.id, reason, "loan rejected");

        self.effects
            .committed(
                SYSTEM_ACTOR,
                "reject",
                rejected.id.as_str(),
                &loan,
                &rejected,
                Some(Notice {
                    user_id: &rejected.user_id,
                    event: NotificationEvent::LoanRejected,
                    payload: json!({ "loan_id": rejected.id, "reason": reason }),
                }),
            )
            .await;
        Ok(rejected)
    }

    /// Apply a payment to an active loan; closes the loan on full payoff.
    pub async fn record_payment(
        &self,
        loan_id: &LoanId,
        amount: Decimal,
        note: Option<&str>,
    ) -> Result<PaymentReceipt, BankOpsError> {
        let result = self.try_record_payment(loan_id, amount, note).await;
        if let Err(err) = &result {
            self.effects
                .refused(SYSTEM_ACTOR, "record_payment", loan_id.as_str(), err)
                .await;
        }
        result
    }

    async fn try_record_payment(
        &self,
        loan_id: &LoanId,
        amount: Decimal,
        note: Option<&str>,
    ) -> Result<PaymentReceipt, BankOpsError> {
        let loan = self.load(loan_id).await?;
        LoanLifecycle::ensure_allowed(loan.status, LoanAction::RecordPayment)?;

        let mut warnings =
            payment::validate_payment(amount, loan.monthly_payment, loan.remaining_balance)?;
        let breakdown =
            payment::payment_breakdown(amount, loan.remaining_balance, loan.interest_rate)?;
        // A prepayment never advances the schedule past the end of the term.
        let months_covered =
            payment::months_covered(amount, loan.monthly_payment).min(loan.remaining_term());
        warnings.retain_mut(|warning| match warning {
            PaymentWarning::MultipleMonths { months } => {
                *months = months_covered;
                months_covered > 1
            }
            PaymentWarning::PartialMonth { .. } => true,
        });
        let status = LoanLifecycle::advance(
            loan.status,
            LoanAction::RecordPayment,
            breakdown.is_full_payoff,
        )?;

        let now = Utc::now();
        let mut next = loan.clone();
        next.status = status;
        next.remaining_balance = breakdown.new_balance;
        next.payments_made = loan.payments_made.saturating_add(months_covered);
        next.next_payment_date = Some(payment::next_payment_date(
            loan.next_payment_date,
            months_covered,
            now,
        )?);
        next.version = loan.version + 1;
        next.updated_at = now;

        let line = LoanPayment {
            id: Uuid::new_v4().to_string(),
            loan_id: loan.id.clone(),
            amount,
            principal: breakdown.principal,
            interest: breakdown.interest,
            months_covered,
            balance_after: breakdown.new_balance,
            note: note.map(str::to_string),
            recorded_at: now,
        };

        if !self
            .store
            .record_loan_payment(&next, loan.version, &line)
            .await?
        {
            return Err(BankOpsError::Conflict {
                entity: "loan",
                id: loan.id.to_string(),
            });
        }

        info!(
            loan_id = %next.id,
            amount = %amount,
            principal = %breakdown.principal,
            interest = %breakdown.interest,
            new_balance = %breakdown.new_balance,
            months_covered,
            "loan payment recorded"
        );

        let event = if next.status == LoanStatus::Closed {
            info!(loan_id = %next.id, "loan paid off and closed");
            NotificationEvent::LoanClosed
        } else {
            NotificationEvent::LoanPaymentRecorded
        };
        self.effects
            .committed(
                SYSTEM_ACTOR,
                "record_payment",
                next.id.as_str(),
                &loan,
                &next,
                Some(Notice {
                    user_id: &next.user_id,
                    event,
                    payload: json!({
                        "loan_id": next.id,
                        "amount": amount,
                        "remaining_balance": next.remaining_balance,
                    }),
                }),
            )
            .await;

        Ok(PaymentReceipt {
            loan: next,
            breakdown,
            months_covered,
            warnings,
        })
    }

    pub async fn payments(&self, loan_id: &LoanId) -> Result<Vec<LoanPayment>, BankOpsError> {
        self.load(loan_id).await?;
        self.store.loan_payments(loan_id).await
    }

    pub async fn view(&self, loan_id: &LoanId) -> Result<LoanView, BankOpsError> {
        self.view_at(loan_id, Utc::now()).await
    }

    pub async fn view_at(
        &self,
        loan_id: &LoanId,
        now: DateTime<Utc>,
    ) -> Result<LoanView, BankOpsError> {
        let loan = self.load(loan_id).await?;
        let deposit = self.deposit_summary(&loan).await?;
        Ok(LoanView {
            is_late: loan.is_late_at(now),
            payment_status: payment::payment_status(loan.payments_made, loan.disbursed_at, now),
            deposit,
            loan,
        })
    }

    async fn deposit_summary(&self, loan: &Loan) -> Result<DepositSummary, BankOpsError> {
        let records = self.store.deposits_for(loan.id.as_str()).await?;
        Ok(DepositSummary::project(loan.deposit_required, &records))
    }

    /// Whole-row update guarded by the row version read at the start of the action.
    async fn commit(&self, before: &Loan, mut next: Loan) -> Result<Loan, BankOpsError> {
        next.version = before.version + 1;
        next.updated_at = Utc::now();
        if !self.store.update_loan(&next, before.version).await? {
            return Err(BankOpsError::Conflict {
                entity: "loan",
                id: before.id.to_string(),
            });
        }
        Ok(next)
    }
}
