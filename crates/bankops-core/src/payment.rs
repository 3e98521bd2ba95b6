//! Payment math: schedule arithmetic and principal/interest allocation.
//!
//! Everything here is pure. Time-dependent functions take `now` explicitly so
//! the lifecycle engine decides which clock reading an action observes.
//!
//! The schedule follows a fixed 30-day month when advancing due dates and a
//! calendar-month count when measuring how long a loan has been running.

use crate::error::BankOpsError;
use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, MathematicalOps, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Days a single covered month advances the due date by.
pub const DAYS_PER_BILLING_MONTH: i64 = 30;

const MONTHS_PER_YEAR: Decimal = dec!(12);
const PERCENT: Decimal = dec!(100);
const CENT_SCALE: u32 = 2;

/// Number of monthly installments a payment satisfies.
///
/// Returns 0 for non-positive payments. A missing or non-positive monthly
/// payment is treated as a single installment so a degenerate loan row still
/// advances its schedule. Otherwise the floor of `payment / monthly`, at least 1.
pub fn months_covered(payment_amount: Decimal, monthly_payment: Decimal) -> u32 {
    if payment_amount <= Decimal::ZERO {
        return 0;
    }
    if monthly_payment <= Decimal::ZERO {
        return 1;
    }

    let months = (payment_amount / monthly_payment)
        .floor()
        .to_u32()
        .unwrap_or(u32::MAX);
    months.max(1)
}

/// Advance `current` (or `now` when absent) by 30 days per covered month.
///
/// Fails `InvalidAmount` when the advance leaves the representable date range.
pub fn next_payment_date(
    current: Option<DateTime<Utc>>,
    months_covered: u32,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, BankOpsError> {
    let base = current.unwrap_or(now);
    Duration::try_days(DAYS_PER_BILLING_MONTH * i64::from(months_covered))
        .and_then(|advance| base.checked_add_signed(advance))
        .ok_or_else(|| {
            BankOpsError::InvalidAmount(format!(
                "advancing the due date by {months_covered} months is out of range"
            ))
        })
}

/// Whole calendar months between `disbursed` and `now`, floored at 0.
pub fn months_since_start(disbursed: DateTime<Utc>, now: DateTime<Utc>) -> u32 {
    let mut months = (i64::from(now.year()) - i64::from(disbursed.year())) * 12
        + (i64::from(now.month()) - i64::from(disbursed.month()));

    // An incomplete trailing month does not count.
    let now_in_month = (now.day(), now.num_seconds_from_midnight());
    let start_in_month = (disbursed.day(), disbursed.num_seconds_from_midnight());
    if now_in_month < start_in_month {
        months -= 1;
    }

    months.max(0).try_into().unwrap_or(u32::MAX)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleState {
    Ahead,
    OnTrack,
    Behind,
}

/// Repayment progress relative to elapsed calendar months.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaymentStatus {
    pub months_elapsed: u32,
    pub months_ahead: i64,
    pub state: ScheduleState,
}

impl PaymentStatus {
    pub fn is_ahead(&self) -> bool {
        self.state == ScheduleState::Ahead
    }

    pub fn is_behind(&self) -> bool {
        self.state == ScheduleState::Behind
    }

    pub fn is_on_track(&self) -> bool {
        self.state == ScheduleState::OnTrack
    }
}

/// Classify `payments_made` against the months elapsed since disbursement.
///
/// A loan that was never disbursed has no elapsed months.
pub fn payment_status(
    payments_made: u32,
    disbursed: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> PaymentStatus {
    let months_elapsed = disbursed
        .map(|at| months_since_start(at, now))
        .unwrap_or(0);
    let months_ahead = i64::from(payments_made) - i64::from(months_elapsed);
    let state = match months_ahead {
        n if n > 0 => ScheduleState::Ahead,
        n if n < 0 => ScheduleState::Behind,
        _ => ScheduleState::OnTrack,
    };

    PaymentStatus {
        months_elapsed,
        months_ahead,
        state,
    }
}

/// Allocation of one payment between interest and principal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaymentBreakdown {
    pub interest: Decimal,
    pub principal: Decimal,
    pub new_balance: Decimal,
    pub is_full_payoff: bool,
}

/// Apply a payment to a balance at one month of simple interest.
///
/// Interest is rounded to cents. Interest and principal are floored at 0, so
/// a payment smaller than the accrued interest leaves the balance unchanged.
pub fn payment_breakdown(
    payment_amount: Decimal,
    remaining_balance: Decimal,
    annual_rate_percent: Decimal,
) -> Result<PaymentBreakdown, BankOpsError> {
    let monthly_rate = annual_rate_percent / PERCENT / MONTHS_PER_YEAR;
    let interest = remaining_balance
        .checked_mul(monthly_rate)
        .ok_or_else(|| out_of_range("interest", remaining_balance, annual_rate_percent))?
        .round_dp_with_strategy(CENT_SCALE, RoundingStrategy::MidpointAwayFromZero)
        .max(Decimal::ZERO);
    let principal = (payment_amount - interest)
        .min(remaining_balance)
        .max(Decimal::ZERO);
    let new_balance = (remaining_balance - principal).max(Decimal::ZERO);

    Ok(PaymentBreakdown {
        interest,
        principal,
        new_balance,
        is_full_payoff: new_balance.is_zero(),
    })
}

fn out_of_range(what: &str, amount: Decimal, rate: Decimal) -> BankOpsError {
    BankOpsError::InvalidAmount(format!("{what} on {amount} at {rate}% is out of range"))
}

/// Non-blocking observations about an otherwise valid payment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PaymentWarning {
    /// Less than one installment and not a payoff of the remaining balance.
    PartialMonth {
        amount: Decimal,
        monthly_payment: Decimal,
    },
    /// The payment prepays several installments.
    MultipleMonths { months: u32 },
}

impl fmt::Display for PaymentWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PartialMonth {
                amount,
                monthly_payment,
            } => write!(
                f,
                "payment {amount} is less than the monthly payment {monthly_payment}"
            ),
            Self::MultipleMonths { months } => write!(f, "payment covers {months} months"),
        }
    }
}

/// Check a payment against the loan's installment and balance.
///
/// Hard failures are `InvalidAmount` and `ExceedsBalance`; everything else is
/// surfaced as a warning and never blocks the payment.
pub fn validate_payment(
    payment_amount: Decimal,
    monthly_payment: Decimal,
    remaining_balance: Decimal,
) -> Result<Vec<PaymentWarning>, BankOpsError> {
    if payment_amount <= Decimal::ZERO {
        return Err(BankOpsError::InvalidAmount(format!(
            "payment must be positive, got {payment_amount}"
        )));
    }
    if payment_amount > remaining_balance {
        return Err(BankOpsError::ExceedsBalance {
            amount: payment_amount,
            remaining: remaining_balance,
        });
    }

    let mut warnings = Vec::new();
    if payment_amount < monthly_payment && payment_amount != remaining_balance {
        warnings.push(PaymentWarning::PartialMonth {
            amount: payment_amount,
            monthly_payment,
        });
    }

    let months = months_covered(payment_amount, monthly_payment);
    if months > 1 {
        warnings.push(PaymentWarning::MultipleMonths { months });
    }

    Ok(warnings)
}

/// Level installment for a fully amortising loan, rounded to cents.
///
/// `P·r / (1 − (1 + r)^−n)` with `r` the monthly rate; `P / n` at 0%.
/// Fails `InvalidAmount` when the growth factor overflows `Decimal`.
pub fn amortized_monthly_payment(
    principal: Decimal,
    annual_rate_percent: Decimal,
    term_months: u32,
) -> Result<Decimal, BankOpsError> {
    if term_months == 0 {
        return Ok(principal);
    }
    let n = Decimal::from(term_months);
    let monthly_rate = annual_rate_percent / PERCENT / MONTHS_PER_YEAR;

    let payment = if monthly_rate.is_zero() {
        principal / n
    } else {
        (Decimal::ONE + monthly_rate)
            .checked_powi(i64::from(term_months))
            .and_then(|growth| {
                principal
                    .checked_mul(monthly_rate)?
                    .checked_mul(growth)?
                    .checked_div(growth - Decimal::ONE)
            })
            .ok_or_else(|| out_of_range("installment", principal, annual_rate_percent))?
    };

    Ok(payment.round_dp_with_strategy(CENT_SCALE, RoundingStrategy::MidpointAwayFromZero))
}
