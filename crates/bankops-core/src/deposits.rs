use crate::types::DepositRecord;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Deposit position of one loan or account, projected from its records.
///
/// There is no stored "deposit paid" flag anywhere. Every decision builds a
/// fresh summary from the authoritative record set, so a deposit inserted or
/// rejected between two reads is always observed by the next check.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DepositSummary {
    pub required: Decimal,
    pub total_deposited: Decimal,
    pub verified_records: usize,
    pub pending_records: usize,
}

impl DepositSummary {
    pub fn project(required: Decimal, records: &[DepositRecord]) -> Self {
        let mut total_deposited = Decimal::ZERO;
        let mut verified_records = 0;
        let mut pending_records = 0;

        for record in records {
            if record.status.is_verified() {
                total_deposited += record.amount;
                verified_records += 1;
            } else if record.status == crate::types::DepositStatus::Pending {
                pending_records += 1;
            }
        }

        Self {
            required,
            total_deposited,
            verified_records,
            pending_records,
        }
    }

    pub fn is_met(&self) -> bool {
        self.required <= Decimal::ZERO || self.total_deposited >= self.required
    }

    pub fn shortfall(&self) -> Decimal {
        (self.required - self.total_deposited).max(Decimal::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DepositStatus;
    use rust_decimal_macros::dec;

    fn record(amount: Decimal, status: DepositStatus) -> DepositRecord {
        DepositRecord::new("acct-1", amount, status).unwrap()
    }

    #[test]
    fn zero_requirement_is_always_met() {
        let summary = DepositSummary::project(dec!(0), &[]);
        assert!(summary.is_met());
        assert_eq!(summary.shortfall(), dec!(0));
    }

    #[test]
    fn only_verified_records_count() {
        let records = vec![
            record(dec!(200), DepositStatus::Approved),
            record(dec!(100), DepositStatus::Completed),
            record(dec!(150), DepositStatus::Pending),
            record(dec!(900), DepositStatus::Rejected),
        ];
        let summary = DepositSummary::project(dec!(500), &records);

        assert_eq!(summary.total_deposited, dec!(300));
        assert_eq!(summary.verified_records, 2);
        assert_eq!(summary.pending_records, 1);
        assert!(!summary.is_met());
        assert_eq!(summary.shortfall(), dec!(200));
    }

    #[test]
    fn exact_requirement_is_met() {
        let records = vec![
            record(dec!(200), DepositStatus::Approved),
            record(dec!(300), DepositStatus::Approved),
        ];
        assert!(DepositSummary::project(dec!(500), &records).is_met());
    }
}
