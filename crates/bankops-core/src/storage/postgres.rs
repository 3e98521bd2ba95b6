use super::{BankStore, DisbursementCommit, DisbursementOutcome};
use crate::error::BankOpsError;
use crate::types::{
    Account, AccountId, AccountStatus, DepositId, DepositRecord, DepositStatus, Loan, LoanId,
    LoanPayment, LoanStatus, LoanType, UserId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, Row};

const LOAN_COLUMNS: &str = "id, user_id, account_id, loan_type, principal, interest_rate, \
    term_months, monthly_payment, deposit_required, status, remaining_balance, payments_made, \
    next_payment_date, disbursed_at, rejection_reason, version, created_at, updated_at";

const ACCOUNT_COLUMNS: &str = "id, user_id, account_type, status, min_deposit, balance, \
    status_reason, status_changed_at, version, created_at, updated_at";

const DEPOSIT_COLUMNS: &str = "id, parent_id, amount, status, created_at, updated_at";

const UPDATE_LOAN: &str = r#"
    UPDATE bank_loans SET
        status = $2,
        remaining_balance = $3,
        payments_made = $4,
        next_payment_date = $5,
        disbursed_at = $6,
        rejection_reason = $7,
        version = $8,
        updated_at = $9
    WHERE id = $1 AND version = $10
"#;

/// PostgreSQL store. Compound operations run inside one transaction.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, BankOpsError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(database_url)
            .await
            .map_err(|e| BankOpsError::Storage(format!("postgres connect failed: {e}")))?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> Result<(), BankOpsError> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS bank_accounts (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                account_type TEXT NOT NULL,
                status TEXT NOT NULL,
                min_deposit NUMERIC NOT NULL,
                balance NUMERIC NOT NULL CHECK (balance >= 0),
                status_reason TEXT NULL,
                status_changed_at TIMESTAMPTZ NULL,
                version BIGINT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS bank_loans (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                account_id TEXT NOT NULL,
                loan_type TEXT NOT NULL,
                principal NUMERIC NOT NULL,
                interest_rate NUMERIC NOT NULL,
                term_months INTEGER NOT NULL,
                monthly_payment NUMERIC NOT NULL,
                deposit_required NUMERIC NOT NULL,
                status TEXT NOT NULL,
                remaining_balance NUMERIC NOT NULL CHECK (remaining_balance >= 0),
                payments_made INTEGER NOT NULL,
                next_payment_date TIMESTAMPTZ NULL,
                disbursed_at TIMESTAMPTZ NULL,
                rejection_reason TEXT NULL,
                version BIGINT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS bank_loan_payments (
                id TEXT PRIMARY KEY,
                loan_id TEXT NOT NULL,
                amount NUMERIC NOT NULL,
                principal NUMERIC NOT NULL,
                interest NUMERIC NOT NULL,
                months_covered INTEGER NOT NULL,
                balance_after NUMERIC NOT NULL,
                note TEXT NULL,
                recorded_at TIMESTAMPTZ NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS bank_deposits (
                id TEXT PRIMARY KEY,
                parent_id TEXT NOT NULL,
                amount NUMERIC NOT NULL CHECK (amount > 0),
                status TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_bank_deposits_parent_id ON bank_deposits (parent_id)",
            "CREATE INDEX IF NOT EXISTS idx_bank_loan_payments_loan_id ON bank_loan_payments (loan_id)",
        ];

        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| BankOpsError::Storage(format!("postgres schema create failed: {e}")))?;
        }

        Ok(())
    }
}

#[async_trait]
impl BankStore for PostgresStore {
    fn backend_label(&self) -> &'static str {
        "postgres"
    }

    async fn insert_loan(&self, loan: &Loan) -> Result<(), BankOpsError> {
        let sql = format!(
            "INSERT INTO bank_loans ({LOAN_COLUMNS}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)"
        );
        sqlx::query(&sql)
            .bind(loan.id.as_str())
            .bind(loan.user_id.as_str())
            .bind(loan.account_id.as_str())
            .bind(loan.loan_type.as_str())
            .bind(loan.principal)
            .bind(loan.interest_rate)
            .bind(to_i32(loan.term_months, "term_months")?)
            .bind(loan.monthly_payment)
            .bind(loan.deposit_required)
            .bind(loan.status.as_str())
            .bind(loan.remaining_balance)
            .bind(to_i32(loan.payments_made, "payments_made")?)
            .bind(loan.next_payment_date)
            .bind(loan.disbursed_at)
            .bind(&loan.rejection_reason)
            .bind(loan.version)
            .bind(loan.created_at)
            .bind(loan.updated_at)
            .execute(&self.pool)
            .await
            .map_err(|e| BankOpsError::Storage(format!("postgres insert loan failed: {e}")))?;
        Ok(())
    }

    async fn load_loan(&self, id: &LoanId) -> Result<Option<Loan>, BankOpsError> {
        let sql = format!("SELECT {LOAN_COLUMNS} FROM bank_loans WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| BankOpsError::Storage(format!("postgres load loan failed: {e}")))?;
        row.as_ref().map(loan_from_row).transpose()
    }

    async fn update_loan(&self, loan: &Loan, expected_version: i64) -> Result<bool, BankOpsError> {
        let result = loan_update(UPDATE_LOAN, loan, expected_version)?
            .execute(&self.pool)
            .await
            .map_err(|e| BankOpsError::Storage(format!("postgres update loan failed: {e}")))?;
        Ok(result.rows_affected() == 1)
    }

    async fn record_loan_payment(
        &self,
        loan: &Loan,
        expected_version: i64,
        payment: &LoanPayment,
    ) -> Result<bool, BankOpsError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| BankOpsError::Storage(format!("postgres begin failed: {e}")))?;

        let updated = loan_update(UPDATE_LOAN, loan, expected_version)?
            .execute(&mut *tx)
            .await
            .map_err(|e| BankOpsError::Storage(format!("postgres update loan failed: {e}")))?;
        if updated.rows_affected() != 1 {
            tx.rollback()
                .await
                .map_err(|e| BankOpsError::Storage(format!("postgres rollback failed: {e}")))?;
            return Ok(false);
        }

        sqlx::query(
            r#"
            INSERT INTO bank_loan_payments (
                id, loan_id, amount, principal, interest, months_covered, balance_after, note, recorded_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(&payment.id)
        .bind(payment.loan_id.as_str())
        .bind(payment.amount)
        .bind(payment.principal)
        .bind(payment.interest)
        .bind(to_i32(payment.months_covered, "months_covered")?)
        .bind(payment.balance_after)
        .bind(&payment.note)
        .bind(payment.recorded_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| BankOpsError::Storage(format!("postgres insert payment failed: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| BankOpsError::Storage(format!("postgres commit failed: {e}")))?;
        Ok(true)
    }

    async fn loan_payments(&self, id: &LoanId) -> Result<Vec<LoanPayment>, BankOpsError> {
        let rows = sqlx::query(
            r#"
            SELECT id, loan_id, amount, principal, interest, months_covered, balance_after, note, recorded_at
            FROM bank_loan_payments
            WHERE loan_id = $1
            ORDER BY recorded_at ASC
            "#,
        )
        .bind(id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| BankOpsError::Storage(format!("postgres load payments failed: {e}")))?;

        rows.iter()
            .map(|row| {
                Ok(LoanPayment {
                    id: column(row, "id")?,
                    loan_id: LoanId(column(row, "loan_id")?),
                    amount: column(row, "amount")?,
                    principal: column(row, "principal")?,
                    interest: column(row, "interest")?,
                    months_covered: to_u32(column(row, "months_covered")?, "months_covered")?,
                    balance_after: column(row, "balance_after")?,
                    note: column(row, "note")?,
                    recorded_at: column(row, "recorded_at")?,
                })
            })
            .collect()
    }

    async fn insert_account(&self, account: &Account) -> Result<(), BankOpsError> {
        let sql = format!(
            "INSERT INTO bank_accounts ({ACCOUNT_COLUMNS}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"
        );
        sqlx::query(&sql)
            .bind(account.id.as_str())
            .bind(account.user_id.as_str())
            .bind(&account.account_type)
            .bind(account.status.as_str())
            .bind(account.min_deposit)
            .bind(account.balance)
            .bind(&account.status_reason)
            .bind(account.status_changed_at)
            .bind(account.version)
            .bind(account.created_at)
            .bind(account.updated_at)
            .execute(&self.pool)
            .await
            .map_err(|e| BankOpsError::Storage(format!("postgres insert account failed: {e}")))?;
        Ok(())
    }

    async fn load_account(&self, id: &AccountId) -> Result<Option<Account>, BankOpsError> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM bank_accounts WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| BankOpsError::Storage(format!("postgres load account failed: {e}")))?;
        row.as_ref().map(account_from_row).transpose()
    }

    async fn update_account(
        &self,
        account: &Account,
        expected_version: i64,
    ) -> Result<bool, BankOpsError> {
        let result = sqlx::query(
            r#"
            UPDATE bank_accounts SET
                status = $2,
                balance = $3,
                status_reason = $4,
                status_changed_at = $5,
                version = $6,
                updated_at = $7
            WHERE id = $1 AND version = $8
            "#,
        )
        .bind(account.id.as_str())
        .bind(account.status.as_str())
        .bind(account.balance)
        .bind(&account.status_reason)
        .bind(account.status_changed_at)
        .bind(account.version)
        .bind(account.updated_at)
        .bind(expected_version)
        .execute(&self.pool)
        .await
        .map_err(|e| BankOpsError::Storage(format!("postgres update account failed: {e}")))?;
        Ok(result.rows_affected() == 1)
    }

    async fn insert_deposit(&self, deposit: &DepositRecord) -> Result<(), BankOpsError> {
        let sql = format!(
            "INSERT INTO bank_deposits ({DEPOSIT_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6)"
        );
        sqlx::query(&sql)
            .bind(deposit.id.as_str())
            .bind(&deposit.parent_id)
            .bind(deposit.amount)
            .bind(deposit.status.as_str())
            .bind(deposit.created_at)
            .bind(deposit.updated_at)
            .execute(&self.pool)
            .await
            .map_err(|e| BankOpsError::Storage(format!("postgres insert deposit failed: {e}")))?;
        Ok(())
    }

    async fn load_deposit(&self, id: &DepositId) -> Result<Option<DepositRecord>, BankOpsError> {
        let sql = format!("SELECT {DEPOSIT_COLUMNS} FROM bank_deposits WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| BankOpsError::Storage(format!("postgres load deposit failed: {e}")))?;
        row.as_ref().map(deposit_from_row).transpose()
    }

    async fn update_deposit_status(
        &self,
        id: &DepositId,
        status: DepositStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, BankOpsError> {
        let result = sqlx::query("UPDATE bank_deposits SET status = $2, updated_at = $3 WHERE id = $1")
            .bind(id.as_str())
            .bind(status.as_str())
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(|e| BankOpsError::Storage(format!("postgres update deposit failed: {e}")))?;
        Ok(result.rows_affected() == 1)
    }

    async fn deposits_for(&self, parent_id: &str) -> Result<Vec<DepositRecord>, BankOpsError> {
        let sql = format!(
            "SELECT {DEPOSIT_COLUMNS} FROM bank_deposits WHERE parent_id = $1 ORDER BY created_at ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(parent_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| BankOpsError::Storage(format!("postgres load deposits failed: {e}")))?;
        rows.iter().map(deposit_from_row).collect()
    }

    async fn apply_disbursement(
        &self,
        treasury: &AccountId,
        commit: &DisbursementCommit,
    ) -> Result<DisbursementOutcome, BankOpsError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| BankOpsError::Storage(format!("postgres begin failed: {e}")))?;
        let now = commit.loan.updated_at;

        // Loan leg first: the disbursed_at guard is what makes retries safe.
        let guarded = format!(
            "{UPDATE_LOAN} AND status = '{}' AND disbursed_at IS NULL",
            LoanStatus::Approved.as_str()
        );
        let loan_rows = loan_update(&guarded, &commit.loan, commit.expected_version)?
            .execute(&mut *tx)
            .await
            .map_err(|e| BankOpsError::Storage(format!("postgres disburse loan failed: {e}")))?
            .rows_affected();
        if loan_rows != 1 {
            rollback(tx).await?;
            return Ok(DisbursementOutcome::AlreadyDisbursed);
        }

        let debited = sqlx::query(
            r#"
            UPDATE bank_accounts
            SET balance = balance - $2, version = version + 1, updated_at = $3
            WHERE id = $1 AND balance >= $2
            RETURNING balance
            "#,
        )
        .bind(treasury.as_str())
        .bind(commit.amount)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| BankOpsError::Storage(format!("postgres treasury debit failed: {e}")))?;
        let treasury_balance: Decimal = match debited {
            Some(row) => column(&row, "balance")?,
            None => {
                rollback(tx).await?;
                return Ok(DisbursementOutcome::TreasuryShort);
            }
        };

        let credited = sqlx::query(
            r#"
            UPDATE bank_accounts
            SET balance = balance + $2, version = version + 1, updated_at = $3
            WHERE id = $1 AND id <> $4
            RETURNING balance
            "#,
        )
        .bind(commit.destination.as_str())
        .bind(commit.amount)
        .bind(now)
        .bind(treasury.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| BankOpsError::Storage(format!("postgres destination credit failed: {e}")))?;
        let destination_balance: Decimal = match credited {
            Some(row) => column(&row, "balance")?,
            None => {
                rollback(tx).await?;
                return Ok(DisbursementOutcome::DestinationMissing);
            }
        };

        tx.commit()
            .await
            .map_err(|e| BankOpsError::Storage(format!("postgres commit failed: {e}")))?;

        Ok(DisbursementOutcome::Committed {
            treasury_balance,
            destination_balance,
        })
    }
}

fn loan_update<'q>(
    sql: &'q str,
    loan: &'q Loan,
    expected_version: i64,
) -> Result<Query<'q, Postgres, PgArguments>, BankOpsError> {
    Ok(sqlx::query(sql)
        .bind(loan.id.as_str())
        .bind(loan.status.as_str())
        .bind(loan.remaining_balance)
        .bind(to_i32(loan.payments_made, "payments_made")?)
        .bind(loan.next_payment_date)
        .bind(loan.disbursed_at)
        .bind(loan.rejection_reason.as_deref())
        .bind(loan.version)
        .bind(loan.updated_at)
        .bind(expected_version))
}

async fn rollback(tx: sqlx::Transaction<'_, Postgres>) -> Result<(), BankOpsError> {
    tx.rollback()
        .await
        .map_err(|e| BankOpsError::Storage(format!("postgres rollback failed: {e}")))
}

fn column<'r, T>(row: &'r PgRow, name: &str) -> Result<T, BankOpsError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(name)
        .map_err(|e| BankOpsError::Storage(format!("postgres decode {name} failed: {e}")))
}

fn to_i32(value: u32, field: &str) -> Result<i32, BankOpsError> {
    i32::try_from(value)
        .map_err(|_| BankOpsError::Storage(format!("{field} exceeds postgres INTEGER range")))
}

fn to_u32(value: i32, field: &str) -> Result<u32, BankOpsError> {
    u32::try_from(value).map_err(|_| BankOpsError::Storage(format!("negative {field} in storage")))
}

fn loan_from_row(row: &PgRow) -> Result<Loan, BankOpsError> {
    let loan_type: String = column(row, "loan_type")?;
    let status: String = column(row, "status")?;

    Ok(Loan {
        id: LoanId(column(row, "id")?),
        user_id: UserId(column(row, "user_id")?),
        account_id: AccountId(column(row, "account_id")?),
        loan_type: LoanType::parse(&loan_type).ok_or_else(|| {
            BankOpsError::Storage(format!("unknown loan type '{loan_type}' in postgres"))
        })?,
        principal: column(row, "principal")?,
        interest_rate: column(row, "interest_rate")?,
        term_months: to_u32(column(row, "term_months")?, "term_months")?,
        monthly_payment: column(row, "monthly_payment")?,
        deposit_required: column(row, "deposit_required")?,
        status: LoanStatus::parse(&status).ok_or_else(|| {
            BankOpsError::Storage(format!("unknown loan status '{status}' in postgres"))
        })?,
        remaining_balance: column(row, "remaining_balance")?,
        payments_made: to_u32(column(row, "payments_made")?, "payments_made")?,
        next_payment_date: column(row, "next_payment_date")?,
        disbursed_at: column(row, "disbursed_at")?,
        rejection_reason: column(row, "rejection_reason")?,
        version: column(row, "version")?,
        created_at: column(row, "created_at")?,
        updated_at: column(row, "updated_at")?,
    })
}

fn account_from_row(row: &PgRow) -> Result<Account, BankOpsError> {
    let status: String = column(row, "status")?;

    Ok(Account {
        id: AccountId(column(row, "id")?),
        user_id: UserId(column(row, "user_id")?),
        account_type: column(row, "account_type")?,
        status: AccountStatus::parse(&status).ok_or_else(|| {
            BankOpsError::Storage(format!("unknown account status '{status}' in postgres"))
        })?,
        min_deposit: column(row, "min_deposit")?,
        balance: column(row, "balance")?,
        status_reason: column(row, "status_reason")?,
        status_changed_at: column(row, "status_changed_at")?,
        version: column(row, "version")?,
        created_at: column(row, "created_at")?,
        updated_at: column(row, "updated_at")?,
    })
}

fn deposit_from_row(row: &PgRow) -> Result<DepositRecord, BankOpsError> {
    let status: String = column(row, "status")?;

    Ok(DepositRecord {
        id: DepositId(column(row, "id")?),
        parent_id: column(row, "parent_id")?,
        amount: column(row, "amount")?,
        status: DepositStatus::parse(&status).ok_or_else(|| {
            BankOpsError::Storage(format!("unknown deposit status '{status}' in postgres"))
        })?,
        created_at: column(row, "created_at")?,
        updated_at: column(row, "updated_at")?,
    })
}
