use bankops_core::{
    AccountStatus, BankOpsConfig, BankOpsEngine, BankOpsError, BankStore, DepositStatus,
    ErrorKind, LoanId, LoanStatus, LoanType, MemoryStore, NewAccount, NewLoan,
    NotificationEvent, OperatorCredential, OutboxNotifier,
};
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

struct Bank {
    engine: Arc<BankOpsEngine>,
    outbox: Arc<OutboxNotifier>,
    credential: OperatorCredential,
}

async fn bank(treasury: Decimal) -> Bank {
    let outbox = Arc::new(OutboxNotifier::new());
    let config = BankOpsConfig {
        treasury_opening_balance: treasury,
        operators: vec![("officer-1".to_string(), "integration-secret".to_string())],
        ..BankOpsConfig::default()
    };
    let engine = BankOpsEngine::with_parts(config, Arc::new(MemoryStore::new()), outbox.clone())
        .await
        .expect("engine");
    let credential = engine.issue_credential("officer-1").expect("credential");
    Bank {
        engine: Arc::new(engine),
        outbox,
        credential,
    }
}

async fn open_checking(bank: &Bank) -> String {
    bank.engine
        .open_account(NewAccount::new("user-1", "checking"))
        .await
        .expect("account")
        .id
        .to_string()
}

async fn pending_loan(bank: &Bank, account_id: &str, principal: Decimal) -> LoanId {
    bank.engine
        .create_loan(
            NewLoan::new("user-1", account_id, LoanType::Personal, principal, dec!(12), 12)
                .with_monthly_payment(dec!(100)),
        )
        .await
        .loan_id
        .expect("loan id")
}

#[tokio::test]
async fn loan_runs_from_pending_to_active() {
    let bank = bank(dec!(10000)).await;
    let account_id = open_checking(&bank).await;
    let loan_id = pending_loan(&bank, &account_id, dec!(2500)).await;

    let approved = bank.engine.approve_loan(&loan_id, &bank.credential).await;
    assert_eq!(approved.status, Some(LoanStatus::Approved));
    assert!(approved.error.is_none());

    let disbursed = bank.engine.disburse_loan(&loan_id).await;
    assert_eq!(disbursed.status, Some(LoanStatus::Active));
    assert_eq!(bank.engine.treasury_balance().await.unwrap(), dec!(7500));

    let payment = bank
        .engine
        .record_loan_payment(&loan_id, dec!(300), Some("three months"))
        .await;
    assert!(payment.error.is_none());
    assert_eq!(payment.months_covered, 3);
    assert_eq!(payment.warnings, vec!["payment covers 3 months".to_string()]);
    // 1% of 2500 is interest, the rest reduces principal.
    assert_eq!(payment.new_balance, Some(dec!(2225)));

    let view = bank.engine.loan_view(&loan_id).await.unwrap();
    assert_eq!(view.loan.payments_made, 3);
    assert!(!view.is_late);
    assert!(view.payment_status.is_ahead());

    let events: Vec<_> = bank.outbox.pending().into_iter().map(|n| n.event).collect();
    assert_eq!(
        events,
        vec![
            NotificationEvent::LoanApproved,
            NotificationEvent::LoanDisbursed,
            NotificationEvent::LoanPaymentRecorded,
        ]
    );
    assert!(bank.engine.verify_audit_chain().await);
}

#[tokio::test]
async fn second_disbursement_never_credits_twice() {
    let bank = bank(dec!(5000)).await;
    let account_id = open_checking(&bank).await;
    let loan_id = pending_loan(&bank, &account_id, dec!(1000)).await;
    bank.engine.approve_loan(&loan_id, &bank.credential).await;

    let first = bank.engine.disburse_loan(&loan_id).await;
    assert!(first.error.is_none());
    let second = bank.engine.disburse_loan(&loan_id).await;
    assert_eq!(second.error.map(|e| e.kind), Some(ErrorKind::InvalidTransition));

    let account = bank
        .engine
        .account_view(&bankops_core::AccountId::new(account_id))
        .await
        .unwrap();
    assert_eq!(account.account.balance, dec!(1000));
    assert_eq!(bank.engine.treasury_balance().await.unwrap(), dec!(4000));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_disbursements_never_overdraw_treasury() {
    let bank = bank(dec!(3000)).await;
    let account_id = open_checking(&bank).await;

    let mut loans = Vec::new();
    for _ in 0..5 {
        let loan_id = pending_loan(&bank, &account_id, dec!(1000)).await;
        let response = bank.engine.approve_loan(&loan_id, &bank.credential).await;
        assert_eq!(response.status, Some(LoanStatus::Approved));
        loans.push(loan_id);
    }

    let mut handles = Vec::new();
    for loan_id in loans {
        let engine = bank.engine.clone();
        handles.push(tokio::spawn(async move {
            engine.disburse_loan(&loan_id).await
        }));
    }

    let mut committed = 0;
    for handle in handles {
        let response = handle.await.unwrap();
        match response.error {
            None => committed += 1,
            Some(error) => {
                assert!(matches!(
                    error.kind,
                    ErrorKind::InsufficientTreasury | ErrorKind::TreasuryRace
                ));
                assert_eq!(response.status, Some(LoanStatus::Approved));
            }
        }
    }

    assert_eq!(committed, 3);
    assert_eq!(bank.engine.treasury_balance().await.unwrap(), dec!(0));
}

#[tokio::test]
async fn approval_fails_when_principal_exceeds_treasury() {
    let bank = bank(dec!(999.99)).await;
    let account_id = open_checking(&bank).await;
    let too_big = pending_loan(&bank, &account_id, dec!(1000)).await;
    let fits = pending_loan(&bank, &account_id, dec!(999.99)).await;

    let response = bank.engine.approve_loan(&too_big, &bank.credential).await;
    assert_eq!(
        response.error.map(|e| e.kind),
        Some(ErrorKind::InsufficientTreasury)
    );
    assert_eq!(response.status, Some(LoanStatus::Pending));

    let response = bank.engine.approve_loan(&fits, &bank.credential).await;
    assert_eq!(response.status, Some(LoanStatus::Approved));
}

#[tokio::test]
async fn deposit_gated_activation_follows_record_set() {
    let bank = bank(dec!(0)).await;
    let account = bank
        .engine
        .open_account(NewAccount::new("user-2", "checking").with_min_deposit(dec!(500)))
        .await
        .unwrap();
    let parent = account.id.as_str();

    bank.engine
        .record_deposit(parent, dec!(200), DepositStatus::Approved)
        .await
        .unwrap();
    let second = bank
        .engine
        .record_deposit(parent, dec!(300), DepositStatus::Approved)
        .await
        .unwrap();
    let view = bank.engine.account_view(&account.id).await.unwrap();
    assert!(view.deposit.is_met());

    bank.engine
        .review_deposit(&second.id, DepositStatus::Rejected)
        .await
        .unwrap();
    let response = bank.engine.activate_account(&account.id).await;
    assert_eq!(response.error.map(|e| e.kind), Some(ErrorKind::DepositNotMet));
    assert_eq!(response.status, Some(AccountStatus::PendingFunding));

    bank.engine
        .review_deposit(&second.id, DepositStatus::Completed)
        .await
        .unwrap();
    let response = bank.engine.activate_account(&account.id).await;
    assert_eq!(response.status, Some(AccountStatus::Active));
    assert!(response.error.is_none());
}

#[tokio::test]
async fn loan_deposit_requirement_gates_approval() {
    let bank = bank(dec!(10000)).await;
    let account_id = open_checking(&bank).await;
    let loan_id = bank
        .engine
        .create_loan(
            NewLoan::new("user-1", &account_id, LoanType::Home, dec!(5000), dec!(6), 60)
                .with_deposit_required(dec!(1000)),
        )
        .await
        .loan_id
        .unwrap();

    let response = bank.engine.approve_loan(&loan_id, &bank.credential).await;
    assert_eq!(response.error.map(|e| e.kind), Some(ErrorKind::DepositNotMet));

    bank.engine
        .record_deposit(loan_id.as_str(), dec!(1000), DepositStatus::Completed)
        .await
        .unwrap();
    let response = bank.engine.approve_loan(&loan_id, &bank.credential).await;
    assert_eq!(response.status, Some(LoanStatus::Approved));
}

#[tokio::test]
async fn lateness_is_derived_at_read_time() {
    let store: Arc<dyn BankStore> = Arc::new(MemoryStore::new());
    let engine = BankOpsEngine::with_parts(
        BankOpsConfig::default().with_operator("operator-local", "lateness-secret"),
        store.clone(),
        Arc::new(OutboxNotifier::new()),
    )
    .await
    .unwrap();
    let credential = engine.issue_credential("operator-local").unwrap();
    let account = engine
        .open_account(NewAccount::new("user-1", "checking"))
        .await
        .unwrap();
    let loan_id = engine
        .create_loan(NewLoan::new(
            "user-1",
            account.id.as_str(),
            LoanType::Auto,
            dec!(1200),
            dec!(0),
            12,
        ))
        .await
        .loan_id
        .unwrap();
    engine.approve_loan(&loan_id, &credential).await;
    engine.disburse_loan(&loan_id).await;

    let now = Utc::now();
    let on_time = engine.loans().view_at(&loan_id, now).await.unwrap();
    assert!(!on_time.is_late);

    let later = engine
        .loans()
        .view_at(&loan_id, now + Duration::days(75))
        .await
        .unwrap();
    assert!(later.is_late);
    assert!(later.payment_status.is_behind());

    let stored = store.load_loan(&loan_id).await.unwrap().unwrap();
    assert_eq!(stored.payments_made, 0);
}

#[tokio::test]
async fn forged_credentials_are_refused_and_audited() {
    let bank = bank(dec!(5000)).await;
    let account_id = open_checking(&bank).await;
    let loan_id = pending_loan(&bank, &account_id, dec!(100)).await;

    let forged = OperatorCredential {
        operator_id: "officer-1".to_string(),
        token: "0".repeat(64),
    };
    let response = bank.engine.approve_loan(&loan_id, &forged).await;
    assert_eq!(response.error.map(|e| e.kind), Some(ErrorKind::Unauthorized));

    let entries = bank.engine.audit_entries_for(loan_id.as_str()).await;
    let refusal = entries.last().unwrap();
    assert_eq!(refusal.kind, bankops_core::AuditEntryKind::Refusal);
    assert_eq!(refusal.record.actor_id, "officer-1");
}

#[tokio::test]
async fn unknown_ids_report_not_found() {
    let bank = bank(dec!(0)).await;
    let response = bank.engine.disburse_loan(&LoanId::new("nope")).await;
    assert_eq!(response.status, None);
    assert_eq!(response.error.map(|e| e.kind), Some(ErrorKind::NotFound));

    let err = bank.engine.loan_view(&LoanId::new("nope")).await.unwrap_err();
    assert!(matches!(err, BankOpsError::NotFound { .. }));

    let created = bank
        .engine
        .create_loan(NewLoan::new("user-1", "nope", LoanType::Auto, dec!(100), dec!(5), 12))
        .await;
    assert!(created.loan_id.is_none());
    assert_eq!(created.error.map(|e| e.kind), Some(ErrorKind::NotFound));
}
