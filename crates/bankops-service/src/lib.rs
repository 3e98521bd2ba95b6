#![deny(unsafe_code)]

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bankops_core::{
    AccountActionResponse, AccountId, AccountView, ActionError, AuditEntry, AuditEntryKind,
    BankOpsConfig, BankOpsEngine, BankOpsError, CreateLoanResponse, DepositId, DepositRecord,
    DepositStatus, ErrorKind, LoanActionResponse, LoanId, LoanPayment, LoanView, NewAccount,
    NewLoan, OperatorCredential, PaymentResponse,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

#[derive(Clone)]
pub struct ServiceState {
    pub engine: Arc<BankOpsEngine>,
}

impl ServiceState {
    pub async fn bootstrap(config: BankOpsConfig) -> Result<Self, ServiceError> {
        let engine = BankOpsEngine::bootstrap(config).await?;
        Ok(Self {
            engine: Arc::new(engine),
        })
    }
}

pub fn build_router(state: ServiceState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/operators/:operator_id/credentials", post(login_operator))
        .route("/v1/loans", post(create_loan))
        .route("/v1/loans/:loan_id", get(get_loan))
        .route("/v1/loans/:loan_id/approve", post(approve_loan))
        .route("/v1/loans/:loan_id/disburse", post(disburse_loan))
        .route("/v1/loans/:loan_id/reject", post(reject_loan))
        .route(
            "/v1/loans/:loan_id/payments",
            get(list_loan_payments).post(record_loan_payment),
        )
        .route("/v1/accounts", post(open_account))
        .route("/v1/accounts/:account_id", get(get_account))
        .route("/v1/accounts/:account_id/activate", post(activate_account))
        .route("/v1/accounts/:account_id/suspend", post(suspend_account))
        .route("/v1/accounts/:account_id/close", post(close_account))
        .route("/v1/accounts/:account_id/reject", post(reject_account))
        .route("/v1/deposits", get(list_deposits).post(record_deposit))
        .route("/v1/deposits/:deposit_id/review", post(review_deposit))
        .route("/v1/treasury", get(get_treasury))
        .route("/v1/audit/entries", get(list_audit_entries))
        .with_state(state)
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("core engine error: {0}")]
    Core(#[from] BankOpsError),
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{message}")]
    Http { status: StatusCode, message: String },
    #[error(transparent)]
    Core(#[from] BankOpsError),
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self::Http {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Http { status, message } => {
                (status, Json(serde_json::json!({ "error": message }))).into_response()
            }
            ApiError::Core(err) => {
                let error = ActionError::from(&err);
                (status_for(error.kind), Json(serde_json::json!({ "error": error })))
                    .into_response()
            }
        }
    }
}

/// HTTP status for an engine error kind.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorKind::InvalidAmount | ErrorKind::ExceedsBalance => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::DepositNotMet
        | ErrorKind::InsufficientTreasury
        | ErrorKind::InvalidTransition => StatusCode::CONFLICT,
        ErrorKind::TreasuryRace | ErrorKind::PartialDisbursement | ErrorKind::Conflict => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        ErrorKind::Storage | ErrorKind::Ledger | ErrorKind::Serialization => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Action responses keep their body on failure; only the status code changes.
fn reply_status(success: StatusCode, error: Option<&ActionError>) -> StatusCode {
    error.map(|err| status_for(err.kind)).unwrap_or(success)
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    storage_backend: &'static str,
}

async fn health(State(state): State<ServiceState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: "bankops-service",
        storage_backend: state.engine.store().backend_label(),
    })
}

#[derive(Debug, Clone, Deserialize)]
struct LoginRequest {
    secret: String,
}

async fn login_operator(
    State(state): State<ServiceState>,
    Path(operator_id): Path<String>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<OperatorCredential>, ApiError> {
    Ok(Json(
        state.engine.login_operator(&operator_id, &request.secret)?,
    ))
}

async fn create_loan(
    State(state): State<ServiceState>,
    Json(request): Json<NewLoan>,
) -> (StatusCode, Json<CreateLoanResponse>) {
    let response = state.engine.create_loan(request).await;
    (reply_status(StatusCode::CREATED, response.error.as_ref()), Json(response))
}

async fn get_loan(
    State(state): State<ServiceState>,
    Path(loan_id): Path<String>,
) -> Result<Json<LoanView>, ApiError> {
    Ok(Json(state.engine.loan_view(&LoanId::new(loan_id)).await?))
}

async fn approve_loan(
    State(state): State<ServiceState>,
    Path(loan_id): Path<String>,
    Json(credential): Json<OperatorCredential>,
) -> (StatusCode, Json<LoanActionResponse>) {
    let response = state
        .engine
        .approve_loan(&LoanId::new(loan_id), &credential)
        .await;
    (reply_status(StatusCode::OK, response.error.as_ref()), Json(response))
}

async fn disburse_loan(
    State(state): State<ServiceState>,
    Path(loan_id): Path<String>,
) -> (StatusCode, Json<LoanActionResponse>) {
    let response = state.engine.disburse_loan(&LoanId::new(loan_id)).await;
    (reply_status(StatusCode::OK, response.error.as_ref()), Json(response))
}

#[derive(Debug, Clone, Deserialize)]
struct ReasonRequest {
    reason: String,
}

async fn reject_loan(
    State(state): State<ServiceState>,
    Path(loan_id): Path<String>,
    Json(request): Json<ReasonRequest>,
) -> (StatusCode, Json<LoanActionResponse>) {
    let response = state
        .engine
        .reject_loan(&LoanId::new(loan_id), &request.reason)
        .await;
    (reply_status(StatusCode::OK, response.error.as_ref()), Json(response))
}

#[derive(Debug, Clone, Deserialize)]
struct PaymentRequest {
    amount: Decimal,
    note: Option<String>,
}

async fn record_loan_payment(
    State(state): State<ServiceState>,
    Path(loan_id): Path<String>,
    Json(request): Json<PaymentRequest>,
) -> (StatusCode, Json<PaymentResponse>) {
    let response = state
        .engine
        .record_loan_payment(
            &LoanId::new(loan_id),
            request.amount,
            request.note.as_deref(),
        )
        .await;
    (reply_status(StatusCode::OK, response.error.as_ref()), Json(response))
}

async fn list_loan_payments(
    State(state): State<ServiceState>,
    Path(loan_id): Path<String>,
) -> Result<Json<Vec<LoanPayment>>, ApiError> {
    Ok(Json(
        state.engine.loan_payments(&LoanId::new(loan_id)).await?,
    ))
}

async fn open_account(
    State(state): State<ServiceState>,
    Json(request): Json<NewAccount>,
) -> Result<(StatusCode, Json<bankops_core::Account>), ApiError> {
    let account = state.engine.open_account(request).await?;
    Ok((StatusCode::CREATED, Json(account)))
}

async fn get_account(
    State(state): State<ServiceState>,
    Path(account_id): Path<String>,
) -> Result<Json<AccountView>, ApiError> {
    Ok(Json(
        state
            .engine
            .account_view(&AccountId::new(account_id))
            .await?,
    ))
}

async fn activate_account(
    State(state): State<ServiceState>,
    Path(account_id): Path<String>,
) -> (StatusCode, Json<AccountActionResponse>) {
    let response = state
        .engine
        .activate_account(&AccountId::new(account_id))
        .await;
    (reply_status(StatusCode::OK, response.error.as_ref()), Json(response))
}

async fn suspend_account(
    State(state): State<ServiceState>,
    Path(account_id): Path<String>,
    Json(request): Json<ReasonRequest>,
) -> (StatusCode, Json<AccountActionResponse>) {
    let response = state
        .engine
        .suspend_account(&AccountId::new(account_id), &request.reason)
        .await;
    (reply_status(StatusCode::OK, response.error.as_ref()), Json(response))
}

async fn close_account(
    State(state): State<ServiceState>,
    Path(account_id): Path<String>,
    Json(request): Json<ReasonRequest>,
) -> (StatusCode, Json<AccountActionResponse>) {
    let response = state
        .engine
        .close_account(&AccountId::new(account_id), &request.reason)
        .await;
    (reply_status(StatusCode::OK, response.error.as_ref()), Json(response))
}

async fn reject_account(
    State(state): State<ServiceState>,
    Path(account_id): Path<String>,
    Json(request): Json<ReasonRequest>,
) -> (StatusCode, Json<AccountActionResponse>) {
    let response = state
        .engine
        .reject_account(&AccountId::new(account_id), &request.reason)
        .await;
    (reply_status(StatusCode::OK, response.error.as_ref()), Json(response))
}

#[derive(Debug, Clone, Deserialize)]
struct DepositRequest {
    parent_id: String,
    amount: Decimal,
    status: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ReviewRequest {
    status: String,
}

#[derive(Debug, Clone, Deserialize)]
struct DepositsQuery {
    parent_id: String,
}

fn parse_deposit_status(value: &str) -> Result<DepositStatus, ApiError> {
    DepositStatus::parse(&value.to_ascii_lowercase()).ok_or_else(|| {
        ApiError::bad_request(format!(
            "invalid deposit status '{}'; expected one of: pending, approved, completed, rejected",
            value
        ))
    })
}

async fn record_deposit(
    State(state): State<ServiceState>,
    Json(request): Json<DepositRequest>,
) -> Result<(StatusCode, Json<DepositRecord>), ApiError> {
    let status = match request.status.as_deref() {
        Some(value) => parse_deposit_status(value)?,
        None => DepositStatus::Pending,
    };
    let record = state
        .engine
        .record_deposit(&request.parent_id, request.amount, status)
        .await?;
    Ok((StatusCode::CREATED, Json(record)))
}

async fn review_deposit(
    State(state): State<ServiceState>,
    Path(deposit_id): Path<String>,
    Json(request): Json<ReviewRequest>,
) -> Result<Json<DepositRecord>, ApiError> {
    let status = parse_deposit_status(&request.status)?;
    Ok(Json(
        state
            .engine
            .review_deposit(&DepositId::new(deposit_id), status)
            .await?,
    ))
}

async fn list_deposits(
    State(state): State<ServiceState>,
    Query(query): Query<DepositsQuery>,
) -> Result<Json<Vec<DepositRecord>>, ApiError> {
    Ok(Json(state.engine.deposits(&query.parent_id).await?))
}

#[derive(Debug, Clone, Serialize)]
struct TreasuryResponse {
    account_id: String,
    balance: Decimal,
    as_of: DateTime<Utc>,
}

async fn get_treasury(
    State(state): State<ServiceState>,
) -> Result<Json<TreasuryResponse>, ApiError> {
    let balance = state.engine.treasury_balance().await?;
    Ok(Json(TreasuryResponse {
        account_id: state.engine.config().treasury_account_id.clone(),
        balance,
        as_of: Utc::now(),
    }))
}

#[derive(Debug, Clone, Deserialize)]
struct AuditEntriesQuery {
    subject_id: Option<String>,
    kind: Option<String>,
    limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
struct AuditEntriesResponse {
    chain_valid: bool,
    total: usize,
    returned: usize,
    items: Vec<AuditEntry>,
}

fn parse_kind_filter(kind: Option<&str>) -> Result<Option<AuditEntryKind>, ApiError> {
    match kind.map(|value| value.to_ascii_lowercase()) {
        None => Ok(None),
        Some(value) if value == "transition" => Ok(Some(AuditEntryKind::Transition)),
        Some(value) if value == "refusal" => Ok(Some(AuditEntryKind::Refusal)),
        Some(other) => Err(ApiError::bad_request(format!(
            "invalid kind '{}'; expected one of: transition, refusal",
            other
        ))),
    }
}

async fn list_audit_entries(
    State(state): State<ServiceState>,
    Query(query): Query<AuditEntriesQuery>,
) -> Result<Json<AuditEntriesResponse>, ApiError> {
    let kind_filter = parse_kind_filter(query.kind.as_deref())?;

    let mut entries = match query.subject_id.as_deref() {
        Some(subject_id) => state.engine.audit_entries_for(subject_id).await,
        None => state.engine.audit_entries().await,
    };
    if let Some(kind) = kind_filter {
        entries.retain(|entry| entry.kind == kind);
    }

    let total = entries.len();
    entries.reverse();
    entries.truncate(query.limit.unwrap_or(100).clamp(1, 1000));

    Ok(Json(AuditEntriesResponse {
        chain_valid: state.engine.verify_audit_chain().await,
        total,
        returned: entries.len(),
        items: entries,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use bankops_core::{AccountStatus, LoanStatus};
    use rust_decimal_macros::dec;
    use serde::de::DeserializeOwned;
    use tower::ServiceExt;

    async fn app(treasury: Decimal) -> Router {
        let state = ServiceState::bootstrap(BankOpsConfig {
            treasury_opening_balance: treasury,
            operators: vec![("officer-1".to_string(), "service-secret".to_string())],
            ..BankOpsConfig::default()
        })
        .await
        .unwrap();
        build_router(state)
    }

    async fn call<T: DeserializeOwned>(
        app: &Router,
        method: &str,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, T) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(value) => Body::from(value.to_string()),
                None => Body::empty(),
            })
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    async fn credential(app: &Router) -> serde_json::Value {
        let (status, credential): (_, serde_json::Value) = call(
            app,
            "POST",
            "/v1/operators/officer-1/credentials",
            Some(serde_json::json!({ "secret": "service-secret" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        credential
    }

    #[tokio::test]
    async fn loan_lifecycle_over_http() {
        let app = app(dec!(10000)).await;

        let (status, account): (_, bankops_core::Account) = call(
            &app,
            "POST",
            "/v1/accounts",
            Some(serde_json::json!({ "user_id": "user-1", "account_type": "checking" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, created): (_, CreateLoanResponse) = call(
            &app,
            "POST",
            "/v1/loans",
            Some(serde_json::json!({
                "user_id": "user-1",
                "account_id": account.id,
                "loan_type": "auto",
                "principal": "1200",
                "interest_rate": "0",
                "term_months": 12
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let loan_id = created.loan_id.unwrap();

        let credential = credential(&app).await;
        let (status, approved): (_, LoanActionResponse) = call(
            &app,
            "POST",
            &format!("/v1/loans/{loan_id}/approve"),
            Some(credential),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(approved.status, Some(LoanStatus::Approved));

        let (status, _): (_, LoanActionResponse) =
            call(&app, "POST", &format!("/v1/loans/{loan_id}/disburse"), None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, again): (_, LoanActionResponse) =
            call(&app, "POST", &format!("/v1/loans/{loan_id}/disburse"), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(again.error.unwrap().kind, ErrorKind::InvalidTransition);

        let (status, payment): (_, PaymentResponse) = call(
            &app,
            "POST",
            &format!("/v1/loans/{loan_id}/payments"),
            Some(serde_json::json!({ "amount": "100", "note": "first" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(payment.new_balance, Some(dec!(1100)));

        let (status, payment): (_, PaymentResponse) = call(
            &app,
            "POST",
            &format!("/v1/loans/{loan_id}/payments"),
            Some(serde_json::json!({ "amount": "5000" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(payment.error.unwrap().kind, ErrorKind::ExceedsBalance);

        let (status, treasury): (_, serde_json::Value) =
            call(&app, "GET", "/v1/treasury", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(treasury["balance"], serde_json::json!("8800"));

        let (status, history): (_, Vec<LoanPayment>) =
            call(&app, "GET", &format!("/v1/loans/{loan_id}/payments"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn approval_without_valid_token_is_unauthorized() {
        let app = app(dec!(10000)).await;
        let loan = |account_id: &str| {
            serde_json::json!({
                "user_id": "user-1",
                "account_id": account_id,
                "loan_type": "personal",
                "principal": "500",
                "interest_rate": "10",
                "term_months": 6
            })
        };

        let (status, created): (_, CreateLoanResponse) =
            call(&app, "POST", "/v1/loans", Some(loan("acct-unknown"))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(created.loan_id.is_none());

        let (_, account): (_, bankops_core::Account) = call(
            &app,
            "POST",
            "/v1/accounts",
            Some(serde_json::json!({ "user_id": "user-1", "account_type": "checking" })),
        )
        .await;
        let (_, created): (_, CreateLoanResponse) =
            call(&app, "POST", "/v1/loans", Some(loan(account.id.as_str()))).await;
        let loan_id = created.loan_id.unwrap();

        let (status, response): (_, LoanActionResponse) = call(
            &app,
            "POST",
            &format!("/v1/loans/{loan_id}/approve"),
            Some(serde_json::json!({ "operator_id": "officer-1", "token": "bogus" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(response.status, Some(LoanStatus::Pending));

        let (status, _): (_, serde_json::Value) = call(
            &app,
            "POST",
            "/v1/operators/officer-1/credentials",
            Some(serde_json::json!({ "secret": "wrong" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, audit): (_, serde_json::Value) = call(
            &app,
            "GET",
            &format!("/v1/audit/entries?subject_id={loan_id}&kind=refusal"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(audit["returned"], serde_json::json!(1));
        assert_eq!(audit["chain_valid"], serde_json::json!(true));
    }

    #[tokio::test]
    async fn account_activation_is_deposit_gated() {
        let app = app(dec!(0)).await;
        let (_, account): (_, bankops_core::Account) = call(
            &app,
            "POST",
            "/v1/accounts",
            Some(serde_json::json!({
                "user_id": "user-9",
                "account_type": "savings",
                "min_deposit": "500"
            })),
        )
        .await;
        assert_eq!(account.status, AccountStatus::PendingFunding);

        let (status, response): (_, AccountActionResponse) = call(
            &app,
            "POST",
            &format!("/v1/accounts/{}/activate", account.id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(response.error.unwrap().kind, ErrorKind::DepositNotMet);

        let (status, deposit): (_, DepositRecord) = call(
            &app,
            "POST",
            "/v1/deposits",
            Some(serde_json::json!({
                "parent_id": account.id,
                "amount": "500",
                "status": "pending"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, _): (_, DepositRecord) = call(
            &app,
            "POST",
            &format!("/v1/deposits/{}/review", deposit.id),
            Some(serde_json::json!({ "status": "approved" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, response): (_, AccountActionResponse) = call(
            &app,
            "POST",
            &format!("/v1/accounts/{}/activate", account.id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(response.status, Some(AccountStatus::Active));
    }

    #[tokio::test]
    async fn invalid_filters_are_bad_requests() {
        let app = app(dec!(0)).await;
        let (status, _): (_, serde_json::Value) =
            call(&app, "GET", "/v1/audit/entries?kind=bogus", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body): (_, serde_json::Value) =
            call(&app, "GET", "/v1/loans/missing", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["kind"], serde_json::json!("not_found"));
    }
}
