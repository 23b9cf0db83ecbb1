//! HTTP request handlers.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::Duration;
use serde::Deserialize;

use mpesa_types::{
    AppError, B2CPaymentRequest, BalanceQueryRequest, C2BPaymentNotification, C2BRegisterRequest,
    CallbackEnvelope, ErrorCategory, ErrorCode, OperationKind, OperationRepository, OperationStatus,
    PendingOperation, ResultReply,
};

use crate::MpesaService;
use crate::correlator::Transition;

/// Application state shared across handlers.
pub struct AppState<R: OperationRepository> {
    pub service: Arc<MpesaService<R>>,
    /// Default age for the manual sweep endpoint
    pub stale_after: Duration,
}

/// Wrapper to implement IntoResponse for AppError (orphan rule workaround).
#[derive(Debug)]
pub struct ApiError(pub AppError);

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        ApiError(err)
    }
}

fn category_status(category: ErrorCategory) -> StatusCode {
    match category {
        ErrorCategory::Auth => StatusCode::UNAUTHORIZED,
        ErrorCategory::Server => StatusCode::BAD_GATEWAY,
        ErrorCategory::RateLimit | ErrorCategory::System => StatusCode::SERVICE_UNAVAILABLE,
        ErrorCategory::Client
        | ErrorCategory::Request
        | ErrorCategory::Balance
        | ErrorCategory::B2b
        | ErrorCategory::B2c
        | ErrorCategory::C2b => StatusCode::BAD_REQUEST,
    }
}

fn plain_error(status: StatusCode, code: &str, message: &str) -> (StatusCode, serde_json::Value) {
    (
        status,
        serde_json::json!({
            "error": message,
            "code": code,
            "category": null,
            "retriable": false,
            "request_id": null,
        }),
    )
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self.0 {
            AppError::Gateway(err) => (
                category_status(err.category),
                serde_json::json!({
                    "error": err.cause.clone().unwrap_or_else(|| err.message.clone()),
                    "code": err.stable_code(),
                    "category": err.category,
                    "retriable": err.retriable,
                    "request_id": err.request_id,
                }),
            ),
            AppError::BadRequest(msg) => plain_error(StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            AppError::NotFound(msg) => plain_error(StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            AppError::Conflict(msg) => plain_error(StatusCode::CONFLICT, "CONFLICT", msg),
            AppError::Internal(msg) => {
                plain_error(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", msg)
            }
        };

        (status, Json(body)).into_response()
    }
}

/// 202 while a result is still expected, 200 once settled.
fn dispatched(op: PendingOperation) -> Response {
    let status = if op.status == OperationStatus::Pending {
        StatusCode::ACCEPTED
    } else {
        StatusCode::OK
    };
    (status, Json(op)).into_response()
}

/// Provider notifications are always acknowledged so they are not redelivered.
fn acknowledge_notification(outcome: Result<Transition, AppError>) -> Json<ResultReply> {
    match outcome {
        Ok(Transition::Applied(op)) => {
            tracing::debug!(originator = %op.originator_conversation_id, status = %op.status, "Notification applied");
        }
        Ok(Transition::Ignored(op)) => {
            tracing::debug!(originator = %op.originator_conversation_id, status = %op.status, "Notification for terminal operation");
        }
        Err(e) => {
            tracing::warn!(error = %e, "Notification not applied");
        }
    }
    Json(ResultReply::accepted())
}

fn parse_envelope(body: &str) -> Result<CallbackEnvelope, ApiError> {
    serde_json::from_str(body).map_err(|e| {
        tracing::warn!(error = %e, "Malformed notification body");
        ApiError(AppError::BadRequest(format!("Malformed notification: {}", e)))
    })
}

/// Health check endpoint.
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "healthy" }))
}

// ─────────────────────────────────────────────────────────────────────────────
// Account balance
// ─────────────────────────────────────────────────────────────────────────────

#[tracing::instrument(skip(state, req))]
pub async fn query_balance<R: OperationRepository>(
    State(state): State<Arc<AppState<R>>>,
    Json(req): Json<BalanceQueryRequest>,
) -> Result<Response, ApiError> {
    let op = state.service.query_balance(req).await?;
    Ok(dispatched(op))
}

#[tracing::instrument(skip(state, body))]
pub async fn balance_result<R: OperationRepository>(
    State(state): State<Arc<AppState<R>>>,
    body: String,
) -> Result<Json<ResultReply>, ApiError> {
    let envelope = parse_envelope(&body)?;
    let outcome = state
        .service
        .handle_result(OperationKind::BalanceQuery, envelope, Some(body))
        .await;
    Ok(acknowledge_notification(outcome))
}

// ─────────────────────────────────────────────────────────────────────────────
// B2C
// ─────────────────────────────────────────────────────────────────────────────

#[tracing::instrument(skip(state, req), fields(command = %req.command_id))]
pub async fn b2c_payment<R: OperationRepository>(
    State(state): State<Arc<AppState<R>>>,
    Json(req): Json<B2CPaymentRequest>,
) -> Result<Response, ApiError> {
    let op = state.service.pay_b2c(req).await?;
    Ok(dispatched(op))
}

#[tracing::instrument(skip(state, body))]
pub async fn b2c_callback<R: OperationRepository>(
    State(state): State<Arc<AppState<R>>>,
    body: String,
) -> Result<Json<ResultReply>, ApiError> {
    let envelope = parse_envelope(&body)?;
    let outcome = state
        .service
        .handle_result(OperationKind::B2cPayment, envelope, Some(body))
        .await;
    Ok(acknowledge_notification(outcome))
}

/// Queue timeout notification; shared by every operation kind.
#[tracing::instrument(skip(state, body))]
pub async fn queue_timeout<R: OperationRepository>(
    State(state): State<Arc<AppState<R>>>,
    body: String,
) -> Result<Json<ResultReply>, ApiError> {
    let envelope = parse_envelope(&body)?;
    let outcome = state.service.handle_timeout(envelope, Some(body)).await;
    Ok(acknowledge_notification(outcome))
}

// ─────────────────────────────────────────────────────────────────────────────
// C2B
// ─────────────────────────────────────────────────────────────────────────────

#[tracing::instrument(skip(state, req))]
pub async fn c2b_register_urls<R: OperationRepository>(
    State(state): State<Arc<AppState<R>>>,
    Json(req): Json<C2BRegisterRequest>,
) -> Result<Response, ApiError> {
    let op = state.service.register_c2b_urls(req).await?;
    Ok(dispatched(op))
}

/// Validation request for a customer payment. Unreadable requests are
/// rejected with `C2B00016` rather than an HTTP error.
pub async fn c2b_validation<R: OperationRepository>(
    State(state): State<Arc<AppState<R>>>,
    body: String,
) -> Json<ResultReply> {
    match serde_json::from_str::<C2BPaymentNotification>(&body) {
        Ok(notification) => Json(state.service.validate_c2b(&notification)),
        Err(e) => {
            tracing::warn!(error = %e, "Unreadable C2B validation request");
            Json(ResultReply::rejected(ErrorCode::OtherError))
        }
    }
}

pub async fn c2b_confirmation<R: OperationRepository>(
    State(state): State<Arc<AppState<R>>>,
    Json(notification): Json<C2BPaymentNotification>,
) -> Json<ResultReply> {
    Json(state.service.confirm_c2b(&notification))
}

// ─────────────────────────────────────────────────────────────────────────────
// Operations
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub status: Option<String>,
}

/// List operations, optionally by status.
#[tracing::instrument(skip(state))]
pub async fn list_operations<R: OperationRepository>(
    State(state): State<Arc<AppState<R>>>,
    Query(params): Query<ListParams>,
) -> Result<impl IntoResponse, ApiError> {
    let status = params
        .status
        .map(|s| s.parse::<OperationStatus>())
        .transpose()
        .map_err(AppError::BadRequest)?;
    let ops = state.service.list_operations(status).await?;
    Ok(Json(ops))
}

/// Get operation by originator conversation id.
#[tracing::instrument(skip(state), fields(originator = %originator_id))]
pub async fn get_operation<R: OperationRepository>(
    State(state): State<Arc<AppState<R>>>,
    Path(originator_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let op = state.service.get_operation(&originator_id).await?;
    Ok(Json(op))
}

#[derive(Debug, Deserialize)]
pub struct SweepParams {
    pub older_than_secs: Option<i64>,
}

/// Time out stale pending operations now.
#[tracing::instrument(skip(state))]
pub async fn sweep_operations<R: OperationRepository>(
    State(state): State<Arc<AppState<R>>>,
    Query(params): Query<SweepParams>,
) -> Result<impl IntoResponse, ApiError> {
    let threshold = match params.older_than_secs {
        Some(secs) => Duration::try_seconds(secs)
            .filter(|d| *d >= Duration::zero())
            .ok_or_else(|| AppError::BadRequest("older_than_secs out of range".into()))?,
        None => state.stale_after,
    };
    let swept = state.service.sweep_stale(threshold).await?;
    Ok(Json(swept))
}
