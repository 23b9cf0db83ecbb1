//! M-Pesa Application Service
//!
//! Orchestrates outbound operations (validate, record, authenticate, call,
//! correlate) and turns inbound provider notifications into correlator
//! transitions.

use std::sync::Arc;

use chrono::Duration;
use mpesa_client::{Endpoint, GatewayClient, TokenCache};
use mpesa_types::{
    Acknowledgement, AppError, B2CPaymentRequest, B2CRequest, BalanceQueryRequest, BalanceRequest,
    C2BPaymentNotification, C2BRegisterRequest, C2BRegisterUrlRequest, CallbackEnvelope,
    CallbackResult, ClassifiedError, CorrelationError, ErrorCode, OperationKind,
    OperationRepository, OperationStatus, PendingOperation, ResultReply,
};
use serde::Serialize;
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::correlator::{CallbackPayload, Correlator, Transition};
use crate::inbound::paths;

/// B2C command identifiers accepted by the provider.
pub const B2C_COMMANDS: [&str; 3] = ["SalaryPayment", "BusinessPayment", "PromotionPayment"];

/// C2B response types: what the provider does when validation is unreachable.
pub const C2B_RESPONSE_TYPES: [&str; 2] = ["Completed", "Cancelled"];

/// Identifier type of an organization short code.
const SHORTCODE_IDENTIFIER: &str = "4";

/// Organization credentials and public callback location.
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub initiator_name: String,
    /// Encrypted initiator password
    pub security_credential: String,
    pub shortcode: String,
    /// Public base URL the provider posts results to
    pub callback_base_url: String,
}

impl ServiceSettings {
    fn callback_url(&self, path: &str) -> String {
        format!("{}{}", self.callback_base_url.trim_end_matches('/'), path)
    }
}

/// Application service for gateway operations.
///
/// Generic over `R: OperationRepository`; the gateway client and token cache
/// are shared with whoever else needs them.
pub struct MpesaService<R: OperationRepository> {
    correlator: Correlator<R>,
    gateway: Arc<GatewayClient>,
    tokens: Arc<TokenCache>,
    settings: ServiceSettings,
}

impl<R: OperationRepository> MpesaService<R> {
    pub fn new(
        repo: R,
        gateway: Arc<GatewayClient>,
        tokens: Arc<TokenCache>,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            correlator: Correlator::new(repo),
            gateway,
            tokens,
            settings,
        }
    }

    pub fn correlator(&self) -> &Correlator<R> {
        &self.correlator
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Outbound operations
    // ─────────────────────────────────────────────────────────────────────────────

    /// Requests the organization's account balance. The balances arrive later
    /// on the result callback.
    #[tracing::instrument(skip(self, req))]
    pub async fn query_balance(
        &self,
        req: BalanceQueryRequest,
    ) -> Result<PendingOperation, AppError> {
        let originator_id = Uuid::new_v4().to_string();
        let body = BalanceRequest {
            originator_conversation_id: originator_id.clone(),
            initiator: self.settings.initiator_name.clone(),
            security_credential: self.settings.security_credential.clone(),
            command_id: "AccountBalance".into(),
            party_a: non_blank(req.party_a).unwrap_or_else(|| self.settings.shortcode.clone()),
            identifier_type: non_blank(req.identifier_type)
                .unwrap_or_else(|| SHORTCODE_IDENTIFIER.into()),
            remarks: non_blank(req.remarks).unwrap_or_else(|| "Account balance query".into()),
            queue_time_out_url: self.settings.callback_url(paths::BALANCE_TIMEOUT),
            result_url: self.settings.callback_url(paths::BALANCE_RESULT),
        };

        self.dispatch(
            OperationKind::BalanceQuery,
            Endpoint::AccountBalance,
            &originator_id,
            &body,
        )
        .await
    }

    /// Sends money from the organization to a customer.
    #[tracing::instrument(skip(self, req), fields(command = %req.command_id))]
    pub async fn pay_b2c(&self, req: B2CPaymentRequest) -> Result<PendingOperation, AppError> {
        validate_b2c(&req)?;

        let originator_id = Uuid::new_v4().to_string();
        let body = B2CRequest {
            originator_conversation_id: originator_id.clone(),
            initiator_name: self.settings.initiator_name.clone(),
            security_credential: self.settings.security_credential.clone(),
            command_id: req.command_id,
            amount: req.amount.trim().to_string(),
            party_a: self.settings.shortcode.clone(),
            party_b: req.party_b,
            remarks: non_blank(req.remarks).unwrap_or_else(|| "B2C payment".into()),
            queue_time_out_url: self.settings.callback_url(paths::B2C_TIMEOUT),
            result_url: self.settings.callback_url(paths::B2C_CALLBACK),
            occasion: req.occasion.unwrap_or_default(),
        };

        self.dispatch(
            OperationKind::B2cPayment,
            Endpoint::B2cPayment,
            &originator_id,
            &body,
        )
        .await
    }

    /// Registers the C2B confirmation and validation URLs. The provider
    /// answers synchronously; no callback follows.
    #[tracing::instrument(skip(self, req))]
    pub async fn register_c2b_urls(
        &self,
        req: C2BRegisterRequest,
    ) -> Result<PendingOperation, AppError> {
        let response_type = non_blank(req.response_type).unwrap_or_else(|| "Completed".into());
        if !C2B_RESPONSE_TYPES.contains(&response_type.as_str()) {
            return Err(rejected(
                ErrorCode::InvalidRequestParameters,
                format!("ResponseType must be one of {:?}", C2B_RESPONSE_TYPES),
            ));
        }

        let originator_id = Uuid::new_v4().to_string();
        let body = C2BRegisterUrlRequest {
            short_code: non_blank(req.short_code).unwrap_or_else(|| self.settings.shortcode.clone()),
            response_type,
            confirmation_url: non_blank(req.confirmation_url)
                .unwrap_or_else(|| self.settings.callback_url(paths::C2B_CONFIRMATION)),
            validation_url: non_blank(req.validation_url)
                .unwrap_or_else(|| self.settings.callback_url(paths::C2B_VALIDATION)),
        };

        self.dispatch(
            OperationKind::C2bRegistration,
            Endpoint::C2bRegisterUrl,
            &originator_id,
            &body,
        )
        .await
    }

    async fn dispatch<B: Serialize>(
        &self,
        kind: OperationKind,
        endpoint: Endpoint,
        originator_id: &str,
        body: &B,
    ) -> Result<PendingOperation, AppError> {
        self.correlator
            .begin(kind, originator_id, Some(redacted_json(body)))
            .await?;

        let token = match self.tokens.get_token().await {
            Ok(token) => token,
            Err(err) => return Err(self.abandon(originator_id, err).await),
        };

        match self
            .gateway
            .call_raw::<_, Acknowledgement>(endpoint, body, &token)
            .await
        {
            Ok((ack, raw)) => self.record_acknowledgement(kind, originator_id, ack, raw).await,
            Err(err) if outcome_unknown(&err) => {
                warn!(
                    originator = originator_id,
                    code = err.stable_code(),
                    "Provider may have accepted the request; operation left INITIATED"
                );
                Err(AppError::Gateway(err))
            }
            Err(err) => {
                if err.code == ErrorCode::InvalidAccessToken {
                    self.tokens.invalidate().await;
                }
                Err(self.abandon(originator_id, err).await)
            }
        }
    }

    async fn record_acknowledgement(
        &self,
        kind: OperationKind,
        originator_id: &str,
        ack: Acknowledgement,
        raw: String,
    ) -> Result<PendingOperation, AppError> {
        if !ack.is_accepted() || kind == OperationKind::C2bRegistration {
            let op = self
                .correlator
                .settle(
                    originator_id,
                    ack.response_code.trim(),
                    &ack.response_description,
                    Some(raw),
                )
                .await?
                .into_operation();
            info!(status = %op.status, code = %ack.response_code, "Request answered synchronously");
            return Ok(op);
        }

        match ack.conversation_id.as_deref().map(str::trim) {
            Some(conversation_id) if !conversation_id.is_empty() => {
                match self
                    .correlator
                    .acknowledge(originator_id, conversation_id, Some(raw))
                    .await
                {
                    Ok(op) => Ok(op),
                    Err(CorrelationError::NotFound(reason)) => {
                        self.already_correlated(originator_id, conversation_id)
                            .await?
                            .ok_or_else(|| CorrelationError::NotFound(reason).into())
                    }
                    Err(e) => Err(e.into()),
                }
            }
            _ => {
                let err = ClassifiedError::new(ErrorCode::InvalidResponseFormat, originator_id)
                    .with_cause("acknowledgement carried no ConversationID");
                Err(self.abandon(originator_id, err).await)
            }
        }
    }

    /// The record as a callback already left it, when that callback beat the
    /// acknowledgement and carried the same conversation id.
    async fn already_correlated(
        &self,
        originator_id: &str,
        conversation_id: &str,
    ) -> Result<Option<PendingOperation>, AppError> {
        let current = self.correlator.get(originator_id).await?.filter(|op| {
            op.status != OperationStatus::Initiated
                && op.conversation_id.as_deref() == Some(conversation_id)
        });
        if let Some(op) = &current {
            info!(status = %op.status, "Acknowledgement arrived after the result");
        }
        Ok(current)
    }

    /// Fails an `INITIATED` record after a dispatch error and hands the error
    /// back for the caller.
    async fn abandon(&self, originator_id: &str, err: ClassifiedError) -> AppError {
        error!(
            originator = originator_id,
            code = err.stable_code(),
            category = %err.category,
            retriable = err.retriable,
            "Dispatch failed"
        );
        if let Err(e) = self
            .correlator
            .settle(originator_id, err.stable_code(), &err.message, None)
            .await
        {
            warn!(originator = originator_id, error = %e, "Could not record dispatch failure");
        }
        AppError::Gateway(err)
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Inbound notifications
    // ─────────────────────────────────────────────────────────────────────────────

    /// Applies a result callback.
    ///
    /// A callback that beats the acknowledgement (record still `INITIATED`) is
    /// recovered through its `OriginatorConversationID`.
    #[tracing::instrument(skip(self, envelope, raw), fields(conversation_id))]
    pub async fn handle_result(
        &self,
        kind: OperationKind,
        envelope: CallbackEnvelope,
        raw: Option<String>,
    ) -> Result<Transition, AppError> {
        let result = envelope.result;
        let conversation_id = conversation_id_of(&result)?;
        tracing::Span::current().record("conversation_id", conversation_id.as_str());

        let payload = CallbackPayload {
            data: extract_payload(kind, &result),
            transaction_id: result.transaction_id.clone().filter(|t| !t.trim().is_empty()),
            raw,
        };

        match self
            .correlator
            .apply_callback(
                &conversation_id,
                &result.result_code,
                &result.result_desc,
                payload.clone(),
            )
            .await
        {
            Err(CorrelationError::NotFound(_)) => {
                self.recover_unacknowledged(&result, &conversation_id)
                    .await?;
                Ok(self
                    .correlator
                    .apply_callback(
                        &conversation_id,
                        &result.result_code,
                        &result.result_desc,
                        payload,
                    )
                    .await?)
            }
            other => Ok(other?),
        }
    }

    async fn recover_unacknowledged(
        &self,
        result: &CallbackResult,
        conversation_id: &str,
    ) -> Result<(), AppError> {
        let Some(originator_id) = result.originator_conversation_id.as_deref() else {
            return Err(AppError::NotFound(format!("Operation {}", conversation_id)));
        };
        match self.correlator.get(originator_id).await? {
            Some(op) if op.status == OperationStatus::Initiated => {
                info!(originator = originator_id, "Callback arrived before acknowledgement");
                self.correlator
                    .acknowledge(originator_id, conversation_id, None)
                    .await?;
                Ok(())
            }
            _ => Err(AppError::NotFound(format!("Operation {}", conversation_id))),
        }
    }

    /// Applies a queue-timeout notification, recovering an unacknowledged
    /// record the same way [`handle_result`](Self::handle_result) does.
    #[tracing::instrument(skip(self, envelope, raw))]
    pub async fn handle_timeout(
        &self,
        envelope: CallbackEnvelope,
        raw: Option<String>,
    ) -> Result<Transition, AppError> {
        let result = envelope.result;
        let conversation_id = conversation_id_of(&result)?;
        match self
            .correlator
            .apply_timeout(&conversation_id, raw.clone())
            .await
        {
            Err(CorrelationError::NotFound(_)) => {
                self.recover_unacknowledged(&result, &conversation_id)
                    .await?;
                Ok(self.correlator.apply_timeout(&conversation_id, raw).await?)
            }
            other => Ok(other?),
        }
    }

    /// Decides whether the provider may accept a customer payment.
    #[tracing::instrument(skip(self, notification), fields(trans_id = %notification.trans_id))]
    pub fn validate_c2b(&self, notification: &C2BPaymentNotification) -> ResultReply {
        let bill_ref = notification.bill_ref_number.as_deref().unwrap_or_default();
        if bill_ref.trim().is_empty() {
            warn!("C2B payment rejected: missing account number");
            return ResultReply::rejected(ErrorCode::InvalidAccountNumber);
        }
        info!(
            amount = notification.trans_amount.as_deref().unwrap_or(""),
            bill_ref, "C2B payment accepted"
        );
        ResultReply::accepted()
    }

    /// Acknowledges a completed customer payment.
    #[tracing::instrument(skip(self, notification), fields(trans_id = %notification.trans_id))]
    pub fn confirm_c2b(&self, notification: &C2BPaymentNotification) -> ResultReply {
        info!(
            amount = notification.trans_amount.as_deref().unwrap_or(""),
            bill_ref = notification.bill_ref_number.as_deref().unwrap_or(""),
            msisdn = notification.msisdn.as_deref().unwrap_or(""),
            "C2B payment confirmed"
        );
        ResultReply::success()
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Queries & maintenance
    // ─────────────────────────────────────────────────────────────────────────────

    pub async fn get_operation(&self, originator_id: &str) -> Result<PendingOperation, AppError> {
        self.correlator
            .get(originator_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Operation {}", originator_id)))
    }

    pub async fn list_operations(
        &self,
        status: Option<OperationStatus>,
    ) -> Result<Vec<PendingOperation>, AppError> {
        Ok(self.correlator.list(status).await?)
    }

    /// Times out pending operations older than `threshold`.
    pub async fn sweep_stale(
        &self,
        threshold: Duration,
    ) -> Result<Vec<PendingOperation>, AppError> {
        Ok(self.correlator.sweep_stale(threshold).await?)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn rejected(code: ErrorCode, cause: impl Into<String>) -> AppError {
    AppError::Gateway(ClassifiedError::new(code, Uuid::new_v4().to_string()).with_cause(cause))
}

/// Transport failures where the request may still have reached the provider.
fn outcome_unknown(err: &ClassifiedError) -> bool {
    matches!(
        err.code,
        ErrorCode::RequestTimeout | ErrorCode::ConnectionError
    )
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// `2547XXXXXXXX` or `2541XXXXXXXX`.
fn is_valid_msisdn(msisdn: &str) -> bool {
    let bytes = msisdn.as_bytes();
    bytes.len() == 12
        && msisdn.starts_with("254")
        && matches!(bytes[3], b'7' | b'1')
        && bytes.iter().all(u8::is_ascii_digit)
}

fn validate_b2c(req: &B2CPaymentRequest) -> Result<(), AppError> {
    if !B2C_COMMANDS.contains(&req.command_id.as_str()) {
        return Err(rejected(
            ErrorCode::InvalidCommand,
            format!("CommandID must be one of {:?}", B2C_COMMANDS),
        ));
    }
    if !is_valid_msisdn(req.party_b.trim()) {
        return Err(rejected(
            ErrorCode::InvalidRequestParameters,
            "PartyB must be a phone number in 2547XXXXXXXX format",
        ));
    }
    match req.amount.trim().parse::<f64>() {
        Ok(amount) if amount.is_finite() && amount > 0.0 => Ok(()),
        _ => Err(rejected(
            ErrorCode::InvalidInput,
            "Amount must be greater than zero",
        )),
    }
}

fn conversation_id_of(result: &CallbackResult) -> Result<String, AppError> {
    result
        .conversation_id
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .ok_or_else(|| AppError::BadRequest("Notification carried no ConversationID".into()))
}

fn extract_payload(kind: OperationKind, result: &CallbackResult) -> Option<serde_json::Value> {
    if result.parameters().is_empty() {
        return None;
    }
    match kind {
        OperationKind::BalanceQuery => Some(json!({
            "balances": result.account_balances(),
            "parameters": result.parameters_json(),
        })),
        OperationKind::B2cPayment | OperationKind::C2bRegistration => {
            Some(result.parameters_json())
        }
    }
}

/// Request JSON for audit, with the security credential masked.
fn redacted_json<B: Serialize>(body: &B) -> String {
    let mut value = serde_json::to_value(body).unwrap_or_default();
    if let Some(credential) = value.get_mut("SecurityCredential") {
        *credential = json!("***");
    }
    value.to_string()
}
