//! Data Transfer Objects (DTOs) for the provider wire format and the
//! operator API.

use serde::{Deserialize, Serialize};

use crate::domain::DEFAULT_EXPIRES_IN_SECS;

// ─────────────────────────────────────────────────────────────────────────────
// Credential exchange
// ─────────────────────────────────────────────────────────────────────────────

/// Response of `GET /oauth/v1/generate?grant_type=client_credentials`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthResponse {
    #[serde(default)]
    pub access_token: Option<String>,
    /// String-encoded seconds, e.g. `"3599"`.
    #[serde(default)]
    pub expires_in: Option<serde_json::Value>,
}

impl AuthResponse {
    /// Token lifetime in seconds. Anything non-numeric falls back to 3599.
    pub fn expires_in_secs(&self) -> i64 {
        match &self.expires_in {
            Some(serde_json::Value::String(s)) => {
                s.trim().parse().unwrap_or(DEFAULT_EXPIRES_IN_SECS)
            }
            Some(serde_json::Value::Number(n)) => n.as_i64().unwrap_or(DEFAULT_EXPIRES_IN_SECS),
            _ => DEFAULT_EXPIRES_IN_SECS,
        }
    }

    /// The token, if present and non-blank.
    pub fn token(&self) -> Option<&str> {
        self.access_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Provider error envelope
// ─────────────────────────────────────────────────────────────────────────────

/// Body of a 4xx provider response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderErrorEnvelope {
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl ProviderErrorEnvelope {
    /// Human-readable summary of the provider's message and request id.
    pub fn describe(&self) -> Option<String> {
        match (&self.error_message, &self.request_id) {
            (Some(msg), Some(id)) => Some(format!("{} (provider request {})", msg, id)),
            (Some(msg), None) => Some(msg.clone()),
            (None, Some(id)) => Some(format!("provider request {}", id)),
            (None, None) => None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Provider request bodies
// ─────────────────────────────────────────────────────────────────────────────

/// `POST /mpesa/accountbalance/v1/query`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BalanceRequest {
    #[serde(rename = "OriginatorConversationID")]
    pub originator_conversation_id: String,
    pub initiator: String,
    pub security_credential: String,
    /// Always `AccountBalance`
    #[serde(rename = "CommandID")]
    pub command_id: String,
    pub party_a: String,
    pub identifier_type: String,
    pub remarks: String,
    #[serde(rename = "QueueTimeOutURL")]
    pub queue_time_out_url: String,
    #[serde(rename = "ResultURL")]
    pub result_url: String,
}

/// `POST /mpesa/b2c/v3/paymentrequest`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct B2CRequest {
    #[serde(rename = "OriginatorConversationID")]
    pub originator_conversation_id: String,
    pub initiator_name: String,
    pub security_credential: String,
    /// SalaryPayment, BusinessPayment, PromotionPayment
    #[serde(rename = "CommandID")]
    pub command_id: String,
    pub amount: String,
    pub party_a: String,
    /// Recipient phone number
    pub party_b: String,
    pub remarks: String,
    #[serde(rename = "QueueTimeOutURL")]
    pub queue_time_out_url: String,
    #[serde(rename = "ResultURL")]
    pub result_url: String,
    #[serde(rename = "Occassion")]
    pub occasion: String,
}

/// `POST /mpesa/c2b/v1/registerurl`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct C2BRegisterUrlRequest {
    pub short_code: String,
    /// `Completed` or `Cancelled`
    pub response_type: String,
    #[serde(rename = "ConfirmationURL")]
    pub confirmation_url: String,
    #[serde(rename = "ValidationURL")]
    pub validation_url: String,
}

/// Synchronous acknowledgement of an accepted request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Acknowledgement {
    #[serde(rename = "ConversationID", default)]
    pub conversation_id: Option<String>,
    #[serde(
        rename = "OriginatorConversationID",
        alias = "OriginatorCoversationID",
        default
    )]
    pub originator_conversation_id: Option<String>,
    #[serde(default)]
    pub response_code: String,
    #[serde(default)]
    pub response_description: String,
}

impl Acknowledgement {
    pub fn is_accepted(&self) -> bool {
        self.response_code.trim() == crate::domain::SUCCESS_RESULT_CODE
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// C2B notifications
// ─────────────────────────────────────────────────────────────────────────────

/// Validation/confirmation request posted by the provider for a C2B payment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct C2BPaymentNotification {
    #[serde(default)]
    pub transaction_type: Option<String>,
    #[serde(rename = "TransID")]
    pub trans_id: String,
    #[serde(default)]
    pub trans_time: Option<String>,
    #[serde(default)]
    pub trans_amount: Option<String>,
    #[serde(default)]
    pub business_short_code: Option<String>,
    #[serde(default)]
    pub bill_ref_number: Option<String>,
    #[serde(default)]
    pub invoice_number: Option<String>,
    #[serde(default)]
    pub org_account_balance: Option<String>,
    #[serde(rename = "ThirdPartyTransID", default)]
    pub third_party_trans_id: Option<String>,
    #[serde(rename = "MSISDN", default)]
    pub msisdn: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub middle_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
}

/// `{ResultCode, ResultDesc}` reply sent back to the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResultReply {
    pub result_code: String,
    pub result_desc: String,
}

impl ResultReply {
    pub fn accepted() -> Self {
        Self {
            result_code: "0".into(),
            result_desc: "Accepted".into(),
        }
    }

    pub fn success() -> Self {
        Self {
            result_code: "0".into(),
            result_desc: "Success".into(),
        }
    }

    pub fn rejected(code: crate::error::ErrorCode) -> Self {
        Self {
            result_code: code.code().into(),
            result_desc: code.message().into(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Operator API
// ─────────────────────────────────────────────────────────────────────────────

/// Request to query the organization's account balance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BalanceQueryRequest {
    /// Short code to query; defaults to the configured one
    #[serde(default)]
    pub party_a: Option<String>,
    /// `4` for an organization short code
    #[serde(default)]
    pub identifier_type: Option<String>,
    #[serde(default)]
    pub remarks: Option<String>,
}

/// Request to send money to a customer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct B2CPaymentRequest {
    /// SalaryPayment, BusinessPayment or PromotionPayment
    pub command_id: String,
    /// Amount as sent to the provider, e.g. `"1500"`
    pub amount: String,
    /// Recipient MSISDN in `2547XXXXXXXX` form
    pub party_b: String,
    #[serde(default)]
    pub remarks: Option<String>,
    #[serde(default)]
    pub occasion: Option<String>,
}

/// Request to register C2B confirmation/validation URLs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct C2BRegisterRequest {
    #[serde(default)]
    pub short_code: Option<String>,
    /// `Completed` or `Cancelled`; defaults to `Completed`
    #[serde(default)]
    pub response_type: Option<String>,
    #[serde(default)]
    pub confirmation_url: Option<String>,
    #[serde(default)]
    pub validation_url: Option<String>,
}
