//! Failure classification.
//!
//! [`classify`] is a pure function: it maps the structural shape of a failed
//! provider call onto the [`ErrorCode`] table. It performs no I/O and never
//! retries; the `retriable` flag it sets is only a signal to the caller.

use serde::Serialize;

use super::code::{ErrorCategory, ErrorCode};
use crate::dto::ProviderErrorEnvelope;

/// The structural shape of a failed provider call, as seen by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    /// No response was received (connect failure, socket or read timeout).
    Transport { timed_out: bool, detail: String },
    /// The provider answered with a non-success status.
    Status { status: u16, body: String },
    /// A success status arrived without a body.
    EmptyBody { status: u16 },
    /// A success body that does not decode into the expected shape.
    Decode { detail: String },
}

/// A failure labelled with a stable code, category and retriable flag.
///
/// Carries the originating request identifier for tracing only; it is never
/// sent to the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("{message} [{code}] (category {category}, request {request_id})")]
pub struct ClassifiedError {
    pub code: ErrorCode,
    pub category: ErrorCategory,
    pub retriable: bool,
    pub message: String,
    pub description: String,
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

impl ClassifiedError {
    /// Builds an error from the table entry for `code`.
    pub fn new(code: ErrorCode, request_id: impl Into<String>) -> Self {
        Self {
            code,
            category: code.category(),
            retriable: code.is_retriable(),
            message: code.message().to_string(),
            description: code.description().to_string(),
            request_id: request_id.into(),
            cause: None,
        }
    }

    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    pub fn with_retriable(mut self, retriable: bool) -> Self {
        self.retriable = retriable;
        self
    }

    /// Wraps any failure of the credential exchange as an AUTH error.
    ///
    /// The inner error's retriable flag is kept so that a refused connection
    /// during authentication still reads as transient.
    pub fn auth_failure(inner: ClassifiedError) -> Self {
        if inner.category == ErrorCategory::Auth {
            return inner;
        }
        let request_id = inner.request_id.clone();
        let retriable = inner.retriable;
        ClassifiedError::new(ErrorCode::AuthError, request_id)
            .with_retriable(retriable)
            .with_cause(inner.to_string())
    }

    /// The stable code string (e.g. `"500.003.1001"`).
    pub fn stable_code(&self) -> &'static str {
        self.code.code()
    }
}

/// Classifies a failed call.
pub fn classify(failure: &Failure, request_id: &str) -> ClassifiedError {
    match failure {
        Failure::Transport { timed_out, detail } => {
            let code = if *timed_out {
                ErrorCode::RequestTimeout
            } else {
                ErrorCode::ConnectionError
            };
            ClassifiedError::new(code, request_id).with_cause(detail.clone())
        }
        Failure::Status { status, body } if (400..500).contains(status) => {
            match serde_json::from_str::<ProviderErrorEnvelope>(body) {
                Ok(envelope) => {
                    let code = envelope
                        .error_code
                        .as_deref()
                        .and_then(ErrorCode::from_code)
                        .unwrap_or(ErrorCode::InternalServerError);
                    let error = ClassifiedError::new(code, request_id);
                    match envelope.describe() {
                        Some(cause) => error.with_cause(cause),
                        None => error,
                    }
                }
                Err(_) => ClassifiedError::new(ErrorCode::BadRequest, request_id)
                    .with_cause(format!("HTTP {}: {}", status, truncate(body, 256))),
            }
        }
        Failure::Status { status, body } => {
            ClassifiedError::new(ErrorCode::InternalServerError, request_id)
                .with_cause(format!("HTTP {}: {}", status, truncate(body, 256)))
        }
        Failure::EmptyBody { status } => {
            ClassifiedError::new(ErrorCode::InternalServerError, request_id)
                .with_cause(format!("HTTP {} without a response body", status))
        }
        Failure::Decode { detail } => {
            ClassifiedError::new(ErrorCode::InvalidResponseFormat, request_id)
                .with_cause(detail.clone())
        }
    }
}

fn truncate(body: &str, max: usize) -> &str {
    match body.char_indices().nth(max) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}
