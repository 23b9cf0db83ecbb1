//! # M-Pesa Client
//!
//! Outbound adapter for the provider's REST API.
//!
//! - [`GatewayClient`] performs exactly one attempt per call and turns every
//!   failure into a [`ClassifiedError`].
//! - [`TokenCache`] keeps one shared bearer token and refreshes it under a
//!   single-flight lock.

mod token;

pub use token::{DEFAULT_TOKEN_MARGIN_SECS, TokenCache};

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use mpesa_types::{
    AccessToken, AuthResponse, ClassifiedError, CredentialExchange, ErrorCode, Failure, classify,
};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, error, info};
use uuid::Uuid;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Provider endpoints reachable through [`GatewayClient::call`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    AccountBalance,
    B2cPayment,
    C2bRegisterUrl,
}

impl AsRef<str> for Endpoint {
    fn as_ref(&self) -> &str {
        match self {
            Self::AccountBalance => "account_balance",
            Self::B2cPayment => "b2c_payment",
            Self::C2bRegisterUrl => "c2b_register_url",
        }
    }
}

/// Connection settings for the provider.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    pub consumer_key: String,
    pub consumer_secret: String,
    pub auth_path: String,
    pub balance_path: String,
    pub b2c_path: String,
    pub c2b_register_path: String,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

impl GatewayConfig {
    /// Settings for `base_url` with the provider's standard endpoint paths.
    pub fn with_base_url(
        base_url: impl Into<String>,
        consumer_key: impl Into<String>,
        consumer_secret: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            consumer_key: consumer_key.into(),
            consumer_secret: consumer_secret.into(),
            auth_path: "/oauth/v1/generate".into(),
            balance_path: "/mpesa/accountbalance/v1/query".into(),
            b2c_path: "/mpesa/b2c/v3/paymentrequest".into(),
            c2b_register_path: "/mpesa/c2b/v1/registerurl".into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    pub fn with_timeouts(mut self, connect: Duration, read: Duration) -> Self {
        self.connect_timeout = connect;
        self.read_timeout = read;
        self
    }

    fn endpoint_url(&self, endpoint: Endpoint) -> String {
        let path = match endpoint {
            Endpoint::AccountBalance => &self.balance_path,
            Endpoint::B2cPayment => &self.b2c_path,
            Endpoint::C2bRegisterUrl => &self.c2b_register_path,
        };
        format!("{}{}", self.base_url, path)
    }

    fn auth_url(&self) -> String {
        format!(
            "{}{}?grant_type=client_credentials",
            self.base_url, self.auth_path
        )
    }
}

/// HTTP client for the provider API.
///
/// Never retries. Each call gets a fresh request id that is logged and carried
/// on errors but never sent to the provider.
#[derive(Clone)]
pub struct GatewayClient {
    config: GatewayConfig,
    http: Client,
}

impl GatewayClient {
    /// Creates a client with the configured connect and read timeouts.
    pub fn new(config: GatewayConfig) -> Result<Self, reqwest::Error> {
        let http = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.read_timeout)
            .build()?;
        Ok(Self { config, http })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Exchanges the consumer key and secret for a bearer token.
    ///
    /// HTTP 401 becomes `INVALID_ACCESS_TOKEN`. Any other failure becomes
    /// `AUTH_ERROR` wrapping the classified cause.
    #[tracing::instrument(skip(self), fields(request_id))]
    pub async fn authenticate(&self) -> Result<AccessToken, ClassifiedError> {
        let request_id = Uuid::new_v4().to_string();
        tracing::Span::current().record("request_id", request_id.as_str());

        let resp = self
            .http
            .get(self.config.auth_url())
            .basic_auth(&self.config.consumer_key, Some(&self.config.consumer_secret))
            .send()
            .await
            .map_err(|e| auth_error(&transport_failure(&e), &request_id))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| auth_error(&transport_failure(&e), &request_id))?;

        if status == StatusCode::UNAUTHORIZED {
            let err = ClassifiedError::new(ErrorCode::InvalidAccessToken, &request_id)
                .with_cause("consumer credentials rejected (HTTP 401)");
            log_failure(&err, "oauth");
            return Err(err);
        }
        if !status.is_success() {
            return Err(auth_error(
                &Failure::Status {
                    status: status.as_u16(),
                    body,
                },
                &request_id,
            ));
        }
        if is_empty_body(&body) {
            return Err(auth_error(
                &Failure::EmptyBody {
                    status: status.as_u16(),
                },
                &request_id,
            ));
        }

        let parsed: AuthResponse = serde_json::from_str(&body).map_err(|e| {
            auth_error(
                &Failure::Decode {
                    detail: e.to_string(),
                },
                &request_id,
            )
        })?;

        let Some(value) = parsed.token() else {
            let err = ClassifiedError::new(ErrorCode::AuthError, &request_id)
                .with_cause("token response carried no access_token");
            log_failure(&err, "oauth");
            return Err(err);
        };

        let token = AccessToken::new(value, parsed.expires_in_secs(), Utc::now());
        info!(expires_at = %token.expires_at(), "Access token issued");
        Ok(token)
    }

    /// Sends one authenticated POST and decodes the response body.
    pub async fn call<B, T>(
        &self,
        endpoint: Endpoint,
        body: &B,
        access_token: &str,
    ) -> Result<T, ClassifiedError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.call_raw(endpoint, body, access_token)
            .await
            .map(|(value, _)| value)
    }

    /// Like [`call`](Self::call), also returning the raw response text.
    #[tracing::instrument(skip(self, body, access_token), fields(endpoint = endpoint.as_ref(), request_id))]
    pub async fn call_raw<B, T>(
        &self,
        endpoint: Endpoint,
        body: &B,
        access_token: &str,
    ) -> Result<(T, String), ClassifiedError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let request_id = Uuid::new_v4().to_string();
        tracing::Span::current().record("request_id", request_id.as_str());
        let url = self.config.endpoint_url(endpoint);

        let resp = self
            .http
            .post(&url)
            .bearer_auth(access_token)
            .json(body)
            .send()
            .await
            .map_err(|e| failed(&transport_failure(&e), &request_id, endpoint))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| failed(&transport_failure(&e), &request_id, endpoint))?;
        debug!(status = status.as_u16(), body = %text, "Provider response");

        if !status.is_success() {
            return Err(failed(
                &Failure::Status {
                    status: status.as_u16(),
                    body: text,
                },
                &request_id,
                endpoint,
            ));
        }
        if is_empty_body(&text) {
            return Err(failed(
                &Failure::EmptyBody {
                    status: status.as_u16(),
                },
                &request_id,
                endpoint,
            ));
        }

        let value = serde_json::from_str(&text).map_err(|e| {
            failed(
                &Failure::Decode {
                    detail: e.to_string(),
                },
                &request_id,
                endpoint,
            )
        })?;
        Ok((value, text))
    }
}

#[async_trait]
impl CredentialExchange for GatewayClient {
    async fn exchange(&self) -> Result<AccessToken, ClassifiedError> {
        self.authenticate().await
    }
}

fn transport_failure(err: &reqwest::Error) -> Failure {
    Failure::Transport {
        timed_out: err.is_timeout(),
        detail: err.to_string(),
    }
}

fn is_empty_body(body: &str) -> bool {
    let trimmed = body.trim();
    trimmed.is_empty() || trimmed == "null"
}

fn failed(failure: &Failure, request_id: &str, endpoint: Endpoint) -> ClassifiedError {
    let err = classify(failure, request_id);
    log_failure(&err, endpoint.as_ref());
    err
}

fn auth_error(failure: &Failure, request_id: &str) -> ClassifiedError {
    let err = ClassifiedError::auth_failure(classify(failure, request_id));
    log_failure(&err, "oauth");
    err
}

fn log_failure(err: &ClassifiedError, endpoint: &str) {
    error!(
        endpoint,
        code = err.stable_code(),
        category = %err.category,
        retriable = err.retriable,
        request_id = %err.request_id,
        cause = err.cause.as_deref().unwrap_or(""),
        "Provider call failed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_paths() {
        let config = GatewayConfig::with_base_url("https://sandbox.example.com/", "k", "s");
        assert_eq!(config.base_url, "https://sandbox.example.com");
        assert_eq!(
            config.endpoint_url(Endpoint::B2cPayment),
            "https://sandbox.example.com/mpesa/b2c/v3/paymentrequest"
        );
        assert_eq!(
            config.auth_url(),
            "https://sandbox.example.com/oauth/v1/generate?grant_type=client_credentials"
        );
    }

    #[test]
    fn test_null_counts_as_empty() {
        assert!(is_empty_body(""));
        assert!(is_empty_body("  null \n"));
        assert!(!is_empty_body("{}"));
    }
}
