//! Shared bearer token with single-flight refresh.

use std::sync::Arc;

use chrono::{Duration, Utc};
use mpesa_types::{AccessToken, ClassifiedError, CredentialExchange, ErrorCode};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Default safety margin before expiry, in seconds.
pub const DEFAULT_TOKEN_MARGIN_SECS: i64 = 60;

/// Caches one access token for all callers.
///
/// Reads take the fast path while the token is fresh. A refresh happens under
/// `refresh_lock`; callers that queued behind an in-flight refresh re-check
/// the slot and reuse its result instead of exchanging again.
pub struct TokenCache {
    exchange: Arc<dyn CredentialExchange>,
    current: RwLock<Option<AccessToken>>,
    refresh_lock: Mutex<()>,
    margin: Duration,
}

impl TokenCache {
    pub fn new(exchange: Arc<dyn CredentialExchange>) -> Self {
        Self::with_margin(exchange, Duration::seconds(DEFAULT_TOKEN_MARGIN_SECS))
    }

    pub fn with_margin(exchange: Arc<dyn CredentialExchange>, margin: Duration) -> Self {
        Self {
            exchange,
            current: RwLock::new(None),
            refresh_lock: Mutex::new(()),
            margin,
        }
    }

    /// Returns a token valid for at least the safety margin.
    ///
    /// On failure nothing is cached and the error is AUTH-category.
    pub async fn get_token(&self) -> Result<String, ClassifiedError> {
        if let Some(value) = self.fresh_value().await {
            return Ok(value);
        }

        let _guard = self.refresh_lock.lock().await;
        if let Some(value) = self.fresh_value().await {
            debug!("Token refreshed by a concurrent caller");
            return Ok(value);
        }

        let token = self
            .exchange
            .exchange()
            .await
            .map_err(ClassifiedError::auth_failure)?;

        if !token.is_fresh(Utc::now(), self.margin) {
            warn!(expires_at = %token.expires_at(), "Issued token expires inside the safety margin");
            return Err(
                ClassifiedError::new(ErrorCode::AuthError, uuid::Uuid::new_v4().to_string())
                    .with_cause("issued token expires inside the safety margin"),
            );
        }

        let value = token.value().to_string();
        info!(expires_at = %token.expires_at(), "Access token cached");
        *self.current.write().await = Some(token);
        Ok(value)
    }

    /// Drops the cached token so the next caller refreshes.
    pub async fn invalidate(&self) {
        if self.current.write().await.take().is_some() {
            info!("Access token invalidated");
        }
    }

    async fn fresh_value(&self) -> Option<String> {
        self.current
            .read()
            .await
            .as_ref()
            .filter(|t| t.is_fresh(Utc::now(), self.margin))
            .map(|t| t.value().to_string())
    }
}
