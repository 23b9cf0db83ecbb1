//! Credential exchange port.
//!
//! The token cache depends on this trait rather than on the HTTP client so
//! that refresh behavior can be tested without a network.

use crate::domain::AccessToken;
use crate::error::ClassifiedError;

/// Exchanges consumer credentials for a fresh bearer token.
#[async_trait::async_trait]
pub trait CredentialExchange: Send + Sync + 'static {
    /// Performs one credential exchange. Failures are AUTH-category errors.
    async fn exchange(&self) -> Result<AccessToken, ClassifiedError>;
}
