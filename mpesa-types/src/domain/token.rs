//! Bearer access token.

use chrono::{DateTime, Duration, Utc};

/// Token lifetime assumed when the provider sends a non-numeric `expires_in`.
pub const DEFAULT_EXPIRES_IN_SECS: i64 = 3599;

/// An opaque bearer token with its expiry instant.
///
/// The token value is never printed by `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    value: String,
    expires_at: DateTime<Utc>,
}

impl AccessToken {
    /// Creates a token that expires `expires_in_secs` after `issued_at`.
    ///
    /// A lifetime too large to represent falls back to
    /// [`DEFAULT_EXPIRES_IN_SECS`].
    pub fn new(value: impl Into<String>, expires_in_secs: i64, issued_at: DateTime<Utc>) -> Self {
        let default_expiry = || issued_at + Duration::seconds(DEFAULT_EXPIRES_IN_SECS);
        let expires_at = Duration::try_seconds(expires_in_secs.max(0))
            .and_then(|lifetime| issued_at.checked_add_signed(lifetime))
            .unwrap_or_else(default_expiry);
        Self {
            value: value.into(),
            expires_at,
        }
    }

    /// Returns the bearer value.
    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// True iff `now + margin < expiry`.
    pub fn is_fresh(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        now + margin < self.expires_at
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("value", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
