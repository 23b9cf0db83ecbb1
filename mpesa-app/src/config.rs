//! Configuration loading from environment.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;

const DEFAULT_BASE_URL: &str = "https://sandbox.safaricom.co.ke";

/// Application configuration.
pub struct Config {
    pub port: u16,
    pub base_url: String,
    pub consumer_key: String,
    pub consumer_secret: String,
    pub initiator_name: String,
    pub security_credential: String,
    pub shortcode: String,
    /// Public URL of this service; result callbacks are sent here
    pub callback_base_url: String,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub token_margin: chrono::Duration,
    pub stale_after: Duration,
    pub sweep_interval: Duration,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            port: parsed("PORT", 3000)?,
            base_url: env::var("MPESA_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
            consumer_key: required("MPESA_CONSUMER_KEY")?,
            consumer_secret: required("MPESA_CONSUMER_SECRET")?,
            initiator_name: required("MPESA_INITIATOR_NAME")?,
            security_credential: required("MPESA_SECURITY_CREDENTIAL")?,
            shortcode: required("MPESA_SHORTCODE")?,
            callback_base_url: required("MPESA_CALLBACK_BASE_URL")?,
            connect_timeout: Duration::from_secs(parsed("MPESA_CONNECT_TIMEOUT_SECS", 10)?),
            read_timeout: Duration::from_secs(parsed("MPESA_READ_TIMEOUT_SECS", 30)?),
            token_margin: chrono::Duration::try_seconds(parsed("MPESA_TOKEN_MARGIN_SECS", 60)?)
                .context("MPESA_TOKEN_MARGIN_SECS out of range")?,
            stale_after: Duration::from_secs(parsed("MPESA_STALE_AFTER_SECS", 1800)?),
            sweep_interval: Duration::from_secs(parsed("MPESA_SWEEP_INTERVAL_SECS", 60)?),
        })
    }
}

fn required(name: &str) -> anyhow::Result<String> {
    env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| anyhow::anyhow!("{} environment variable is required", name))
}

fn parsed<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .with_context(|| format!("{} must be a number, got {:?}", name, value)),
        Err(_) => Ok(default),
    }
}
