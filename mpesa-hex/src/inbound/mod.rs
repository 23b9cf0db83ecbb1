//! HTTP Inbound Adapter
//!
//! Axum-based HTTP server receiving provider notifications and operator
//! requests.

mod handlers;
mod server;

pub use handlers::{ApiError, AppState};
pub use server::HttpServer;

/// Route paths. Callback URLs sent to the provider are built from these.
pub mod paths {
    pub const HEALTH: &str = "/health";

    pub const BALANCE_QUERY: &str = "/api/v1/mpesa/balance/query";
    pub const BALANCE_RESULT: &str = "/api/v1/mpesa/balance/result";
    pub const BALANCE_TIMEOUT: &str = "/api/v1/mpesa/balance/timeout";

    pub const B2C_PAYMENT: &str = "/api/v1/mpesa/b2c/payment";
    pub const B2C_CALLBACK: &str = "/api/v1/mpesa/b2c/callback";
    pub const B2C_TIMEOUT: &str = "/api/v1/mpesa/b2c/timeout";

    pub const C2B_REGISTER_URLS: &str = "/api/v1/mpesa/c2b/register-urls";
    pub const C2B_VALIDATION: &str = "/api/v1/mpesa/c2b/validation";
    pub const C2B_CONFIRMATION: &str = "/api/v1/mpesa/c2b/confirmation";

    pub const OPERATIONS: &str = "/api/v1/mpesa/operations";
    pub const OPERATION: &str = "/api/v1/mpesa/operations/{originator_id}";
    pub const OPERATIONS_SWEEP: &str = "/api/v1/mpesa/operations/sweep";
}
