//! Provider error code table.
//!
//! Every code the gateway can surface is declared once in the
//! `define_error_codes!` invocation below, together with its category,
//! retriable flag, message and description. Adding a code is a one-line change:
//!
//! ```ignore
//! define_error_codes! {
//!     // ... existing codes ...
//!     NewCode => ("123", Server, false, "Message", "Description"),
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Broad grouping of errors, used to pick an HTTP status and a handling policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    /// Credentials, tokens, initiator permissions
    Auth,
    /// Malformed or unacceptable request
    Client,
    /// Provider-side or transport failure
    Server,
    /// Throttling and quota violations (transient)
    RateLimit,
    /// Provider overload and maintenance (transient)
    System,
    /// Request field validation
    Request,
    Balance,
    B2b,
    B2c,
    C2b,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auth => "AUTH",
            Self::Client => "CLIENT",
            Self::Server => "SERVER",
            Self::RateLimit => "RATE_LIMIT",
            Self::System => "SYSTEM",
            Self::Request => "REQUEST",
            Self::Balance => "BALANCE",
            Self::B2b => "B2B",
            Self::B2c => "B2C",
            Self::C2b => "C2B",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

macro_rules! define_error_codes {
    (
        $(
            $(#[$meta:meta])*
            $name:ident => ($code:literal, $category:ident, $retriable:literal, $message:literal, $description:literal),
        )*
    ) => {
        /// Closed set of error codes known to the gateway.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
        pub enum ErrorCode {
            $( $(#[$meta])* $name, )*
        }

        impl ErrorCode {
            /// Every declared code, in table order.
            pub const ALL: &'static [ErrorCode] = &[ $( ErrorCode::$name, )* ];

            /// The stable code string, as sent by the provider.
            pub fn code(&self) -> &'static str {
                match self { $( ErrorCode::$name => $code, )* }
            }

            pub fn category(&self) -> ErrorCategory {
                match self { $( ErrorCode::$name => ErrorCategory::$category, )* }
            }

            /// True only for codes signalling transient overload.
            pub fn is_retriable(&self) -> bool {
                match self { $( ErrorCode::$name => $retriable, )* }
            }

            pub fn message(&self) -> &'static str {
                match self { $( ErrorCode::$name => $message, )* }
            }

            pub fn description(&self) -> &'static str {
                match self { $( ErrorCode::$name => $description, )* }
            }

            /// Looks up a code string. Returns `None` for codes not in the table.
            pub fn from_code(code: &str) -> Option<ErrorCode> {
                match code.trim() {
                    $( $code => Some(ErrorCode::$name), )*
                    _ => None,
                }
            }
        }
    };
}

define_error_codes! {
    // Server/API infrastructure
    InternalServerError => ("500.003.1001", Server, false, "Internal Server Error", "Server failure"),
    QuotaViolation => ("500.003.03", RateLimit, true, "Error Occurred: Quota Violation", "Multiple requests violating M-PESA transaction per second speed"),
    SpikeArrest => ("500.003.02", RateLimit, true, "Error Occurred: Spike Arrest Violation", "Endpoints constantly generate lot of errors that lead to spike that affects M-PESA performance"),

    // Authentication & authorization
    InvalidAccessToken => ("400.003.01", Auth, false, "Invalid Access Token", "Incorrect or expired access token"),
    InvalidAuthHeader => ("404.001.04", Auth, false, "Invalid Authentication Header", "All M-PESA APIs are POST except the Authorization API which is GET"),

    // Request format
    BadRequest => ("400.003.02", Client, false, "Bad Request", "The server cannot process the request because something is missing"),
    InvalidRequestPayload => ("400.002.05", Client, false, "Invalid Request Payload", "Request body is not properly drafted"),
    ResourceNotFound => ("404.003.01", Client, false, "Resource not found", "The requested resource could not be found"),

    // Initiator and transaction
    InitiatorInvalid => ("2001", Auth, false, "The initiator information is invalid", "Invalid initiator credentials"),
    DuplicateDetected => ("15", B2b, false, "Duplicate Detected", "Duplicate originator conversation id"),
    InternalFailure => ("17", B2b, false, "Internal Failure", "Failures not identified more specifically"),
    InitiatorCredentialCheckFailure => ("18", Auth, false, "Initiator Credential Check Failure", "Password check failed for initiator"),
    MessageSequencingFailure => ("19", B2b, false, "Message Sequencing Failure", "Message sequencing has failed"),
    UnresolvedInitiator => ("20", Auth, false, "Unresolved Initiator", "The initiator username cannot be found"),
    InitiatorPermissionFailure => ("21", Auth, false, "Initiator to Primary Party Permission Failure", "Initiator not authorized for primary party"),
    InitiatorReceiverPermissionFailure => ("22", Auth, false, "Initiator to Receiver Party Permission Failure", "Initiator not authorized for receiver party"),
    MissingMandatoryFields => ("24", Request, false, "Missing mandatory fields", "Required parameters are missing"),
    InvalidRequestParameters => ("25", Request, false, "InvalidRequestParameters", "Invalid parameter format or value"),
    TrafficBlocking => ("26", System, true, "Traffic blocking condition in place", "System is too busy"),
    InvalidCommand => ("29", Request, false, "InvalidCommand", "Command specified is not defined"),

    // Transaction processing
    RequestCached => ("100000000", System, true, "Request was cached, waiting for resending", "Request is in cache"),
    SystemOverload => ("100000001", System, true, "The system is overload", "System overload condition"),
    ThrottlingError => ("100000002", RateLimit, true, "Throttling error", "Request throttled"),
    ServerError => ("100000004", Server, true, "Internal Server Error", "Internal server error occurred"),
    InvalidInput => ("100000005", Request, false, "Invalid input value", "Invalid parameter value"),
    ServiceStatusError => ("100000007", System, false, "Service's status is abnormal", "Service status abnormal"),
    ApiStatusError => ("100000009", System, false, "API's status is abnormal", "API status abnormal"),
    InsufficientPermissions => ("100000010", Auth, false, "Insufficient permissions", "Insufficient permissions for operation"),
    RequestRateExceeded => ("100000011", RateLimit, true, "Exceed the limitation of request rate", "Request rate limit exceeded"),

    // Maintenance
    SystemMaintenance => ("00.002.1001", System, true, "Service is currently under maintenance", "System maintenance in progress"),

    // Local codes, raised by this system rather than the provider
    ConnectionError => ("CONNECTION_ERROR", Server, true, "Could not reach M-Pesa", "Connection failed before any response was received"),
    RequestTimeout => ("REQUEST_TIMEOUT", Server, false, "M-Pesa request timed out", "No response within the configured timeout; the outcome is unknown"),
    AuthError => ("AUTH_ERROR", Auth, false, "Authentication with M-Pesa failed", "The credential exchange did not yield a usable token"),
    InvalidResponseFormat => ("INVALID_RESPONSE_FORMAT", Server, false, "Invalid response format", "The provider response could not be decoded"),

    // C2B validation replies
    InvalidMsisdn => ("C2B00011", C2b, false, "Invalid MSISDN", "The paying phone number is not accepted"),
    InvalidAccountNumber => ("C2B00012", C2b, false, "Invalid Account Number", "The bill reference does not match an account"),
    InvalidAmount => ("C2B00013", C2b, false, "Invalid Amount", "The paid amount is not accepted"),
    InvalidKycDetails => ("C2B00014", C2b, false, "Invalid KYC Details", "Customer details failed verification"),
    InvalidShortcode => ("C2B00015", C2b, false, "Invalid Shortcode", "The business short code is not accepted"),
    OtherError => ("C2B00016", C2b, false, "Other Error", "Validation failed for another reason"),
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}
