//! # M-Pesa Types
//!
//! Domain types and port traits for the M-Pesa gateway integration.
//! This crate has ZERO external IO dependencies - only data structures,
//! the provider error taxonomy, and trait definitions.
//!
//! ## Architecture
//!
//! This crate represents the **innermost core** of the hexagonal architecture:
//! - `domain/` - Pure domain types (PendingOperation, AccessToken, AccountBalance)
//! - `ports/` - Trait definitions that adapters must implement
//! - `dto/` - Provider wire shapes and API request bodies
//! - `error/` - Error taxonomy and the pure failure classifier

pub mod domain;
pub mod dto;
pub mod error;
pub mod ports;

// Re-export commonly used types
pub use domain::{
    AccessToken, AccountBalance, AccountType, CallbackEnvelope, CallbackResult, OperationKind,
    OperationStatus, PendingOperation, ResultParameter, SUCCESS_RESULT_CODE,
};
pub use dto::*;
pub use error::{
    AppError, ClassifiedError, CorrelationError, ErrorCategory, ErrorCode, Failure, RepoError,
    classify,
};
pub use ports::{CredentialExchange, OperationRepository};
