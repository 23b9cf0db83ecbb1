//! Domain models for the gateway.

pub mod balance;
pub mod callback;
pub mod operation;
pub mod token;

pub use balance::{AccountBalance, AccountType};
pub use callback::{CallbackEnvelope, CallbackResult, ResultParameter, ResultParameters};
pub use operation::{
    InvalidTransition, OperationKind, OperationStatus, PendingOperation, SUCCESS_RESULT_CODE,
};
pub use token::{AccessToken, DEFAULT_EXPIRES_IN_SECS};
