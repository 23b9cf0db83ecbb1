//! # M-Pesa Hex
//!
//! Application layer and HTTP adapter for the gateway integration.
//!
//! ## Architecture
//!
//! - `correlator` - Transaction state machine keyed by conversation ids
//! - `service` - Application service (dispatch, callbacks, queries)
//! - `sweeper` - Background worker timing out stale operations
//! - `inbound/` - HTTP adapter (Axum server)
//!
//! Everything is generic over `R: OperationRepository`, allowing different
//! repository implementations to be injected.

pub mod correlator;
pub mod inbound;
pub mod service;
pub mod sweeper;

#[cfg(test)]
mod service_tests;

pub use correlator::{CallbackPayload, Correlator, Transition};
pub use service::{MpesaService, ServiceSettings};
pub use sweeper::StaleSweeper;
