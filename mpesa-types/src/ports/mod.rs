//! Port traits (interfaces for adapters).
//!
//! These are the contracts that adapters must implement.
//! The hexagon depends on these traits, not concrete implementations.

mod credentials;
mod repository;

pub use credentials::CredentialExchange;
pub use repository::OperationRepository;
