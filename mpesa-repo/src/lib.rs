//! # M-Pesa Repository
//!
//! Repository adapters implementing the `OperationRepository` port.
//!
//! Operations live only as long as the process: the in-memory adapter keeps
//! one map keyed by originator conversation id and a second index from
//! provider conversation id to originator id.

pub mod memory;


pub use memory::InMemoryRepo;

/// Builds the repository used by the application.
pub fn build_repo() -> InMemoryRepo {
    InMemoryRepo::new()
}
