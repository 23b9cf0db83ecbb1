//! Operation repository port.
//!
//! Storage for pending operations, indexed by originator conversation id and
//! by provider conversation id.

use crate::domain::{OperationStatus, PendingOperation};
use crate::error::RepoError;

/// Persistence port for pending operations.
///
/// Implementations must keep both indexes consistent: a conversation id is
/// bound to at most one originator id, and the binding never changes.
#[async_trait::async_trait]
pub trait OperationRepository: Send + Sync + 'static {
    /// Stores a new operation. `Conflict` if the originator id exists.
    async fn insert(&self, op: PendingOperation) -> Result<PendingOperation, RepoError>;

    /// Replaces an existing operation.
    ///
    /// `NotFound` if absent; `Conflict` if its conversation id is already
    /// bound to another originator id.
    async fn update(&self, op: PendingOperation) -> Result<PendingOperation, RepoError>;

    async fn find_by_originator(
        &self,
        originator_conversation_id: &str,
    ) -> Result<Option<PendingOperation>, RepoError>;

    async fn find_by_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Option<PendingOperation>, RepoError>;

    /// Lists operations, oldest first, optionally filtered by status.
    async fn list(
        &self,
        status: Option<OperationStatus>,
    ) -> Result<Vec<PendingOperation>, RepoError>;
}
