//! In-memory operation repository.

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use mpesa_types::{OperationRepository, OperationStatus, PendingOperation, RepoError};
use tracing::debug;

/// Operations keyed by originator id, plus a conversation id index.
///
/// Lock order is always `operations` then `conversations`; no guard on
/// `conversations` is held while touching `operations`.
#[derive(Debug, Default)]
pub struct InMemoryRepo {
    operations: DashMap<String, PendingOperation>,
    conversations: DashMap<String, String>,
}

impl InMemoryRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Binds `conversation_id` to `originator`. Rebinding to the same
    /// originator is a no-op.
    fn bind_conversation(&self, conversation_id: &str, originator: &str) -> Result<(), RepoError> {
        match self.conversations.entry(conversation_id.to_string()) {
            Entry::Occupied(existing) if existing.get() != originator => {
                Err(RepoError::Conflict(format!(
                    "conversation id {} is bound to {}",
                    conversation_id,
                    existing.get()
                )))
            }
            Entry::Occupied(_) => Ok(()),
            Entry::Vacant(slot) => {
                slot.insert(originator.to_string());
                Ok(())
            }
        }
    }
}

#[async_trait]
impl OperationRepository for InMemoryRepo {
    async fn insert(&self, op: PendingOperation) -> Result<PendingOperation, RepoError> {
        match self.operations.entry(op.originator_conversation_id.clone()) {
            Entry::Occupied(_) => Err(RepoError::Conflict(format!(
                "operation {} already exists",
                op.originator_conversation_id
            ))),
            Entry::Vacant(slot) => {
                if let Some(conversation_id) = &op.conversation_id {
                    self.bind_conversation(conversation_id, &op.originator_conversation_id)?;
                }
                debug!(originator = %op.originator_conversation_id, kind = %op.kind, "Operation stored");
                slot.insert(op.clone());
                Ok(op)
            }
        }
    }

    async fn update(&self, op: PendingOperation) -> Result<PendingOperation, RepoError> {
        let mut current = self
            .operations
            .get_mut(&op.originator_conversation_id)
            .ok_or(RepoError::NotFound)?;

        if let Some(conversation_id) = &op.conversation_id {
            if let Some(bound) = &current.conversation_id {
                if bound != conversation_id {
                    return Err(RepoError::Conflict(format!(
                        "operation {} already carries conversation id {}",
                        op.originator_conversation_id, bound
                    )));
                }
            }
            self.bind_conversation(conversation_id, &op.originator_conversation_id)?;
        }

        *current = op.clone();
        Ok(op)
    }

    async fn find_by_originator(
        &self,
        originator_conversation_id: &str,
    ) -> Result<Option<PendingOperation>, RepoError> {
        Ok(self
            .operations
            .get(originator_conversation_id)
            .map(|op| op.value().clone()))
    }

    async fn find_by_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Option<PendingOperation>, RepoError> {
        let originator = match self.conversations.get(conversation_id) {
            Some(entry) => entry.value().clone(),
            None => return Ok(None),
        };
        self.find_by_originator(&originator).await
    }

    async fn list(
        &self,
        status: Option<OperationStatus>,
    ) -> Result<Vec<PendingOperation>, RepoError> {
        let mut ops: Vec<PendingOperation> = self
            .operations
            .iter()
            .filter(|entry| status.is_none_or(|s| entry.status == s))
            .map(|entry| entry.value().clone())
            .collect();
        ops.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.originator_conversation_id.cmp(&b.originator_conversation_id))
        });
        Ok(ops)
    }
}
