//! Transaction Correlator
//!
//! Tracks every outbound call that expects an asynchronous result and moves
//! it through its lifecycle:
//!
//! ```text
//! INITIATED --acknowledge--> PENDING --callback "0"--> COMPLETED
//!     |                         |----callback other--> FAILED
//!     |                         `----timeout/sweep---> TIMEOUT
//!     |--settle--> COMPLETED | FAILED
//!     `--sweep---> TIMEOUT
//! ```
//!
//! A record stays `INITIATED` when the provider call failed without telling
//! us whether the request was accepted; a later callback can still recover
//! it, and otherwise the sweep retires it.
//!
//! Mutations of one record are serialized by a per-originator async lock and
//! always re-read the record under that lock. Different records never
//! contend.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use mpesa_types::{
    CorrelationError, OperationKind, OperationRepository, OperationStatus, PendingOperation,
    RepoError,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Outcome of a state-changing request.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// The record changed state.
    Applied(PendingOperation),
    /// The record was already terminal and is returned unchanged.
    Ignored(PendingOperation),
}

impl Transition {
    pub fn operation(&self) -> &PendingOperation {
        match self {
            Self::Applied(op) | Self::Ignored(op) => op,
        }
    }

    pub fn into_operation(self) -> PendingOperation {
        match self {
            Self::Applied(op) | Self::Ignored(op) => op,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }
}

/// Data carried by a result callback besides its code and description.
#[derive(Debug, Clone, Default)]
pub struct CallbackPayload {
    /// Extracted result data (balances, result parameters)
    pub data: Option<serde_json::Value>,
    pub transaction_id: Option<String>,
    /// Raw notification body, kept for audit
    pub raw: Option<String>,
}

/// Correlates provider callbacks with pending operations.
pub struct Correlator<R: OperationRepository> {
    repo: R,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl<R: OperationRepository> Correlator<R> {
    pub fn new(repo: R) -> Self {
        Self {
            repo,
            locks: DashMap::new(),
        }
    }

    pub fn repo(&self) -> &R {
        &self.repo
    }

    fn lock_for(&self, originator_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(originator_id.to_string())
            .or_default()
            .value()
            .clone()
    }

    /// Lock for a record that is known to exist. Unknown ids never get a
    /// lock entry.
    async fn lock_existing(&self, originator_id: &str) -> Result<Arc<Mutex<()>>, CorrelationError> {
        self.load(originator_id).await?;
        Ok(self.lock_for(originator_id))
    }

    #[cfg(test)]
    pub(crate) fn tracked_locks(&self) -> usize {
        self.locks.len()
    }

    /// Terminal records never change again, so their lock can go.
    fn release(&self, op: &PendingOperation) {
        if op.is_terminal() {
            self.locks.remove(&op.originator_conversation_id);
        }
    }

    async fn load(&self, originator_id: &str) -> Result<PendingOperation, CorrelationError> {
        self.repo
            .find_by_originator(originator_id)
            .await?
            .ok_or_else(|| CorrelationError::NotFound(originator_id.to_string()))
    }

    async fn save(&self, op: PendingOperation) -> Result<PendingOperation, CorrelationError> {
        match self.repo.update(op).await {
            Ok(saved) => Ok(saved),
            Err(RepoError::NotFound) => Err(CorrelationError::NotFound(
                "operation disappeared during update".into(),
            )),
            Err(e) => Err(e.into()),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Dispatch-time transitions
    // ─────────────────────────────────────────────────────────────────────────────

    /// Records a new operation in `INITIATED` state.
    #[tracing::instrument(skip(self, kind, raw_request), fields(kind = %kind))]
    pub async fn begin(
        &self,
        kind: OperationKind,
        originator_id: &str,
        raw_request: Option<String>,
    ) -> Result<PendingOperation, CorrelationError> {
        let op = PendingOperation::new(kind, originator_id, raw_request);
        match self.repo.insert(op).await {
            Ok(op) => {
                debug!("Operation initiated");
                Ok(op)
            }
            Err(RepoError::Conflict(_)) => Err(CorrelationError::Duplicate(originator_id.into())),
            Err(e) => Err(e.into()),
        }
    }

    /// Binds the provider's conversation id and moves the record to `PENDING`.
    #[tracing::instrument(skip(self, raw_response))]
    pub async fn acknowledge(
        &self,
        originator_id: &str,
        conversation_id: &str,
        raw_response: Option<String>,
    ) -> Result<PendingOperation, CorrelationError> {
        let lock = self.lock_existing(originator_id).await?;
        let _guard = lock.lock().await;

        let mut op = self.load(originator_id).await?;
        if op.status != OperationStatus::Initiated {
            self.release(&op);
            return Err(CorrelationError::NotFound(format!(
                "{} is {}, not INITIATED",
                originator_id, op.status
            )));
        }

        if let Some(existing) = self.repo.find_by_conversation(conversation_id).await? {
            if existing.originator_conversation_id != originator_id {
                return Err(CorrelationError::Conflict {
                    conversation_id: conversation_id.into(),
                    existing: existing.originator_conversation_id,
                });
            }
        }

        op.acknowledge(conversation_id, raw_response, Utc::now())
            .map_err(|e| CorrelationError::NotFound(e.to_string()))?;

        match self.repo.update(op).await {
            Ok(op) => {
                info!("Operation acknowledged");
                Ok(op)
            }
            Err(RepoError::Conflict(_)) => {
                let existing = self
                    .repo
                    .find_by_conversation(conversation_id)
                    .await?
                    .map(|o| o.originator_conversation_id)
                    .unwrap_or_default();
                Err(CorrelationError::Conflict {
                    conversation_id: conversation_id.into(),
                    existing,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Terminates an `INITIATED` record without a callback: the provider
    /// answered synchronously, or the request never got through.
    #[tracing::instrument(skip(self, result_desc, raw_response))]
    pub async fn settle(
        &self,
        originator_id: &str,
        result_code: &str,
        result_desc: &str,
        raw_response: Option<String>,
    ) -> Result<Transition, CorrelationError> {
        let lock = self.lock_existing(originator_id).await?;
        let _guard = lock.lock().await;

        let mut op = self.load(originator_id).await?;
        if op.status != OperationStatus::Initiated {
            warn!(status = %op.status, "Settle ignored; operation already dispatched");
            self.release(&op);
            return Ok(Transition::Ignored(op));
        }

        op.settle(result_code, result_desc, raw_response, Utc::now())
            .map_err(|e| CorrelationError::NotFound(e.to_string()))?;
        let op = self.save(op).await?;
        info!(status = %op.status, "Operation settled");
        self.release(&op);
        Ok(Transition::Applied(op))
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Callback transitions
    // ─────────────────────────────────────────────────────────────────────────────

    /// Resolves a conversation id to its originator id.
    async fn resolve(&self, conversation_id: &str) -> Result<String, CorrelationError> {
        match self.repo.find_by_conversation(conversation_id).await? {
            Some(op) => Ok(op.originator_conversation_id),
            None => {
                warn!(conversation_id, "Orphan notification; no matching operation");
                Err(CorrelationError::NotFound(conversation_id.to_string()))
            }
        }
    }

    /// Applies a result callback to a `PENDING` record.
    ///
    /// Result code `"0"` completes it; anything else fails it. A terminal
    /// record is returned unchanged.
    #[tracing::instrument(skip(self, result_desc, payload))]
    pub async fn apply_callback(
        &self,
        conversation_id: &str,
        result_code: &str,
        result_desc: &str,
        payload: CallbackPayload,
    ) -> Result<Transition, CorrelationError> {
        let originator_id = self.resolve(conversation_id).await?;
        let lock = self.lock_for(&originator_id);
        let _guard = lock.lock().await;

        let mut op = self.load(&originator_id).await?;
        match op.status {
            OperationStatus::Initiated => {
                warn!(originator = %originator_id, "Callback for an unacknowledged operation");
                Err(CorrelationError::NotFound(conversation_id.to_string()))
            }
            status if status.is_terminal() => {
                info!(status = %status, "Late callback ignored");
                self.release(&op);
                Ok(Transition::Ignored(op))
            }
            _ => {
                op.apply_result(result_code, result_desc, payload.data, Utc::now())
                    .map_err(|e| CorrelationError::NotFound(e.to_string()))?;
                op.transaction_id = payload.transaction_id;
                op.raw_callback = payload.raw;
                let op = self.save(op).await?;
                info!(status = %op.status, originator = %op.originator_conversation_id, "Callback applied");
                self.release(&op);
                Ok(Transition::Applied(op))
            }
        }
    }

    /// Applies a provider timeout notification to a `PENDING` record.
    #[tracing::instrument(skip(self, raw))]
    pub async fn apply_timeout(
        &self,
        conversation_id: &str,
        raw: Option<String>,
    ) -> Result<Transition, CorrelationError> {
        let originator_id = self.resolve(conversation_id).await?;
        let lock = self.lock_for(&originator_id);
        let _guard = lock.lock().await;

        let mut op = self.load(&originator_id).await?;
        match op.status {
            OperationStatus::Initiated => {
                warn!(originator = %originator_id, "Timeout for an unacknowledged operation");
                Err(CorrelationError::NotFound(conversation_id.to_string()))
            }
            status if status.is_terminal() => {
                info!(status = %status, "Late timeout ignored");
                self.release(&op);
                Ok(Transition::Ignored(op))
            }
            _ => {
                op.time_out("Provider reported a queue timeout", Utc::now())
                    .map_err(|e| CorrelationError::NotFound(e.to_string()))?;
                op.raw_callback = raw;
                let op = self.save(op).await?;
                warn!(originator = %op.originator_conversation_id, "Operation timed out");
                self.release(&op);
                Ok(Transition::Applied(op))
            }
        }
    }

    /// Times out non-terminal records older than `threshold`.
    pub async fn sweep_stale(
        &self,
        threshold: Duration,
    ) -> Result<Vec<PendingOperation>, CorrelationError> {
        self.sweep_stale_at(threshold, Utc::now()).await
    }

    /// [`sweep_stale`](Self::sweep_stale) against an explicit clock reading.
    #[tracing::instrument(skip(self), fields(threshold_secs = threshold.num_seconds()))]
    pub async fn sweep_stale_at(
        &self,
        threshold: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<PendingOperation>, CorrelationError> {
        let candidates = self.repo.list(None).await?;
        let mut swept = Vec::new();

        for candidate in candidates {
            if !candidate.is_stale(threshold, now) {
                continue;
            }
            let lock = self.lock_for(&candidate.originator_conversation_id);
            let _guard = lock.lock().await;

            // A callback may have landed since the listing.
            let mut op = self.load(&candidate.originator_conversation_id).await?;
            if !op.is_stale(threshold, now) {
                self.release(&op);
                continue;
            }
            let desc = format!(
                "No result received within {} minutes",
                threshold.num_minutes()
            );
            if op.time_out(desc, now).is_err() {
                continue;
            }
            let op = self.save(op).await?;
            warn!(
                originator = %op.originator_conversation_id,
                conversation_id = op.conversation_id.as_deref().unwrap_or(""),
                kind = %op.kind,
                "Stale operation timed out"
            );
            self.release(&op);
            swept.push(op);
        }

        Ok(swept)
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────────

    pub async fn get(
        &self,
        originator_id: &str,
    ) -> Result<Option<PendingOperation>, CorrelationError> {
        Ok(self.repo.find_by_originator(originator_id).await?)
    }

    pub async fn find_by_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Option<PendingOperation>, CorrelationError> {
        Ok(self.repo.find_by_conversation(conversation_id).await?)
    }

    pub async fn list(
        &self,
        status: Option<OperationStatus>,
    ) -> Result<Vec<PendingOperation>, CorrelationError> {
        Ok(self.repo.list(status).await?)
    }
}
