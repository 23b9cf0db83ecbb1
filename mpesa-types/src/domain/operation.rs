//! Pending operation domain model and its state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result code the provider uses for a successful outcome.
pub const SUCCESS_RESULT_CODE: &str = "0";

/// The kind of outbound gateway call an operation tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationKind {
    #[serde(alias = "BalanceQuery")]
    BalanceQuery,
    #[serde(alias = "B2CPayment")]
    B2cPayment,
    #[serde(alias = "C2BRegistration")]
    C2bRegistration,
}

impl AsRef<str> for OperationKind {
    fn as_ref(&self) -> &str {
        match self {
            Self::BalanceQuery => "BALANCE_QUERY",
            Self::B2cPayment => "B2C_PAYMENT",
            Self::C2bRegistration => "C2B_REGISTRATION",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_ref())
    }
}

impl std::str::FromStr for OperationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('_', "").as_str() {
            "BALANCEQUERY" => Ok(Self::BalanceQuery),
            "B2CPAYMENT" => Ok(Self::B2cPayment),
            "C2BREGISTRATION" => Ok(Self::C2bRegistration),
            _ => Err(format!("Unknown operation kind: {}", s)),
        }
    }
}

/// Lifecycle of a pending operation.
///
/// `Initiated` and `Pending` are the only non-terminal states. `Initiated`
/// can only reach `Timeout` through the stale sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationStatus {
    /// Recorded locally, not yet acknowledged by the provider
    #[default]
    Initiated,
    /// Acknowledged; awaiting callback
    Pending,
    Completed,
    Failed,
    /// No result arrived in time
    Timeout,
}

impl OperationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Timeout)
    }

    /// Forward-only transition table.
    pub fn can_transition_to(&self, next: OperationStatus) -> bool {
        use OperationStatus::*;
        matches!(
            (*self, next),
            (Initiated, Pending)
                | (Initiated, Completed)
                | (Initiated, Failed)
                | (Initiated, Timeout)
                | (Pending, Completed)
                | (Pending, Failed)
                | (Pending, Timeout)
        )
    }
}

impl AsRef<str> for OperationStatus {
    fn as_ref(&self) -> &str {
        match self {
            Self::Initiated => "INITIATED",
            Self::Pending => "PENDING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Timeout => "TIMEOUT",
        }
    }
}

impl std::fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_ref())
    }
}

impl std::str::FromStr for OperationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "INITIATED" => Ok(Self::Initiated),
            "PENDING" => Ok(Self::Pending),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            "TIMEOUT" => Ok(Self::Timeout),
            _ => Err(format!("Unknown operation status: {}", s)),
        }
    }
}

/// Rejected state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Cannot move operation from {from} to {to}")]
pub struct InvalidTransition {
    pub from: OperationStatus,
    pub to: OperationStatus,
}

/// One outbound gateway call that expects an asynchronous result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingOperation {
    pub kind: OperationKind,
    /// Client-generated identifier, unique per operation
    pub originator_conversation_id: String,
    /// Provider-assigned identifier, set on acknowledgement
    pub conversation_id: Option<String>,
    /// Provider transaction reference from the result callback
    pub transaction_id: Option<String>,
    pub status: OperationStatus,
    pub result_code: Option<String>,
    pub result_desc: Option<String>,
    /// Data extracted from the callback (balances, result parameters)
    pub result_payload: Option<serde_json::Value>,
    pub raw_request: Option<String>,
    pub raw_response: Option<String>,
    pub raw_callback: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl PendingOperation {
    /// Creates a new operation in `Initiated` state.
    pub fn new(
        kind: OperationKind,
        originator_conversation_id: impl Into<String>,
        raw_request: Option<String>,
    ) -> Self {
        Self::new_at(kind, originator_conversation_id, raw_request, Utc::now())
    }

    /// Creates a new operation with an explicit creation instant.
    pub fn new_at(
        kind: OperationKind,
        originator_conversation_id: impl Into<String>,
        raw_request: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            kind,
            originator_conversation_id: originator_conversation_id.into(),
            conversation_id: None,
            transaction_id: None,
            status: OperationStatus::Initiated,
            result_code: None,
            result_desc: None,
            result_payload: None,
            raw_request,
            raw_response: None,
            raw_callback: None,
            created_at,
            updated_at: created_at,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// True if the operation has not reached a terminal state and was created
    /// more than `threshold` before `now`.
    ///
    /// Covers `Initiated` records whose dispatch outcome was never learned
    /// (the provider call timed out) as well as `Pending` ones.
    pub fn is_stale(&self, threshold: chrono::Duration, now: DateTime<Utc>) -> bool {
        !self.is_terminal() && self.created_at + threshold < now
    }

    fn transition(
        &mut self,
        to: OperationStatus,
        now: DateTime<Utc>,
    ) -> Result<(), InvalidTransition> {
        if !self.status.can_transition_to(to) {
            return Err(InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.updated_at = now;
        if to.is_terminal() {
            self.completed_at = Some(now);
        }
        Ok(())
    }

    /// `Initiated` -> `Pending` once the provider assigns a conversation id.
    pub fn acknowledge(
        &mut self,
        conversation_id: impl Into<String>,
        raw_response: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), InvalidTransition> {
        self.transition(OperationStatus::Pending, now)?;
        self.conversation_id = Some(conversation_id.into());
        self.raw_response = raw_response;
        Ok(())
    }

    /// `Initiated` -> `Completed`/`Failed` for operations answered at dispatch
    /// time (synchronous replies, rejected requests).
    pub fn settle(
        &mut self,
        result_code: impl Into<String>,
        result_desc: impl Into<String>,
        raw_response: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), InvalidTransition> {
        if self.status != OperationStatus::Initiated {
            return Err(InvalidTransition {
                from: self.status,
                to: OperationStatus::Failed,
            });
        }
        let result_code = result_code.into();
        self.transition(outcome_status(&result_code), now)?;
        self.result_code = Some(result_code);
        self.result_desc = Some(result_desc.into());
        if raw_response.is_some() {
            self.raw_response = raw_response;
        }
        Ok(())
    }

    /// `Pending` -> `Completed`/`Failed` from a result callback.
    pub fn apply_result(
        &mut self,
        result_code: impl Into<String>,
        result_desc: impl Into<String>,
        payload: Option<serde_json::Value>,
        now: DateTime<Utc>,
    ) -> Result<(), InvalidTransition> {
        if self.status != OperationStatus::Pending {
            return Err(InvalidTransition {
                from: self.status,
                to: OperationStatus::Completed,
            });
        }
        let result_code = result_code.into();
        self.transition(outcome_status(&result_code), now)?;
        self.result_code = Some(result_code);
        self.result_desc = Some(result_desc.into());
        self.result_payload = payload;
        Ok(())
    }

    /// `Pending` (or a stale `Initiated`) -> `Timeout`.
    pub fn time_out(
        &mut self,
        result_desc: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), InvalidTransition> {
        self.transition(OperationStatus::Timeout, now)?;
        self.result_desc = Some(result_desc.into());
        Ok(())
    }
}

fn outcome_status(result_code: &str) -> OperationStatus {
    if result_code.trim() == SUCCESS_RESULT_CODE {
        OperationStatus::Completed
    } else {
        OperationStatus::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending() -> PendingOperation {
        let mut op = PendingOperation::new(OperationKind::B2cPayment, "OC-1", None);
        op.acknowledge("CONV-1", None, Utc::now()).unwrap();
        op
    }

    #[test]
    fn test_new_operation_is_initiated() {
        let op = PendingOperation::new(OperationKind::BalanceQuery, "OC-1", Some("{}".into()));
        assert_eq!(op.status, OperationStatus::Initiated);
        assert!(op.conversation_id.is_none());
        assert!(!op.is_terminal());
    }

    #[test]
    fn test_acknowledge_moves_to_pending() {
        let op = pending();
        assert_eq!(op.status, OperationStatus::Pending);
        assert_eq!(op.conversation_id.as_deref(), Some("CONV-1"));
    }

    #[test]
    fn test_success_result_completes() {
        let mut op = pending();
        op.apply_result("0", "Success", None, Utc::now()).unwrap();
        assert_eq!(op.status, OperationStatus::Completed);
        assert!(op.completed_at.is_some());
    }

    #[test]
    fn test_non_zero_result_fails() {
        let mut op = pending();
        op.apply_result("2001", "The initiator information is invalid.", None, Utc::now())
            .unwrap();
        assert_eq!(op.status, OperationStatus::Failed);
        assert_eq!(op.result_code.as_deref(), Some("2001"));
    }

    #[test]
    fn test_terminal_state_rejects_further_transitions() {
        let mut op = pending();
        op.apply_result("0", "Success", None, Utc::now()).unwrap();

        let err = op.time_out("late", Utc::now()).unwrap_err();
        assert_eq!(err.from, OperationStatus::Completed);
        assert!(op.apply_result("1", "again", None, Utc::now()).is_err());
        assert_eq!(op.result_code.as_deref(), Some("0"));
    }

    #[test]
    fn test_unacknowledged_operation_can_time_out() {
        let mut op = PendingOperation::new(OperationKind::B2cPayment, "OC-1", None);
        op.time_out("no ack", Utc::now()).unwrap();
        assert_eq!(op.status, OperationStatus::Timeout);
        assert!(op.completed_at.is_some());
        assert!(op.acknowledge("CONV-1", None, Utc::now()).is_err());
    }

    #[test]
    fn test_settle_only_from_initiated() {
        let mut op = PendingOperation::new(OperationKind::C2bRegistration, "OC-1", None);
        op.settle("0", "Success", None, Utc::now()).unwrap();
        assert_eq!(op.status, OperationStatus::Completed);

        let mut op = pending();
        assert!(op.settle("0", "Success", None, Utc::now()).is_err());
    }

    #[test]
    fn test_is_stale() {
        let created = Utc::now() - chrono::Duration::minutes(40);
        let mut op = PendingOperation::new_at(OperationKind::B2cPayment, "OC-1", None, created);
        assert!(op.is_stale(chrono::Duration::minutes(30), Utc::now()));
        op.acknowledge("CONV-1", None, created).unwrap();
        assert!(op.is_stale(chrono::Duration::minutes(30), Utc::now()));
        assert!(!op.is_stale(chrono::Duration::minutes(45), Utc::now()));

        op.apply_result("0", "Success", None, Utc::now()).unwrap();
        assert!(!op.is_stale(chrono::Duration::minutes(30), Utc::now()));
    }

    #[test]
    fn test_kind_parses_both_spellings() {
        assert_eq!("B2CPayment".parse::<OperationKind>(), Ok(OperationKind::B2cPayment));
        assert_eq!("B2C_PAYMENT".parse::<OperationKind>(), Ok(OperationKind::B2cPayment));
        assert_eq!("balance_query".parse::<OperationKind>(), Ok(OperationKind::BalanceQuery));
        assert!("Refund".parse::<OperationKind>().is_err());
    }
}
