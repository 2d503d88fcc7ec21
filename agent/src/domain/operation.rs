//! Operation records and the result message produced for each operation.

use chrono::{DateTime, Utc};
use fleet_common::{Message, keys};

use crate::domain::error::PluginError;
use crate::domain::snapshot::Delta;

/// Message type of every operation result sent upstream.
pub const OPERATION_RESULT: &str = "operation-result";

/// `status` values of a result message.
pub mod status {
    pub const SUCCESS: &str = "success";
    pub const FAILURE: &str = "failure";
}

/// Lifecycle of one tracked operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionState {
    Pending,
    Succeeded,
    Failed,
}

/// Bookkeeping for one server-assigned operation id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationRecord {
    pub operation_id: i64,
    pub message_type: String,
    pub submitted_at: DateTime<Utc>,
    pub completion_state: CompletionState,
}

impl OperationRecord {
    #[must_use]
    pub fn pending(operation_id: i64, message_type: impl Into<String>) -> Self {
        Self {
            operation_id,
            message_type: message_type.into(),
            submitted_at: Utc::now(),
            completion_state: CompletionState::Pending,
        }
    }
}

/// Build the result message for an operation.
///
/// A success carries the handler's result text; a failure carries the
/// error, its kind and, when a privileged mutation may have happened anyway,
/// `outcome-unknown`. The delta is attached whenever both snapshots were
/// taken and something changed.
#[must_use]
pub fn result_message(
    operation_id: i64,
    outcome: &Result<String, PluginError>,
    delta: Option<Delta>,
) -> Message {
    let mut message =
        Message::new(OPERATION_RESULT).with(keys::OPERATION_ID, operation_id);
    message = match outcome {
        Ok(text) => message
            .with("status", status::SUCCESS)
            .with("result-text", text.as_str()),
        Err(err) => {
            let mut failed = message
                .with("status", status::FAILURE)
                .with("error", err.to_string())
                .with("error-kind", err.kind());
            if err.outcome_unknown() {
                failed = failed.with("outcome-unknown", true);
            }
            failed
        }
    };
    match delta {
        Some(delta) if !delta.is_empty() => message.with("delta", delta.into_value()),
        _ => message,
    }
}

/// Completion state implied by a result message.
#[must_use]
pub fn completion_state_of(message: &Message) -> CompletionState {
    match message.get("status").and_then(fleet_common::Value::as_str) {
        Some(status::SUCCESS) => CompletionState::Succeeded,
        _ => CompletionState::Failed,
    }
}
