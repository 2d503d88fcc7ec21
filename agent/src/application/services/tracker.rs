//! Operation tracking and the outbound result queue.
//!
//! Each server-assigned operation id gets one record when its message is
//! accepted. The record is completed exactly once with a result message,
//! which is queued for the next exchange. Records are removed once the
//! exchange carrying their result succeeded.

use std::collections::HashMap;

use fleet_common::Message;
use tokio::sync::Mutex;

use crate::domain::DispatchError;
use crate::domain::operation::{CompletionState, OperationRecord, completion_state_of};

#[derive(Default)]
struct TrackerState {
    records: HashMap<i64, OperationRecord>,
    /// Result messages in completion order.
    outbox: Vec<Message>,
}

/// Tracks in-flight operations and queues their results.
#[derive(Default)]
pub struct OperationTracker {
    state: Mutex<TrackerState>,
}

impl OperationTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept an operation.
    ///
    /// # Errors
    ///
    /// [`DispatchError::DuplicateOperation`] while a record for `operation_id`
    /// still exists.
    pub async fn begin(&self, operation_id: i64, message_type: &str) -> Result<(), DispatchError> {
        let mut state = self.state.lock().await;
        if state.records.contains_key(&operation_id) {
            return Err(DispatchError::DuplicateOperation(operation_id));
        }
        state
            .records
            .insert(operation_id, OperationRecord::pending(operation_id, message_type));
        Ok(())
    }

    /// Record the result of an operation and queue its message.
    ///
    /// # Errors
    ///
    /// [`DispatchError::UnknownOperation`] if `begin` was never called, or
    /// [`DispatchError::OperationAlreadyCompleted`] on a second completion.
    pub async fn complete(&self, operation_id: i64, result: Message) -> Result<(), DispatchError> {
        let mut state = self.state.lock().await;
        let record = state
            .records
            .get_mut(&operation_id)
            .ok_or(DispatchError::UnknownOperation(operation_id))?;
        if record.completion_state != CompletionState::Pending {
            return Err(DispatchError::OperationAlreadyCompleted(operation_id));
        }
        record.completion_state = completion_state_of(&result);
        state.outbox.push(result);
        Ok(())
    }

    /// Take every queued result, in completion order, for an outbound batch.
    ///
    /// Records stay until [`acknowledge`](Self::acknowledge) confirms the
    /// batch was delivered, so a duplicate id keeps being refused meanwhile.
    pub async fn take_outbox(&self) -> Vec<Message> {
        std::mem::take(&mut self.state.lock().await.outbox)
    }

    /// Drop the records of results that were delivered.
    pub async fn acknowledge(&self, delivered: &[Message]) {
        let mut state = self.state.lock().await;
        for id in delivered.iter().filter_map(Message::operation_id) {
            state.records.remove(&id);
        }
    }

    /// Put undelivered results back at the front of the queue.
    pub async fn restore_outbox(&self, undelivered: Vec<Message>) {
        let mut state = self.state.lock().await;
        let newer = std::mem::replace(&mut state.outbox, undelivered);
        state.outbox.extend(newer);
    }

    /// Drain queued results and remove their records in one step.
    pub async fn drain(&self) -> Vec<Message> {
        let mut state = self.state.lock().await;
        let drained = std::mem::take(&mut state.outbox);
        for id in drained.iter().filter_map(Message::operation_id) {
            state.records.remove(&id);
        }
        drained
    }

    /// Operations accepted but not yet completed.
    pub async fn pending_count(&self) -> usize {
        self.state
            .lock()
            .await
            .records
            .values()
            .filter(|r| r.completion_state == CompletionState::Pending)
            .count()
    }

    /// Results waiting for an exchange.
    pub async fn queued_count(&self) -> usize {
        self.state.lock().await.outbox.len()
    }

    pub async fn record(&self, operation_id: i64) -> Option<OperationRecord> {
        self.state.lock().await.records.get(&operation_id).cloned()
    }
}
