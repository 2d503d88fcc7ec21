//! Message dispatch: routes each inbound message to the plugin owning its
//! type and drives the snapshot → apply → report sequence.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use fleet_common::Message;
use futures::FutureExt;
use futures::future::join_all;
use tokio::sync::Mutex;

use crate::application::ports::Plugin;
use crate::application::services::tracker::OperationTracker;
use crate::domain::operation::{CompletionState, completion_state_of, result_message};
use crate::domain::{DispatchError, PluginError, Snapshot};

/// What happened to one dispatched message.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// The message carried an operation id; its result is queued.
    Reported {
        operation_id: i64,
        state: CompletionState,
    },
    /// No operation id: the message was applied and nothing is reported.
    Applied(Result<String, PluginError>),
}

#[derive(Clone)]
struct Route {
    plugin: Arc<dyn Plugin>,
    /// Shared by every message type of the same plugin.
    phase_lock: Arc<Mutex<()>>,
}

/// Collects handler registrations. Conflicts surface here, before any
/// message is dispatched.
#[derive(Default)]
pub struct RegistryBuilder {
    routes: HashMap<String, Route>,
    locks: HashMap<&'static str, Arc<Mutex<()>>>,
}

impl RegistryBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Route `message_type` to `plugin`.
    ///
    /// # Errors
    ///
    /// [`DispatchError::DuplicateHandler`] if the type already has a handler.
    pub fn register(
        &mut self,
        message_type: &str,
        plugin: Arc<dyn Plugin>,
    ) -> Result<&mut Self, DispatchError> {
        if self.routes.contains_key(message_type) {
            return Err(DispatchError::DuplicateHandler(message_type.to_string()));
        }
        let phase_lock = Arc::clone(self.locks.entry(plugin.name()).or_default());
        self.routes
            .insert(message_type.to_string(), Route { plugin, phase_lock });
        Ok(self)
    }

    /// Register every message type the plugin declares.
    pub fn register_plugin(&mut self, plugin: Arc<dyn Plugin>) -> Result<&mut Self, DispatchError> {
        for message_type in plugin.message_types() {
            self.register(message_type, Arc::clone(&plugin))?;
        }
        Ok(self)
    }

    #[must_use]
    pub fn build(self, tracker: Arc<OperationTracker>) -> DispatchRegistry {
        DispatchRegistry {
            routes: self.routes,
            tracker,
        }
    }
}

/// Immutable routing table, shared across dispatch tasks.
pub struct DispatchRegistry {
    routes: HashMap<String, Route>,
    tracker: Arc<OperationTracker>,
}

impl DispatchRegistry {
    #[must_use]
    pub fn tracker(&self) -> &Arc<OperationTracker> {
        &self.tracker
    }

    #[must_use]
    pub fn handles(&self, message_type: &str) -> bool {
        self.routes.contains_key(message_type)
    }

    /// Dispatch one message.
    ///
    /// Handler failures never surface here: they become failure results (or
    /// log lines for messages without an operation id). Errors are about
    /// routing and tracking only.
    pub async fn dispatch(&self, message: &Message) -> Result<DispatchOutcome, DispatchError> {
        let message_type = message.message_type();
        if message_type.is_empty() {
            return Err(DispatchError::MissingType);
        }
        let route = self
            .routes
            .get(message_type)
            .ok_or_else(|| DispatchError::NoSuchHandler(message_type.to_string()))?;

        let Some(operation_id) = message.operation_id() else {
            let _phase = route.phase_lock.lock().await;
            let outcome = guarded_apply(route.plugin.as_ref(), message).await;
            if let Err(e) = &outcome {
                tracing::warn!(message_type, error = %e, "message without operation id failed");
            }
            return Ok(DispatchOutcome::Applied(outcome));
        };

        self.tracker.begin(operation_id, message_type).await?;
        let result = {
            let _phase = route.phase_lock.lock().await;
            run_phases(route.plugin.as_ref(), message, operation_id).await
        };
        let state = completion_state_of(&result);
        self.tracker.complete(operation_id, result).await?;
        tracing::info!(operation_id, message_type, ?state, "operation finished");
        Ok(DispatchOutcome::Reported {
            operation_id,
            state,
        })
    }

    /// Dispatch every message of a batch concurrently. Routing errors are
    /// logged and do not stop the rest of the batch.
    pub async fn dispatch_all(&self, batch: &[Message]) -> Vec<Result<DispatchOutcome, DispatchError>> {
        let outcomes = join_all(batch.iter().map(|message| self.dispatch(message))).await;
        for (message, outcome) in batch.iter().zip(&outcomes) {
            if let Err(e) = outcome {
                tracing::warn!(
                    message_type = message.message_type(),
                    operation_id = ?message.operation_id(),
                    error = %e,
                    "message not dispatched"
                );
            }
        }
        outcomes
    }
}

/// Snapshot, apply and snapshot again; build the result message.
async fn run_phases(plugin: &dyn Plugin, message: &Message, operation_id: i64) -> Message {
    let before = match guarded_snapshot(plugin, None).await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            tracing::error!(operation_id, plugin = plugin.name(), error = %e, "snapshot before apply failed");
            return result_message(operation_id, &Err(e), None);
        }
    };

    let outcome = guarded_apply(plugin, message).await;

    let delta = match guarded_snapshot(plugin, Some(operation_id)).await {
        Ok(after) => Some(before.diff(&after)),
        Err(e) => {
            tracing::warn!(operation_id, plugin = plugin.name(), error = %e, "snapshot after apply failed; reporting without delta");
            None
        }
    };
    result_message(operation_id, &outcome, delta)
}

async fn guarded_apply(plugin: &dyn Plugin, message: &Message) -> Result<String, PluginError> {
    AssertUnwindSafe(plugin.apply(message))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(PluginError::Panicked(panic_text(panic.as_ref()))))
}

async fn guarded_snapshot(
    plugin: &dyn Plugin,
    operation_id: Option<i64>,
) -> Result<Snapshot, PluginError> {
    AssertUnwindSafe(plugin.snapshot(operation_id))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(PluginError::Detection(panic_text(panic.as_ref()))))
}

fn panic_text(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}
