//! Fetched tasks, handler results, and the per-invocation task context.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TransportError;
use crate::events::{EventBus, WorkerEvent};
use crate::transport::TaskTransport;
use crate::variables::{VariableMap, Variables};

/// A unit of work fetched under a lease. Immutable once fetched; only the
/// lease expiration moves, via [`TaskContext::extend_lock`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Task {
    pub id: String,
    pub topic_name: String,
    pub worker_id: Option<String>,
    pub process_instance_id: Option<String>,
    pub process_definition_key: Option<String>,
    pub activity_id: Option<String>,
    pub activity_instance_id: Option<String>,
    pub business_key: Option<String>,
    pub lock_expiration_time: Option<DateTime<Utc>>,
    pub retries: Option<i32>,
    pub variables: VariableMap,
}

impl Task {
    pub fn new(id: impl Into<String>, topic_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            topic_name: topic_name.into(),
            ..Self::default()
        }
    }
}

/// What a handler reports back for a finished task.
#[derive(Debug, Clone)]
pub enum TaskResult {
    /// Normal completion; `variables` are submitted to the service.
    Complete { variables: Variables },
    /// A structured business failure, routed to the service as an error
    /// code instead of a generic task failure.
    BusinessError { code: String },
}

impl Default for TaskResult {
    fn default() -> Self {
        Self::Complete {
            variables: Variables::new(),
        }
    }
}

impl TaskResult {
    /// Complete without producing variables.
    pub fn complete() -> Self {
        Self::default()
    }

    pub fn with_variables(variables: Variables) -> Self {
        Self::Complete { variables }
    }

    pub fn business_error(code: impl Into<String>) -> Self {
        Self::BusinessError { code: code.into() }
    }
}

/// The view of one task handed to its handler. Lives only for the duration
/// of the handler invocation.
#[derive(Clone)]
pub struct TaskContext {
    /// The raw task as fetched.
    pub task: Task,
    /// Decoded variables.
    pub variables: Variables,
    worker_id: String,
    transport: Arc<dyn TaskTransport>,
    events: EventBus,
}

impl TaskContext {
    pub(crate) fn new(
        task: Task,
        variables: Variables,
        worker_id: String,
        transport: Arc<dyn TaskTransport>,
        events: EventBus,
    ) -> Self {
        Self {
            task,
            variables,
            worker_id,
            transport,
            events,
        }
    }

    pub fn topic(&self) -> &str {
        &self.task.topic_name
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Request a new lease of `new_duration` for this task.
    ///
    /// Transport errors propagate to the caller unchanged; the engine keeps
    /// running either way, and the handler decides whether to treat a failed
    /// extension as fatal.
    pub async fn extend_lock(&self, new_duration: Duration) -> Result<(), TransportError> {
        self.events.emit(WorkerEvent::ExtendLockBegin {
            task_id: self.task.id.clone(),
            new_duration,
        });

        match self
            .transport
            .extend_lock(&self.task.id, &self.worker_id, new_duration)
            .await
        {
            Ok(()) => {
                self.events.emit(WorkerEvent::ExtendLockSucceeded {
                    task_id: self.task.id.clone(),
                });
                Ok(())
            }
            Err(error) => {
                self.events.emit(WorkerEvent::ExtendLockFailed {
                    task_id: self.task.id.clone(),
                    error: error.to_string(),
                });
                Err(error)
            }
        }
    }
}

impl std::fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskContext")
            .field("task", &self.task)
            .field("variables", &self.variables)
            .field("worker_id", &self.worker_id)
            .finish_non_exhaustive()
    }
}
