//! Structured logging for the engine event stream.

use std::sync::Arc;

use tracing::{debug, error, info, trace, warn};

use crate::error::ConfigError;
use crate::events::{EventObserver, WorkerEvent};
use crate::extensions::WorkerExtension;
use crate::worker::Worker;

/// Logs every engine event through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Logger;

impl Logger {
    pub fn new() -> Self {
        Self
    }
}

impl WorkerExtension for Logger {
    fn install(&self, worker: &Worker) -> Result<(), ConfigError> {
        worker.observe(Arc::new(Logger));
        Ok(())
    }
}

impl EventObserver for Logger {
    fn on_event(&self, event: &WorkerEvent) {
        match event {
            WorkerEvent::Start { worker_id } => info!(worker_id = %worker_id, "worker started"),
            WorkerEvent::Stop { worker_id } => info!(worker_id = %worker_id, "worker stopped"),
            WorkerEvent::PollBegin => trace!("poll begin"),
            WorkerEvent::PollDone { reason, elapsed } => {
                debug!(reason = %reason, elapsed_ms = elapsed.as_millis() as u64, "poll done");
            }
            WorkerEvent::FetchBegin { topics } => trace!(topics, "fetching tasks"),
            WorkerEvent::FetchPaused => debug!("fetch paused"),
            WorkerEvent::FetchFailed { error } => warn!(error = %error, "fetch failed"),
            WorkerEvent::FetchSucceeded { count } => debug!(count, "fetched tasks"),
            WorkerEvent::Reschedule { wait } => {
                trace!(wait_ms = wait.as_millis() as u64, "next poll scheduled");
            }
            WorkerEvent::ExecutionSkipped { task, reason } => {
                warn!(task_id = %task.id, topic = %task.topic_name, reason = %reason, "task skipped");
            }
            WorkerEvent::ExecutionBegin { task } => {
                debug!(task_id = %task.id, topic = %task.topic_name, "executing task");
            }
            WorkerEvent::ExecutionCompleted { task } => {
                trace!(task_id = %task.id, "handler finished");
            }
            WorkerEvent::CompletionAcknowledged { task } => {
                debug!(task_id = %task.id, topic = %task.topic_name, "task completed");
            }
            WorkerEvent::ExecutionFailed { task, error } => {
                warn!(task_id = %task.id, topic = %task.topic_name, error = %error, "task failed");
            }
            WorkerEvent::FailureAcknowledged { task } => {
                trace!(task_id = %task.id, "failure reported");
            }
            WorkerEvent::ExecutionDone { task, elapsed } => {
                debug!(
                    task_id = %task.id,
                    topic = %task.topic_name,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "task execution done"
                );
            }
            WorkerEvent::ExtendLockBegin {
                task_id,
                new_duration,
            } => {
                debug!(
                    task_id = %task_id,
                    new_duration_ms = new_duration.as_millis() as u64,
                    "extending lock"
                );
            }
            WorkerEvent::ExtendLockSucceeded { task_id } => {
                debug!(task_id = %task_id, "lock extended");
            }
            WorkerEvent::ExtendLockFailed { task_id, error } => {
                warn!(task_id = %task_id, error = %error, "lock extension failed");
            }
            WorkerEvent::SubscriptionRegistered { topic } => {
                info!(topic = %topic, "subscribed");
            }
            WorkerEvent::SubscriptionRemoved { topic } => {
                info!(topic = %topic, "unsubscribed");
            }
            WorkerEvent::GenericError { message, error } => {
                error!(error = %error, "{message}");
            }
            WorkerEvent::PollingIntervalChanged { new, old, reason } => {
                debug!(
                    new_ms = new.as_millis() as u64,
                    old_ms = old.as_millis() as u64,
                    reason = %reason,
                    "polling interval changed"
                );
            }
            WorkerEvent::MaxTasksChanged { new, old, reason } => {
                debug!(new, old, reason = %reason, "max tasks changed");
            }
        }
    }
}
