//! Engine event stream.
//!
//! Every engine instance owns its own bus; nothing here is process-global.
//! Events are first delivered, in registration order, to synchronous
//! observers (the backoff controller relies on running before the next poll
//! timer is armed), then fanned out on a broadcast channel for loggers,
//! metrics, and tests.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::broadcast;

use crate::task::Task;

/// Why a poll cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollReason {
    /// No topics registered; fetch skipped.
    NoTopics,
    /// Fetch ceiling is zero; fetch skipped.
    FetchPaused,
    /// Fetch returned no tasks.
    NoTasks,
    /// Tasks were handed to the execution layer.
    Processed,
}

impl std::fmt::Display for PollReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::NoTopics => "no-topics",
            Self::FetchPaused => "fetch-paused",
            Self::NoTasks => "no-tasks",
            Self::Processed => "processed",
        };
        write!(f, "{s}")
    }
}

/// Observable engine events.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    Start {
        worker_id: String,
    },
    Stop {
        worker_id: String,
    },
    PollBegin,
    /// Emitted exactly once per poll cycle; the next poll timer is armed
    /// off this event.
    PollDone {
        reason: PollReason,
        elapsed: Duration,
    },
    FetchBegin {
        topics: usize,
    },
    FetchPaused,
    FetchFailed {
        error: String,
    },
    FetchSucceeded {
        count: usize,
    },
    Reschedule {
        wait: Duration,
    },
    ExecutionSkipped {
        task: Task,
        reason: String,
    },
    ExecutionBegin {
        task: Task,
    },
    /// Handler finished successfully; the acknowledgement has not been sent yet.
    ExecutionCompleted {
        task: Task,
    },
    /// The service acknowledged the completion (or business error).
    CompletionAcknowledged {
        task: Task,
    },
    ExecutionFailed {
        task: Task,
        error: String,
    },
    FailureAcknowledged {
        task: Task,
    },
    ExecutionDone {
        task: Task,
        elapsed: Duration,
    },
    ExtendLockBegin {
        task_id: String,
        new_duration: Duration,
    },
    ExtendLockSucceeded {
        task_id: String,
    },
    ExtendLockFailed {
        task_id: String,
        error: String,
    },
    SubscriptionRegistered {
        topic: String,
    },
    SubscriptionRemoved {
        topic: String,
    },
    /// Swallowed errors (failed acknowledgements) surface here.
    GenericError {
        message: String,
        error: String,
    },
    PollingIntervalChanged {
        new: Duration,
        old: Duration,
        reason: String,
    },
    MaxTasksChanged {
        new: usize,
        old: usize,
        reason: String,
    },
}

/// A synchronous event observer. Delivery is serialized: observers run one
/// after another on the emitting task, so observer-internal state never
/// sees concurrent events.
pub trait EventObserver: Send + Sync {
    fn on_event(&self, event: &WorkerEvent);
}

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Per-engine event bus: in-order sync observers plus broadcast fan-out.
#[derive(Clone)]
pub struct EventBus {
    // only written while the engine is being built
    observers: Arc<RwLock<Vec<Arc<dyn EventObserver>>>>,
    sender: broadcast::Sender<WorkerEvent>,
}

impl EventBus {
    pub(crate) fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            observers: Arc::new(RwLock::new(Vec::new())),
            sender,
        }
    }

    /// Subscribe to the broadcast side of the bus.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkerEvent> {
        self.sender.subscribe()
    }

    pub(crate) fn observe(&self, observer: Arc<dyn EventObserver>) {
        if let Ok(mut observers) = self.observers.write() {
            observers.push(observer);
        }
    }

    pub(crate) fn emit(&self, event: WorkerEvent) {
        if let Ok(observers) = self.observers.read() {
            for observer in observers.iter() {
                observer.on_event(&event);
            }
        }
        // no receivers is fine
        let _ = self.sender.send(event);
    }
}
