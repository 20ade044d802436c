//! The worker engine: subscription surface, polling scheduler, and the
//! per-task execution unit.
//!
//! One logical scheduler drives one outstanding poll timer per engine.
//! Task execution is fanned out onto the runtime and never blocks the next
//! poll; concurrency is bounded at the fetch stage (via `max_tasks`), not
//! by queuing fetched work.

use std::any::Any;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::{ConfigUpdate, WorkerConfig};
use crate::error::{ConfigError, Error, HandlerError, TransportError};
use crate::events::{EventBus, EventObserver, PollReason, WorkerEvent};
use crate::extensions::WorkerExtension;
use crate::handler::TaskHandler;
use crate::http::{HttpTransport, TransportConfig};
use crate::subscription::{SubscribeOptions, Subscription, SubscriptionRegistry};
use crate::task::{Task, TaskContext, TaskResult};
use crate::transport::{FetchAndLockRequest, TaskTransport, TopicRequest};
use crate::variables::{decode_variables, encode_variables};

/// Engine lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    New,
    Running,
    Stopped,
}

/// Read/update handle onto a worker's configuration, handed to extensions
/// so they tune the engine through its public surface only.
#[derive(Clone)]
pub struct ConfigHandle {
    config: Arc<RwLock<WorkerConfig>>,
}

impl ConfigHandle {
    pub(crate) fn new(config: Arc<RwLock<WorkerConfig>>) -> Self {
        Self { config }
    }

    /// Snapshot of the current configuration.
    pub fn get(&self) -> WorkerConfig {
        match self.config.read() {
            Ok(config) => config.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Merge a partial update.
    pub fn update(&self, update: ConfigUpdate) {
        match self.config.write() {
            Ok(mut config) => config.apply(update),
            Err(poisoned) => poisoned.into_inner().apply(update),
        }
    }
}

/// A long-running external-task worker.
///
/// Cheap to clone; all clones drive the same engine instance.
///
/// ```no_run
/// use exttask::{handler_fn, TaskResult, Worker};
///
/// # async fn run() -> Result<(), exttask::Error> {
/// let worker = Worker::builder()
///     .base_url("http://localhost:8080/engine-rest")
///     .build()?;
///
/// worker.subscribe("payment:charge", handler_fn(|context| async move {
///     let _amount = context.variables.get("amount");
///     Ok(TaskResult::complete())
/// }))?;
///
/// worker.start();
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Worker {
    inner: Arc<WorkerInner>,
}

struct WorkerInner {
    config: Arc<RwLock<WorkerConfig>>,
    state: Mutex<WorkerState>,
    registry: Arc<SubscriptionRegistry>,
    transport: Arc<dyn TaskTransport>,
    events: EventBus,
    /// The single outstanding poll timer, if any.
    poll_timer: Mutex<Option<JoinHandle<()>>>,
}

/// Builds a [`Worker`], applying extensions once, in order.
#[derive(Default)]
pub struct WorkerBuilder {
    transport_config: Option<TransportConfig>,
    transport: Option<Arc<dyn TaskTransport>>,
    config: WorkerConfig,
    extensions: Vec<Box<dyn WorkerExtension>>,
}

impl WorkerBuilder {
    /// Talk to the service at `base_url` over HTTP.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.transport_config = Some(TransportConfig::new(base_url));
        self
    }

    /// Use a custom transport instead of the built-in HTTP one.
    pub fn transport(mut self, transport: Arc<dyn TaskTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.config.worker_id = worker_id.into();
        self
    }

    pub fn polling_interval(mut self, polling_interval: Duration) -> Self {
        self.config.polling_interval = polling_interval;
        self
    }

    pub fn max_tasks(mut self, max_tasks: usize) -> Self {
        self.config.max_tasks = max_tasks;
        self
    }

    pub fn lock_duration(mut self, lock_duration: Duration) -> Self {
        self.config.lock_duration = lock_duration;
        self
    }

    /// Add an extension. Extensions run in the order they were added.
    pub fn extension(mut self, extension: impl WorkerExtension + 'static) -> Self {
        self.extensions.push(Box::new(extension));
        self
    }

    pub fn build(self) -> Result<Worker, Error> {
        let transport: Arc<dyn TaskTransport> = match (self.transport, self.transport_config) {
            (Some(transport), _) => transport,
            (None, Some(mut transport_config)) => {
                for extension in &self.extensions {
                    extension.configure_transport(&mut transport_config)?;
                }
                Arc::new(HttpTransport::new(transport_config)?)
            }
            (None, None) => return Err(ConfigError::MissingTransport.into()),
        };

        let worker = Worker {
            inner: Arc::new(WorkerInner {
                config: Arc::new(RwLock::new(self.config)),
                state: Mutex::new(WorkerState::New),
                registry: Arc::new(SubscriptionRegistry::new()),
                transport,
                events: EventBus::new(),
                poll_timer: Mutex::new(None),
            }),
        };

        for extension in &self.extensions {
            extension.install(&worker)?;
        }

        Ok(worker)
    }
}

impl Worker {
    pub fn builder() -> WorkerBuilder {
        WorkerBuilder::default()
    }

    /// Snapshot of the current configuration.
    pub fn config(&self) -> WorkerConfig {
        self.config_handle().get()
    }

    /// Merge a partial reconfiguration.
    pub fn configure(&self, update: ConfigUpdate) {
        self.config_handle().update(update);
    }

    /// Handle for extensions that tune configuration from event callbacks.
    pub fn config_handle(&self) -> ConfigHandle {
        ConfigHandle::new(self.inner.config.clone())
    }

    pub fn state(&self) -> WorkerState {
        self.inner.state()
    }

    /// Subscribe to the broadcast event stream.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.inner.events.subscribe()
    }

    pub(crate) fn event_bus(&self) -> EventBus {
        self.inner.events.clone()
    }

    /// Register a synchronous event observer. Observers run in registration
    /// order on the emitting task, before the event is broadcast.
    pub fn observe(&self, observer: Arc<dyn EventObserver>) {
        self.inner.events.observe(observer);
    }

    /// Subscribe a handler to `topic` with default options.
    pub fn subscribe(
        &self,
        topic: impl Into<String>,
        handler: impl TaskHandler + 'static,
    ) -> Result<Subscription, Error> {
        self.subscribe_with(topic, SubscribeOptions::default(), handler)
    }

    /// Subscribe a handler to `topic` with explicit fetch options.
    pub fn subscribe_with(
        &self,
        topic: impl Into<String>,
        options: SubscribeOptions,
        handler: impl TaskHandler + 'static,
    ) -> Result<Subscription, Error> {
        let topic = topic.into();
        let lock_duration = options
            .lock_duration
            .unwrap_or_else(|| self.config().lock_duration);

        let id = self.inner.registry.insert(
            topic.clone(),
            options.variables.clone(),
            lock_duration,
            Arc::new(handler),
        )?;

        debug!(topic = %topic, "added subscription");
        self.inner.events.emit(WorkerEvent::SubscriptionRegistered {
            topic: topic.clone(),
        });

        Ok(Subscription::new(
            id,
            topic,
            options.variables,
            lock_duration,
            Arc::downgrade(&self.inner.registry),
            self.inner.events.clone(),
        ))
    }

    /// Snapshot of the registered topics as they would be fetched.
    pub fn topics(&self) -> Vec<TopicRequest> {
        self.inner.registry.snapshot()
    }

    /// Start polling. Idempotent while running; a stopped worker can be
    /// restarted.
    pub fn start(&self) {
        {
            let Ok(mut state) = self.inner.state.lock() else {
                return;
            };
            if *state == WorkerState::Running {
                return;
            }
            *state = WorkerState::Running;
        }

        let worker_id = self.config().worker_id;
        debug!(worker_id = %worker_id, "starting worker");
        self.inner.events.emit(WorkerEvent::Start { worker_id });

        self.inner.reschedule(Duration::ZERO);
    }

    /// Stop polling. Cancels the pending poll timer only; in-flight task
    /// executions run to completion. Idempotent.
    pub fn stop(&self) {
        {
            let Ok(mut state) = self.inner.state.lock() else {
                return;
            };
            if *state != WorkerState::Running {
                return;
            }
            *state = WorkerState::Stopped;
        }

        if let Ok(mut timer) = self.inner.poll_timer.lock()
            && let Some(pending) = timer.take()
        {
            pending.abort();
        }

        let worker_id = self.config().worker_id;
        debug!(worker_id = %worker_id, "stopping worker");
        self.inner.events.emit(WorkerEvent::Stop { worker_id });
    }

    /// Run a single poll cycle without arming a timer. Intended for tests
    /// and for callers driving the schedule themselves.
    pub async fn poll_once(&self) {
        self.inner.poll().await;
    }
}

enum FetchOutcome {
    /// Ceiling is zero, fetch skipped.
    Paused,
    Tasks(Vec<Task>),
}

impl WorkerInner {
    fn state(&self) -> WorkerState {
        match self.state.lock() {
            Ok(state) => *state,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn config(&self) -> WorkerConfig {
        match self.config.read() {
            Ok(config) => config.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Arm the single-shot poll timer. Any previously pending timer is
    /// cancelled first, so at most one is ever outstanding.
    fn reschedule(self: &Arc<Self>, wait: Duration) {
        self.events.emit(WorkerEvent::Reschedule { wait });

        let inner = self.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(wait).await;

            // clear our own slot before polling, so rescheduling from
            // within the poll cycle never aborts the live poll
            if let Ok(mut timer) = inner.poll_timer.lock() {
                timer.take();
            }

            if inner.state() != WorkerState::Running {
                return;
            }

            inner.poll().await;
        });

        if let Ok(mut timer) = self.poll_timer.lock()
            && let Some(previous) = timer.replace(handle)
        {
            previous.abort();
        }
    }

    /// One poll cycle: snapshot topics, fetch, fan out execution, emit
    /// poll-done, and (if running) arm the next timer. Never waits on task
    /// completion.
    async fn poll(self: &Arc<Self>) {
        let started = Instant::now();
        self.events.emit(WorkerEvent::PollBegin);

        let topics = self.registry.snapshot();

        let reason = if topics.is_empty() {
            PollReason::NoTopics
        } else {
            match self.fetch_tasks(topics).await {
                FetchOutcome::Paused => PollReason::FetchPaused,
                FetchOutcome::Tasks(tasks) if tasks.is_empty() => PollReason::NoTasks,
                FetchOutcome::Tasks(tasks) => {
                    for task in tasks {
                        let inner = self.clone();
                        tokio::spawn(async move {
                            inner.execute_task(task).await;
                        });
                    }
                    PollReason::Processed
                }
            }
        };

        self.events.emit(WorkerEvent::PollDone {
            reason,
            elapsed: started.elapsed(),
        });

        // the backoff observer has already seen poll-done at this point,
        // so the interval read here reflects its adjustment
        if self.state() == WorkerState::Running {
            self.reschedule(self.config().polling_interval);
        }
    }

    async fn fetch_tasks(&self, topics: Vec<TopicRequest>) -> FetchOutcome {
        let WorkerConfig {
            worker_id,
            max_tasks,
            ..
        } = self.config();

        if max_tasks == 0 {
            self.events.emit(WorkerEvent::FetchPaused);
            return FetchOutcome::Paused;
        }

        self.events.emit(WorkerEvent::FetchBegin {
            topics: topics.len(),
        });

        let request = FetchAndLockRequest {
            worker_id,
            max_tasks,
            topics,
        };

        match self.transport.fetch_and_lock(request).await {
            Ok(tasks) => {
                self.events.emit(WorkerEvent::FetchSucceeded {
                    count: tasks.len(),
                });
                FetchOutcome::Tasks(tasks)
            }
            Err(error) => {
                warn!(error = %error, "fetch-and-lock failed");
                self.events.emit(WorkerEvent::FetchFailed {
                    error: error.to_string(),
                });
                FetchOutcome::Tasks(Vec::new())
            }
        }
    }

    /// Run one task to completion and acknowledge the outcome. Never lets
    /// an error escape: handler failures are reported to the service,
    /// acknowledgement failures go to the generic error channel.
    async fn execute_task(self: &Arc<Self>, task: Task) {
        let Some(entry) = self.registry.resolve(&task.topic_name) else {
            // removed in the meantime; the lease expires server-side and
            // the service redelivers
            self.events.emit(WorkerEvent::ExecutionSkipped {
                task,
                reason: "no-subscription".to_string(),
            });
            return;
        };

        let started = Instant::now();
        let worker_id = self.config().worker_id;

        let context = TaskContext::new(
            task.clone(),
            decode_variables(&task.variables),
            worker_id.clone(),
            self.transport.clone(),
            self.events.clone(),
        );

        self.events.emit(WorkerEvent::ExecutionBegin { task: task.clone() });

        let outcome = std::panic::AssertUnwindSafe(entry.handler.handle(context))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(HandlerError::Panicked(panic_message(payload))));

        match outcome {
            Ok(result) => {
                self.events
                    .emit(WorkerEvent::ExecutionCompleted { task: task.clone() });

                match self.acknowledge_completion(&task, &worker_id, result).await {
                    Ok(()) => {
                        self.events
                            .emit(WorkerEvent::CompletionAcknowledged { task: task.clone() });
                    }
                    Err(error) => {
                        self.report_error("failed to mark task as completed", &error);
                    }
                }
            }
            Err(error) => {
                let message = error.to_string();
                self.events.emit(WorkerEvent::ExecutionFailed {
                    task: task.clone(),
                    error: message.clone(),
                });

                match self.transport.fail(&task.id, &worker_id, &message).await {
                    Ok(()) => {
                        self.events
                            .emit(WorkerEvent::FailureAcknowledged { task: task.clone() });
                    }
                    Err(error) => {
                        self.report_error("failed to mark task as failed", &error);
                    }
                }
            }
        }

        self.events.emit(WorkerEvent::ExecutionDone {
            task,
            elapsed: started.elapsed(),
        });
    }

    async fn acknowledge_completion(
        &self,
        task: &Task,
        worker_id: &str,
        result: TaskResult,
    ) -> Result<(), TransportError> {
        match result {
            TaskResult::BusinessError { code } => {
                self.transport
                    .raise_business_error(&task.id, worker_id, &code)
                    .await
            }
            TaskResult::Complete { variables } => {
                let encoded = encode_variables(&variables, &task.variables);
                self.transport.complete(&task.id, worker_id, encoded).await
            }
        }
    }

    fn report_error(&self, message: &str, error: &TransportError) {
        debug!(error = %error, "{message}");
        self.events.emit(WorkerEvent::GenericError {
            message: message.to_string(),
            error: error.to_string(),
        });
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    }
}
