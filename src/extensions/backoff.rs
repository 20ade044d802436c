//! Adaptive polling backoff.
//!
//! Tunes `polling_interval` (and optionally `max_tasks`) from the event
//! stream: slow down when the service errors or runs dry, speed up when
//! fetches come back full, and pause fetching entirely while the number of
//! in-flight tasks sits at the configured ceiling.
//!
//! The observer runs synchronously on the bus, so every adjustment lands
//! before the engine arms the next poll timer off the same poll cycle.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::ConfigUpdate;
use crate::error::ConfigError;
use crate::events::{EventBus, EventObserver, WorkerEvent};
use crate::extensions::WorkerExtension;
use crate::worker::{ConfigHandle, Worker};

/// Interval changes smaller than this are not worth a reconfiguration.
const ADJUST_THRESHOLD: Duration = Duration::from_millis(100);

/// Tuning knobs for [`Backoff`].
#[derive(Debug, Clone)]
pub struct BackoffOptions {
    /// Ceiling for the polling interval.
    pub max_polling_interval: Duration,
    /// Floor for the polling interval.
    pub min_polling_interval: Duration,
    /// Pause fetching while this many tasks are in flight. `None` leaves
    /// `max_tasks` alone.
    pub max_active_tasks: Option<usize>,
    /// Multiplier applied to the interval after a failed fetch.
    pub stepping: f64,
}

impl Default for BackoffOptions {
    fn default() -> Self {
        Self {
            max_polling_interval: Duration::from_secs(30),
            min_polling_interval: Duration::ZERO,
            max_active_tasks: None,
            stepping: 1.5,
        }
    }
}

/// Backoff extension. Install via
/// [`WorkerBuilder::extension`](crate::WorkerBuilder::extension).
#[derive(Debug, Clone, Default)]
pub struct Backoff {
    options: BackoffOptions,
}

impl Backoff {
    pub fn new(options: BackoffOptions) -> Self {
        Self { options }
    }
}

impl WorkerExtension for Backoff {
    fn install(&self, worker: &Worker) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidExtension {
            extension: "backoff",
            reason,
        };

        if self.options.stepping <= 1.0 {
            return Err(invalid(format!(
                "stepping must be greater than 1.0, got {}",
                self.options.stepping
            )));
        }
        if self.options.min_polling_interval > self.options.max_polling_interval {
            return Err(invalid(
                "min polling interval exceeds max polling interval".to_string(),
            ));
        }
        if self.options.max_active_tasks == Some(0) {
            return Err(invalid(
                "max active tasks must be at least 1".to_string(),
            ));
        }

        let config = worker.config_handle();
        let initial = config.get();

        worker.observe(Arc::new(BackoffObserver {
            options: self.options.clone(),
            default_interval: initial.polling_interval,
            default_max_tasks: initial.max_tasks,
            config,
            events: worker.event_bus(),
            active_tasks: Mutex::new(0),
        }));

        Ok(())
    }
}

struct BackoffObserver {
    options: BackoffOptions,
    default_interval: Duration,
    default_max_tasks: usize,
    config: ConfigHandle,
    events: EventBus,
    active_tasks: Mutex<usize>,
}

impl BackoffObserver {
    fn update_interval(&self, target: Duration, reason: &str) {
        let target = target.clamp(
            self.options.min_polling_interval,
            self.options.max_polling_interval,
        );

        let current = self.config.get().polling_interval;
        let delta = if target > current {
            target - current
        } else {
            current - target
        };
        if delta < ADJUST_THRESHOLD {
            return;
        }

        self.config
            .update(ConfigUpdate::new().polling_interval(target));
        self.events.emit(WorkerEvent::PollingIntervalChanged {
            new: target,
            old: current,
            reason: reason.to_string(),
        });
    }

    fn update_max_tasks(&self, target: usize, reason: &str) {
        let current = self.config.get().max_tasks;
        if target == current {
            return;
        }

        self.config.update(ConfigUpdate::new().max_tasks(target));
        self.events.emit(WorkerEvent::MaxTasksChanged {
            new: target,
            old: current,
            reason: reason.to_string(),
        });
    }

    fn on_execution_begin(&self, active_tasks: &mut usize) {
        let Some(max_active) = self.options.max_active_tasks else {
            return;
        };

        *active_tasks += 1;
        if *active_tasks >= max_active {
            self.update_max_tasks(0, "max active tasks reached");
            self.update_interval(self.default_interval, "max active tasks reached");
        }
    }

    fn on_execution_done(&self, active_tasks: &mut usize) {
        let Some(max_active) = self.options.max_active_tasks else {
            return;
        };

        let was = *active_tasks;
        *active_tasks = was.saturating_sub(1);
        if was >= max_active && *active_tasks < max_active {
            self.update_max_tasks(self.default_max_tasks, "below max active tasks");
            self.update_interval(self.options.min_polling_interval, "capacity available");
        }
    }
}

impl EventObserver for BackoffObserver {
    fn on_event(&self, event: &WorkerEvent) {
        // execution events arrive concurrently from spawned task
        // executions, so the count update and the reconfiguration it
        // triggers must happen under one lock. The reconfiguration events
        // emitted below re-enter this observer, hence the filter before
        // the lock is taken.
        match event {
            WorkerEvent::FetchFailed { .. }
            | WorkerEvent::FetchSucceeded { .. }
            | WorkerEvent::ExecutionBegin { .. }
            | WorkerEvent::ExecutionDone { .. }
            | WorkerEvent::PollDone { .. } => {}
            _ => return,
        }

        let Ok(mut active_tasks) = self.active_tasks.lock() else {
            return;
        };

        match event {
            WorkerEvent::FetchFailed { .. } => {
                let current = self.config.get().polling_interval;
                let base = current.max(self.default_interval);
                self.update_interval(base.mul_f64(self.options.stepping), "fetch failed");
            }
            WorkerEvent::FetchSucceeded { count } => {
                let config = self.config.get();
                // zero means we paused fetching ourselves; leave the
                // interval as is until capacity frees up
                if config.max_tasks == 0 {
                    return;
                }
                if *count >= config.max_tasks {
                    self.update_interval(self.options.min_polling_interval, "full batch fetched");
                } else {
                    self.update_interval(self.default_interval, "partial batch fetched");
                }
            }
            WorkerEvent::ExecutionBegin { .. } => self.on_execution_begin(&mut active_tasks),
            WorkerEvent::ExecutionDone { .. } => self.on_execution_done(&mut active_tasks),
            WorkerEvent::PollDone { elapsed, .. } => {
                let current = self.config.get().polling_interval;
                self.update_interval(current.saturating_sub(*elapsed), "poll time compensation");
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkerConfig;
    use crate::events::PollReason;
    use std::sync::RwLock;

    fn observer(options: BackoffOptions, config: WorkerConfig) -> (BackoffObserver, ConfigHandle) {
        let default_interval = config.polling_interval;
        let default_max_tasks = config.max_tasks;
        let handle = ConfigHandle::new(Arc::new(RwLock::new(config)));
        (
            BackoffObserver {
                options,
                default_interval,
                default_max_tasks,
                config: handle.clone(),
                events: EventBus::new(),
                active_tasks: Mutex::new(0),
            },
            handle,
        )
    }

    fn config_with_interval(interval: Duration) -> WorkerConfig {
        WorkerConfig {
            polling_interval: interval,
            ..WorkerConfig::default()
        }
    }

    #[test]
    fn fetch_failure_steps_interval_up() {
        let (observer, config) = observer(
            BackoffOptions::default(),
            config_with_interval(Duration::from_secs(1)),
        );

        observer.on_event(&WorkerEvent::FetchFailed {
            error: "boom".to_string(),
        });
        assert_eq!(config.get().polling_interval, Duration::from_millis(1500));

        observer.on_event(&WorkerEvent::FetchFailed {
            error: "boom".to_string(),
        });
        assert_eq!(config.get().polling_interval, Duration::from_millis(2250));
    }

    #[test]
    fn interval_never_exceeds_ceiling() {
        let options = BackoffOptions {
            max_polling_interval: Duration::from_secs(2),
            ..BackoffOptions::default()
        };
        let (observer, config) = observer(options, config_with_interval(Duration::from_secs(1)));

        for _ in 0..10 {
            observer.on_event(&WorkerEvent::FetchFailed {
                error: "boom".to_string(),
            });
        }

        assert_eq!(config.get().polling_interval, Duration::from_secs(2));
    }

    #[test]
    fn full_batch_drops_interval_to_floor() {
        let options = BackoffOptions {
            min_polling_interval: Duration::from_millis(200),
            ..BackoffOptions::default()
        };
        let (observer, config) = observer(options, config_with_interval(Duration::from_secs(1)));

        observer.on_event(&WorkerEvent::FetchSucceeded { count: 2 });

        assert_eq!(config.get().polling_interval, Duration::from_millis(200));
    }

    #[test]
    fn partial_batch_restores_default_interval() {
        let options = BackoffOptions {
            min_polling_interval: Duration::from_millis(200),
            ..BackoffOptions::default()
        };
        let (observer, config) = observer(options, config_with_interval(Duration::from_secs(1)));

        observer.on_event(&WorkerEvent::FetchSucceeded { count: 2 });
        observer.on_event(&WorkerEvent::FetchSucceeded { count: 1 });

        assert_eq!(config.get().polling_interval, Duration::from_secs(1));
    }

    #[test]
    fn small_adjustments_are_skipped() {
        let (observer, config) = observer(
            BackoffOptions {
                min_polling_interval: Duration::from_millis(950),
                ..BackoffOptions::default()
            },
            config_with_interval(Duration::from_secs(1)),
        );

        // target clamps to 950ms, only 50ms away
        observer.on_event(&WorkerEvent::FetchSucceeded { count: 2 });

        assert_eq!(config.get().polling_interval, Duration::from_secs(1));
    }

    #[test]
    fn ceiling_drops_to_zero_at_max_active_tasks() {
        let options = BackoffOptions {
            max_active_tasks: Some(2),
            ..BackoffOptions::default()
        };
        let (observer, config) = observer(options, WorkerConfig::default());
        let task = crate::task::Task::new("t1", "topic");

        observer.on_event(&WorkerEvent::ExecutionBegin { task: task.clone() });
        assert_eq!(config.get().max_tasks, 2);

        observer.on_event(&WorkerEvent::ExecutionBegin { task: task.clone() });
        assert_eq!(config.get().max_tasks, 0);

        observer.on_event(&WorkerEvent::ExecutionDone {
            task,
            elapsed: Duration::ZERO,
        });
        assert_eq!(config.get().max_tasks, 2);
    }

    #[test]
    fn fetch_result_is_ignored_while_paused() {
        let options = BackoffOptions {
            max_active_tasks: Some(1),
            min_polling_interval: Duration::from_millis(200),
            ..BackoffOptions::default()
        };
        let (observer, config) = observer(options, config_with_interval(Duration::from_secs(1)));
        let task = crate::task::Task::new("t1", "topic");

        observer.on_event(&WorkerEvent::ExecutionBegin { task });
        assert_eq!(config.get().max_tasks, 0);

        observer.on_event(&WorkerEvent::FetchSucceeded { count: 0 });
        assert_eq!(config.get().polling_interval, Duration::from_secs(1));
    }

    #[test]
    fn poll_time_is_compensated() {
        let (observer, config) = observer(
            BackoffOptions::default(),
            config_with_interval(Duration::from_secs(1)),
        );

        observer.on_event(&WorkerEvent::PollDone {
            reason: PollReason::NoTasks,
            elapsed: Duration::from_millis(400),
        });

        assert_eq!(config.get().polling_interval, Duration::from_millis(600));
    }

    #[test]
    fn concurrent_begin_and_done_keep_ceiling_and_count_consistent() {
        let options = BackoffOptions {
            max_active_tasks: Some(1),
            ..BackoffOptions::default()
        };
        let (observer, config) = observer(
            options,
            WorkerConfig {
                max_tasks: 1,
                ..WorkerConfig::default()
            },
        );
        let observer = &observer;
        let task = crate::task::Task::new("t1", "topic");

        for _ in 0..2_000 {
            // one task in flight at the ceiling, fetching paused
            *observer.active_tasks.lock().unwrap() = 1;
            config.update(ConfigUpdate::new().max_tasks(0));

            std::thread::scope(|scope| {
                scope.spawn(|| {
                    observer.on_event(&WorkerEvent::ExecutionDone {
                        task: task.clone(),
                        elapsed: Duration::ZERO,
                    });
                });
                scope.spawn(|| {
                    observer.on_event(&WorkerEvent::ExecutionBegin { task: task.clone() });
                });
            });

            // regardless of interleaving, one task is still in flight and
            // the next fetch must stay paused
            assert_eq!(*observer.active_tasks.lock().unwrap(), 1);
            assert_eq!(config.get().max_tasks, 0);
        }
    }

    #[test]
    fn install_rejects_bad_options() {
        let worker = Worker::builder()
            .base_url("http://localhost:8080")
            .build()
            .unwrap();

        let backoff = Backoff::new(BackoffOptions {
            stepping: 1.0,
            ..BackoffOptions::default()
        });
        assert!(backoff.install(&worker).is_err());

        let backoff = Backoff::new(BackoffOptions {
            max_active_tasks: Some(0),
            ..BackoffOptions::default()
        });
        assert!(backoff.install(&worker).is_err());

        let backoff = Backoff::new(BackoffOptions {
            min_polling_interval: Duration::from_secs(60),
            ..BackoffOptions::default()
        });
        assert!(backoff.install(&worker).is_err());
    }
}
