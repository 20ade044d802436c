//! Periodic engine statistics.
//!
//! Counts polls, fetches, and task outcomes from the event stream and logs
//! a summary line on a fixed interval while the worker runs. Counters reset
//! after every report.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::info;

use crate::error::ConfigError;
use crate::events::{EventObserver, WorkerEvent};
use crate::extensions::WorkerExtension;
use crate::worker::Worker;

const REPORT_INTERVAL: Duration = Duration::from_secs(5);

/// Metrics extension. Install via
/// [`WorkerBuilder::extension`](crate::WorkerBuilder::extension).
#[derive(Debug, Clone, Copy, Default)]
pub struct Metrics;

impl Metrics {
    pub fn new() -> Self {
        Self
    }
}

impl WorkerExtension for Metrics {
    fn install(&self, worker: &Worker) -> Result<(), ConfigError> {
        worker.observe(Arc::new(MetricsObserver {
            counters: Arc::new(Counters::default()),
            reporter: Mutex::new(None),
        }));
        Ok(())
    }
}

#[derive(Default)]
struct Counters {
    polls: AtomicU64,
    fetches: AtomicU64,
    fetch_failures: AtomicU64,
    tasks_fetched: AtomicU64,
    tasks_completed: AtomicU64,
    tasks_failed: AtomicU64,
}

impl Counters {
    fn report_and_reset(&self) {
        info!(
            polls = self.polls.swap(0, Ordering::Relaxed),
            fetches = self.fetches.swap(0, Ordering::Relaxed),
            fetch_failures = self.fetch_failures.swap(0, Ordering::Relaxed),
            tasks_fetched = self.tasks_fetched.swap(0, Ordering::Relaxed),
            tasks_completed = self.tasks_completed.swap(0, Ordering::Relaxed),
            tasks_failed = self.tasks_failed.swap(0, Ordering::Relaxed),
            "worker stats"
        );
    }
}

struct MetricsObserver {
    counters: Arc<Counters>,
    reporter: Mutex<Option<JoinHandle<()>>>,
}

impl MetricsObserver {
    fn start_reporter(&self) {
        let counters = self.counters.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(REPORT_INTERVAL);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                counters.report_and_reset();
            }
        });

        if let Ok(mut reporter) = self.reporter.lock()
            && let Some(previous) = reporter.replace(handle)
        {
            previous.abort();
        }
    }

    fn stop_reporter(&self) {
        if let Ok(mut reporter) = self.reporter.lock()
            && let Some(handle) = reporter.take()
        {
            handle.abort();
        }
        // final summary so short-lived runs still report
        self.counters.report_and_reset();
    }
}

impl EventObserver for MetricsObserver {
    fn on_event(&self, event: &WorkerEvent) {
        match event {
            WorkerEvent::Start { .. } => self.start_reporter(),
            WorkerEvent::Stop { .. } => self.stop_reporter(),
            WorkerEvent::PollBegin => {
                self.counters.polls.fetch_add(1, Ordering::Relaxed);
            }
            WorkerEvent::FetchBegin { .. } => {
                self.counters.fetches.fetch_add(1, Ordering::Relaxed);
            }
            WorkerEvent::FetchFailed { .. } => {
                self.counters.fetch_failures.fetch_add(1, Ordering::Relaxed);
            }
            WorkerEvent::FetchSucceeded { count } => {
                self.counters
                    .tasks_fetched
                    .fetch_add(*count as u64, Ordering::Relaxed);
            }
            WorkerEvent::CompletionAcknowledged { .. } => {
                self.counters.tasks_completed.fetch_add(1, Ordering::Relaxed);
            }
            WorkerEvent::ExecutionFailed { .. } => {
                self.counters.tasks_failed.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_and_reset() {
        let observer = MetricsObserver {
            counters: Arc::new(Counters::default()),
            reporter: Mutex::new(None),
        };

        observer.on_event(&WorkerEvent::PollBegin);
        observer.on_event(&WorkerEvent::PollBegin);
        observer.on_event(&WorkerEvent::FetchSucceeded { count: 3 });

        assert_eq!(observer.counters.polls.load(Ordering::Relaxed), 2);
        assert_eq!(observer.counters.tasks_fetched.load(Ordering::Relaxed), 3);

        observer.counters.report_and_reset();
        assert_eq!(observer.counters.polls.load(Ordering::Relaxed), 0);
    }
}
