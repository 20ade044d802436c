//! Worker configuration.

use std::time::Duration;

use uuid::Uuid;

/// Engine-wide configuration. Mutable at runtime via
/// [`Worker::configure`](crate::Worker::configure); the backoff extension
/// tunes `polling_interval` and `max_tasks` through the same surface.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Identity reported to the remote service with every call.
    pub worker_id: String,
    /// Wait time between the end of one poll cycle and the next fetch.
    pub polling_interval: Duration,
    /// Maximum number of tasks claimed per fetch. Zero pauses fetching
    /// without stopping the engine.
    pub max_tasks: usize,
    /// Default lease duration requested for fetched tasks; subscriptions
    /// may override it per topic.
    pub lock_duration: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: Uuid::new_v4().to_string(),
            polling_interval: Duration::from_millis(1500),
            max_tasks: 2,
            lock_duration: Duration::from_secs(10),
        }
    }
}

impl WorkerConfig {
    /// Merge a partial update into this configuration.
    pub fn apply(&mut self, update: ConfigUpdate) {
        if let Some(polling_interval) = update.polling_interval {
            self.polling_interval = polling_interval;
        }
        if let Some(max_tasks) = update.max_tasks {
            self.max_tasks = max_tasks;
        }
        if let Some(lock_duration) = update.lock_duration {
            self.lock_duration = lock_duration;
        }
    }
}

/// Partial reconfiguration; unset fields keep their current value.
#[derive(Debug, Clone, Default)]
pub struct ConfigUpdate {
    pub polling_interval: Option<Duration>,
    pub max_tasks: Option<usize>,
    pub lock_duration: Option<Duration>,
}

impl ConfigUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn polling_interval(mut self, polling_interval: Duration) -> Self {
        self.polling_interval = Some(polling_interval);
        self
    }

    pub fn max_tasks(mut self, max_tasks: usize) -> Self {
        self.max_tasks = Some(max_tasks);
        self
    }

    pub fn lock_duration(mut self, lock_duration: Duration) -> Self {
        self.lock_duration = Some(lock_duration);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_merges_only_set_fields() {
        let mut config = WorkerConfig::default();
        let worker_id = config.worker_id.clone();

        config.apply(ConfigUpdate::new().max_tasks(1000));

        assert_eq!(config.max_tasks, 1000);
        assert_eq!(config.worker_id, worker_id);
        assert_eq!(config.polling_interval, Duration::from_millis(1500));
        assert_eq!(config.lock_duration, Duration::from_secs(10));
    }

    #[test]
    fn generated_worker_ids_are_unique() {
        assert_ne!(
            WorkerConfig::default().worker_id,
            WorkerConfig::default().worker_id
        );
    }
}
