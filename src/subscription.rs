//! Topic subscriptions.
//!
//! The registry maps topic name to handler plus per-topic fetch options.
//! At most one subscription exists per topic at any time; registering a
//! duplicate is a configuration error, while removal is idempotent.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;

use uuid::Uuid;

use crate::error::ConfigError;
use crate::events::{EventBus, WorkerEvent};
use crate::handler::TaskHandler;
use crate::transport::TopicRequest;

/// Per-topic fetch options.
#[derive(Debug, Clone, Default)]
pub struct SubscribeOptions {
    /// Variable allow-list; `None` fetches all variables.
    pub variables: Option<Vec<String>>,
    /// Lease duration override; `None` uses the engine-wide default.
    pub lock_duration: Option<Duration>,
}

impl SubscribeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch only the named variables.
    pub fn variables<I, S>(mut self, variables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.variables = Some(variables.into_iter().map(Into::into).collect());
        self
    }

    pub fn lock_duration(mut self, lock_duration: Duration) -> Self {
        self.lock_duration = Some(lock_duration);
        self
    }
}

pub(crate) struct SubscriptionEntry {
    pub(crate) id: Uuid,
    pub(crate) topic: String,
    pub(crate) variables: Option<Vec<String>>,
    pub(crate) lock_duration: Duration,
    pub(crate) handler: Arc<dyn TaskHandler>,
}

#[derive(Default)]
pub(crate) struct SubscriptionRegistry {
    entries: RwLock<HashMap<String, Arc<SubscriptionEntry>>>,
}

impl SubscriptionRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(
        &self,
        topic: String,
        variables: Option<Vec<String>>,
        lock_duration: Duration,
        handler: Arc<dyn TaskHandler>,
    ) -> Result<Uuid, ConfigError> {
        let Ok(mut entries) = self.entries.write() else {
            return Err(ConfigError::InvalidValue {
                key: "subscriptions",
                message: "registry lock poisoned".to_string(),
            });
        };

        if entries.contains_key(&topic) {
            return Err(ConfigError::DuplicateSubscription { topic });
        }

        let id = Uuid::new_v4();
        entries.insert(
            topic.clone(),
            Arc::new(SubscriptionEntry {
                id,
                topic,
                variables,
                lock_duration,
                handler,
            }),
        );
        Ok(id)
    }

    /// Remove the subscription for `topic`, but only if it is still the one
    /// identified by `id`. Returns whether anything was removed.
    pub(crate) fn remove(&self, topic: &str, id: Uuid) -> bool {
        let Ok(mut entries) = self.entries.write() else {
            return false;
        };

        match entries.get(topic) {
            Some(entry) if entry.id == id => {
                entries.remove(topic);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn resolve(&self, topic: &str) -> Option<Arc<SubscriptionEntry>> {
        self.entries.read().ok()?.get(topic).cloned()
    }

    /// Snapshot of all topics for one fetch request.
    pub(crate) fn snapshot(&self) -> Vec<TopicRequest> {
        let Ok(entries) = self.entries.read() else {
            return Vec::new();
        };

        entries
            .values()
            .map(|entry| TopicRequest {
                topic_name: entry.topic.clone(),
                variables: entry.variables.clone(),
                lock_duration: entry.lock_duration.as_millis() as u64,
            })
            .collect()
    }
}

/// Handle to a registered subscription. Dropping it does not unregister;
/// call [`remove`](Self::remove) explicitly.
#[derive(Clone)]
pub struct Subscription {
    id: Uuid,
    topic: String,
    variables: Option<Vec<String>>,
    lock_duration: Duration,
    registry: Weak<SubscriptionRegistry>,
    events: EventBus,
}

impl Subscription {
    pub(crate) fn new(
        id: Uuid,
        topic: String,
        variables: Option<Vec<String>>,
        lock_duration: Duration,
        registry: Weak<SubscriptionRegistry>,
        events: EventBus,
    ) -> Self {
        Self {
            id,
            topic,
            variables,
            lock_duration,
            registry,
            events,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn variables(&self) -> Option<&[String]> {
        self.variables.as_deref()
    }

    pub fn lock_duration(&self) -> Duration {
        self.lock_duration
    }

    /// Unregister this subscription. Idempotent: removing twice, or after
    /// the topic was re-registered by someone else, is a no-op.
    pub fn remove(&self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };

        if registry.remove(&self.topic, self.id) {
            tracing::debug!(topic = %self.topic, "removed subscription");
            self.events.emit(WorkerEvent::SubscriptionRemoved {
                topic: self.topic.clone(),
            });
        }
    }
}
