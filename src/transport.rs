//! Transport contract to the remote work-distribution service.
//!
//! The engine only ever talks to [`TaskTransport`]; the HTTP implementation
//! lives in [`crate::http`], and tests substitute an in-memory mock.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::TransportError;
use crate::task::Task;
use crate::variables::VariableMap;

/// One topic entry of a fetch-and-lock request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicRequest {
    pub topic_name: String,
    /// Variable allow-list; `None` fetches all variables.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variables: Option<Vec<String>>,
    /// Requested lease duration in milliseconds.
    pub lock_duration: u64,
}

/// Claim up to `max_tasks` tasks across `topics`, leasing them for this
/// worker in one operation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchAndLockRequest {
    pub worker_id: String,
    pub max_tasks: usize,
    pub topics: Vec<TopicRequest>,
}

/// Operations the engine performs against the remote service.
#[async_trait]
pub trait TaskTransport: Send + Sync {
    async fn fetch_and_lock(
        &self,
        request: FetchAndLockRequest,
    ) -> Result<Vec<Task>, TransportError>;

    async fn complete(
        &self,
        task_id: &str,
        worker_id: &str,
        variables: VariableMap,
    ) -> Result<(), TransportError>;

    async fn fail(
        &self,
        task_id: &str,
        worker_id: &str,
        error_message: &str,
    ) -> Result<(), TransportError>;

    async fn extend_lock(
        &self,
        task_id: &str,
        worker_id: &str,
        new_duration: Duration,
    ) -> Result<(), TransportError>;

    async fn raise_business_error(
        &self,
        task_id: &str,
        worker_id: &str,
        error_code: &str,
    ) -> Result<(), TransportError>;
}
