//! HTTP transport for the external-task REST protocol.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use serde_json::json;
use tracing::trace;

use crate::error::{ConfigError, TransportError};
use crate::task::Task;
use crate::transport::{FetchAndLockRequest, TaskTransport};
use crate::variables::VariableMap;

/// Connection settings for [`HttpTransport`]. Extensions may add headers
/// before the client is built.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    base_url: String,
    headers: Vec<(String, String)>,
}

impl TransportConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            headers: Vec::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Add a default header sent with every request.
    pub fn push_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.push((name.into(), value.into()));
    }
}

/// [`TaskTransport`] over the service's REST API.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(config: TransportConfig) -> Result<Self, ConfigError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let name = HeaderName::try_from(name.as_str()).map_err(|e| {
                ConfigError::InvalidValue {
                    key: "headers",
                    message: format!("{name}: {e}"),
                }
            })?;
            let value =
                HeaderValue::try_from(value.as_str()).map_err(|e| ConfigError::InvalidValue {
                    key: "headers",
                    message: format!("{name}: {e}"),
                })?;
            headers.insert(name, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| ConfigError::InvalidValue {
                key: "transport",
                message: e.to_string(),
            })?;

        Ok(Self {
            client,
            base_url: config.base_url,
        })
    }

    async fn post_json<B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response, TransportError> {
        let url = format!("{}{path}", self.base_url);
        trace!(url = %url, "POST");

        let response = self.client.post(&url).json(body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response)
    }
}

#[async_trait]
impl TaskTransport for HttpTransport {
    async fn fetch_and_lock(
        &self,
        request: FetchAndLockRequest,
    ) -> Result<Vec<Task>, TransportError> {
        let response = self
            .post_json("/external-task/fetchAndLock", &request)
            .await?;
        let tasks = response.json::<Vec<Task>>().await?;
        Ok(tasks)
    }

    async fn complete(
        &self,
        task_id: &str,
        worker_id: &str,
        variables: VariableMap,
    ) -> Result<(), TransportError> {
        self.post_json(
            &format!("/external-task/{task_id}/complete"),
            &json!({
                "workerId": worker_id,
                "variables": variables,
            }),
        )
        .await?;
        Ok(())
    }

    async fn fail(
        &self,
        task_id: &str,
        worker_id: &str,
        error_message: &str,
    ) -> Result<(), TransportError> {
        self.post_json(
            &format!("/external-task/{task_id}/failure"),
            &json!({
                "workerId": worker_id,
                "errorMessage": error_message,
            }),
        )
        .await?;
        Ok(())
    }

    async fn extend_lock(
        &self,
        task_id: &str,
        worker_id: &str,
        new_duration: Duration,
    ) -> Result<(), TransportError> {
        self.post_json(
            &format!("/external-task/{task_id}/extendLock"),
            &json!({
                "workerId": worker_id,
                "newDuration": new_duration.as_millis() as u64,
            }),
        )
        .await?;
        Ok(())
    }

    async fn raise_business_error(
        &self,
        task_id: &str,
        worker_id: &str,
        error_code: &str,
    ) -> Result<(), TransportError> {
        self.post_json(
            &format!("/external-task/{task_id}/bpmnError"),
            &json!({
                "workerId": worker_id,
                "errorCode": error_code,
            }),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slash_is_stripped() {
        let config = TransportConfig::new("http://localhost:8080/engine-rest/");
        assert_eq!(config.base_url(), "http://localhost:8080/engine-rest");
    }

    #[test]
    fn rejects_invalid_header_name() {
        let mut config = TransportConfig::new("http://localhost:8080");
        config.push_header("bad header", "value");
        assert!(HttpTransport::new(config).is_err());
    }
}
