//! Error types for the external task worker.

/// Top-level error type for the worker engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Handler error: {0}")]
    Handler(#[from] HandlerError),
}

/// Configuration-related errors. These fail fast, at construction or
/// registration time, and are never retried.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("subscription for <{topic}> already registered")]
    DuplicateSubscription { topic: String },

    #[error("invalid extension {extension}: {reason}")]
    InvalidExtension {
        extension: &'static str,
        reason: String,
    },

    #[error("invalid configuration value for {key}: {message}")]
    InvalidValue {
        key: &'static str,
        message: String,
    },

    #[error("no transport configured: provide a base url or a custom transport")]
    MissingTransport,
}

/// Errors raised by the task transport. During fetch these are non-fatal
/// and surface only on the event stream; during acknowledgement they are
/// routed to the generic error channel.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// A failure reported by a task handler. The display form is what reaches
/// the remote service as the task's error message.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("{0}")]
    Failed(String),

    /// A caught handler panic. The payload message is reported as-is so a
    /// panicking handler and an `Err`-returning handler produce the same
    /// failure report at the remote service.
    #[error("{0}")]
    Panicked(String),

    #[error("handler dropped its completion callback")]
    CallbackDropped,
}

impl HandlerError {
    /// Build a failure from any displayable message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self::Failed(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::Failed(message.to_string())
    }
}

impl From<anyhow::Error> for HandlerError {
    fn from(error: anyhow::Error) -> Self {
        Self::Failed(format!("{error:#}"))
    }
}

impl From<TransportError> for HandlerError {
    fn from(error: TransportError) -> Self {
        Self::Failed(error.to_string())
    }
}
