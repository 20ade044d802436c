//! Optional behaviors layered onto a worker at build time.
//!
//! An extension gets two hooks: one to adjust the transport before the HTTP
//! client is built, and one to attach itself to the finished worker
//! (typically by registering an event observer).

mod auth;
mod backoff;
mod logger;
mod metrics;

pub use auth::{Auth, BasicAuth};
pub use backoff::{Backoff, BackoffOptions};
pub use logger::Logger;
pub use metrics::Metrics;

use crate::error::ConfigError;
use crate::http::TransportConfig;
use crate::worker::Worker;

/// A worker extension. Hooks run in the order extensions were added to the
/// builder.
pub trait WorkerExtension {
    /// Adjust the transport configuration before the HTTP client is built.
    /// Not called when the worker uses a custom transport.
    fn configure_transport(&self, _config: &mut TransportConfig) -> Result<(), ConfigError> {
        Ok(())
    }

    /// Attach to the built worker.
    fn install(&self, _worker: &Worker) -> Result<(), ConfigError> {
        Ok(())
    }
}
