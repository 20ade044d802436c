//! Long-running worker engine for lock-based external task queues.
//!
//! A [`Worker`] polls a remote service for tasks on subscribed topics,
//! locks a batch per fetch, runs the registered [`TaskHandler`] for each
//! task concurrently, and reports the outcome back (complete, failure, or
//! business error). Polling is driven by a single rescheduling timer whose
//! interval can be tuned at runtime, notably by the
//! [`Backoff`](extensions::Backoff) extension.
//!
//! ```no_run
//! use exttask::{handler_fn, TaskResult, Worker};
//! use exttask::extensions::{Backoff, Logger};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), exttask::Error> {
//!     let worker = Worker::builder()
//!         .base_url("http://localhost:8080/engine-rest")
//!         .extension(Logger::new())
//!         .extension(Backoff::default())
//!         .build()?;
//!
//!     worker.subscribe("invoice:process", handler_fn(|context| async move {
//!         let invoice_id = context.variables.get("invoiceId").cloned();
//!         tracing::info!(?invoice_id, "processing invoice");
//!         Ok(TaskResult::complete())
//!     }))?;
//!
//!     worker.start();
//!     tokio::signal::ctrl_c().await.ok();
//!     worker.stop();
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod extensions;
pub mod handler;
pub mod http;
pub mod subscription;
pub mod task;
pub mod transport;
pub mod variables;
pub mod worker;

pub use config::{ConfigUpdate, WorkerConfig};
pub use error::{ConfigError, Error, HandlerError, TransportError};
pub use events::{EventObserver, PollReason, WorkerEvent};
pub use handler::{
    callback_handler, handler_fn, HandlerResult, TaskCallback, TaskHandler,
};
pub use http::{HttpTransport, TransportConfig};
pub use subscription::{SubscribeOptions, Subscription};
pub use task::{Task, TaskContext, TaskResult};
pub use transport::{FetchAndLockRequest, TaskTransport, TopicRequest};
pub use variables::{
    decode_variables, encode_variables, Value, ValueDescriptor, VariableMap, Variables,
};
pub use worker::{ConfigHandle, Worker, WorkerBuilder, WorkerState};
