//! Task handlers.
//!
//! [`TaskHandler`] is the canonical interface: one async invocation that
//! yields a [`TaskResult`] or a [`HandlerError`]. [`handler_fn`] adapts
//! plain async closures; [`callback_handler`] adapts the legacy
//! two-argument callback convention, collapsing both styles into the same
//! awaited-result abstraction before the engine ever sees them.

use std::future::Future;

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::error::HandlerError;
use crate::task::{TaskContext, TaskResult};

/// Result of one handler invocation.
pub type HandlerResult = Result<TaskResult, HandlerError>;

/// Work performed for one leased task.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, context: TaskContext) -> HandlerResult;
}

/// Wrap an async closure as a [`TaskHandler`].
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(TaskContext) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send,
{
    FnHandler { f }
}

pub struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F>
where
    F: Fn(TaskContext) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send,
{
    async fn handle(&self, context: TaskContext) -> HandlerResult {
        (self.f)(context).await
    }
}

/// Completion continuation handed to callback-style handlers. Consumed by
/// exactly one of [`complete`](Self::complete) or [`error`](Self::error);
/// dropping it unconsumed reports the task as failed.
pub struct TaskCallback {
    tx: oneshot::Sender<HandlerResult>,
}

impl TaskCallback {
    pub fn complete(self, result: TaskResult) {
        let _ = self.tx.send(Ok(result));
    }

    pub fn error(self, error: impl Into<HandlerError>) {
        let _ = self.tx.send(Err(error.into()));
    }
}

/// Adapt a two-argument callback-style function into a [`TaskHandler`].
pub fn callback_handler<F>(f: F) -> CallbackHandler<F>
where
    F: Fn(TaskContext, TaskCallback) + Send + Sync,
{
    CallbackHandler { f }
}

pub struct CallbackHandler<F> {
    f: F,
}

#[async_trait]
impl<F> TaskHandler for CallbackHandler<F>
where
    F: Fn(TaskContext, TaskCallback) + Send + Sync,
{
    async fn handle(&self, context: TaskContext) -> HandlerResult {
        let (tx, rx) = oneshot::channel();

        (self.f)(context, TaskCallback { tx });

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(HandlerError::CallbackDropped),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::events::EventBus;
    use crate::task::Task;
    use crate::transport::{FetchAndLockRequest, TaskTransport};
    use crate::variables::{VariableMap, Variables};
    use crate::error::TransportError;

    struct NoopTransport;

    #[async_trait]
    impl TaskTransport for NoopTransport {
        async fn fetch_and_lock(
            &self,
            _request: FetchAndLockRequest,
        ) -> Result<Vec<Task>, TransportError> {
            Ok(Vec::new())
        }

        async fn complete(
            &self,
            _task_id: &str,
            _worker_id: &str,
            _variables: VariableMap,
        ) -> Result<(), TransportError> {
            Ok(())
        }

        async fn fail(
            &self,
            _task_id: &str,
            _worker_id: &str,
            _error_message: &str,
        ) -> Result<(), TransportError> {
            Ok(())
        }

        async fn extend_lock(
            &self,
            _task_id: &str,
            _worker_id: &str,
            _new_duration: Duration,
        ) -> Result<(), TransportError> {
            Ok(())
        }

        async fn raise_business_error(
            &self,
            _task_id: &str,
            _worker_id: &str,
            _error_code: &str,
        ) -> Result<(), TransportError> {
            Ok(())
        }
    }

    fn context() -> TaskContext {
        TaskContext::new(
            Task::new("task-1", "work:A"),
            Variables::new(),
            "worker-1".to_string(),
            Arc::new(NoopTransport),
            EventBus::new(),
        )
    }

    #[tokio::test]
    async fn async_closure_handler() {
        let handler = handler_fn(|_context| async { Ok(TaskResult::complete()) });

        assert!(handler.handle(context()).await.is_ok());
    }

    #[tokio::test]
    async fn callback_handler_completes() {
        let handler = callback_handler(|_context, callback: TaskCallback| {
            callback.complete(TaskResult::business_error("some-error"));
        });

        match handler.handle(context()).await {
            Ok(TaskResult::BusinessError { code }) => assert_eq!(code, "some-error"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn callback_handler_reports_error() {
        let handler = callback_handler(|_context, callback: TaskCallback| {
            callback.error("could not execute");
        });

        let error = handler.handle(context()).await.unwrap_err();
        assert_eq!(error.to_string(), "could not execute");
    }

    #[tokio::test]
    async fn dropped_callback_is_a_failure() {
        let handler = callback_handler(|_context, callback: TaskCallback| {
            drop(callback);
        });

        let error = handler.handle(context()).await.unwrap_err();
        assert!(matches!(error, HandlerError::CallbackDropped));
    }
}
