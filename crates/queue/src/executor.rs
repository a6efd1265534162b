//! The single outward call: running a payload.

use std::{future::Future, pin::Pin, sync::Arc, time::Duration};

use {async_trait::async_trait, serde_json::Value, tokio_util::sync::CancellationToken};

use crate::{
    error::Result,
    message::Payload,
    run::{RunController, SteeringSignal},
};

/// Everything an executor gets for one run.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub run_id: String,
    pub session_key: String,
    pub lane: String,
    pub payload: Payload,
    /// Tripped on interrupt, abort, or shutdown. Return
    /// [`Error::Cancelled`](crate::Error::Cancelled) (or anything) promptly
    /// once it fires; the output is discarded either way.
    pub cancel: CancellationToken,
    pub controller: Arc<RunController>,
}

impl DispatchRequest {
    /// Shorthand for [`RunController::check_steering`].
    pub fn check_steering(&self) -> SteeringSignal {
        self.controller.check_steering()
    }

    pub fn poll_interval(&self) -> Duration {
        self.controller.poll_interval()
    }
}

/// Runs payloads. Called outside every engine lock, from its own task.
/// Panics are caught and reported as execution failures.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn dispatch(&self, request: DispatchRequest) -> Result<Value>;
}

/// Closure form of [`Executor`].
pub type ExecutorFn = Arc<
    dyn Fn(DispatchRequest) -> Pin<Box<dyn Future<Output = Result<Value>> + Send>> + Send + Sync,
>;

struct FnExecutor {
    f: ExecutorFn,
}

#[async_trait]
impl Executor for FnExecutor {
    async fn dispatch(&self, request: DispatchRequest) -> Result<Value> {
        (self.f)(request).await
    }
}

/// Wrap an async closure as an [`Executor`].
pub fn executor_fn<F, Fut>(f: F) -> Arc<dyn Executor>
where
    F: Fn(DispatchRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    let f: ExecutorFn = Arc::new(move |request| Box::pin(f(request)));
    Arc::new(FnExecutor { f })
}
