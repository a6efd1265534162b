//! Lifecycle of one in-flight unit of work.

use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use {
    parking_lot::Mutex,
    serde::Serialize,
    serde_json::Value,
    tokio::{sync::watch, time::Instant},
    tokio_util::sync::CancellationToken,
    tracing::debug,
};

#[cfg(feature = "metrics")]
use switchyard_metrics::{counter, run as run_metrics};

use crate::{
    error::{Error, Result},
    events::{CancelReason, QueueEvent},
    manager::Shared,
    message::Payload,
    session::Session,
    steering::policy_for,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Waiting for lane admission.
    Pending,
    Running,
    /// Cancellation was requested while running; waiting for the executor to
    /// return.
    Cancelling,
    Completed,
    Failed,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "value", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed(Value),
    /// Cancelled before or during execution. Any output was discarded.
    Cancelled,
    Failed(String),
}

/// Answer of the steering hook.
#[derive(Debug, Clone, PartialEq)]
pub enum SteeringSignal {
    Continue,
    /// Fold these messages into the current work. Returned once per batch.
    Redirect(Payload),
    /// Stop as soon as possible.
    Abort,
}

/// Snapshot of a run.
#[derive(Debug, Clone)]
pub struct RunHandle {
    pub id: String,
    pub session_key: String,
    pub lane: String,
    pub state: RunState,
    pub created_at: Instant,
    /// Set once the lane admitted the run.
    pub started_at: Option<Instant>,
    pub cancel: CancellationToken,
}

struct RunInner {
    state: RunState,
    started_at: Option<Instant>,
    cancel_reason: Option<CancelReason>,
}

/// Owns one run's state and cancellation token and answers the executor's
/// steering polls.
pub struct RunController {
    id: String,
    session_key: String,
    lane: String,
    payload: Payload,
    cancel: CancellationToken,
    created_at: Instant,
    inner: Mutex<RunInner>,
    outcome: watch::Sender<Option<RunOutcome>>,
    session: Weak<Session>,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for RunController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunController")
            .field("id", &self.id)
            .field("session_key", &self.session_key)
            .field("lane", &self.lane)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl RunController {
    pub(crate) fn new(
        session: &Arc<Session>,
        payload: Payload,
        shared: Arc<Shared>,
    ) -> Arc<Self> {
        let (outcome, _) = watch::channel(None);
        Arc::new(Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_key: session.key().to_string(),
            lane: payload.lane.clone(),
            payload,
            cancel: CancellationToken::new(),
            created_at: Instant::now(),
            inner: Mutex::new(RunInner {
                state: RunState::Pending,
                started_at: None,
                cancel_reason: None,
            }),
            outcome,
            session: Arc::downgrade(session),
            shared,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn session_key(&self) -> &str {
        &self.session_key
    }

    pub fn lane(&self) -> &str {
        &self.lane
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn state(&self) -> RunState {
        self.inner.lock().state
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves when cancellation is requested.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    pub fn cancel_reason(&self) -> Option<CancelReason> {
        self.inner.lock().cancel_reason
    }

    /// How often the executor should call [`check_steering`](Self::check_steering).
    pub fn poll_interval(&self) -> Duration {
        self.shared.config.steering_poll
    }

    pub fn handle(&self) -> RunHandle {
        let inner = self.inner.lock();
        RunHandle {
            id: self.id.clone(),
            session_key: self.session_key.clone(),
            lane: self.lane.clone(),
            state: inner.state,
            created_at: self.created_at,
            started_at: inner.started_at,
            cancel: self.cancel.clone(),
        }
    }

    /// The pull-based steering hook. Cheap enough to call at every suspension
    /// point.
    pub fn check_steering(&self) -> SteeringSignal {
        if self.cancel.is_cancelled() {
            self.enter_cancelling();
            return SteeringSignal::Abort;
        }
        let Some(session) = self.session.upgrade() else {
            return SteeringSignal::Continue;
        };

        let signal = {
            let mut state = session.state.lock();
            let is_active = state.active.as_ref().is_some_and(|run| run.id == self.id);
            if !is_active {
                return SteeringSignal::Continue;
            }
            let ctx = self.shared.context();
            policy_for(state.mode).check_pending(&mut state, &ctx)
        };

        if let SteeringSignal::Redirect(payload) = &signal {
            debug!(
                session_key = %self.session_key,
                run_id = %self.id,
                messages = payload.len(),
                "redirect handed to running unit"
            );
            #[cfg(feature = "metrics")]
            counter!(run_metrics::REDIRECTS_TOTAL).increment(1);
            self.shared.emit(QueueEvent::Redirected {
                session_key: self.session_key.clone(),
                run_id: self.id.clone(),
                messages: payload.len(),
            });
        }
        signal
    }

    /// Resolves with the outcome once the run reaches a terminal state.
    pub async fn wait(&self) -> RunOutcome {
        let mut rx = self.outcome.subscribe();
        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(outcome) => (*outcome).clone(),
            Err(_) => None,
        };
        outcome.unwrap_or(RunOutcome::Cancelled)
    }

    /// The outcome, if the run already finished.
    pub fn outcome(&self) -> Option<RunOutcome> {
        self.outcome.borrow().clone()
    }

    /// Trip the cancellation token. Returns false if it was already tripped
    /// or the run has finished.
    pub(crate) fn request_cancel(&self, reason: CancelReason) -> bool {
        let mut inner = self.inner.lock();
        if inner.state.is_terminal() || self.cancel.is_cancelled() {
            return false;
        }
        inner.cancel_reason = Some(reason);
        if inner.state == RunState::Running {
            inner.state = RunState::Cancelling;
        }
        self.cancel.cancel();
        true
    }

    /// Lane admitted the run. Returns false if it was cancelled first.
    pub(crate) fn mark_running(&self) -> bool {
        let mut inner = self.inner.lock();
        if self.cancel.is_cancelled() || inner.state != RunState::Pending {
            return false;
        }
        inner.state = RunState::Running;
        inner.started_at = Some(Instant::now());
        true
    }

    /// Record the executor's result. Output of a cancelled run is discarded.
    pub(crate) fn finish(&self, result: Result<Value>) -> RunOutcome {
        let outcome = {
            let mut inner = self.inner.lock();
            let outcome = match result {
                _ if self.cancel.is_cancelled() => RunOutcome::Cancelled,
                Err(Error::Cancelled) => RunOutcome::Cancelled,
                Ok(value) => RunOutcome::Completed(value),
                Err(e) => RunOutcome::Failed(e.to_string()),
            };
            inner.state = match outcome {
                RunOutcome::Failed(_) => RunState::Failed,
                RunOutcome::Completed(_) | RunOutcome::Cancelled => RunState::Completed,
            };
            outcome
        };
        self.outcome.send_replace(Some(outcome.clone()));
        outcome
    }

    pub(crate) fn started_at(&self) -> Option<Instant> {
        self.inner.lock().started_at
    }

    fn enter_cancelling(&self) {
        let mut inner = self.inner.lock();
        if inner.state == RunState::Running {
            inner.state = RunState::Cancelling;
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod tests {
    use {
        super::*,
        crate::{QueueConfig, message::PendingMessage},
    };

    /// A controller whose session is already gone; steering always continues.
    pub(crate) fn detached_controller(session_key: &str) -> Arc<RunController> {
        let shared = Arc::new(Shared::new(QueueConfig::default()).unwrap());
        let session = Arc::new(Session::new(session_key, Default::default()));
        let msg = PendingMessage::new(1, "hello", "main", Instant::now(), Value::Null);
        let payload = Payload::compose(vec![msg], "\n").unwrap();
        RunController::new(&session, payload, shared)
    }

    #[test]
    fn pending_to_running_to_completed() {
        let run = detached_controller("s");
        assert_eq!(run.state(), RunState::Pending);
        assert!(run.mark_running());
        assert_eq!(run.state(), RunState::Running);
        assert!(run.handle().started_at.is_some());

        let outcome = run.finish(Ok(serde_json::json!("done")));
        assert_eq!(outcome, RunOutcome::Completed(serde_json::json!("done")));
        assert_eq!(run.state(), RunState::Completed);
    }

    #[test]
    fn cancel_while_running_enters_cancelling_and_discards_output() {
        let run = detached_controller("s");
        run.mark_running();
        assert!(run.request_cancel(CancelReason::Interrupt));
        assert!(!run.request_cancel(CancelReason::Abort));
        assert_eq!(run.state(), RunState::Cancelling);
        assert_eq!(run.cancel_reason(), Some(CancelReason::Interrupt));
        assert_eq!(run.check_steering(), SteeringSignal::Abort);

        assert_eq!(run.finish(Ok(Value::Null)), RunOutcome::Cancelled);
        assert_eq!(run.state(), RunState::Completed);
    }

    #[test]
    fn cancel_before_admission_skips_running() {
        let run = detached_controller("s");
        run.request_cancel(CancelReason::Abort);
        assert_eq!(run.state(), RunState::Pending);
        assert!(!run.mark_running());
        assert_eq!(run.finish(Err(Error::Cancelled)), RunOutcome::Cancelled);
        assert_eq!(run.state(), RunState::Completed);
    }

    #[test]
    fn executor_error_fails_the_run() {
        let run = detached_controller("s");
        run.mark_running();
        let outcome = run.finish(Err(Error::execution("boom")));
        assert_eq!(outcome, RunOutcome::Failed("execution failed: boom".into()));
        assert_eq!(run.state(), RunState::Failed);
        assert!(!run.request_cancel(CancelReason::Abort));
    }

    #[test]
    fn returned_cancelled_error_completes() {
        let run = detached_controller("s");
        run.mark_running();
        assert_eq!(run.finish(Err(Error::Cancelled)), RunOutcome::Cancelled);
        assert_eq!(run.state(), RunState::Completed);
    }

    #[tokio::test]
    async fn wait_resolves_after_finish() {
        let run = detached_controller("s");
        let waiter = {
            let run = Arc::clone(&run);
            tokio::spawn(async move { run.wait().await })
        };
        tokio::task::yield_now().await;
        run.mark_running();
        run.finish(Ok(Value::from(3)));
        assert_eq!(waiter.await.unwrap(), RunOutcome::Completed(Value::from(3)));
        assert_eq!(run.outcome(), Some(RunOutcome::Completed(Value::from(3))));
    }

    #[test]
    fn poll_interval_comes_from_config() {
        let run = detached_controller("s");
        assert_eq!(run.poll_interval(), Duration::from_millis(250));
    }
}
