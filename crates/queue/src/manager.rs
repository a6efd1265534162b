//! The façade: routes inbound messages to sessions, applies each session's
//! steering policy, admits runs through lanes, and drives the executor.
//!
//! Lock order is session state, then lane or run state. The session registry
//! is never touched while a session lock is held.

use std::{
    any::Any,
    collections::BTreeMap,
    panic::AssertUnwindSafe,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use {
    dashmap::DashMap,
    futures::{FutureExt, future::join_all},
    serde_json::Value,
    switchyard_config::SwitchyardConfig,
    tokio::{runtime::Handle, sync::broadcast, time::Instant},
    tracing::{debug, error, info, warn},
};

#[cfg(feature = "metrics")]
use switchyard_metrics::{
    counter, gauge, histogram, labels, lane as lane_metrics, queue as queue_metrics,
    run as run_metrics,
};

use crate::{
    MessageQueueMode,
    config::QueueConfig,
    drop_policy::DropPolicy,
    error::{Context, Error, Result},
    events::{CancelReason, DropReason, QueueEvent},
    executor::{DispatchRequest, Executor},
    lane::{AdmissionTicket, Lane, LaneStats},
    message::{InboundMessage, Payload, PendingMessage},
    run::{RunController, RunOutcome},
    session::{Session, SessionState, SessionStatus},
    steering::{Decision, Dropped, PolicyContext, policy_for},
};

/// State shared between the manager and its run controllers.
pub(crate) struct Shared {
    pub(crate) config: QueueConfig,
    pub(crate) drop_policy: DropPolicy,
    events: broadcast::Sender<QueueEvent>,
}

impl Shared {
    pub(crate) fn new(config: QueueConfig) -> Result<Self> {
        config.validate()?;
        let drop_policy = config.drop_policy()?;
        let (events, _) = broadcast::channel(config.event_capacity);
        Ok(Self {
            config,
            drop_policy,
            events,
        })
    }

    pub(crate) fn emit(&self, event: QueueEvent) {
        let _ = self.events.send(event);
    }

    pub(crate) fn context(&self) -> PolicyContext<'_> {
        PolicyContext {
            drop_policy: &self.drop_policy,
            debounce: self.config.debounce,
            separator: &self.config.separator,
            now: Instant::now(),
        }
    }
}

/// What happened to an enqueued message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// A run was created for it. It may still be waiting for its lane.
    Dispatched,
    /// Held in the collect buffer until `flush_at` (moved by later arrivals).
    Buffered { flush_at: Instant },
    /// Waiting behind the session's current run.
    Queued { position: usize },
    /// Will be handed to the running unit at its next steering poll.
    Redirected,
    /// The running unit was told to stop; this message runs next.
    Interrupting,
    /// Discarded by drop-newest.
    Rejected,
}

#[derive(Debug, Clone)]
pub struct EnqueueReceipt {
    pub seq: u64,
    pub admission: Admission,
    /// The run started as a consequence of this call, if any.
    pub run: Option<Arc<RunController>>,
}

/// A run created under a session lock, spawned once the lock is released.
struct Start {
    session: Arc<Session>,
    controller: Arc<RunController>,
    ticket: AdmissionTicket,
}

pub struct QueueManager {
    shared: Arc<Shared>,
    lanes: BTreeMap<String, Arc<Lane>>,
    sessions: DashMap<String, Arc<Session>>,
    executor: Arc<dyn Executor>,
    runtime: Handle,
    next_seq: AtomicU64,
    closed: AtomicBool,
}

impl QueueManager {
    /// Build a manager. Must be called inside a Tokio runtime; timers and
    /// runs are spawned onto it.
    pub fn new(config: QueueConfig, executor: Arc<dyn Executor>) -> Result<Arc<Self>> {
        let runtime =
            Handle::try_current().context("queue manager must be created inside a tokio runtime")?;
        let shared = Shared::new(config)?;
        let lanes = shared
            .config
            .lanes
            .iter()
            .map(|(name, limit)| (name.clone(), Arc::new(Lane::new(name.clone(), *limit))))
            .collect();

        info!(
            lanes = ?shared.config.lanes,
            default_mode = %shared.config.default_mode,
            debounce_ms = shared.config.debounce.as_millis() as u64,
            cap = shared.config.cap,
            drop_strategy = %shared.config.drop_strategy,
            "queue manager started"
        );

        Ok(Arc::new(Self {
            shared: Arc::new(shared),
            lanes,
            sessions: DashMap::new(),
            executor,
            runtime,
            next_seq: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }))
    }

    pub fn from_config(config: &SwitchyardConfig, executor: Arc<dyn Executor>) -> Result<Arc<Self>> {
        Self::new(QueueConfig::from_settings(config)?, executor)
    }

    pub fn config(&self) -> &QueueConfig {
        &self.shared.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.shared.events.subscribe()
    }

    pub fn enqueue(
        self: &Arc<Self>,
        session_key: &str,
        lane: &str,
        content: impl Into<String>,
        mode: Option<MessageQueueMode>,
    ) -> Result<EnqueueReceipt> {
        let mut inbound = InboundMessage::new(session_key, content).lane(lane);
        inbound.mode = mode;
        self.enqueue_message(inbound)
    }

    pub fn enqueue_message(self: &Arc<Self>, inbound: InboundMessage) -> Result<EnqueueReceipt> {
        if self.is_closed() {
            return Err(Error::ShuttingDown);
        }
        let InboundMessage {
            session_key,
            lane,
            content,
            mode,
            metadata,
        } = inbound;
        let lane = lane.unwrap_or_else(|| self.shared.config.default_lane.clone());
        if !self.lanes.contains_key(&lane) {
            return Err(Error::unknown_lane(lane));
        }

        loop {
            let session = self.session(&session_key);
            let mut state = session.state.lock();
            if state.removed {
                continue;
            }

            let mut start = match mode {
                Some(mode) => self.apply_mode(&session, &mut state, mode),
                None => None,
            };

            let now = Instant::now();
            state.last_activity = now;
            let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
            let msg = PendingMessage::new(seq, content, lane.as_str(), now, metadata);

            let mode = state.mode;
            let result = policy_for(mode).admit(&mut state, msg, &self.shared.context());

            #[cfg(feature = "metrics")]
            counter!(queue_metrics::MESSAGES_ENQUEUED_TOTAL, labels::LANE => lane.clone(), labels::MODE => mode.as_str())
                .increment(1);
            self.shared.emit(QueueEvent::Enqueued {
                session_key: session_key.clone(),
                lane: lane.clone(),
                seq,
                mode,
            });
            for dropped in &result.dropped {
                self.report_drop(&session_key, *dropped);
            }
            let rejected = result
                .dropped
                .iter()
                .any(|d| d.seq == seq && d.reason == DropReason::Rejected);

            let admission = match result.decision {
                Decision::StartIfIdle => {
                    if start.is_none() {
                        start = self.start_next(&session, &mut state);
                    }
                    if state.pending.is_empty() {
                        Admission::Dispatched
                    } else {
                        Admission::Queued {
                            position: state.pending.len(),
                        }
                    }
                },
                Decision::Debounce {
                    generation,
                    deadline,
                } => {
                    self.arm_timer(&session, &mut state, generation, deadline);
                    Admission::Buffered { flush_at: deadline }
                },
                Decision::Queued { position } => Admission::Queued { position },
                Decision::Redirect => Admission::Redirected,
                Decision::Interrupt => {
                    if let Some(run) = state.active.clone() {
                        self.cancel_run(&run, CancelReason::Interrupt);
                    }
                    Admission::Interrupting
                },
            };
            let admission = if rejected {
                Admission::Rejected
            } else {
                admission
            };

            debug!(
                session_key = %session_key,
                lane = %lane,
                seq,
                mode = %mode,
                admission = ?admission,
                "message enqueued"
            );
            drop(state);

            let run = start.as_ref().map(|s| Arc::clone(&s.controller));
            if let Some(start) = start {
                self.spawn_run(start);
            }
            return Ok(EnqueueReceipt {
                seq,
                admission,
                run,
            });
        }
    }

    /// Change a session's mode for every signal received afterwards. Creates
    /// the session if needed. Returns the previous mode.
    pub fn set_mode(
        self: &Arc<Self>,
        session_key: &str,
        mode: MessageQueueMode,
    ) -> Result<MessageQueueMode> {
        if self.is_closed() {
            return Err(Error::ShuttingDown);
        }
        loop {
            let session = self.session(session_key);
            let mut state = session.state.lock();
            if state.removed {
                continue;
            }
            let previous = state.mode;
            let start = self.apply_mode(&session, &mut state, mode);
            drop(state);
            if let Some(start) = start {
                self.spawn_run(start);
            }
            return Ok(previous);
        }
    }

    pub fn mode(&self, session_key: &str) -> Option<MessageQueueMode> {
        let session = self.get(session_key)?;
        Some(session.state.lock().mode)
    }

    /// Cooperatively cancel the session's active run. Buffered messages stay
    /// and run next.
    pub fn abort(&self, session_key: &str) -> bool {
        let Some(session) = self.get(session_key) else {
            return false;
        };
        let state = session.state.lock();
        match &state.active {
            Some(run) => self.cancel_run(run, CancelReason::Abort),
            None => false,
        }
    }

    /// Discard everything buffered for the session without touching its
    /// active run. Returns the number of discarded entries.
    pub fn cancel_queued(&self, session_key: &str) -> usize {
        let Some(session) = self.get(session_key) else {
            return 0;
        };
        let count = {
            let mut state = session.state.lock();
            state.cancel_timer();
            let mut discarded = state.pending.take_all();
            discarded.extend(state.redirect.drain(..));
            for msg in &discarded {
                self.report_drop(session_key, Dropped {
                    seq: msg.seq(),
                    reason: DropReason::Cancelled,
                });
            }
            discarded.len()
        };
        session.idle.notify_waiters();
        count
    }

    /// What would be delivered next: the redirect buffer if it holds
    /// anything, else the pending buffer. Nothing is consumed.
    pub fn peek_pending(&self, session_key: &str) -> Option<Payload> {
        let session = self.get(session_key)?;
        let state = session.state.lock();
        let separator = &self.shared.config.separator;
        if state.redirect.is_empty() {
            Payload::compose(state.pending.messages().cloned().collect(), separator)
        } else {
            Payload::compose(state.redirect.iter().cloned().collect(), separator)
        }
    }

    /// Forget an idle session. Refuses sessions with an active run or
    /// buffered messages.
    pub fn remove_session(&self, session_key: &str) -> bool {
        let removed = self
            .sessions
            .remove_if(session_key, |_, session| {
                let mut state = session.state.lock();
                if !state.is_idle() {
                    return false;
                }
                state.removed = true;
                state.cancel_timer();
                true
            })
            .is_some();
        if removed {
            debug!(session_key, "session removed");
            #[cfg(feature = "metrics")]
            gauge!(queue_metrics::SESSIONS_ACTIVE).set(self.sessions.len() as f64);
        }
        removed
    }

    pub fn session_status(&self, session_key: &str) -> Option<SessionStatus> {
        self.get(session_key).map(|s| s.status())
    }

    /// Keys of every tracked session, sorted.
    pub fn sessions(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.sessions.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn active_run(&self, session_key: &str) -> Option<Arc<RunController>> {
        let session = self.get(session_key)?;
        session.state.lock().active.clone()
    }

    pub fn lane_stats(&self) -> Vec<LaneStats> {
        self.lanes.values().map(|lane| lane.stats()).collect()
    }

    /// Resolves once the session has no active run and nothing buffered.
    pub async fn wait_idle(&self, session_key: &str) {
        if let Some(session) = self.get(session_key) {
            session.wait_idle().await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Refuse new messages, stop debounce timers, discard buffered messages,
    /// cancel every run, and wait for the runs to finish.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("queue manager shutting down");

        let sessions: Vec<_> = self.sessions.iter().map(|e| Arc::clone(e.value())).collect();
        let mut runs = Vec::new();
        for session in &sessions {
            let mut state = session.state.lock();
            state.cancel_timer();
            let mut discarded = state.pending.take_all();
            discarded.extend(state.redirect.drain(..));
            for msg in &discarded {
                self.report_drop(session.key(), Dropped {
                    seq: msg.seq(),
                    reason: DropReason::Cancelled,
                });
            }
            if let Some(run) = &state.active {
                self.cancel_run(run, CancelReason::Shutdown);
                runs.push(Arc::clone(run));
            }
        }
        for lane in self.lanes.values() {
            lane.close();
        }

        join_all(runs.iter().map(|run| run.wait())).await;
        for session in &sessions {
            session.idle.notify_waiters();
        }
        info!(runs = runs.len(), "queue manager stopped");
    }

    fn get(&self, session_key: &str) -> Option<Arc<Session>> {
        self.sessions.get(session_key).map(|e| Arc::clone(e.value()))
    }

    fn session(&self, session_key: &str) -> Arc<Session> {
        if let Some(session) = self.get(session_key) {
            return session;
        }
        let session = Arc::clone(
            self.sessions
                .entry(session_key.to_string())
                .or_insert_with(|| {
                    debug!(session_key, "session created");
                    Arc::new(Session::new(session_key, self.shared.config.default_mode))
                })
                .value(),
        );
        #[cfg(feature = "metrics")]
        gauge!(queue_metrics::SESSIONS_ACTIVE).set(self.sessions.len() as f64);
        session
    }

    fn apply_mode(
        self: &Arc<Self>,
        session: &Arc<Session>,
        state: &mut SessionState,
        mode: MessageQueueMode,
    ) -> Option<Start> {
        let from = state.mode;
        if from == mode {
            return None;
        }
        state.mode = mode;
        info!(session_key = %session.key(), from = %from, to = %mode, "session mode changed");
        #[cfg(feature = "metrics")]
        counter!(queue_metrics::MODE_CHANGES_TOTAL, labels::MODE => mode.as_str()).increment(1);
        self.shared.emit(QueueEvent::ModeChanged {
            session_key: session.key().to_string(),
            from,
            to: mode,
        });

        // Redirects only build up while the pending buffer is empty. Once the
        // session leaves steer they can no longer reach the running unit, so
        // they become the head of the pending buffer.
        if from == MessageQueueMode::Steer && !state.redirect.is_empty() {
            let leftovers: Vec<_> = state.redirect.drain(..).collect();
            state.pending.prepend(leftovers);
        }

        if mode == MessageQueueMode::Collect {
            if !state.pending.is_empty() {
                let now = Instant::now();
                let generation = state.pending.rearm(now, self.shared.config.debounce);
                self.arm_timer(session, state, generation, now + self.shared.config.debounce);
            }
        } else if from == MessageQueueMode::Collect {
            state.cancel_timer();
            state.pending.disarm();
        }
        self.start_next(session, state)
    }

    fn arm_timer(
        self: &Arc<Self>,
        session: &Arc<Session>,
        state: &mut SessionState,
        generation: u64,
        deadline: Instant,
    ) {
        state.cancel_timer();
        let manager = Arc::downgrade(self);
        let weak_session = Arc::downgrade(session);
        let task = self.runtime.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let (Some(manager), Some(session)) = (manager.upgrade(), weak_session.upgrade()) else {
                return;
            };
            manager.on_debounce(&session, generation);
        });
        state.timer = Some(task.abort_handle());
    }

    fn on_debounce(self: &Arc<Self>, session: &Arc<Session>, generation: u64) {
        let start = {
            let mut state = session.state.lock();
            if !state.pending.mark_ready(generation) {
                return;
            }
            state.timer = None;
            let count = state.pending.len();
            debug!(
                session_key = %session.key(),
                count,
                busy = state.is_busy(),
                "debounce elapsed"
            );
            #[cfg(feature = "metrics")]
            {
                counter!(queue_metrics::DEBOUNCE_FLUSHES_TOTAL).increment(1);
                histogram!(queue_metrics::FLUSH_BATCH_SIZE).record(count as f64);
            }
            self.shared.emit(QueueEvent::Flushed {
                session_key: session.key().to_string(),
                count,
            });
            self.start_next(session, &mut state)
        };
        if let Some(start) = start {
            self.spawn_run(start);
        }
    }

    /// Create the session's next run if it is idle and has something to run.
    /// Leftover redirect messages go first; the pending buffer is always empty
    /// while they exist, so arrival order holds.
    fn start_next(&self, session: &Arc<Session>, state: &mut SessionState) -> Option<Start> {
        if state.active.is_some() || state.removed || self.is_closed() {
            return None;
        }
        let ctx = self.shared.context();
        let payload = if state.redirect.is_empty() {
            let drained = policy_for(state.mode).next_dispatch(state, &ctx);
            for msg in &drained.superseded {
                self.report_drop(session.key(), Dropped {
                    seq: msg.seq(),
                    reason: DropReason::Superseded,
                });
            }
            drained.payload
        } else {
            Payload::compose(state.redirect.drain(..).collect(), ctx.separator)
        }?;

        let Some(lane) = self.lanes.get(&payload.lane) else {
            warn!(session_key = %session.key(), lane = %payload.lane, "payload for unknown lane discarded");
            return None;
        };
        let controller = RunController::new(session, payload, Arc::clone(&self.shared));
        let ticket = lane.ticket();
        state.active = Some(Arc::clone(&controller));

        debug!(
            session_key = %session.key(),
            run_id = %controller.id(),
            lane = %controller.lane(),
            messages = controller.payload().len(),
            "run scheduled"
        );
        self.shared.emit(QueueEvent::Scheduled {
            session_key: session.key().to_string(),
            run_id: controller.id().to_string(),
            lane: controller.lane().to_string(),
            messages: controller.payload().len(),
        });
        Some(Start {
            session: Arc::clone(session),
            controller,
            ticket,
        })
    }

    fn spawn_run(self: &Arc<Self>, start: Start) {
        let manager = Arc::clone(self);
        self.runtime.spawn(manager.drive(start));
    }

    async fn drive(self: Arc<Self>, start: Start) {
        let Start {
            session,
            controller,
            ticket,
        } = start;
        let waiting_since = Instant::now();

        let admitted = tokio::select! {
            biased;
            () = controller.cancelled() => Err(Error::Cancelled),
            slot = ticket.admitted() => slot,
        };

        let result = match admitted {
            Ok(slot) if controller.mark_running() => {
                #[cfg(feature = "metrics")]
                {
                    histogram!(lane_metrics::ADMISSION_WAIT_SECONDS, labels::LANE => controller.lane().to_string())
                        .record(waiting_since.elapsed().as_secs_f64());
                    counter!(run_metrics::DISPATCHED_TOTAL, labels::LANE => controller.lane().to_string())
                        .increment(1);
                    self.record_lane_gauges(controller.lane());
                }
                info!(
                    session_key = %controller.session_key(),
                    run_id = %controller.id(),
                    lane = %controller.lane(),
                    messages = controller.payload().len(),
                    waited_ms = waiting_since.elapsed().as_millis() as u64,
                    "run started"
                );
                self.shared.emit(QueueEvent::Started {
                    session_key: controller.session_key().to_string(),
                    run_id: controller.id().to_string(),
                    lane: controller.lane().to_string(),
                });

                let request = DispatchRequest {
                    run_id: controller.id().to_string(),
                    session_key: controller.session_key().to_string(),
                    lane: controller.lane().to_string(),
                    payload: controller.payload().clone(),
                    cancel: controller.cancellation_token(),
                    controller: Arc::clone(&controller),
                };
                let result = match AssertUnwindSafe(self.executor.dispatch(request))
                    .catch_unwind()
                    .await
                {
                    Ok(result) => result,
                    Err(panic) => Err(Error::execution(format!(
                        "executor panicked: {}",
                        panic_message(&*panic)
                    ))),
                };
                drop(slot);
                result
            },
            Ok(_slot) => Err(Error::Cancelled),
            Err(e) => Err(e),
        };

        self.finish_run(&session, &controller, result);
    }

    fn finish_run(
        self: &Arc<Self>,
        session: &Arc<Session>,
        controller: &Arc<RunController>,
        result: Result<Value>,
    ) {
        let start = {
            let mut state = session.state.lock();
            let outcome = controller.finish(result);
            let duration = controller
                .started_at()
                .map(|at| at.elapsed())
                .unwrap_or_default();

            let error = match &outcome {
                RunOutcome::Completed(_) => {
                    info!(
                        session_key = %controller.session_key(),
                        run_id = %controller.id(),
                        duration_ms = duration.as_millis() as u64,
                        "run completed"
                    );
                    None
                },
                RunOutcome::Cancelled => {
                    info!(
                        session_key = %controller.session_key(),
                        run_id = %controller.id(),
                        reason = controller.cancel_reason().map(|r| r.as_str()).unwrap_or("executor"),
                        "run cancelled"
                    );
                    None
                },
                RunOutcome::Failed(message) => {
                    error!(
                        session_key = %controller.session_key(),
                        run_id = %controller.id(),
                        error = %message,
                        "run failed"
                    );
                    Some(message.clone())
                },
            };

            #[cfg(feature = "metrics")]
            {
                let label = match &outcome {
                    RunOutcome::Completed(_) => "completed",
                    RunOutcome::Cancelled => "cancelled",
                    RunOutcome::Failed(_) => "failed",
                };
                counter!(run_metrics::FINISHED_TOTAL, labels::OUTCOME => label).increment(1);
                if controller.started_at().is_some() {
                    histogram!(run_metrics::DURATION_SECONDS, labels::LANE => controller.lane().to_string())
                        .record(duration.as_secs_f64());
                }
                self.record_lane_gauges(controller.lane());
            }

            self.shared.emit(QueueEvent::Finished {
                session_key: controller.session_key().to_string(),
                run_id: controller.id().to_string(),
                state: controller.state(),
                error,
                duration_ms: duration.as_millis() as u64,
            });

            if state
                .active
                .as_ref()
                .is_some_and(|active| Arc::ptr_eq(active, controller))
            {
                state.active = None;
            }
            self.start_next(session, &mut state)
        };

        session.idle.notify_waiters();
        if let Some(start) = start {
            self.spawn_run(start);
        }
    }

    fn cancel_run(&self, run: &RunController, reason: CancelReason) -> bool {
        if !run.request_cancel(reason) {
            return false;
        }
        warn!(
            session_key = %run.session_key(),
            run_id = %run.id(),
            reason = reason.as_str(),
            "run cancellation requested"
        );
        #[cfg(feature = "metrics")]
        counter!(run_metrics::CANCELLATIONS_TOTAL, labels::REASON => reason.as_str()).increment(1);
        self.shared.emit(QueueEvent::CancelRequested {
            session_key: run.session_key().to_string(),
            run_id: run.id().to_string(),
            reason,
        });
        true
    }

    fn report_drop(&self, session_key: &str, dropped: Dropped) {
        warn!(
            session_key,
            seq = dropped.seq,
            reason = dropped.reason.as_str(),
            "message dropped"
        );
        #[cfg(feature = "metrics")]
        {
            counter!(queue_metrics::MESSAGES_DROPPED_TOTAL, labels::REASON => dropped.reason.as_str())
                .increment(1);
            if matches!(
                dropped.reason,
                DropReason::Evicted | DropReason::Rejected | DropReason::Collapsed
            ) {
                counter!(queue_metrics::CAPACITY_EXCEEDED_TOTAL).increment(1);
            }
        }
        self.shared.emit(QueueEvent::Dropped {
            session_key: session_key.to_string(),
            seq: dropped.seq,
            reason: dropped.reason,
        });
    }

    #[cfg(feature = "metrics")]
    fn record_lane_gauges(&self, lane: &str) {
        if let Some(lane) = self.lanes.get(lane) {
            let stats = lane.stats();
            gauge!(lane_metrics::ACTIVE_RUNS, labels::LANE => stats.name.clone()).set(stats.active as f64);
            gauge!(lane_metrics::WAITING_TICKETS, labels::LANE => stats.name).set(stats.waiting as f64);
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
