//! Per-session state. Guarded by one synchronous lock that is never held
//! across an `.await`.

use std::{collections::VecDeque, sync::Arc, time::Duration};

use {
    parking_lot::Mutex,
    tokio::{sync::Notify, task::AbortHandle, time::Instant},
};

use crate::{
    MessageQueueMode,
    buffer::SessionBuffer,
    message::PendingMessage,
    run::{RunController, RunHandle},
};

pub(crate) struct Session {
    key: String,
    pub(crate) state: Mutex<SessionState>,
    /// Signalled whenever the session may have become idle.
    pub(crate) idle: Notify,
}

impl Session {
    pub(crate) fn new(key: impl Into<String>, mode: MessageQueueMode) -> Self {
        Self {
            key: key.into(),
            state: Mutex::new(SessionState::new(mode)),
            idle: Notify::new(),
        }
    }

    pub(crate) fn key(&self) -> &str {
        &self.key
    }

    pub(crate) fn status(&self) -> SessionStatus {
        let state = self.state.lock();
        SessionStatus {
            key: self.key.clone(),
            mode: state.mode,
            pending: state.pending.len(),
            redirect: state.redirect.len(),
            debounce_deadline: state.pending.deadline(),
            flush_ready: state.pending.is_ready(),
            active_run: state.active.as_ref().map(|run| run.handle()),
            idle_for: state.last_activity.elapsed(),
        }
    }

    /// Resolves once the session has no active run and nothing buffered.
    pub(crate) async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.state.lock().is_idle() {
                return;
            }
            notified.await;
        }
    }
}

/// Mutable session state, handed to [`SteeringPolicy`](crate::SteeringPolicy)
/// implementations while the session lock is held.
pub struct SessionState {
    pub(crate) mode: MessageQueueMode,
    pub(crate) pending: SessionBuffer,
    pub(crate) redirect: VecDeque<PendingMessage>,
    pub(crate) active: Option<Arc<RunController>>,
    pub(crate) timer: Option<AbortHandle>,
    pub(crate) removed: bool,
    pub(crate) last_activity: Instant,
}

impl SessionState {
    fn new(mode: MessageQueueMode) -> Self {
        Self {
            mode,
            pending: SessionBuffer::new(),
            redirect: VecDeque::new(),
            active: None,
            timer: None,
            removed: false,
            last_activity: Instant::now(),
        }
    }

    pub fn mode(&self) -> MessageQueueMode {
        self.mode
    }

    /// A run exists for this session, admitted or still waiting for its lane.
    pub fn is_busy(&self) -> bool {
        self.active.is_some()
    }

    pub fn is_idle(&self) -> bool {
        self.active.is_none() && self.pending.is_empty() && self.redirect.is_empty()
    }

    pub fn pending(&self) -> &SessionBuffer {
        &self.pending
    }

    /// Messages waiting to be handed to the running unit as a redirect.
    pub fn redirect(&self) -> impl Iterator<Item = &PendingMessage> {
        self.redirect.iter()
    }

    pub(crate) fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

/// Snapshot returned by [`QueueManager::session_status`](crate::QueueManager::session_status).
#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub key: String,
    pub mode: MessageQueueMode,
    pub pending: usize,
    pub redirect: usize,
    pub debounce_deadline: Option<Instant>,
    /// The debounce elapsed while a run was in flight; the buffer is
    /// dispatched when that run finishes.
    pub flush_ready: bool,
    pub active_run: Option<RunHandle>,
    pub idle_for: Duration,
}
