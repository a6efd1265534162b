//! Lifecycle events broadcast by the manager.
//!
//! Subscribers that fall behind lose the oldest events (`broadcast` lag);
//! the engine never blocks on them.

use serde::Serialize;

use crate::{MessageQueueMode, run::RunState};

/// Why a buffered or incoming message was discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Evicted from the head by drop-oldest.
    Evicted,
    /// Refused by drop-newest.
    Rejected,
    /// Folded into a summarize placeholder.
    Collapsed,
    /// Replaced by a newer message in interrupt mode.
    Superseded,
    /// Discarded through `cancel_queued` or shutdown.
    Cancelled,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Evicted => "evicted",
            Self::Rejected => "rejected",
            Self::Collapsed => "collapsed",
            Self::Superseded => "superseded",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Why a run's cancellation token was tripped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    Interrupt,
    Abort,
    Shutdown,
}

impl CancelReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Interrupt => "interrupt",
            Self::Abort => "abort",
            Self::Shutdown => "shutdown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueueEvent {
    Enqueued {
        session_key: String,
        lane: String,
        seq: u64,
        mode: MessageQueueMode,
    },
    Dropped {
        session_key: String,
        seq: u64,
        reason: DropReason,
    },
    /// A collect buffer's quiet period elapsed.
    Flushed {
        session_key: String,
        count: usize,
    },
    /// A run was created and is waiting for lane admission.
    Scheduled {
        session_key: String,
        run_id: String,
        lane: String,
        messages: usize,
    },
    Started {
        session_key: String,
        run_id: String,
        lane: String,
    },
    /// The running unit picked up a steer redirect.
    Redirected {
        session_key: String,
        run_id: String,
        messages: usize,
    },
    CancelRequested {
        session_key: String,
        run_id: String,
        reason: CancelReason,
    },
    Finished {
        session_key: String,
        run_id: String,
        state: RunState,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        duration_ms: u64,
    },
    ModeChanged {
        session_key: String,
        from: MessageQueueMode,
        to: MessageQueueMode,
    },
}

impl QueueEvent {
    pub fn session_key(&self) -> &str {
        match self {
            Self::Enqueued { session_key, .. }
            | Self::Dropped { session_key, .. }
            | Self::Flushed { session_key, .. }
            | Self::Scheduled { session_key, .. }
            | Self::Started { session_key, .. }
            | Self::Redirected { session_key, .. }
            | Self::CancelRequested { session_key, .. }
            | Self::Finished { session_key, .. }
            | Self::ModeChanged { session_key, .. } => session_key,
        }
    }
}
