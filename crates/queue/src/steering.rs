//! Steering policies: one per [`MessageQueueMode`].
//!
//! A policy only rearranges session state and reports what the manager must
//! do about it (start a run, arm a timer, cancel the active run). All calls
//! happen with the session lock held.

use std::time::Duration;

use tokio::time::Instant;

use crate::{
    MessageQueueMode,
    drop_policy::{DropOutcome, DropPolicy},
    events::DropReason,
    message::{Payload, PendingMessage},
    run::SteeringSignal,
    session::SessionState,
};

/// Inputs every policy call shares.
#[derive(Debug, Clone, Copy)]
pub struct PolicyContext<'a> {
    pub drop_policy: &'a DropPolicy,
    pub debounce: Duration,
    pub separator: &'a str,
    pub now: Instant,
}

/// What the manager must do after a message was admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The message sits in the pending buffer; start a run if the session is
    /// idle.
    StartIfIdle,
    /// Buffered behind a debounce deadline; arm a timer for `generation`.
    Debounce { generation: u64, deadline: Instant },
    /// Waiting behind the active run at `position` (1-based).
    Queued { position: usize },
    /// Held for the running unit's next steering poll.
    Redirect,
    /// The active run must be cancelled.
    Interrupt,
}

/// A message the drop policy or a policy discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dropped {
    pub seq: u64,
    pub reason: DropReason,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AdmitResult {
    pub decision: Decision,
    pub dropped: Vec<Dropped>,
}

/// What to start once the session is idle.
#[derive(Debug, Default)]
pub struct Drained {
    pub payload: Option<Payload>,
    /// Messages that will never run.
    pub superseded: Vec<PendingMessage>,
}

pub trait SteeringPolicy: Send + Sync {
    fn mode(&self) -> MessageQueueMode;

    /// Record `msg` for the session.
    fn admit(
        &self,
        state: &mut SessionState,
        msg: PendingMessage,
        ctx: &PolicyContext<'_>,
    ) -> AdmitResult;

    /// Called from the running unit's steering hook.
    fn check_pending(&self, state: &mut SessionState, ctx: &PolicyContext<'_>) -> SteeringSignal {
        let _ = (state, ctx);
        SteeringSignal::Continue
    }

    /// Take the next payload to run. Only called when the session is idle.
    fn next_dispatch(&self, state: &mut SessionState, ctx: &PolicyContext<'_>) -> Drained;
}

/// The policy for `mode`.
pub fn policy_for(mode: MessageQueueMode) -> &'static dyn SteeringPolicy {
    match mode {
        MessageQueueMode::Collect => &Collect,
        MessageQueueMode::Followup => &Followup,
        MessageQueueMode::Steer => &Steer,
        MessageQueueMode::Interrupt => &Interrupt,
    }
}

fn dropped_from(outcome: DropOutcome) -> Vec<Dropped> {
    match outcome {
        DropOutcome::Admitted => Vec::new(),
        DropOutcome::Evicted(msg) => vec![Dropped {
            seq: msg.seq(),
            reason: DropReason::Evicted,
        }],
        DropOutcome::Rejected(msg) => vec![Dropped {
            seq: msg.seq(),
            reason: DropReason::Rejected,
        }],
        DropOutcome::Collapsed { seqs } => seqs
            .into_iter()
            .map(|seq| Dropped {
                seq,
                reason: DropReason::Collapsed,
            })
            .collect(),
    }
}

/// Buffer until the session is quiet for the debounce period, then dispatch
/// everything as one payload.
pub struct Collect;

impl SteeringPolicy for Collect {
    fn mode(&self) -> MessageQueueMode {
        MessageQueueMode::Collect
    }

    fn admit(
        &self,
        state: &mut SessionState,
        msg: PendingMessage,
        ctx: &PolicyContext<'_>,
    ) -> AdmitResult {
        let (outcome, generation) =
            state
                .pending
                .accumulate(msg, ctx.drop_policy, ctx.now, ctx.debounce);
        AdmitResult {
            decision: Decision::Debounce {
                generation,
                deadline: ctx.now + ctx.debounce,
            },
            dropped: dropped_from(outcome),
        }
    }

    fn next_dispatch(&self, state: &mut SessionState, ctx: &PolicyContext<'_>) -> Drained {
        Drained {
            payload: state
                .pending
                .take_ready()
                .and_then(|batch| Payload::compose(batch, ctx.separator)),
            superseded: Vec::new(),
        }
    }
}

/// One run per message, strictly in arrival order. Never cancels.
pub struct Followup;

impl SteeringPolicy for Followup {
    fn mode(&self) -> MessageQueueMode {
        MessageQueueMode::Followup
    }

    fn admit(
        &self,
        state: &mut SessionState,
        msg: PendingMessage,
        ctx: &PolicyContext<'_>,
    ) -> AdmitResult {
        let outcome = state.pending.push(msg, ctx.drop_policy);
        let decision = if state.is_busy() {
            Decision::Queued {
                position: state.pending.len(),
            }
        } else {
            Decision::StartIfIdle
        };
        AdmitResult {
            decision,
            dropped: dropped_from(outcome),
        }
    }

    fn next_dispatch(&self, state: &mut SessionState, ctx: &PolicyContext<'_>) -> Drained {
        Drained {
            payload: state
                .pending
                .pop_front()
                .and_then(|msg| Payload::compose(vec![msg], ctx.separator)),
            superseded: Vec::new(),
        }
    }
}

/// Messages arriving during a run are handed to it at its next steering
/// poll instead of waiting for it to finish.
///
/// Redirects are only collected while the pending buffer is empty. Older
/// messages left there by another mode keep their place, and anything newer
/// queues behind them.
pub struct Steer;

impl SteeringPolicy for Steer {
    fn mode(&self) -> MessageQueueMode {
        MessageQueueMode::Steer
    }

    fn admit(
        &self,
        state: &mut SessionState,
        msg: PendingMessage,
        ctx: &PolicyContext<'_>,
    ) -> AdmitResult {
        if !state.is_busy() {
            let outcome = state.pending.push(msg, ctx.drop_policy);
            return AdmitResult {
                decision: Decision::StartIfIdle,
                dropped: dropped_from(outcome),
            };
        }
        if state.pending.is_empty() {
            let outcome = ctx.drop_policy.push(&mut state.redirect, msg);
            return AdmitResult {
                decision: Decision::Redirect,
                dropped: dropped_from(outcome),
            };
        }
        let outcome = state.pending.push(msg, ctx.drop_policy);
        AdmitResult {
            decision: Decision::Queued {
                position: state.pending.len(),
            },
            dropped: dropped_from(outcome),
        }
    }

    fn check_pending(&self, state: &mut SessionState, ctx: &PolicyContext<'_>) -> SteeringSignal {
        let batch: Vec<_> = state.redirect.drain(..).collect();
        match Payload::compose(batch, ctx.separator) {
            Some(payload) => SteeringSignal::Redirect(payload),
            None => SteeringSignal::Continue,
        }
    }

    fn next_dispatch(&self, state: &mut SessionState, ctx: &PolicyContext<'_>) -> Drained {
        Drained {
            payload: Payload::compose(state.pending.take_all(), ctx.separator),
            superseded: Vec::new(),
        }
    }
}

/// A message arriving during a run cancels it; only the newest message of
/// the interrupted window runs next.
pub struct Interrupt;

impl SteeringPolicy for Interrupt {
    fn mode(&self) -> MessageQueueMode {
        MessageQueueMode::Interrupt
    }

    fn admit(
        &self,
        state: &mut SessionState,
        msg: PendingMessage,
        ctx: &PolicyContext<'_>,
    ) -> AdmitResult {
        if !state.is_busy() {
            let outcome = state.pending.push(msg, ctx.drop_policy);
            return AdmitResult {
                decision: Decision::StartIfIdle,
                dropped: dropped_from(outcome),
            };
        }

        let mut dropped: Vec<_> = state
            .pending
            .take_all()
            .iter()
            .map(|old| Dropped {
                seq: old.seq(),
                reason: DropReason::Superseded,
            })
            .collect();
        let outcome = state.pending.push(msg, ctx.drop_policy);
        dropped.extend(dropped_from(outcome));
        AdmitResult {
            decision: Decision::Interrupt,
            dropped,
        }
    }

    fn next_dispatch(&self, state: &mut SessionState, ctx: &PolicyContext<'_>) -> Drained {
        let mut batch = state.pending.take_all();
        let latest = batch.pop();
        Drained {
            payload: latest.and_then(|msg| Payload::compose(vec![msg], ctx.separator)),
            superseded: batch,
        }
    }
}
