//! Per-session accumulator with debounce bookkeeping.
//!
//! The buffer never sleeps itself. Each arrival bumps a generation counter and
//! moves the deadline; the manager's timer task reports back with the
//! generation it was armed for, and stale generations are ignored.

use std::{collections::VecDeque, time::Duration};

use tokio::time::Instant;

use crate::{
    drop_policy::{DropOutcome, DropPolicy},
    message::PendingMessage,
};

#[derive(Debug, Default)]
pub struct SessionBuffer {
    messages: VecDeque<PendingMessage>,
    generation: u64,
    deadline: Option<Instant>,
    ready: bool,
}

impl SessionBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append through the drop policy and (re)arm the debounce deadline.
    /// Returns the outcome and the generation the new deadline belongs to.
    pub fn accumulate(
        &mut self,
        msg: PendingMessage,
        policy: &DropPolicy,
        now: Instant,
        debounce: Duration,
    ) -> (DropOutcome, u64) {
        let outcome = policy.push(&mut self.messages, msg);
        let generation = self.rearm(now, debounce);
        (outcome, generation)
    }

    /// Append through the drop policy without touching the deadline.
    pub fn push(&mut self, msg: PendingMessage, policy: &DropPolicy) -> DropOutcome {
        policy.push(&mut self.messages, msg)
    }

    /// Put `older` ahead of everything buffered, bypassing the drop policy.
    /// Callers guarantee the combined count stays within the cap.
    pub fn prepend(&mut self, older: impl IntoIterator<Item = PendingMessage>) {
        let older: Vec<_> = older.into_iter().collect();
        for msg in older.into_iter().rev() {
            self.messages.push_front(msg);
        }
    }

    /// Start a fresh quiet period. Any timer armed for an earlier generation
    /// becomes stale.
    pub fn rearm(&mut self, now: Instant, debounce: Duration) -> u64 {
        self.generation += 1;
        self.deadline = Some(now + debounce);
        self.ready = false;
        self.generation
    }

    /// Cancel any pending deadline and readiness.
    pub fn disarm(&mut self) {
        self.generation += 1;
        self.deadline = None;
        self.ready = false;
    }

    /// The quiet period for `generation` has elapsed. Returns false when a
    /// newer arrival re-armed the deadline in the meantime.
    pub fn mark_ready(&mut self, generation: u64) -> bool {
        if generation != self.generation || self.deadline.is_none() {
            return false;
        }
        self.deadline = None;
        self.ready = !self.messages.is_empty();
        self.ready
    }

    /// Swap out every message, but only for the current generation.
    pub fn flush(&mut self, generation: u64) -> Option<Vec<PendingMessage>> {
        if generation != self.generation {
            return None;
        }
        self.deadline = None;
        self.ready = false;
        if self.messages.is_empty() {
            return None;
        }
        Some(self.messages.drain(..).collect())
    }

    /// Flush if the quiet period has already elapsed.
    pub fn take_ready(&mut self) -> Option<Vec<PendingMessage>> {
        if !self.ready {
            return None;
        }
        self.flush(self.generation)
    }

    /// Take everything regardless of timing and disarm.
    pub fn take_all(&mut self) -> Vec<PendingMessage> {
        self.disarm();
        self.messages.drain(..).collect()
    }

    pub fn pop_front(&mut self) -> Option<PendingMessage> {
        let msg = self.messages.pop_front();
        if self.messages.is_empty() {
            self.deadline = None;
            self.ready = false;
        }
        msg
    }

    pub fn messages(&self) -> impl Iterator<Item = &PendingMessage> {
        self.messages.iter()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }
}
