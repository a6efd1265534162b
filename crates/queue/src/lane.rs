//! Per-lane FIFO admission with a fixed concurrency limit.
//!
//! Tickets are issued synchronously, so the order in which runs are created
//! under their session locks is the order in which the lane admits them.
//! A grant travels over a `oneshot`; dropping a ticket that is still waiting
//! removes it from the queue, and dropping one that was already granted hands
//! the slot to the next waiter.

use std::{collections::VecDeque, sync::Arc};

use {parking_lot::Mutex, serde::Serialize, tokio::sync::oneshot};

use crate::error::{Error, Result};

/// Point-in-time view of one lane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LaneStats {
    pub name: String,
    pub limit: usize,
    pub active: usize,
    pub waiting: usize,
}

pub struct Lane {
    name: String,
    limit: usize,
    inner: Mutex<LaneInner>,
}

#[derive(Default)]
struct LaneInner {
    active: usize,
    waiting: VecDeque<Waiter>,
    next_id: u64,
    closed: bool,
}

struct Waiter {
    id: u64,
    tx: oneshot::Sender<()>,
}

impl Lane {
    pub fn new(name: impl Into<String>, limit: usize) -> Self {
        Self {
            name: name.into(),
            limit,
            inner: Mutex::new(LaneInner::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Take a place in line. Granted immediately when a slot is free and
    /// nobody is waiting ahead.
    pub fn ticket(self: &Arc<Self>) -> AdmissionTicket {
        let (tx, rx) = oneshot::channel();
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;

        if inner.closed {
            drop(tx);
        } else if inner.active < self.limit && inner.waiting.is_empty() {
            inner.active += 1;
            let _ = tx.send(());
        } else {
            inner.waiting.push_back(Waiter { id, tx });
        }

        AdmissionTicket {
            lane: Arc::clone(self),
            id,
            rx: Some(rx),
        }
    }

    pub fn stats(&self) -> LaneStats {
        let inner = self.inner.lock();
        LaneStats {
            name: self.name.clone(),
            limit: self.limit,
            active: inner.active,
            waiting: inner.waiting.len(),
        }
    }

    /// Refuse new tickets and fail every waiting one. Admitted runs keep
    /// their slots until they finish.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        inner.waiting.clear();
    }

    fn release(&self) {
        let mut inner = self.inner.lock();
        Self::release_locked(self.limit, &mut inner);
    }

    fn release_locked(limit: usize, inner: &mut LaneInner) {
        inner.active = inner.active.saturating_sub(1);
        while inner.active < limit {
            let Some(waiter) = inner.waiting.pop_front() else {
                break;
            };
            if waiter.tx.send(()).is_ok() {
                inner.active += 1;
            }
        }
    }
}

/// A place in a lane's FIFO.
pub struct AdmissionTicket {
    lane: Arc<Lane>,
    id: u64,
    rx: Option<oneshot::Receiver<()>>,
}

impl AdmissionTicket {
    /// Wait for a slot. Fails with [`Error::ShuttingDown`] if the lane is
    /// closed first. Dropping the future gives the place up.
    pub async fn admitted(mut self) -> Result<LaneSlot> {
        let Some(rx) = self.rx.as_mut() else {
            return Err(Error::ShuttingDown);
        };
        let granted = rx.await;
        self.rx = None;
        match granted {
            Ok(()) => Ok(LaneSlot {
                lane: Arc::clone(&self.lane),
            }),
            Err(_) => Err(Error::ShuttingDown),
        }
    }

    pub fn lane(&self) -> &str {
        self.lane.name()
    }
}

impl Drop for AdmissionTicket {
    fn drop(&mut self) {
        let Some(mut rx) = self.rx.take() else {
            return;
        };
        let mut inner = self.lane.inner.lock();
        if let Some(pos) = inner.waiting.iter().position(|w| w.id == self.id) {
            inner.waiting.remove(pos);
        } else if rx.try_recv().is_ok() {
            // Granted but never claimed.
            Lane::release_locked(self.lane.limit, &mut inner);
        }
    }
}

/// An admitted slot. Released on drop, on every exit path of the run.
pub struct LaneSlot {
    lane: Arc<Lane>,
}

impl Drop for LaneSlot {
    fn drop(&mut self) {
        self.lane.release();
    }
}
