//! Bounded buffers: what happens when one more message would exceed the cap.

use std::collections::VecDeque;

use crate::{
    DropStrategy,
    error::{Error, Result},
    message::PendingMessage,
};

/// Cap and overflow strategy shared by every session buffer of a manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DropPolicy {
    cap: usize,
    strategy: DropStrategy,
    keep: usize,
}

/// Result of [`DropPolicy::push`].
#[derive(Debug, Clone, PartialEq)]
pub enum DropOutcome {
    /// Fit under the cap.
    Admitted,
    /// The incoming message was appended and this one was evicted from the head.
    Evicted(PendingMessage),
    /// The incoming message was discarded; the buffer is unchanged.
    Rejected(PendingMessage),
    /// The incoming message was appended and older entries were folded into
    /// the placeholder at the head. `seqs` lists the messages folded by this
    /// push; messages already inside an earlier placeholder are not repeated.
    Collapsed { seqs: Vec<u64> },
}

impl DropOutcome {
    /// Whether the DropPolicy had to intervene.
    pub fn is_drop(&self) -> bool {
        !matches!(self, Self::Admitted)
    }
}

impl DropPolicy {
    pub fn new(cap: usize, strategy: DropStrategy, keep: usize) -> Result<Self> {
        if cap == 0 {
            return Err(Error::configuration("cap", "cap must be at least 1"));
        }
        if strategy == DropStrategy::Summarize {
            if keep == 0 {
                return Err(Error::configuration(
                    "summarize_keep",
                    "summarize must keep at least one message",
                ));
            }
            if cap < keep + 1 {
                return Err(Error::configuration(
                    "cap",
                    format!("summarize needs cap >= summarize_keep + 1 (cap {cap}, keep {keep})"),
                ));
            }
        }
        Ok(Self {
            cap,
            strategy,
            keep,
        })
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    pub fn strategy(&self) -> DropStrategy {
        self.strategy
    }

    /// Append `msg`, applying the strategy first if the buffer is full.
    /// The buffer never ends up longer than the cap.
    pub fn push(&self, buf: &mut VecDeque<PendingMessage>, msg: PendingMessage) -> DropOutcome {
        if buf.len() < self.cap {
            buf.push_back(msg);
            return DropOutcome::Admitted;
        }

        match self.strategy {
            DropStrategy::Oldest => {
                let evicted = buf.pop_front();
                buf.push_back(msg);
                match evicted {
                    Some(evicted) => DropOutcome::Evicted(evicted),
                    None => DropOutcome::Admitted,
                }
            },
            DropStrategy::Newest => DropOutcome::Rejected(msg),
            DropStrategy::Summarize => {
                buf.push_back(msg);
                let fold = buf.len().saturating_sub(self.keep);
                let older: Vec<_> = buf.drain(..fold).collect();
                let seqs = older
                    .iter()
                    .filter(|m| !m.is_collapsed())
                    .map(PendingMessage::seq)
                    .collect();
                if let Some(placeholder) = PendingMessage::collapsed(&older) {
                    buf.push_front(placeholder);
                }
                DropOutcome::Collapsed { seqs }
            },
        }
    }
}
