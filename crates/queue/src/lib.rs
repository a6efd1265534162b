//! Lane-based message queue and session steering engine.
//!
//! Every inbound event is addressed to a session. The session's
//! [`MessageQueueMode`] decides whether the event is buffered, queued behind
//! the running unit, handed to it as a redirect, or whether the running unit
//! is cancelled in favour of it. Runs are admitted through per-lane FIFOs with
//! a fixed concurrency limit and executed by an external [`Executor`].
//!
//! - **DropPolicy**: bounded buffers (drop-oldest, drop-newest, summarize)
//! - **SessionBuffer**: debounced accumulation for collect mode
//! - **SteeringPolicy**: collect, followup, steer, interrupt
//! - **Lane**: FIFO admission with a concurrency limit
//! - **RunController**: run lifecycle, cancellation, `check_steering()`
//! - **QueueManager**: the façade callers and executors talk to

pub mod buffer;
pub mod config;
pub mod drop_policy;
pub mod error;
pub mod events;
pub mod executor;
pub mod lane;
pub mod manager;
pub mod message;
pub mod run;
pub mod session;
pub mod steering;

pub use {
    config::QueueConfig,
    drop_policy::{DropOutcome, DropPolicy},
    error::{Error, Result},
    events::{CancelReason, DropReason, QueueEvent},
    executor::{DispatchRequest, Executor, ExecutorFn, executor_fn},
    lane::LaneStats,
    manager::{Admission, EnqueueReceipt, QueueManager},
    message::{InboundMessage, MessageKind, Payload, PendingMessage},
    run::{RunController, RunHandle, RunOutcome, RunState, SteeringSignal},
    session::SessionStatus,
    steering::{Decision, PolicyContext, SteeringPolicy, policy_for},
    switchyard_config::{DropStrategy, MessageQueueMode},
};
