//! Metric name and label definitions.
//!
//! Every metric the queue engine records is named here so dashboards have a
//! single place to look.

/// Inbound message metrics
pub mod queue {
    /// Messages accepted by `enqueue`
    pub const MESSAGES_ENQUEUED_TOTAL: &str = "switchyard_messages_enqueued_total";
    /// Messages evicted, rejected, collapsed, or superseded (labelled by reason)
    pub const MESSAGES_DROPPED_TOTAL: &str = "switchyard_messages_dropped_total";
    /// Buffers that hit their cap
    pub const CAPACITY_EXCEEDED_TOTAL: &str = "switchyard_capacity_exceeded_total";
    /// Collect buffers flushed after their debounce elapsed
    pub const DEBOUNCE_FLUSHES_TOTAL: &str = "switchyard_debounce_flushes_total";
    /// Messages in the flushed batch
    pub const FLUSH_BATCH_SIZE: &str = "switchyard_flush_batch_size";
    /// Sessions currently tracked
    pub const SESSIONS_ACTIVE: &str = "switchyard_sessions_active";
    /// Mode changes applied to sessions
    pub const MODE_CHANGES_TOTAL: &str = "switchyard_mode_changes_total";
}

/// Lane admission metrics
pub mod lane {
    /// Runs holding a lane slot
    pub const ACTIVE_RUNS: &str = "switchyard_lane_active_runs";
    /// Tickets waiting for a lane slot
    pub const WAITING_TICKETS: &str = "switchyard_lane_waiting_tickets";
    /// Time between ticket creation and admission, in seconds
    pub const ADMISSION_WAIT_SECONDS: &str = "switchyard_lane_admission_wait_seconds";
}

/// Run lifecycle metrics
pub mod run {
    /// Runs dispatched to the executor
    pub const DISPATCHED_TOTAL: &str = "switchyard_runs_dispatched_total";
    /// Runs finished, labelled by outcome (completed, cancelled, failed)
    pub const FINISHED_TOTAL: &str = "switchyard_runs_finished_total";
    /// Executor wall time, in seconds
    pub const DURATION_SECONDS: &str = "switchyard_run_duration_seconds";
    /// Redirect payloads handed to running units
    pub const REDIRECTS_TOTAL: &str = "switchyard_run_redirects_total";
    /// Cancellation requests (interrupt or abort)
    pub const CANCELLATIONS_TOTAL: &str = "switchyard_run_cancellations_total";
}

/// Common label keys used across metrics
pub mod labels {
    pub const LANE: &str = "lane";
    pub const MODE: &str = "mode";
    pub const REASON: &str = "reason";
    pub const OUTCOME: &str = "outcome";
}

/// Standard histogram buckets for different metric types
pub mod buckets {
    use once_cell::sync::Lazy;

    /// Run duration buckets (in seconds)
    /// Covers 10ms to 10 minutes
    pub static RUN_DURATION: Lazy<Vec<f64>> = Lazy::new(|| {
        vec![
            0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0,
        ]
    });

    /// Admission wait buckets (in seconds)
    /// Covers 1ms to 2 minutes
    pub static ADMISSION_WAIT: Lazy<Vec<f64>> = Lazy::new(|| {
        vec![
            0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 120.0,
        ]
    });

    /// Batch size buckets (message count)
    pub static BATCH_SIZE: Lazy<Vec<f64>> =
        Lazy::new(|| vec![1.0, 2.0, 3.0, 5.0, 8.0, 13.0, 21.0, 34.0, 55.0, 100.0]);
}
