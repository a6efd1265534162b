//! Metrics collection and export for switchyard.
//!
//! Metric names live in [`definitions`]; the engine records through the
//! `metrics` crate facade, so nothing is collected until a recorder is
//! installed with [`init_metrics`].
//!
//! # Features
//!
//! - `prometheus`: install a Prometheus recorder and render the text format

mod definitions;
mod recorder;

pub use {
    definitions::*,
    recorder::{MetricsHandle, MetricsRecorderConfig, init_metrics},
};

// Re-export metrics macros for convenience
pub use metrics::{counter, gauge, histogram};
