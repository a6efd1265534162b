//! Shared error plumbing used across all switchyard crates.

pub mod error;

pub use error::{Error, FromMessage, Result};
