//! Configuration loading, validation, and env substitution.
//!
//! Config files: `switchyard.toml`, `switchyard.yaml`, or `switchyard.json`
//! Searched in `./` then `~/.config/switchyard/`.
//!
//! Supports `${ENV_VAR}` substitution in all string values.

pub mod env_subst;
pub mod loader;
pub mod schema;
pub mod template;
pub mod validate;

pub use {
    loader::{
        config_dir, discover_and_load, find_or_default_config_path, load_config, save_config,
    },
    schema::{
        DropStrategy, LaneSettings, MessageQueueMode, MetricsSettings, QueueSettings,
        SwitchyardConfig,
    },
    validate::{Diagnostic, Severity, ValidationResult, validate, validate_toml_str},
};
