//! Validated construction parameters for [`QueueManager`](crate::QueueManager).

use std::{collections::BTreeMap, time::Duration};

use switchyard_config::{DropStrategy, MessageQueueMode, SwitchyardConfig};

use crate::{
    drop_policy::DropPolicy,
    error::{Error, Result},
};

/// Queue engine settings. Built from a loaded [`SwitchyardConfig`] or by hand;
/// [`QueueConfig::validate`] runs again when the manager is constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Concurrency limit per lane name.
    pub lanes: BTreeMap<String, usize>,
    pub default_lane: String,
    pub default_mode: MessageQueueMode,
    pub debounce: Duration,
    pub cap: usize,
    pub drop_strategy: DropStrategy,
    pub summarize_keep: usize,
    pub separator: String,
    pub steering_poll: Duration,
    pub event_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self::from_settings_unchecked(&SwitchyardConfig::default())
    }
}

impl QueueConfig {
    /// Convert loaded settings, rejecting anything the engine cannot honour.
    pub fn from_settings(config: &SwitchyardConfig) -> Result<Self> {
        let cfg = Self::from_settings_unchecked(config);
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_settings_unchecked(config: &SwitchyardConfig) -> Self {
        let q = &config.queue;
        Self {
            lanes: config
                .lanes
                .iter()
                .map(|(name, lane)| (name.clone(), lane.concurrency))
                .collect(),
            default_lane: q.default_lane.clone(),
            default_mode: q.default_mode,
            debounce: Duration::from_millis(q.debounce_ms),
            cap: q.cap,
            drop_strategy: q.drop_strategy,
            summarize_keep: q.summarize_keep,
            separator: q.collect_separator.clone(),
            steering_poll: Duration::from_millis(q.steering_poll_ms),
            event_capacity: q.event_capacity,
        }
    }

    /// Replace all lanes with a single one.
    #[must_use]
    pub fn single_lane(mut self, name: impl Into<String>, concurrency: usize) -> Self {
        let name = name.into();
        self.lanes = BTreeMap::from([(name.clone(), concurrency)]);
        self.default_lane = name;
        self
    }

    /// Add or replace one lane.
    #[must_use]
    pub fn with_lane(mut self, name: impl Into<String>, concurrency: usize) -> Self {
        self.lanes.insert(name.into(), concurrency);
        self
    }

    #[must_use]
    pub fn with_mode(mut self, mode: MessageQueueMode) -> Self {
        self.default_mode = mode;
        self
    }

    #[must_use]
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    #[must_use]
    pub fn with_drop(mut self, cap: usize, strategy: DropStrategy) -> Self {
        self.cap = cap;
        self.drop_strategy = strategy;
        self
    }

    #[must_use]
    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    /// The drop policy these settings describe.
    pub fn drop_policy(&self) -> Result<DropPolicy> {
        DropPolicy::new(self.cap, self.drop_strategy, self.summarize_keep)
    }

    /// Reject invalid limits, caps, and durations. Nothing is defaulted.
    pub fn validate(&self) -> Result<()> {
        if self.lanes.is_empty() {
            return Err(Error::configuration("lanes", "at least one lane is required"));
        }
        for (name, limit) in &self.lanes {
            if name.trim().is_empty() {
                return Err(Error::configuration("lanes", "lane names must not be blank"));
            }
            if *limit == 0 {
                return Err(Error::configuration(
                    format!("lanes.{name}.concurrency"),
                    "concurrency must be at least 1",
                ));
            }
        }
        if !self.lanes.contains_key(&self.default_lane) {
            return Err(Error::configuration(
                "default_lane",
                format!("lane \"{}\" is not configured", self.default_lane),
            ));
        }
        if self.debounce.is_zero() {
            return Err(Error::configuration(
                "debounce",
                "debounce must be greater than zero",
            ));
        }
        if self.steering_poll.is_zero() {
            return Err(Error::configuration(
                "steering_poll",
                "steering poll interval must be greater than zero",
            ));
        }
        if self.event_capacity == 0 {
            return Err(Error::configuration(
                "event_capacity",
                "event capacity must be at least 1",
            ));
        }
        self.drop_policy().map(|_| ())
    }
}
