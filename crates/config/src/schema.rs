/// Config schema types (queue defaults, lanes, metrics).
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitchyardConfig {
    pub queue: QueueSettings,
    /// Lanes keyed by name. Each lane is an independent concurrency domain.
    pub lanes: BTreeMap<String, LaneSettings>,
    pub metrics: MetricsSettings,
}

impl Default for SwitchyardConfig {
    fn default() -> Self {
        Self {
            queue: QueueSettings::default(),
            lanes: default_lanes(),
            metrics: MetricsSettings::default(),
        }
    }
}

/// Interactive traffic, scheduled triggers, and background task completions.
fn default_lanes() -> BTreeMap<String, LaneSettings> {
    BTreeMap::from([
        ("main".to_string(), LaneSettings { concurrency: 4 }),
        ("cron".to_string(), LaneSettings { concurrency: 1 }),
        ("subagent".to_string(), LaneSettings { concurrency: 8 }),
    ])
}

/// Per-session queueing defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    /// Steering mode assigned to sessions on their first message.
    pub default_mode: MessageQueueMode,
    /// Quiet period before a collect buffer is flushed.
    pub debounce_ms: u64,
    /// Maximum buffered messages per session buffer.
    pub cap: usize,
    /// What to do when a buffer would exceed `cap`.
    pub drop_strategy: DropStrategy,
    /// Newest messages kept verbatim by the `summarize` strategy.
    pub summarize_keep: usize,
    /// Joins buffered messages into one composite payload.
    pub collect_separator: String,
    /// Suggested cadence for executors polling the steering hook.
    pub steering_poll_ms: u64,
    /// Lane used when an inbound event names none.
    pub default_lane: String,
    /// Capacity of the queue event broadcast channel.
    pub event_capacity: usize,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            default_mode: MessageQueueMode::default(),
            debounce_ms: 1000,
            cap: 20,
            drop_strategy: DropStrategy::default(),
            summarize_keep: 1,
            collect_separator: "\n".into(),
            steering_poll_ms: 250,
            default_lane: "main".into(),
            event_capacity: 256,
        }
    }
}

/// Behaviour when a message arrives for a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageQueueMode {
    /// Queue each message; replay them one-by-one after the current run.
    #[default]
    Followup,
    /// Buffer messages until they quiesce; dispatch them as a single message.
    Collect,
    /// Redirect the running unit at its next steering poll.
    Steer,
    /// Cancel the running unit; only the latest message is dispatched next.
    Interrupt,
}

impl MessageQueueMode {
    pub const ALL: &'static [Self] = &[Self::Followup, Self::Collect, Self::Steer, Self::Interrupt];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Followup => "followup",
            Self::Collect => "collect",
            Self::Steer => "steer",
            Self::Interrupt => "interrupt",
        }
    }
}

impl std::fmt::Display for MessageQueueMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MessageQueueMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "followup" | "queue" => Ok(Self::Followup),
            "collect" => Ok(Self::Collect),
            "steer" => Ok(Self::Steer),
            "interrupt" => Ok(Self::Interrupt),
            other => Err(format!("unknown queue mode: {other}")),
        }
    }
}

/// Overflow strategy for bounded session buffers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DropStrategy {
    /// Evict the oldest buffered message.
    #[default]
    Oldest,
    /// Discard the incoming message.
    Newest,
    /// Collapse older messages into a single placeholder.
    Summarize,
}

impl DropStrategy {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Oldest => "oldest",
            Self::Newest => "newest",
            Self::Summarize => "summarize",
        }
    }
}

impl std::fmt::Display for DropStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaneSettings {
    /// Maximum runs admitted at once on this lane.
    pub concurrency: usize,
}

impl Default for LaneSettings {
    fn default() -> Self {
        Self { concurrency: 1 }
    }
}

/// Metrics export.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsSettings {
    pub enabled: bool,
    /// Global labels added to every metric.
    pub labels: BTreeMap<String, String>,
}
