//! Default configuration template with all options documented.

/// Generate the default config template.
#[must_use]
pub fn default_config_template() -> String {
    r##"# Switchyard Configuration
# =======================
# Every option is listed with its default. Uncomment and modify as needed.
#
# Environment variable substitution is supported: ${ENV_VAR}
# Example: default_lane = "${SWITCHYARD_DEFAULT_LANE}"

# ══════════════════════════════════════════════════════════════════════════════
# QUEUE
# ══════════════════════════════════════════════════════════════════════════════

[queue]
default_mode = "followup"         # How to handle messages for a session:
                                  #   "followup"  - Run messages one-by-one, in order
                                  #   "collect"   - Buffer until quiet for debounce_ms, run as one message
                                  #   "steer"     - Redirect the running unit at its next steering poll
                                  #   "interrupt" - Cancel the running unit, run only the latest message
debounce_ms = 1000                # Quiet period before a collect buffer is flushed
cap = 20                          # Max buffered messages per session
drop_strategy = "oldest"          # On overflow: "oldest", "newest", or "summarize"
summarize_keep = 1                # Newest messages kept verbatim by "summarize"
collect_separator = "\n"          # Joins buffered messages into one payload
steering_poll_ms = 250            # Suggested cadence for executors polling the steering hook
default_lane = "main"             # Lane used when an event names none
event_capacity = 256              # Queue event broadcast buffer

# ══════════════════════════════════════════════════════════════════════════════
# LANES
# ══════════════════════════════════════════════════════════════════════════════
# Each lane is an independent concurrency domain. Declaring any lane replaces
# the defaults below.

[lanes.main]                      # Interactive traffic
concurrency = 4

[lanes.cron]                      # Scheduled triggers
concurrency = 1

[lanes.subagent]                  # Background task completions
concurrency = 8

# ══════════════════════════════════════════════════════════════════════════════
# METRICS
# ══════════════════════════════════════════════════════════════════════════════

[metrics]
enabled = false

# [metrics.labels]
# instance = "switchyard-1"
"##
    .to_string()
}
