//! Configuration validation engine.
//!
//! Validates TOML configuration against the known schema, detects
//! unknown/misspelled fields, and reports settings the queue engine would
//! refuse at construction.

use std::{collections::HashMap, path::Path};

use crate::schema::{DropStrategy, MessageQueueMode, SwitchyardConfig};

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Category: "syntax", "unknown-field", "type-error", "limits", "lanes",
    /// "file-ref"
    pub category: &'static str,
    /// Dotted path, e.g. "queue.cap"
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.path.is_empty() {
            write!(f, "{} [{}] {}", self.severity, self.category, self.message)
        } else {
            write!(
                f,
                "{} [{}] {}: {}",
                self.severity, self.category, self.path, self.message
            )
        }
    }
}

/// Result of validating a configuration file.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
    pub config_path: Option<std::path::PathBuf>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    /// Count diagnostics by severity.
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }
}

// ── Schema tree for unknown-field detection ─────────────────────────────────

/// Expected shape of the configuration schema.
enum KnownKeys {
    /// A struct with fixed field names.
    Struct(HashMap<&'static str, KnownKeys>),
    /// A map with dynamic keys (lanes, metric labels) whose values have a
    /// known shape.
    Map(Box<KnownKeys>),
    /// Scalar value; stop recursion.
    Leaf,
}

/// Build the schema map mirroring every field in `schema.rs`.
fn build_schema_map() -> KnownKeys {
    use KnownKeys::{Leaf, Map, Struct};

    let queue = Struct(HashMap::from([
        ("default_mode", Leaf),
        ("debounce_ms", Leaf),
        ("cap", Leaf),
        ("drop_strategy", Leaf),
        ("summarize_keep", Leaf),
        ("collect_separator", Leaf),
        ("steering_poll_ms", Leaf),
        ("default_lane", Leaf),
        ("event_capacity", Leaf),
    ]));

    let lane = Struct(HashMap::from([("concurrency", Leaf)]));

    let metrics = Struct(HashMap::from([
        ("enabled", Leaf),
        ("labels", Map(Box::new(Leaf))),
    ]));

    Struct(HashMap::from([
        ("queue", queue),
        ("lanes", Map(Box::new(lane))),
        ("metrics", metrics),
    ]))
}

// ── Levenshtein distance ────────────────────────────────────────────────────

/// Compute the Levenshtein edit distance between two strings.
fn levenshtein(a: &str, b: &str) -> usize {
    let b_chars: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b_chars.len();
    }
    if b_chars.is_empty() {
        return a.chars().count();
    }

    let mut prev: Vec<usize> = (0..=b_chars.len()).collect();
    let mut curr = vec![0; b_chars.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b_chars.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b_chars.len()]
}

/// Best match for `needle` among `candidates` within `max_distance` edits.
fn suggest<'a>(needle: &str, candidates: &[&'a str], max_distance: usize) -> Option<&'a str> {
    let mut best: Option<(&'a str, usize)> = None;
    for &candidate in candidates {
        let d = levenshtein(needle, candidate);
        if d > 0 && d <= max_distance && best.as_ref().is_none_or(|(_, bd)| d < *bd) {
            best = Some((candidate, d));
        }
    }
    best.map(|(s, _)| s)
}

// ── Core validation ─────────────────────────────────────────────────────────

/// Validate a config file at the given path, or discover the default config
/// file location if `path` is `None`.
#[must_use]
pub fn validate(path: Option<&Path>) -> ValidationResult {
    let config_path = match path {
        Some(p) => Some(p.to_path_buf()),
        None => crate::loader::find_config_file(),
    };

    let Some(ref actual_path) = config_path else {
        return ValidationResult {
            diagnostics: vec![Diagnostic {
                severity: Severity::Info,
                category: "file-ref",
                path: String::new(),
                message: "no config file found; using defaults".into(),
            }],
            config_path: None,
        };
    };

    match std::fs::read_to_string(actual_path) {
        Ok(content) => {
            let content = crate::env_subst::substitute_env(&content);
            let mut result = validate_toml_str(&content);
            result.config_path = Some(actual_path.clone());
            result
        },
        Err(e) => ValidationResult {
            diagnostics: vec![Diagnostic {
                severity: Severity::Error,
                category: "syntax",
                path: String::new(),
                message: format!("failed to read config file: {e}"),
            }],
            config_path: Some(actual_path.clone()),
        },
    }
}

/// Validate a TOML string without file-system side effects.
#[must_use]
pub fn validate_toml_str(toml_str: &str) -> ValidationResult {
    let mut diagnostics = Vec::new();

    // 1. Syntax
    let toml_value: toml::Value = match toml::from_str(toml_str) {
        Ok(v) => v,
        Err(e) => {
            diagnostics.push(Diagnostic {
                severity: Severity::Error,
                category: "syntax",
                path: String::new(),
                message: format!("TOML syntax error: {e}"),
            });
            return ValidationResult {
                diagnostics,
                config_path: None,
            };
        },
    };

    // 2. Unknown fields
    let schema = build_schema_map();
    check_unknown_fields(&toml_value, &schema, "", &mut diagnostics);

    // 3. Types, then semantic checks on the parsed config
    match toml::from_str::<SwitchyardConfig>(toml_str) {
        Ok(config) => check_semantics(&config, &mut diagnostics),
        Err(e) => diagnostics.push(Diagnostic {
            severity: Severity::Error,
            category: "type-error",
            path: String::new(),
            message: format!("type error: {e}"),
        }),
    }

    ValidationResult {
        diagnostics,
        config_path: None,
    }
}

/// Walk the TOML value tree against the schema tree and flag unknown keys.
fn check_unknown_fields(
    value: &toml::Value,
    schema: &KnownKeys,
    prefix: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let join = |key: &str| {
        if prefix.is_empty() {
            key.to_string()
        } else {
            format!("{prefix}.{key}")
        }
    };

    match (value, schema) {
        (toml::Value::Table(table), KnownKeys::Struct(fields)) => {
            let mut known_keys: Vec<&str> = fields.keys().copied().collect();
            known_keys.sort_unstable();
            for (key, child_value) in table {
                let path = join(key);
                if let Some(child_schema) = fields.get(key.as_str()) {
                    check_unknown_fields(child_value, child_schema, &path, diagnostics);
                    continue;
                }
                let level = if prefix.is_empty() {
                    " at top level"
                } else {
                    ""
                };
                let message = match suggest(key, &known_keys, 3) {
                    Some(s) => format!("unknown field{level} (did you mean \"{s}\"?)"),
                    None => format!("unknown field{level}"),
                };
                diagnostics.push(Diagnostic {
                    severity: Severity::Error,
                    category: "unknown-field",
                    path,
                    message,
                });
            }
        },
        (toml::Value::Table(table), KnownKeys::Map(value_schema)) => {
            for (key, child_value) in table {
                check_unknown_fields(child_value, value_schema, &join(key), diagnostics);
            }
        },
        // Leaf or type mismatch; type errors are reported by deserialization.
        _ => {},
    }
}

/// Checks mirroring what the queue engine refuses at construction, plus
/// warnings for settings that are legal but likely unintended.
fn check_semantics(config: &SwitchyardConfig, diagnostics: &mut Vec<Diagnostic>) {
    let queue = &config.queue;
    let mut error = |category: &'static str, path: &str, message: String| {
        diagnostics.push(Diagnostic {
            severity: Severity::Error,
            category,
            path: path.into(),
            message,
        });
    };

    if queue.cap == 0 {
        error("limits", "queue.cap", "cap must be at least 1".into());
    }
    if queue.default_mode == MessageQueueMode::Collect && queue.debounce_ms == 0 {
        error(
            "limits",
            "queue.debounce_ms",
            "collect mode needs a non-zero debounce".into(),
        );
    }
    if queue.drop_strategy == DropStrategy::Summarize {
        if queue.summarize_keep == 0 {
            error(
                "limits",
                "queue.summarize_keep",
                "summarize must keep at least the newest message".into(),
            );
        } else if queue.cap < queue.summarize_keep + 1 {
            error(
                "limits",
                "queue.cap",
                format!(
                    "summarize keeps {} message(s) plus a placeholder, so cap must be at least {}",
                    queue.summarize_keep,
                    queue.summarize_keep + 1
                ),
            );
        }
    }
    if queue.steering_poll_ms == 0 {
        error(
            "limits",
            "queue.steering_poll_ms",
            "steering poll interval must be non-zero".into(),
        );
    }
    if queue.event_capacity == 0 {
        error(
            "limits",
            "queue.event_capacity",
            "event capacity must be at least 1".into(),
        );
    }

    if config.lanes.is_empty() {
        error("lanes", "lanes", "at least one lane is required".into());
    }
    for (name, lane) in &config.lanes {
        if name.trim().is_empty() {
            error("lanes", "lanes", "lane names must not be blank".into());
        }
        if lane.concurrency == 0 {
            error(
                "lanes",
                &format!("lanes.{name}.concurrency"),
                "concurrency must be at least 1".into(),
            );
        }
    }
    if !config.lanes.is_empty() && !config.lanes.contains_key(&queue.default_lane) {
        let names: Vec<&str> = config.lanes.keys().map(String::as_str).collect();
        let hint = suggest(&queue.default_lane, &names, 3)
            .map(|s| format!(" (did you mean \"{s}\"?)"))
            .unwrap_or_default();
        error(
            "lanes",
            "queue.default_lane",
            format!("default lane \"{}\" is not configured{hint}", queue.default_lane),
        );
    }

    if queue.drop_strategy == DropStrategy::Newest && queue.cap == 1 {
        diagnostics.push(Diagnostic {
            severity: Severity::Warning,
            category: "limits",
            path: "queue.drop_strategy".into(),
            message: "with cap = 1 and drop_strategy = \"newest\" every burst keeps only its first message".into(),
        });
    }
    if queue.debounce_ms > 60_000 {
        diagnostics.push(Diagnostic {
            severity: Severity::Warning,
            category: "limits",
            path: "queue.debounce_ms".into(),
            message: format!(
                "debounce of {}s delays every collected batch noticeably",
                queue.debounce_ms / 1000
            ),
        });
    }
}
