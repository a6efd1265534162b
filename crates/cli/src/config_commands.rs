use std::{collections::BTreeMap, fmt::Write as _, path::PathBuf};

use {anyhow::Result, clap::Subcommand};

use switchyard_config::{
    Diagnostic, Severity, ValidationResult, template::default_config_template, validate,
};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Validate the configuration file and report errors/warnings.
    Check {
        /// Show informational diagnostics in addition to errors and warnings.
        #[arg(long)]
        verbose: bool,
    },
    /// Print a documented default `switchyard.toml`.
    Template,
}

pub fn handle_config(action: ConfigAction, path: Option<PathBuf>) -> Result<()> {
    match action {
        ConfigAction::Check { verbose } => check(path, verbose),
        ConfigAction::Template => {
            print!("{}", default_config_template());
            Ok(())
        },
    }
}

const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

/// Section heading for a validator category.
fn section(category: &str) -> &str {
    match category {
        "syntax" => "file syntax",
        "type-error" => "value types",
        "unknown-field" => "unknown keys",
        "limits" => "queue limits",
        "lanes" => "lanes",
        "file-ref" => "config file",
        other => other,
    }
}

/// Diagnostics grouped by category, errors first within each group.
fn render(result: &ValidationResult, verbose: bool, color: bool) -> String {
    let paint = |code: &'static str| if color { code } else { "" };
    let mut grouped: BTreeMap<&str, Vec<&Diagnostic>> = BTreeMap::new();
    for d in &result.diagnostics {
        if d.severity == Severity::Info && !verbose {
            continue;
        }
        grouped.entry(d.category).or_default().push(d);
    }

    let mut out = String::new();
    for (category, mut diagnostics) in grouped {
        diagnostics.sort_by_key(|d| d.severity);
        let _ = writeln!(out, "{}{}{}", paint(BOLD), section(category), paint(RESET));
        for d in diagnostics {
            let color = match d.severity {
                Severity::Error => RED,
                Severity::Warning => YELLOW,
                Severity::Info => CYAN,
            };
            let target = if d.path.is_empty() {
                String::new()
            } else {
                format!("{}: ", d.path)
            };
            let _ = writeln!(
                out,
                "  {}{}{} {target}{}",
                paint(color),
                d.severity,
                paint(RESET),
                d.message
            );
        }
        out.push('\n');
    }

    let errors = result.count(Severity::Error);
    let warnings = result.count(Severity::Warning);
    if errors == 0 && warnings == 0 {
        out.push_str("Configuration is usable by the queue engine.\n");
    } else {
        let _ = writeln!(out, "{errors} error(s), {warnings} warning(s)");
    }
    out
}

fn check(path: Option<PathBuf>, verbose: bool) -> Result<()> {
    let result = validate(path.as_deref());

    match result.config_path {
        Some(ref path) => eprintln!("Checking {}\n", path.display()),
        None => eprintln!("No config file found; checking built-in defaults.\n"),
    }
    eprint!("{}", render(&result, verbose, true));

    if result.has_errors() {
        std::process::exit(1);
    }
    Ok(())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, switchyard_config::validate_toml_str};

    #[test]
    fn groups_diagnostics_by_category() {
        let result = validate_toml_str(
            r#"
[queue]
cap = 0
default_lane = "mian"

[lanes.main]
concurency = 2
"#,
        );
        let text = render(&result, false, false);

        let limits = text.find("queue limits").unwrap();
        let lanes = text.find("lanes\n").unwrap();
        let unknown = text.find("unknown keys").unwrap();
        assert!(lanes < limits && limits < unknown, "{text}");
        assert!(text.contains("error queue.cap: cap must be at least 1"), "{text}");
        assert!(text.contains("queue.default_lane"), "{text}");
        assert!(!text.contains('\x1b'));
        assert!(text.trim_end().ends_with("warning(s)"));
    }

    #[test]
    fn clean_config_reports_usable() {
        let result = validate_toml_str("");
        assert!(!result.has_errors());
        assert!(render(&result, false, false).contains("usable by the queue engine"));
    }
}
