mod config_commands;
mod replay;

use std::{path::PathBuf, time::Duration};

use {
    anyhow::Context,
    clap::{Parser, Subcommand},
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "switchyard", about = "Switchyard: lane-based message queue and session steering")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file (overrides discovery of `switchyard.toml`).
    #[arg(long, global = true, env = "SWITCHYARD_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: config_commands::ConfigAction,
    },
    /// Replay a JSON-lines script of timed messages through the queue.
    Replay {
        /// Script path; one `{"at_ms", "session", "content", ...}` object per line.
        script: PathBuf,
        /// Simulated execution time per run.
        #[arg(long, default_value_t = 500)]
        work_ms: u64,
        /// Print a Prometheus snapshot after the replay.
        #[arg(long, default_value_t = false)]
        metrics: bool,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    // Logs go to stderr so replayed events on stdout stay machine-readable.
    let registry = tracing_subscriber::registry().with(filter);
    if cli.json_logs {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "switchyard starting");

    match cli.command {
        Commands::Config { action } => config_commands::handle_config(action, cli.config),
        Commands::Replay {
            script,
            work_ms,
            metrics,
        } => {
            let config = match cli.config {
                Some(ref path) => switchyard_config::load_config(path)
                    .with_context(|| format!("failed to load {}", path.display()))?,
                None => switchyard_config::discover_and_load(),
            };
            replay::handle_replay(config, &script, Duration::from_millis(work_ms), metrics).await
        },
    }
}
