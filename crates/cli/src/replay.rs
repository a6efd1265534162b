//! Scripted replay: drive a queue manager with timed events and a simulated
//! executor, printing every queue event as a JSON line.

use std::{collections::BTreeSet, path::Path, sync::Arc, time::Duration};

use {
    anyhow::{Context, Result, bail},
    async_trait::async_trait,
    serde::Deserialize,
    serde_json::{Value, json},
    switchyard_config::SwitchyardConfig,
    switchyard_queue::{
        DispatchRequest, Error as QueueError, Executor, InboundMessage, MessageQueueMode,
        QueueEvent, QueueManager, SteeringSignal,
    },
    tokio::{
        sync::{
            broadcast::error::{RecvError, TryRecvError},
            oneshot,
        },
        time::Instant,
    },
    tracing::{debug, info, warn},
};

/// One line of a replay script.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScriptEvent {
    /// Offset from the start of the replay.
    pub at_ms: u64,
    pub session: String,
    #[serde(default)]
    pub lane: Option<String>,
    pub content: String,
    #[serde(default)]
    pub mode: Option<MessageQueueMode>,
}

/// Parse a JSON-lines script. Blank lines and `#` comments are skipped;
/// events are ordered by `at_ms`, ties keep file order.
pub fn parse_script(raw: &str) -> Result<Vec<ScriptEvent>> {
    let mut events = Vec::new();
    for (index, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let event: ScriptEvent = serde_json::from_str(line)
            .with_context(|| format!("line {}: invalid replay event", index + 1))?;
        events.push(event);
    }
    if events.is_empty() {
        bail!("replay script contains no events");
    }
    events.sort_by_key(|e| e.at_ms);
    Ok(events)
}

/// Pretends to work for a fixed time, polling the steering hook at the
/// configured cadence.
pub struct SimulatedExecutor {
    work: Duration,
}

impl SimulatedExecutor {
    pub fn new(work: Duration) -> Self {
        Self { work }
    }
}

#[async_trait]
impl Executor for SimulatedExecutor {
    async fn dispatch(&self, request: DispatchRequest) -> switchyard_queue::Result<Value> {
        let started = Instant::now();
        let deadline = started + self.work;
        let mut redirects = Vec::new();

        loop {
            match request.check_steering() {
                SteeringSignal::Continue => {},
                SteeringSignal::Redirect(payload) => {
                    debug!(run_id = %request.run_id, text = %payload.text, "simulated run redirected");
                    redirects.push(payload.text);
                },
                SteeringSignal::Abort => return Err(QueueError::Cancelled),
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let nap = request.poll_interval().min(deadline - now);
            tokio::select! {
                () = request.cancel.cancelled() => {},
                () = tokio::time::sleep(nap) => {},
            }
        }

        Ok(json!({
            "text": request.payload.text,
            "messages": request.payload.len(),
            "redirects": redirects,
            "elapsed_ms": started.elapsed().as_millis() as u64,
        }))
    }
}

/// What a finished replay leaves behind.
pub struct ReplayReport {
    pub manager: Arc<QueueManager>,
    /// `finished` events seen by the printer.
    pub runs_finished: usize,
}

/// Print `event` as one JSON line. Returns true for run completions.
fn print_event(event: &QueueEvent) -> bool {
    match serde_json::to_string(event) {
        Ok(line) => println!("{line}"),
        Err(e) => warn!(error = %e, "failed to encode queue event"),
    }
    matches!(event, QueueEvent::Finished { .. })
}

/// Replay `events` against a fresh manager and wait for every session to
/// drain.
pub async fn replay(
    config: &SwitchyardConfig,
    events: Vec<ScriptEvent>,
    work: Duration,
) -> Result<ReplayReport> {
    let manager = QueueManager::from_config(config, Arc::new(SimulatedExecutor::new(work)))
        .context("failed to build queue manager")?;

    let mut rx = manager.subscribe();
    let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
    let printer = tokio::spawn(async move {
        let mut finished = 0;
        loop {
            tokio::select! {
                received = rx.recv() => match received {
                    Ok(event) => finished += usize::from(print_event(&event)),
                    Err(RecvError::Lagged(n)) => warn!(skipped = n, "event printer lagged"),
                    Err(RecvError::Closed) => break,
                },
                _ = &mut stop_rx => {
                    // Everything emitted before the stop signal is already buffered.
                    loop {
                        match rx.try_recv() {
                            Ok(event) => finished += usize::from(print_event(&event)),
                            Err(TryRecvError::Lagged(n)) => {
                                warn!(skipped = n, "event printer lagged");
                            },
                            Err(_) => break,
                        }
                    }
                    break;
                },
            }
        }
        finished
    });

    let origin = Instant::now();
    let sessions: BTreeSet<String> = events.iter().map(|e| e.session.clone()).collect();
    info!(events = events.len(), sessions = sessions.len(), "replay started");

    for event in events {
        tokio::time::sleep_until(origin + Duration::from_millis(event.at_ms)).await;
        let mut inbound = InboundMessage::new(event.session.as_str(), event.content);
        inbound.lane = event.lane;
        inbound.mode = event.mode;
        if let Err(e) = manager.enqueue_message(inbound) {
            warn!(session_key = %event.session, error = %e, "replay event refused");
        }
    }

    for session in &sessions {
        manager.wait_idle(session).await;
    }
    let _ = stop_tx.send(());
    let runs_finished = printer.await.context("event printer failed")?;

    info!(
        elapsed_ms = origin.elapsed().as_millis() as u64,
        runs = runs_finished,
        "replay finished"
    );
    Ok(ReplayReport {
        manager,
        runs_finished,
    })
}

/// `switchyard replay <script>`.
pub async fn handle_replay(
    config: SwitchyardConfig,
    script: &Path,
    work: Duration,
    show_metrics: bool,
) -> Result<()> {
    let raw = std::fs::read_to_string(script)
        .with_context(|| format!("failed to read {}", script.display()))?;
    let events = parse_script(&raw)?;

    let metrics = switchyard_metrics::init_metrics(switchyard_metrics::MetricsRecorderConfig {
        enabled: config.metrics.enabled || show_metrics,
        global_labels: config
            .metrics
            .labels
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    })?;

    let ReplayReport { manager, .. } = replay(&config, events, work).await?;
    for stats in manager.lane_stats() {
        eprintln!(
            "lane {:<10} limit {:>3}  active {:>3}  waiting {:>3}",
            stats.name, stats.limit, stats.active, stats.waiting
        );
    }
    manager.shutdown().await;

    if show_metrics {
        print!("{}", metrics.render());
    }
    Ok(())
}
