#![allow(clippy::unwrap_used, clippy::expect_used, dead_code)]

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    parking_lot::Mutex,
    serde_json::Value,
    switchyard_queue::{
        DispatchRequest, Error, Executor, QueueConfig, QueueManager, Result, SteeringSignal,
    },
    tokio::time::Instant,
};

/// One executor invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatched {
    pub session: String,
    pub lane: String,
    pub text: String,
    /// Time since the recorder was created.
    pub at: Duration,
}

/// Executor that records every dispatch, works for a configurable time,
/// polls the steering hook, and fails or panics on request.
pub struct Recorder {
    origin: Instant,
    work: Duration,
    overrides: Mutex<HashMap<String, Duration>>,
    poll: bool,
    pub log: Mutex<Vec<Dispatched>>,
    pub redirects: Mutex<Vec<(String, String)>>,
    running: AtomicUsize,
    pub max_running: AtomicUsize,
}

impl Recorder {
    pub fn new(work: Duration) -> Arc<Self> {
        Self::build(work, true)
    }

    /// Never calls `check_steering`.
    pub fn deaf(work: Duration) -> Arc<Self> {
        Self::build(work, false)
    }

    fn build(work: Duration, poll: bool) -> Arc<Self> {
        Arc::new(Self {
            origin: Instant::now(),
            work,
            overrides: Mutex::new(HashMap::new()),
            poll,
            log: Mutex::new(Vec::new()),
            redirects: Mutex::new(Vec::new()),
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
        })
    }

    /// Payloads with exactly this text work for `work` instead.
    pub fn work_for(self: &Arc<Self>, text: &str, work: Duration) -> Arc<Self> {
        self.overrides.lock().insert(text.to_string(), work);
        Arc::clone(self)
    }

    pub fn texts(&self) -> Vec<String> {
        self.log.lock().iter().map(|d| d.text.clone()).collect()
    }

    pub fn dispatches(&self) -> Vec<Dispatched> {
        self.log.lock().clone()
    }

    pub fn manager(self: &Arc<Self>, config: QueueConfig) -> Arc<QueueManager> {
        let executor: Arc<dyn Executor> = Arc::clone(self) as Arc<dyn Executor>;
        QueueManager::new(config, executor).unwrap()
    }
}

#[async_trait]
impl Executor for Recorder {
    async fn dispatch(&self, request: DispatchRequest) -> Result<Value> {
        let text = request.payload.text.clone();
        self.log.lock().push(Dispatched {
            session: request.session_key.clone(),
            lane: request.lane.clone(),
            text: text.clone(),
            at: self.origin.elapsed(),
        });
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(running, Ordering::SeqCst);

        let result = self.work(&request, &text).await;
        self.running.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

impl Recorder {
    async fn work(&self, request: &DispatchRequest, text: &str) -> Result<Value> {
        if text == "panic" {
            panic!("executor blew up");
        }
        let work = self.overrides.lock().get(text).copied().unwrap_or(self.work);
        let deadline = Instant::now() + work;
        loop {
            if self.poll {
                match request.check_steering() {
                    SteeringSignal::Continue => {},
                    SteeringSignal::Redirect(payload) => self
                        .redirects
                        .lock()
                        .push((request.session_key.clone(), payload.text)),
                    SteeringSignal::Abort => return Err(Error::Cancelled),
                }
            } else if request.cancel.is_cancelled() {
                return Err(Error::Cancelled);
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
        if text == "fail" {
            return Err(Error::execution("told to fail"));
        }
        Ok(Value::String(text.to_string()))
    }
}

pub fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

/// Sleep until `at` after `origin`.
pub async fn at(origin: Instant, at: Duration) {
    tokio::time::sleep_until(origin + at).await;
}
