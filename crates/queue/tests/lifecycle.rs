#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use {
    common::{Recorder, ms},
    serde_json::json,
    switchyard_queue::{
        Admission, Error, InboundMessage, MessageQueueMode, QueueConfig, QueueEvent,
        QueueManager, RunOutcome, RunState, executor_fn,
    },
};

fn config() -> QueueConfig {
    QueueConfig::default()
        .single_lane("main", 1)
        .with_mode(MessageQueueMode::Followup)
}

#[tokio::test(start_paused = true)]
async fn failure_releases_the_slot() {
    let recorder = Recorder::new(ms(10));
    let manager = recorder.manager(config());

    let failed = manager.enqueue("a", "main", "fail", None).unwrap().run.unwrap();
    let next = manager.enqueue("b", "main", "ok", None).unwrap().run.unwrap();

    assert_eq!(
        failed.wait().await,
        RunOutcome::Failed("execution failed: told to fail".into())
    );
    assert_eq!(failed.state(), RunState::Failed);
    assert_eq!(next.wait().await, RunOutcome::Completed(json!("ok")));
    assert_eq!(manager.lane_stats()[0].active, 0);
}

#[tokio::test(start_paused = true)]
async fn panic_is_reported_as_failure() {
    let recorder = Recorder::new(ms(10));
    let manager = recorder.manager(config());

    let panicked = manager.enqueue("a", "main", "panic", None).unwrap().run.unwrap();
    let after = manager.enqueue("a", "main", "after", None).unwrap();
    assert_eq!(after.admission, Admission::Queued { position: 1 });

    let RunOutcome::Failed(message) = panicked.wait().await else {
        panic!("expected failure");
    };
    assert!(message.contains("executor blew up"), "{message}");

    manager.wait_idle("a").await;
    assert_eq!(recorder.texts(), vec!["panic", "after"]);
    assert_eq!(manager.lane_stats()[0].active, 0);
}

#[tokio::test(start_paused = true)]
async fn cancelled_before_admission_never_runs() {
    let recorder = Recorder::new(ms(500));
    let manager = recorder.manager(config());

    manager.enqueue("a", "main", "hold", None).unwrap();
    let queued = manager.enqueue("b", "main", "skip", None).unwrap().run.unwrap();
    assert_eq!(queued.state(), RunState::Pending);
    assert_eq!(manager.lane_stats()[0].waiting, 1);

    assert!(manager.abort("b"));
    assert_eq!(queued.wait().await, RunOutcome::Cancelled);
    assert_eq!(queued.state(), RunState::Completed);
    assert!(queued.handle().started_at.is_none());
    assert_eq!(manager.lane_stats()[0].waiting, 0);

    manager.wait_idle("a").await;
    assert_eq!(recorder.texts(), vec!["hold"]);
}

#[tokio::test(start_paused = true)]
async fn remove_session_refuses_busy_sessions() {
    let recorder = Recorder::new(ms(100));
    let manager = recorder.manager(config());

    manager.enqueue("a", "main", "work", None).unwrap();
    assert!(!manager.remove_session("a"));
    assert!(!manager.remove_session("missing"));

    manager.wait_idle("a").await;
    assert_eq!(manager.sessions(), vec!["a".to_string()]);
    assert!(manager.remove_session("a"));
    assert!(manager.sessions().is_empty());
    assert!(manager.session_status("a").is_none());

    manager.enqueue("a", "main", "again", None).unwrap();
    manager.wait_idle("a").await;
    assert_eq!(recorder.texts(), vec!["work", "again"]);
}

#[tokio::test(start_paused = true)]
async fn cancel_queued_discards_pending() {
    let recorder = Recorder::new(ms(100));
    let manager = recorder.manager(config());

    manager.enqueue("a", "main", "first", None).unwrap();
    manager.enqueue("a", "main", "second", None).unwrap();
    manager.enqueue("a", "main", "third", None).unwrap();
    assert_eq!(manager.cancel_queued("a"), 2);
    assert!(manager.peek_pending("a").is_none());

    manager.wait_idle("a").await;
    assert_eq!(recorder.texts(), vec!["first"]);
}

#[tokio::test(start_paused = true)]
async fn shutdown_cancels_runs_and_refuses_work() {
    let recorder = Recorder::new(ms(10_000));
    let manager = recorder.manager(config());

    let running = manager.enqueue("a", "main", "long", None).unwrap().run.unwrap();
    let waiting = manager.enqueue("b", "main", "waiting", None).unwrap().run.unwrap();
    manager.enqueue("a", "main", "buffered", None).unwrap();
    tokio::task::yield_now().await;

    manager.shutdown().await;
    assert!(manager.is_closed());
    assert_eq!(running.outcome(), Some(RunOutcome::Cancelled));
    assert_eq!(waiting.outcome(), Some(RunOutcome::Cancelled));
    assert!(manager.peek_pending("a").is_none());
    assert!(matches!(
        manager.enqueue("a", "main", "late", None),
        Err(Error::ShuttingDown)
    ));
    assert!(matches!(
        manager.set_mode("a", MessageQueueMode::Collect),
        Err(Error::ShuttingDown)
    ));
    assert_eq!(recorder.texts(), vec!["long"]);
}

#[tokio::test(start_paused = true)]
async fn events_trace_a_run() {
    let recorder = Recorder::new(ms(10));
    let manager = recorder.manager(config());
    let mut events = manager.subscribe();

    let run = manager.enqueue("a", "main", "hi", None).unwrap().run.unwrap();
    run.wait().await;

    let kinds: Vec<_> = std::iter::from_fn(|| events.try_recv().ok())
        .map(|event| serde_json::to_value(&event).unwrap()["kind"].clone())
        .collect();
    assert_eq!(kinds, vec![
        json!("enqueued"),
        json!("scheduled"),
        json!("started"),
        json!("finished"),
    ]);
}

#[tokio::test(start_paused = true)]
async fn executor_fn_sees_payload_and_metadata() {
    let manager = QueueManager::new(
        config(),
        executor_fn(|request| async move {
            Ok(json!({
                "session": request.session_key,
                "text": request.payload.text,
                "lane": request.lane,
            }))
        }),
    )
    .unwrap();

    let receipt = manager
        .enqueue_message(
            InboundMessage::new("a", "hello").metadata(json!({ "channel": "test" })),
        )
        .unwrap();
    let run = receipt.run.unwrap();
    assert_eq!(run.payload().messages[0].metadata()["channel"], "test");
    assert_eq!(
        run.wait().await,
        RunOutcome::Completed(json!({ "session": "a", "text": "hello", "lane": "main" }))
    );

    let status = manager.session_status("a").unwrap();
    assert!(status.active_run.is_none());
    assert_eq!(status.mode, MessageQueueMode::Followup);
    assert_eq!(manager.active_run("a").map(|r| r.id().to_string()), None);
}

#[tokio::test(start_paused = true)]
async fn invalid_config_is_fatal() {
    let bad = QueueConfig::default().with_lane("main", 0);
    let result = QueueManager::new(bad, executor_fn(|_| async { Ok(json!(null)) }));
    assert!(matches!(result, Err(Error::Configuration { .. })));
}

#[test]
fn construction_requires_a_runtime() {
    let result = QueueManager::new(
        QueueConfig::default(),
        executor_fn(|_| async { Ok(json!(null)) }),
    );
    assert!(matches!(result, Err(Error::Message { .. })));
}
