#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::{Arc, atomic::Ordering};

use {
    common::{Recorder, ms},
    switchyard_queue::{Admission, Error, LaneStats, MessageQueueMode, QueueConfig},
};

fn lanes(main: usize, cron: usize) -> QueueConfig {
    QueueConfig::default()
        .single_lane("main", main)
        .with_lane("cron", cron)
        .with_mode(MessageQueueMode::Followup)
}

#[tokio::test(start_paused = true)]
async fn active_runs_never_exceed_the_lane_limit() {
    let recorder = Recorder::new(ms(100));
    let manager = recorder.manager(lanes(2, 1));

    for i in 0..6 {
        let receipt = manager.enqueue(&format!("s{i}"), "main", "work", None).unwrap();
        assert_eq!(receipt.admission, Admission::Dispatched);
    }
    tokio::task::yield_now().await;
    let main = manager.lane_stats().into_iter().find(|s| s.name == "main").unwrap();
    assert_eq!(main.active, 2);
    assert_eq!(main.waiting, 4);

    for i in 0..6 {
        manager.wait_idle(&format!("s{i}")).await;
    }
    assert_eq!(recorder.max_running.load(Ordering::SeqCst), 2);
    let starts: Vec<_> = recorder.dispatches().iter().map(|d| d.at).collect();
    assert_eq!(starts, vec![ms(0), ms(0), ms(100), ms(100), ms(200), ms(200)]);
}

#[tokio::test(start_paused = true)]
async fn waiting_tickets_are_admitted_in_arrival_order() {
    let recorder = Recorder::new(ms(100));
    let manager = recorder.manager(lanes(1, 1));

    for session in ["c", "a", "b"] {
        manager.enqueue(session, "main", session, None).unwrap();
    }
    for session in ["a", "b", "c"] {
        manager.wait_idle(session).await;
    }
    assert_eq!(recorder.texts(), vec!["c", "a", "b"]);
}

#[tokio::test(start_paused = true)]
async fn lanes_do_not_share_budget() {
    let recorder = Recorder::new(ms(100));
    let manager = recorder.manager(lanes(1, 1));

    manager.enqueue("chat", "main", "hello", None).unwrap();
    manager.enqueue("nightly", "cron", "report", None).unwrap();
    manager.enqueue("other", "main", "queued", None).unwrap();

    manager.wait_idle("chat").await;
    manager.wait_idle("nightly").await;
    manager.wait_idle("other").await;

    let dispatches = recorder.dispatches();
    let at = |text: &str| dispatches.iter().find(|d| d.text == text).unwrap().at;
    assert_eq!(at("hello"), ms(0));
    assert_eq!(at("report"), ms(0));
    assert_eq!(at("queued"), ms(100));
    assert_eq!(
        dispatches.iter().find(|d| d.text == "report").unwrap().lane,
        "cron"
    );
}

#[tokio::test(start_paused = true)]
async fn unknown_lane_is_rejected() {
    let recorder = Recorder::new(ms(10));
    let manager = recorder.manager(lanes(1, 1));

    let err = manager.enqueue("s", "batch", "x", None).unwrap_err();
    assert!(matches!(err, Error::UnknownLane { ref lane } if lane == "batch"));
    assert!(manager.sessions().is_empty());
}

#[tokio::test(start_paused = true)]
async fn lane_stats_are_sorted_and_idle_after_work() {
    let recorder = Recorder::new(ms(10));
    let manager = recorder.manager(lanes(3, 1));
    manager.enqueue("s", "cron", "x", None).unwrap();
    manager.wait_idle("s").await;

    assert_eq!(manager.lane_stats(), vec![
        LaneStats {
            name: "cron".into(),
            limit: 1,
            active: 0,
            waiting: 0,
        },
        LaneStats {
            name: "main".into(),
            limit: 3,
            active: 0,
            waiting: 0,
        },
    ]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrency_bound_holds_under_parallel_callers() {
    let recorder = Recorder::new(ms(20));
    let manager = recorder.manager(lanes(3, 1));

    let callers: Vec<_> = (0..24)
        .map(|i| {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move {
                let session = format!("s{}", i % 8);
                manager.enqueue(&session, "main", format!("m{i}"), None).unwrap();
            })
        })
        .collect();
    for caller in callers {
        caller.await.unwrap();
    }
    for i in 0..8 {
        manager.wait_idle(&format!("s{i}")).await;
    }

    assert_eq!(recorder.log.lock().len(), 24);
    assert!(recorder.max_running.load(Ordering::SeqCst) <= 3);
    let main = manager.lane_stats().into_iter().find(|s| s.name == "main").unwrap();
    assert_eq!(main.active, 0);
}
