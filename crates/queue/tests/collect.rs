#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use {
    common::{Recorder, at, ms},
    switchyard_queue::{
        Admission, DropReason, DropStrategy, MessageQueueMode, QueueConfig, QueueEvent,
    },
    tokio::time::Instant,
};

fn collect_config() -> QueueConfig {
    QueueConfig::default()
        .single_lane("main", 4)
        .with_mode(MessageQueueMode::Collect)
        .with_debounce(ms(1000))
        .with_separator(" ")
}

#[tokio::test(start_paused = true)]
async fn burst_inside_debounce_is_one_dispatch() {
    let recorder = Recorder::new(ms(50));
    let manager = recorder.manager(collect_config());
    let origin = Instant::now();

    for (offset, content) in [(0, "a"), (100, "b"), (200, "c")] {
        at(origin, ms(offset)).await;
        let receipt = manager.enqueue("u1", "main", content, None).unwrap();
        assert_eq!(receipt.admission, Admission::Buffered {
            flush_at: origin + ms(offset + 1000),
        });
        assert!(receipt.run.is_none());
    }

    at(origin, ms(1199)).await;
    assert!(recorder.texts().is_empty());

    manager.wait_idle("u1").await;
    let dispatches = recorder.dispatches();
    assert_eq!(dispatches.len(), 1);
    assert_eq!(dispatches[0].text, "a b c");
    assert_eq!(dispatches[0].at, ms(1200));
}

#[tokio::test(start_paused = true)]
async fn arrivals_faster_than_debounce_defer_the_flush() {
    let recorder = Recorder::new(ms(10));
    let manager = recorder.manager(collect_config());
    let origin = Instant::now();

    for i in 0..8u64 {
        at(origin, ms(i * 500)).await;
        manager.enqueue("u1", "main", format!("m{i}"), None).unwrap();
    }
    // Last arrival at 3500 ms.
    at(origin, ms(4400)).await;
    assert!(recorder.texts().is_empty());

    manager.wait_idle("u1").await;
    assert_eq!(recorder.texts(), vec!["m0 m1 m2 m3 m4 m5 m6 m7"]);
    assert_eq!(recorder.dispatches()[0].at, ms(4500));
}

#[tokio::test(start_paused = true)]
async fn buffer_size_alone_never_flushes() {
    let recorder = Recorder::new(ms(10));
    let manager = recorder.manager(collect_config().with_drop(3, DropStrategy::Oldest));

    for i in 0..10 {
        manager.enqueue("u1", "main", format!("m{i}"), None).unwrap();
    }
    let status = manager.session_status("u1").unwrap();
    assert_eq!(status.pending, 3);
    assert!(recorder.texts().is_empty());

    manager.wait_idle("u1").await;
    assert_eq!(recorder.texts(), vec!["m7 m8 m9"]);
}

/// Session "u1", collect, D = 1000 ms, cap 3, drop-oldest. a, b, c arrive at
/// 0/100/200 ms while an earlier run keeps the session busy until 1500 ms, so
/// the 1200 ms deadline finds it busy. d at 1300 ms evicts a and re-arms the
/// deadline; the flush at 2300 ms delivers "b c d".
#[tokio::test(start_paused = true)]
async fn busy_session_scenario_flushes_b_c_d() {
    let recorder = Recorder::new(ms(50)).work_for("warmup", ms(1500));
    let config = collect_config()
        .with_mode(MessageQueueMode::Followup)
        .with_drop(3, DropStrategy::Oldest);
    let manager = recorder.manager(config);
    let mut events = manager.subscribe();
    let origin = Instant::now();

    let warmup = manager.enqueue("u1", "main", "warmup", None).unwrap();
    assert_eq!(warmup.admission, Admission::Dispatched);

    manager
        .enqueue("u1", "main", "a", Some(MessageQueueMode::Collect))
        .unwrap();
    at(origin, ms(100)).await;
    manager.enqueue("u1", "main", "b", None).unwrap();
    at(origin, ms(200)).await;
    manager.enqueue("u1", "main", "c", None).unwrap();

    at(origin, ms(1250)).await;
    let status = manager.session_status("u1").unwrap();
    assert!(status.flush_ready, "debounce elapsed while busy");
    assert!(status.active_run.is_some());

    at(origin, ms(1300)).await;
    manager.enqueue("u1", "main", "d", None).unwrap();
    assert_eq!(manager.peek_pending("u1").unwrap().text, "b c d");

    at(origin, ms(2299)).await;
    assert_eq!(recorder.texts(), vec!["warmup"]);

    manager.wait_idle("u1").await;
    let dispatches = recorder.dispatches();
    assert_eq!(dispatches.len(), 2);
    assert_eq!(dispatches[1].text, "b c d");
    assert_eq!(dispatches[1].at, ms(2300));

    let mut evicted = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let QueueEvent::Dropped {
            seq,
            reason: DropReason::Evicted,
            ..
        } = event
        {
            evicted.push(seq);
        }
    }
    // "a" was the second message recorded by this manager.
    assert_eq!(evicted, vec![warmup.seq + 1]);
}

#[tokio::test(start_paused = true)]
async fn drop_newest_rejects_in_receipt() {
    let recorder = Recorder::new(ms(10));
    let manager = recorder.manager(collect_config().with_drop(2, DropStrategy::Newest));

    manager.enqueue("u1", "main", "a", None).unwrap();
    manager.enqueue("u1", "main", "b", None).unwrap();
    let receipt = manager.enqueue("u1", "main", "c", None).unwrap();
    assert_eq!(receipt.admission, Admission::Rejected);

    manager.wait_idle("u1").await;
    assert_eq!(recorder.texts(), vec!["a b"]);
}

#[tokio::test(start_paused = true)]
async fn leaving_collect_dispatches_leftovers() {
    let recorder = Recorder::new(ms(10));
    let manager = recorder.manager(collect_config());

    manager.enqueue("u1", "main", "a", None).unwrap();
    manager.enqueue("u1", "main", "b", None).unwrap();
    let previous = manager.set_mode("u1", MessageQueueMode::Followup).unwrap();
    assert_eq!(previous, MessageQueueMode::Collect);

    manager.wait_idle("u1").await;
    assert_eq!(recorder.texts(), vec!["a", "b"]);
    assert!(recorder.dispatches().iter().all(|d| d.at < ms(1000)));
}

#[tokio::test(start_paused = true)]
async fn entering_collect_arms_the_debounce() {
    let recorder = Recorder::new(ms(10)).work_for("first", ms(300));
    let manager = recorder.manager(collect_config().with_mode(MessageQueueMode::Followup));

    manager.enqueue("u1", "main", "first", None).unwrap();
    manager.enqueue("u1", "main", "x", None).unwrap();
    manager.enqueue("u1", "main", "y", None).unwrap();
    manager.set_mode("u1", MessageQueueMode::Collect).unwrap();

    manager.wait_idle("u1").await;
    let dispatches = recorder.dispatches();
    assert_eq!(recorder.texts(), vec!["first", "x y"]);
    assert_eq!(dispatches[0].at, ms(0));
    assert_eq!(dispatches[1].at, ms(1000));
}
