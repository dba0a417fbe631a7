//! HIGH-priority reservation behavior of the push pool, end to end.


use std::time::Duration;

use tablet_agent::task::{Priority, TaskKind};
use test_helpers::{harness_with, push_task, test_settings, wait_until};

#[test]
fn high_workers_never_touch_normal_backlog() {
    let mut settings = test_settings();
    // Every push worker is HIGH; back off for a full second between selector
    // rounds so the workers are not spinning.
    settings.workers.push_worker_count_normal_priority = 0;
    settings.workers.push_worker_count_high_priority = 2;
    settings.retry_pause_secs = 1;

    let harness = harness_with(settings);
    let dispatcher = harness.dispatcher();
    dispatcher.start();

    for signature in 0..3 {
        dispatcher.submit(push_task(signature, "alice", Priority::Normal));
    }

    // The backlog sits untouched: no worker may take a NORMAL task.
    std::thread::sleep(Duration::from_millis(1500));
    assert_eq!(harness.engine.push_calls.lock().unwrap().len(), 0);
    assert_eq!(harness.env.registry.live_count(TaskKind::Push), 3);

    // A HIGH task is picked up from behind the backlog.
    dispatcher.submit(push_task(100, "bob", Priority::High));
    assert!(wait_until(Duration::from_secs(5), || {
        harness.master.finish_count() == 1
    }));
    let requests = harness.master.finish_requests.lock().unwrap();
    assert_eq!(requests[0].signature, 100);
    assert_eq!(harness.env.registry.live_count(TaskKind::Push), 3);
}

#[test]
fn mixed_pool_drains_both_priorities() {
    let mut settings = test_settings();
    settings.workers.push_worker_count_normal_priority = 2;
    settings.workers.push_worker_count_high_priority = 1;
    settings.retry_pause_secs = 1;

    let harness = harness_with(settings);
    let dispatcher = harness.dispatcher();
    dispatcher.start();

    for signature in 0..6 {
        dispatcher.submit(push_task(signature, "alice", Priority::Normal));
    }
    dispatcher.submit(push_task(100, "bob", Priority::High));

    assert!(wait_until(Duration::from_secs(10), || {
        harness.env.registry.live_count(TaskKind::Push) == 0
    }));
    assert_eq!(harness.master.finish_count(), 7);
    assert_eq!(harness.engine.push_calls.lock().unwrap().len(), 7);

    // All running counts unwound once the pool drained.
    assert_eq!(
        harness.env.registry.running_count(TaskKind::Push, "alice"),
        0
    );
    assert_eq!(harness.env.registry.running_count(TaskKind::Push, "bob"), 0);
}
