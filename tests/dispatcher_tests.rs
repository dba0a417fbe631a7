//! End-to-end dispatcher scenarios: admission, retry, idempotent skips, and
//! report-version accounting, driven through real worker pools against the
//! recording mocks.


use std::sync::atomic::Ordering;
use std::time::Duration;

use tablet_agent::engine::{CloneResult, EngineError, PublishError};
use tablet_agent::master::StatusCode;
use tablet_agent::task::{
    AlterKind, AlterTabletReq, CloneReq, Priority, PublishVersionReq, TaskKind, TaskPayload,
    TaskRequest,
};
use test_helpers::{
    create_task, harness, push_task, sample_tablet_info, wait_for_drain, wait_until,
};

const DRAIN: Duration = Duration::from_secs(5);

fn clone_task(signature: i64) -> TaskRequest {
    TaskRequest {
        kind: TaskKind::Clone,
        signature,
        priority: None,
        user: None,
        payload: TaskPayload::Clone(CloneReq {
            tablet_id: 9,
            schema_hash: 111,
            committed_version: 4,
            src_backends: vec!["10.0.0.2:9060".to_string()],
        }),
    }
}

fn alter_task(signature: i64) -> TaskRequest {
    TaskRequest {
        kind: TaskKind::AlterTablet,
        signature,
        priority: None,
        user: None,
        payload: TaskPayload::AlterTablet(AlterTabletReq {
            alter_kind: AlterKind::SchemaChange,
            base_tablet_id: 7,
            base_schema_hash: 111,
            new_tablet_id: 8,
            new_schema_hash: 222,
        }),
    }
}

#[test]
fn duplicate_submission_runs_once() {
    let harness = harness();
    // Keep the first task executing long enough for the duplicate to arrive
    // while it is still live.
    *harness.engine.op_delay.lock().unwrap() = Some(Duration::from_millis(200));

    let dispatcher = harness.dispatcher();
    dispatcher.start();

    dispatcher.submit(create_task(1));
    dispatcher.submit(create_task(1));

    assert!(wait_for_drain(&harness, TaskKind::CreateTablet, DRAIN));
    assert_eq!(harness.engine.create_calls.load(Ordering::SeqCst), 1);
    assert_eq!(harness.master.finish_count(), 1);
    assert_eq!(harness.env.registry.live_count(TaskKind::CreateTablet), 0);
}

#[test]
fn publish_version_retries_then_succeeds_clean() {
    let harness = harness();
    {
        let mut script = harness.engine.publish_results.lock().unwrap();
        script.push_back(Err(PublishError {
            error_tablet_ids: vec![77],
        }));
        script.push_back(Err(PublishError {
            error_tablet_ids: vec![77],
        }));
        // Third attempt falls through to the default Ok.
    }

    let dispatcher = harness.dispatcher();
    dispatcher.start();
    dispatcher.submit(TaskRequest {
        kind: TaskKind::PublishVersion,
        signature: 5,
        priority: None,
        user: None,
        payload: TaskPayload::PublishVersion(PublishVersionReq {
            transaction_id: 900,
            partition_version_infos: Vec::new(),
        }),
    });

    assert!(wait_for_drain(&harness, TaskKind::PublishVersion, DRAIN));
    assert_eq!(harness.engine.publish_calls.load(Ordering::SeqCst), 3);

    let requests = harness.master.finish_requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].task_status.status_code, StatusCode::Ok);
    assert!(requests[0].error_tablet_ids.is_none());
}

#[test]
fn publish_version_surfaces_error_tablets_after_exhausted_retries() {
    let harness = harness();
    {
        let mut script = harness.engine.publish_results.lock().unwrap();
        for _ in 0..3 {
            script.push_back(Err(PublishError {
                error_tablet_ids: vec![77, 78],
            }));
        }
    }

    let dispatcher = harness.dispatcher();
    dispatcher.start();
    dispatcher.submit(TaskRequest {
        kind: TaskKind::PublishVersion,
        signature: 6,
        priority: None,
        user: None,
        payload: TaskPayload::PublishVersion(PublishVersionReq {
            transaction_id: 901,
            partition_version_infos: Vec::new(),
        }),
    });

    assert!(wait_for_drain(&harness, TaskKind::PublishVersion, DRAIN));

    let requests = harness.master.finish_requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(
        requests[0].task_status.status_code,
        StatusCode::RuntimeError
    );
    assert_eq!(requests[0].error_tablet_ids.as_deref(), Some(&[77, 78][..]));
}

#[test]
fn registry_released_even_when_finish_rpc_exhausts_retries() {
    let harness = harness();
    harness.master.fail_next_finishes(3);

    let dispatcher = harness.dispatcher();
    dispatcher.start();
    dispatcher.submit(create_task(11));

    assert!(wait_for_drain(&harness, TaskKind::CreateTablet, DRAIN));
    assert!(wait_until(DRAIN, || {
        harness.master.finish_attempts.load(Ordering::SeqCst) == 3
    }));
    // All three transport attempts failed; the outcome is abandoned but the
    // signature is gone.
    assert_eq!(harness.master.finish_count(), 0);
    assert_eq!(harness.env.registry.live_count(TaskKind::CreateTablet), 0);
}

#[test]
fn finish_rpc_recovers_within_retry_budget() {
    let harness = harness();
    harness.master.fail_next_finishes(2);

    let dispatcher = harness.dispatcher();
    dispatcher.start();
    dispatcher.submit(create_task(12));

    assert!(wait_for_drain(&harness, TaskKind::CreateTablet, DRAIN));
    assert!(wait_until(DRAIN, || harness.master.finish_count() == 1));
    assert_eq!(harness.master.finish_attempts.load(Ordering::SeqCst), 3);
}

#[test]
fn clone_of_existing_tablet_reports_ok_without_version_bump() {
    let harness = harness();
    harness
        .engine
        .clone_results
        .lock()
        .unwrap()
        .push_back(Ok(CloneResult {
            tablet_infos: vec![sample_tablet_info(9)],
            existed: true,
        }));

    let dispatcher = harness.dispatcher();
    dispatcher.start();

    let version_before = harness.env.report_version.current();
    dispatcher.submit(clone_task(21));
    assert!(wait_for_drain(&harness, TaskKind::Clone, DRAIN));

    let requests = harness.master.finish_requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].task_status.status_code, StatusCode::Ok);
    assert_eq!(
        requests[0].finish_tablet_infos.as_deref(),
        Some(&[sample_tablet_info(9)][..])
    );
    // Clone never bumps the report version and does not stamp it either.
    assert!(requests[0].report_version.is_none());
    assert_eq!(harness.env.report_version.current(), version_before);
}

#[test]
fn already_loaded_push_skips_finish_but_releases_signature() {
    let harness = harness();
    harness
        .engine
        .push_results
        .lock()
        .unwrap()
        .push_back(Err(EngineError::AlreadyLoaded));

    let dispatcher = harness.dispatcher();
    dispatcher.start();
    dispatcher.submit(push_task(31, "alice", Priority::Normal));

    assert!(wait_for_drain(&harness, TaskKind::Push, DRAIN));
    assert_eq!(harness.master.finish_count(), 0);
    assert_eq!(harness.master.finish_attempts.load(Ordering::SeqCst), 0);
    // Accounting is fully unwound despite the skipped report.
    assert_eq!(
        harness.env.registry.running_count(TaskKind::Push, "alice"),
        0
    );
    assert_eq!(harness.env.registry.totals(TaskKind::Push, "alice"), (0, 0));
}

#[test]
fn report_version_bumps_once_per_mutating_success() {
    let harness = harness();
    let dispatcher = harness.dispatcher();
    dispatcher.start();

    let v0 = harness.env.report_version.current();

    dispatcher.submit(create_task(41));
    assert!(wait_for_drain(&harness, TaskKind::CreateTablet, DRAIN));
    assert_eq!(harness.env.report_version.current(), v0 + 1);

    dispatcher.submit(alter_task(42));
    assert!(wait_for_drain(&harness, TaskKind::AlterTablet, DRAIN));
    assert_eq!(harness.env.report_version.current(), v0 + 2);

    dispatcher.submit(push_task(43, "alice", Priority::Normal));
    assert!(wait_for_drain(&harness, TaskKind::Push, DRAIN));
    assert_eq!(harness.env.report_version.current(), v0 + 3);

    // Clone succeeds but must not bump.
    dispatcher.submit(clone_task(44));
    assert!(wait_for_drain(&harness, TaskKind::Clone, DRAIN));
    assert_eq!(harness.env.report_version.current(), v0 + 3);

    // Failed create does not bump either.
    harness
        .engine
        .create_results
        .lock()
        .unwrap()
        .push_back(Err(EngineError::Internal("disk full".to_string())));
    dispatcher.submit(create_task(45));
    assert!(wait_for_drain(&harness, TaskKind::CreateTablet, DRAIN));
    assert_eq!(harness.env.report_version.current(), v0 + 3);
}

#[test]
fn report_versions_in_finish_envelopes_are_non_decreasing() {
    let harness = harness();
    let dispatcher = harness.dispatcher();
    dispatcher.start();

    for signature in 0..5 {
        dispatcher.submit(create_task(signature));
        assert!(wait_for_drain(&harness, TaskKind::CreateTablet, DRAIN));
    }

    let requests = harness.master.finish_requests.lock().unwrap();
    assert_eq!(requests.len(), 5);
    let versions: Vec<u64> = requests
        .iter()
        .map(|r| r.report_version.expect("create stamps report_version"))
        .collect();
    assert!(versions.windows(2).all(|w| w[0] <= w[1]));
}

#[test]
fn failed_create_still_reports_runtime_error() {
    let harness = harness();
    harness
        .engine
        .create_results
        .lock()
        .unwrap()
        .push_back(Err(EngineError::Internal("no space".to_string())));

    let dispatcher = harness.dispatcher();
    dispatcher.start();
    dispatcher.submit(create_task(51));

    assert!(wait_for_drain(&harness, TaskKind::CreateTablet, DRAIN));
    let requests = harness.master.finish_requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(
        requests[0].task_status.status_code,
        StatusCode::RuntimeError
    );
    // The envelope still carries the (unbumped) report version.
    assert!(requests[0].report_version.is_some());
}
