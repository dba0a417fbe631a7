//! The three long-lived report loops: task list, disk state, tablet state.
//!
//! Each loop runs on its own detached thread, blocks until the first master
//! heartbeat has recorded a usable address, then pushes local state on a
//! timer. The disk and tablet loops can be woken early through the engine's
//! report-notify primitive. RPC failures are never fatal: they are counted,
//! logged, and retried next period.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use crate::dispatcher::AgentEnv;
use crate::master::{DiskReport, ReportRequest};

/// Spawn all three report workers.
pub fn spawn_report_workers(env: &Arc<AgentEnv>) {
    spawn_task_report_worker(env);
    spawn_disk_report_worker(env);
    spawn_tablet_report_worker(env);
}

pub fn spawn_task_report_worker(env: &Arc<AgentEnv>) {
    spawn_loop("report-task", Arc::clone(env), task_report_loop);
}

pub fn spawn_disk_report_worker(env: &Arc<AgentEnv>) {
    spawn_loop("report-disk", Arc::clone(env), disk_report_loop);
}

pub fn spawn_tablet_report_worker(env: &Arc<AgentEnv>) {
    spawn_loop("report-tablet", Arc::clone(env), tablet_report_loop);
}

fn spawn_loop(name: &str, env: Arc<AgentEnv>, body: fn(Arc<AgentEnv>)) {
    loop {
        let env = Arc::clone(&env);
        let builder = thread::Builder::new().name(name.to_string());
        match builder.spawn(move || body(env)) {
            Ok(_) => break,
            Err(err) => {
                warn!(worker = name, error = %err, "failed to spawn report thread");
                thread::sleep(Duration::from_secs(1));
            }
        }
    }
}

/// Park until the first heartbeat has filled in the master address.
fn wait_for_master(env: &AgentEnv) {
    while !env.master_addr.is_ready() {
        info!("waiting to receive first heartbeat from master");
        thread::sleep(Duration::from_secs(1));
    }
}

fn task_report_loop(env: Arc<AgentEnv>) {
    let interval = Duration::from_secs(env.settings.report.report_task_interval_secs);
    loop {
        wait_for_master(&env);

        let mut request = ReportRequest::new(env.backend(), env.settings.backend.force_recovery);
        request.tasks = Some(env.registry.snapshot_live());

        env.metrics.record_report_attempt("task");
        if let Err(err) = env.master.report(&request) {
            env.metrics.record_report_failure("task");
            let (host, port) = env.master_addr.get();
            warn!(error = %err, master_host = %host, master_port = port, "report task failed");
        }

        thread::sleep(interval);
    }
}

fn disk_report_loop(env: Arc<AgentEnv>) {
    let interval = Duration::from_secs(env.settings.report.report_disk_state_interval_secs);
    loop {
        wait_for_master(&env);

        let mut disks: HashMap<String, DiskReport> = HashMap::new();
        for dir in env.engine.data_dir_infos() {
            disks.insert(
                dir.path.clone(),
                DiskReport {
                    root_path: dir.path,
                    path_hash: dir.path_hash,
                    disk_total_capacity: dir.capacity as f64,
                    data_used_capacity: dir.data_used_capacity as f64,
                    disk_available_capacity: dir.available as f64,
                    used: dir.is_used,
                },
            );
        }

        let mut request = ReportRequest::new(env.backend(), env.settings.backend.force_recovery);
        request.disks = Some(disks);

        env.metrics.record_report_attempt("disk");
        if let Err(err) = env.master.report(&request) {
            env.metrics.record_report_failure("disk");
            let (host, port) = env.master_addr.get();
            warn!(error = %err, master_host = %host, master_port = port, "report disk state failed");
        }

        env.engine.wait_for_report_notify(interval, false);
    }
}

fn tablet_report_loop(env: Arc<AgentEnv>) {
    let interval = Duration::from_secs(env.settings.report.report_tablet_interval_secs);
    loop {
        wait_for_master(&env);

        // Stamp the version before collecting so concurrent task completions
        // cannot be attributed to a snapshot that missed them.
        let report_version = env.report_version.current();

        let tablets = match env.engine.all_tablet_infos() {
            Ok(tablets) => tablets,
            Err(err) => {
                warn!(error = %err, "report get all tablets info failed");
                env.engine.wait_for_report_notify(interval, true);
                continue;
            }
        };

        let mut request = ReportRequest::new(env.backend(), env.settings.backend.force_recovery);
        request.report_version = Some(report_version);
        request.tablets = Some(tablets);

        env.metrics.record_report_attempt("tablet");
        if let Err(err) = env.master.report(&request) {
            env.metrics.record_report_failure("tablet");
            let (host, port) = env.master_addr.get();
            warn!(error = %err, master_host = %host, master_port = port, "report tablet state failed");
        }
        env.report_version.bump();

        env.engine.wait_for_report_notify(interval, true);
    }
}
