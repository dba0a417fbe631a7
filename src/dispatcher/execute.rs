//! Per-kind task execution and finish-envelope assembly.
//!
//! The worker loop in `pool.rs` is kind-agnostic; everything specific to a
//! kind lives here: payload extraction, the engine or loader call, mapping
//! the coarse engine code onto a task status, and which optional envelope
//! fields the kind fills in.

use std::collections::HashMap;
use std::fs;
use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use crate::dispatcher::AgentEnv;
use crate::engine::{EngineError, PublishError};
use crate::master::{FinishTaskRequest, StatusCode, TaskStatus};
use crate::task::{
    AlterTabletReq, PushReq, PushType, TaskPayload, TaskRequest,
};

/// Bounded retry for the publish-version engine call.
pub(crate) const PUBLISH_VERSION_MAX_RETRY: u32 = 3;

/// Execute one task and build its finish envelope. Returns `None` when no
/// finish RPC should be sent (idempotent re-push of an already-loaded
/// version; the master infers completion from an earlier report).
pub(crate) fn run_task(env: &AgentEnv, task: &TaskRequest) -> Option<FinishTaskRequest> {
    use crate::task::TaskKind::*;

    match (&task.kind, &task.payload) {
        (CreateTablet, TaskPayload::CreateTablet(req)) => {
            let mut envelope = new_envelope(env, task);
            match env.engine.create_tablet(req) {
                Ok(()) => {
                    env.report_version.bump();
                }
                Err(err) => {
                    warn!(signature = task.signature, error = %err, "create tablet failed");
                    envelope.task_status.status_code = StatusCode::RuntimeError;
                }
            }
            envelope.report_version = Some(env.report_version.current());
            Some(envelope)
        }

        (DropTablet, TaskPayload::DropTablet(req)) => {
            let mut envelope = new_envelope(env, task);
            match env.engine.drop_tablet(req) {
                // A tablet the engine no longer knows is already dropped.
                Ok(()) | Err(EngineError::TabletNotFound) => {}
                Err(err) => {
                    warn!(signature = task.signature, error = %err, "drop tablet failed");
                    envelope.task_status = TaskStatus {
                        status_code: StatusCode::RuntimeError,
                        error_msgs: vec!["drop tablet failed".to_string()],
                    };
                }
            }
            Some(envelope)
        }

        (AlterTablet, TaskPayload::AlterTablet(req)) => Some(run_alter(env, task, req)),

        (Push | RealtimePush | Delete, TaskPayload::Push(req)) => run_push(env, task, req),

        (PublishVersion, TaskPayload::PublishVersion(req)) => {
            info!(signature = task.signature, transaction_id = req.transaction_id, "got publish version task");
            let mut envelope = new_envelope(env, task);
            let mut last_error: Option<PublishError> = None;
            for _ in 0..PUBLISH_VERSION_MAX_RETRY {
                match env.engine.publish_version(req) {
                    Ok(()) => {
                        last_error = None;
                        break;
                    }
                    Err(err) => {
                        warn!(
                            transaction_id = req.transaction_id,
                            error_tablets = err.error_tablet_ids.len(),
                            "publish version error, retry"
                        );
                        last_error = Some(err);
                        thread::sleep(retry_pause(env));
                    }
                }
            }
            match last_error {
                None => {
                    info!(signature = task.signature, "publish version success");
                }
                Some(err) => {
                    warn!(signature = task.signature, "publish version failed");
                    envelope.error_tablet_ids = Some(err.error_tablet_ids);
                    envelope.task_status = TaskStatus {
                        status_code: StatusCode::RuntimeError,
                        error_msgs: vec!["publish version failed".to_string()],
                    };
                }
            }
            Some(envelope)
        }

        (ClearAlterTask, TaskPayload::ClearAlterTask(req)) => {
            let mut envelope = new_envelope(env, task);
            match env.engine.clear_alter_task(req) {
                Ok(()) => {
                    info!(signature = task.signature, "clear alter task success");
                }
                Err(err) => {
                    warn!(signature = task.signature, error = %err, "clear alter task failed");
                    envelope.task_status = TaskStatus {
                        status_code: StatusCode::RuntimeError,
                        error_msgs: vec!["clear alter task failed".to_string()],
                    };
                }
            }
            Some(envelope)
        }

        (ClearTransactionTask, TaskPayload::ClearTransactionTask(req)) => {
            // The engine call has no failure path; this kind always reports OK.
            env.engine
                .clear_transaction_task(req.transaction_id, &req.partition_ids);
            info!(
                signature = task.signature,
                transaction_id = req.transaction_id,
                "finished to clear transaction task"
            );
            Some(new_envelope(env, task))
        }

        (Clone, TaskPayload::Clone(req)) => {
            env.metrics.record_clone_attempt();
            info!(signature = task.signature, "got clone task");
            let mut envelope = new_envelope(env, task);
            match env.engine.clone_tablet(req, task.signature) {
                Ok(result) => {
                    info!(
                        signature = task.signature,
                        existed = result.existed,
                        "clone success, set tablet infos"
                    );
                    envelope.finish_tablet_infos = Some(result.tablet_infos);
                }
                Err(err) => {
                    env.metrics.record_clone_failure();
                    warn!(signature = task.signature, error = %err, "clone failed");
                    envelope.task_status = TaskStatus {
                        status_code: StatusCode::RuntimeError,
                        error_msgs: vec!["clone failed.".to_string()],
                    };
                }
            }
            Some(envelope)
        }

        (StorageMediumMigrate, TaskPayload::StorageMediumMigrate(req)) => {
            let mut envelope = new_envelope(env, task);
            match env.engine.storage_migration(req) {
                Ok(()) => {
                    info!(signature = task.signature, "storage medium migrate success");
                }
                Err(err) => {
                    warn!(signature = task.signature, error = %err, "storage medium migrate failed");
                    envelope.task_status.status_code = StatusCode::RuntimeError;
                }
            }
            Some(envelope)
        }

        (CheckConsistency, TaskPayload::CheckConsistency(req)) => {
            let mut envelope = new_envelope(env, task);
            let mut checksum: u32 = 0;
            match env.engine.checksum(req) {
                Ok(sum) => {
                    checksum = sum;
                    info!(signature = task.signature, checksum, "check consistency success");
                }
                Err(err) => {
                    warn!(signature = task.signature, error = %err, "check consistency failed");
                    envelope.task_status.status_code = StatusCode::RuntimeError;
                }
            }
            envelope.tablet_checksum = Some(checksum as i64);
            envelope.request_version = Some(req.version);
            envelope.request_version_hash = Some(req.version_hash);
            Some(envelope)
        }

        (Upload, TaskPayload::Upload(req)) => {
            info!(signature = task.signature, job_id = req.job_id, "got upload task");
            let mut envelope = new_envelope(env, task);
            let mut tablet_files = HashMap::new();
            match env.loader.upload(req) {
                Ok(files) => tablet_files = files,
                Err(err) => {
                    warn!(job_id = req.job_id, error = %err, "upload failed");
                    envelope.task_status = TaskStatus {
                        status_code: StatusCode::RuntimeError,
                        error_msgs: vec![err.to_string()],
                    };
                }
            }
            envelope.tablet_files = Some(tablet_files);
            info!(signature = task.signature, job_id = req.job_id, "finished upload task");
            Some(envelope)
        }

        (Download, TaskPayload::Download(req)) => {
            info!(signature = task.signature, job_id = req.job_id, "got download task");
            let mut envelope = new_envelope(env, task);
            let mut downloaded_tablet_ids = Vec::new();
            match env.loader.download(req) {
                Ok(ids) => downloaded_tablet_ids = ids,
                Err(err) => {
                    warn!(job_id = req.job_id, error = %err, "download failed");
                    envelope.task_status = TaskStatus {
                        status_code: StatusCode::RuntimeError,
                        error_msgs: vec![err.to_string()],
                    };
                }
            }
            envelope.downloaded_tablet_ids = Some(downloaded_tablet_ids);
            info!(signature = task.signature, job_id = req.job_id, "finished download task");
            Some(envelope)
        }

        (MakeSnapshot, TaskPayload::MakeSnapshot(req)) => {
            info!(signature = task.signature, "got snapshot task");
            let mut envelope = new_envelope(env, task);
            let mut snapshot_path = String::new();
            let mut snapshot_files = Vec::new();
            match env.snapshots.make_snapshot(req) {
                Ok(path) => {
                    info!(
                        tablet_id = req.tablet_id,
                        version = req.version,
                        snapshot_path = %path,
                        "make snapshot success"
                    );
                    snapshot_path = path;
                    if req.list_files {
                        // The snapshot dir nests tablet_id/schema_hash below
                        // the returned path.
                        let dir =
                            format!("{}/{}/{}/", snapshot_path, req.tablet_id, req.schema_hash);
                        match scan_dir(&dir) {
                            Ok(files) => snapshot_files = files,
                            Err(err) => {
                                warn!(tablet_id = req.tablet_id, error = %err, "list snapshot files failed");
                                envelope.task_status = TaskStatus {
                                    status_code: StatusCode::RuntimeError,
                                    error_msgs: vec![format!(
                                        "make snapshot failed, list file failed: {err}"
                                    )],
                                };
                            }
                        }
                    }
                }
                Err(err) => {
                    warn!(tablet_id = req.tablet_id, version = req.version, error = %err, "make snapshot failed");
                    envelope.task_status = TaskStatus {
                        status_code: StatusCode::RuntimeError,
                        error_msgs: vec![format!("make snapshot failed: {err}")],
                    };
                }
            }
            envelope.snapshot_path = Some(snapshot_path);
            envelope.snapshot_files = Some(snapshot_files);
            Some(envelope)
        }

        (ReleaseSnapshot, TaskPayload::ReleaseSnapshot(req)) => {
            info!(signature = task.signature, "got release snapshot task");
            let mut envelope = new_envelope(env, task);
            match env.snapshots.release_snapshot(&req.snapshot_path) {
                Ok(()) => {
                    info!(snapshot_path = %req.snapshot_path, "release snapshot success");
                }
                Err(err) => {
                    warn!(snapshot_path = %req.snapshot_path, error = %err, "release snapshot failed");
                    envelope.task_status = TaskStatus {
                        status_code: StatusCode::RuntimeError,
                        error_msgs: vec![format!("release snapshot failed: {err}")],
                    };
                }
            }
            Some(envelope)
        }

        (Move, TaskPayload::Move(req)) => {
            info!(signature = task.signature, job_id = req.job_id, "got move dir task");
            let mut envelope = new_envelope(env, task);
            let mut error_msgs = Vec::new();
            // Overwrite stays on for move jobs.
            let moved = move_dir(env, req, true, &mut error_msgs);
            if moved {
                info!(
                    src = %req.src,
                    tablet_id = req.tablet_id,
                    signature = task.signature,
                    job_id = req.job_id,
                    "finished to move dir"
                );
            } else {
                warn!(
                    src = %req.src,
                    tablet_id = req.tablet_id,
                    signature = task.signature,
                    job_id = req.job_id,
                    "failed to move dir"
                );
                envelope.task_status = TaskStatus {
                    status_code: StatusCode::RuntimeError,
                    error_msgs,
                };
            }
            Some(envelope)
        }

        (RecoverTablet, TaskPayload::RecoverTablet(req)) => {
            info!(
                tablet_id = req.tablet_id,
                version = req.version,
                "begin to recover tablet"
            );
            let mut envelope = new_envelope(env, task);
            match env.engine.recover_tablet(req) {
                Ok(()) => {
                    info!(signature = task.signature, tablet_id = req.tablet_id, "succeed to recover tablet");
                }
                Err(err) => {
                    warn!(signature = task.signature, tablet_id = req.tablet_id, error = %err, "failed to recover tablet");
                    envelope.task_status.status_code = StatusCode::RuntimeError;
                }
            }
            Some(envelope)
        }

        // Payload shape does not match the declared kind.
        (kind, _) => {
            warn!(kind = %kind, signature = task.signature, "task payload does not match kind");
            let mut envelope = new_envelope(env, task);
            envelope.task_status = TaskStatus {
                status_code: StatusCode::AnalysisError,
                error_msgs: vec!["task payload does not match kind".to_string()],
            };
            Some(envelope)
        }
    }
}

fn new_envelope(env: &AgentEnv, task: &TaskRequest) -> FinishTaskRequest {
    FinishTaskRequest::new(env.backend(), task.kind, task.signature)
}

fn retry_pause(env: &AgentEnv) -> Duration {
    Duration::from_secs(env.settings.retry_pause_secs)
}

fn run_alter(env: &AgentEnv, task: &TaskRequest, req: &AlterTabletReq) -> FinishTaskRequest {
    let process = req.alter_kind.process_name();
    info!(signature = task.signature, process, "got alter tablet task");

    let mut error_msgs = Vec::new();
    let mut succeeded = match env.engine.schema_change(req, task.signature) {
        Ok(()) => {
            env.report_version.bump();
            info!(signature = task.signature, process, "alter finished");
            true
        }
        Err(err) => {
            warn!(signature = task.signature, process, error = %err, "alter failed");
            false
        }
    };

    let mut envelope = new_envelope(env, task);
    envelope.report_version = Some(env.report_version.current());

    let mut finish_tablet_infos = Vec::new();
    if succeeded {
        match env
            .engine
            .tablet_info(req.new_tablet_id, req.new_schema_hash)
        {
            Ok(info) => finish_tablet_infos.push(info),
            Err(err) => {
                warn!(
                    process,
                    tablet_id = req.new_tablet_id,
                    signature = task.signature,
                    error = %err,
                    "alter succeeded but fetching new tablet info failed"
                );
                succeeded = false;
            }
        }
    }

    if succeeded {
        envelope.finish_tablet_infos = Some(finish_tablet_infos);
        info!(signature = task.signature, process, "alter success");
        error_msgs.push(format!("{process} success"));
        envelope.task_status = TaskStatus {
            status_code: StatusCode::Ok,
            error_msgs,
        };
    } else {
        error_msgs.push(format!("{process} failed"));
        envelope.task_status = TaskStatus {
            status_code: StatusCode::RuntimeError,
            error_msgs,
        };
    }
    envelope
}

fn run_push(env: &AgentEnv, task: &TaskRequest, req: &PushReq) -> Option<FinishTaskRequest> {
    let result = env.engine.push(req);

    if matches!(result, Err(EngineError::AlreadyLoaded)) {
        // This version already landed here; drop the task without a finish
        // report. The master learns the outcome from the task-report loop.
        info!(signature = task.signature, "push already loaded, skip finish report");
        return None;
    }

    let mut envelope = new_envelope(env, task);
    if req.push_type == PushType::Delete {
        envelope.request_version = Some(req.version);
        envelope.request_version_hash = Some(req.version_hash);
    }

    match result {
        Ok(tablet_infos) => {
            info!(signature = task.signature, "push success");
            env.report_version.bump();
            envelope.finish_tablet_infos = Some(tablet_infos);
            envelope.task_status = TaskStatus {
                status_code: StatusCode::Ok,
                error_msgs: vec!["push success".to_string()],
            };
        }
        Err(EngineError::InvalidRequest(msg)) => {
            warn!(signature = task.signature, error = %msg, "push request push type invalid");
            envelope.task_status = TaskStatus {
                status_code: StatusCode::AnalysisError,
                error_msgs: vec!["push request push_type invalid".to_string()],
            };
        }
        Err(err) => {
            warn!(signature = task.signature, error = %err, "push failed");
            envelope.task_status = TaskStatus {
                status_code: StatusCode::RuntimeError,
                error_msgs: vec!["push failed".to_string()],
            };
        }
    }
    envelope.report_version = Some(env.report_version.current());
    Some(envelope)
}

fn move_dir(
    env: &AgentEnv,
    req: &crate::task::MoveDirReq,
    overwrite: bool,
    error_msgs: &mut Vec<String>,
) -> bool {
    let paths = match env.engine.tablet_paths(req.tablet_id, req.schema_hash) {
        Ok(paths) => paths,
        Err(err) => {
            info!(tablet_id = req.tablet_id, error = %err, "failed to get tablet");
            error_msgs.push("failed to get tablet".to_string());
            return false;
        }
    };

    match env.loader.move_dir(
        &req.src,
        &paths.tablet_dir,
        &paths.store_path,
        req.job_id,
        overwrite,
    ) {
        Ok(()) => true,
        Err(err) => {
            warn!(job_id = req.job_id, error = %err, "move failed");
            error_msgs.push(err.to_string());
            false
        }
    }
}

/// File names directly under `dir`, sorted for stable envelopes.
fn scan_dir(dir: &str) -> std::io::Result<Vec<String>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        files.push(entry.file_name().to_string_lossy().into_owned());
    }
    files.sort();
    Ok(files)
}
