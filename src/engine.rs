//! Storage-engine façade consumed by the worker pools and report loops.
//!
//! The dispatcher never reaches into the engine's internals; it calls the
//! operations below and maps their coarse error codes into task statuses.
//! Implementations must be internally thread-safe: workers call into the
//! engine concurrently from many threads.

use std::collections::HashMap;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::task::{
    AlterTabletReq, CheckConsistencyReq, ClearAlterTaskReq, CloneReq, CreateTabletReq,
    DropTabletReq, PushReq, PublishVersionReq, RecoverTabletReq, SchemaHash,
    StorageMediumMigrateReq, TabletId,
};

/// Coarse engine result codes. The worker layer decides which of these are
/// benign for a given task kind (drop of a missing tablet, clone of an
/// existing one, re-push of a loaded version).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("tablet not found")]
    TabletNotFound,
    #[error("tablet already exists")]
    AlreadyExists,
    #[error("version already loaded")]
    AlreadyLoaded,
    #[error("engine error: {0}")]
    Internal(String),
}

/// Publish failure carrying the tablets that could not publish.
#[derive(Debug, Error)]
#[error("publish version failed for {} tablet(s)", error_tablet_ids.len())]
pub struct PublishError {
    pub error_tablet_ids: Vec<TabletId>,
}

/// Per-tablet state attached to finish envelopes and tablet reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabletInfo {
    pub tablet_id: TabletId,
    pub schema_hash: SchemaHash,
    pub version: i64,
    pub version_hash: i64,
    pub row_count: i64,
    pub data_size: i64,
}

/// One data directory's capacity numbers, reported to the master.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataDirInfo {
    pub path: String,
    pub path_hash: i64,
    pub capacity: i64,
    pub data_used_capacity: i64,
    pub available: i64,
    pub is_used: bool,
}

/// Result of a clone. `existed` marks the benign already-present case, which
/// still carries the tablet's current info.
#[derive(Debug, Clone)]
pub struct CloneResult {
    pub tablet_infos: Vec<TabletInfo>,
    pub existed: bool,
}

/// Filesystem locations of a tablet, used by the move task.
#[derive(Debug, Clone)]
pub struct TabletPaths {
    /// Directory the tablet's files live in.
    pub tablet_dir: String,
    /// Root path of the data dir holding the tablet.
    pub store_path: String,
}

/// The local storage engine, as seen by the dispatcher.
pub trait StorageEngine: Send + Sync {
    fn create_tablet(&self, req: &CreateTabletReq) -> Result<(), EngineError>;

    fn drop_tablet(&self, req: &DropTabletReq) -> Result<(), EngineError>;

    /// Executes either alter shape (schema change or rollup).
    fn schema_change(&self, req: &AlterTabletReq, signature: i64) -> Result<(), EngineError>;

    /// Batch load. Fills in the affected tablets' info on success.
    /// `AlreadyLoaded` marks an idempotent re-push of a version this node
    /// already holds.
    fn push(&self, req: &PushReq) -> Result<Vec<TabletInfo>, EngineError>;

    fn publish_version(&self, req: &PublishVersionReq) -> Result<(), PublishError>;

    fn clear_alter_task(&self, req: &ClearAlterTaskReq) -> Result<(), EngineError>;

    /// The engine exposes no failure path for this operation.
    fn clear_transaction_task(&self, transaction_id: i64, partition_ids: &[i64]);

    fn clone_tablet(&self, req: &CloneReq, signature: i64) -> Result<CloneResult, EngineError>;

    fn storage_migration(&self, req: &StorageMediumMigrateReq) -> Result<(), EngineError>;

    /// Consistency checksum over a tablet at a specific version.
    fn checksum(&self, req: &CheckConsistencyReq) -> Result<u32, EngineError>;

    /// Current info for one tablet, used to fill finish envelopes.
    fn tablet_info(
        &self,
        tablet_id: TabletId,
        schema_hash: SchemaHash,
    ) -> Result<TabletInfo, EngineError>;

    /// Every tablet's info, keyed by tablet id, for the tablet-report loop.
    fn all_tablet_infos(&self) -> Result<HashMap<TabletId, Vec<TabletInfo>>, EngineError>;

    fn data_dir_infos(&self) -> Vec<DataDirInfo>;

    fn recover_tablet(&self, req: &RecoverTabletReq) -> Result<(), EngineError>;

    /// Where a tablet lives on disk, for the move task.
    fn tablet_paths(
        &self,
        tablet_id: TabletId,
        schema_hash: SchemaHash,
    ) -> Result<TabletPaths, EngineError>;

    /// Block the calling report loop until `timeout` elapses or the engine
    /// signals that a report of the matching flavor should go out early.
    fn wait_for_report_notify(&self, timeout: Duration, tablet_report: bool);
}

/// Condvar-backed early-wakeup signal for the disk and tablet report loops.
///
/// Engine implementations hold one of these and call `notify` when local
/// state changes warrant an immediate report; the report loops park in
/// `wait` between rounds.
#[derive(Default)]
pub struct ReportNotifier {
    disk: Mutex<bool>,
    tablet: Mutex<bool>,
    disk_cv: Condvar,
    tablet_cv: Condvar,
}

impl ReportNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wake the matching report loop ahead of its timer.
    pub fn notify(&self, tablet_report: bool) {
        if tablet_report {
            let mut pending = self.tablet.lock().unwrap();
            *pending = true;
            self.tablet_cv.notify_all();
        } else {
            let mut pending = self.disk.lock().unwrap();
            *pending = true;
            self.disk_cv.notify_all();
        }
    }

    /// Park until notified or `timeout` elapses. Consumes a pending notify.
    pub fn wait(&self, timeout: Duration, tablet_report: bool) {
        let (flag, cv) = if tablet_report {
            (&self.tablet, &self.tablet_cv)
        } else {
            (&self.disk, &self.disk_cv)
        };
        let guard = flag.lock().unwrap();
        let (mut guard, _timeout_result) = cv
            .wait_timeout_while(guard, timeout, |pending| !*pending)
            .unwrap();
        *guard = false;
    }
}
