//! Task types delivered by the master.
//!
//! A task is identified by its `(kind, signature)` pair; the signature is a
//! master-assigned 64-bit id unique per kind. The payload is a union with one
//! variant per request shape, so a single intake queue can carry every kind.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

pub type TabletId = i64;
pub type SchemaHash = i64;

/// Every task kind the master can dispatch to this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TaskKind {
    CreateTablet,
    DropTablet,
    Push,
    RealtimePush,
    PublishVersion,
    ClearAlterTask,
    ClearTransactionTask,
    Delete,
    AlterTablet,
    Clone,
    StorageMediumMigrate,
    CheckConsistency,
    Upload,
    Download,
    MakeSnapshot,
    ReleaseSnapshot,
    Move,
    RecoverTablet,
}

impl TaskKind {
    pub fn name(&self) -> &'static str {
        match self {
            TaskKind::CreateTablet => "create_tablet",
            TaskKind::DropTablet => "drop_tablet",
            TaskKind::Push => "push",
            TaskKind::RealtimePush => "realtime_push",
            TaskKind::PublishVersion => "publish_version",
            TaskKind::ClearAlterTask => "clear_alter_task",
            TaskKind::ClearTransactionTask => "clear_transaction_task",
            TaskKind::Delete => "delete",
            TaskKind::AlterTablet => "alter_tablet",
            TaskKind::Clone => "clone",
            TaskKind::StorageMediumMigrate => "storage_medium_migrate",
            TaskKind::CheckConsistency => "check_consistency",
            TaskKind::Upload => "upload",
            TaskKind::Download => "download",
            TaskKind::MakeSnapshot => "make_snapshot",
            TaskKind::ReleaseSnapshot => "release_snapshot",
            TaskKind::Move => "move",
            TaskKind::RecoverTablet => "recover_tablet",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Admission-class tag on push tasks. HIGH reserves a slice of the push pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Normal,
    High,
}

/// A single maintenance command from the master.
#[derive(Debug, Clone)]
pub struct TaskRequest {
    pub kind: TaskKind,
    pub signature: i64,
    /// Only meaningful for push tasks.
    pub priority: Option<Priority>,
    /// Submitting tenant; `None` or empty means anonymous.
    pub user: Option<String>,
    pub payload: TaskPayload,
}

impl TaskRequest {
    /// Tenant name used for fair-share accounting.
    pub fn user_name(&self) -> &str {
        self.user.as_deref().unwrap_or("")
    }
}

/// Kind-specific request payload.
#[derive(Debug, Clone)]
pub enum TaskPayload {
    CreateTablet(CreateTabletReq),
    DropTablet(DropTabletReq),
    AlterTablet(AlterTabletReq),
    Push(PushReq),
    PublishVersion(PublishVersionReq),
    ClearAlterTask(ClearAlterTaskReq),
    ClearTransactionTask(ClearTransactionTaskReq),
    Clone(CloneReq),
    StorageMediumMigrate(StorageMediumMigrateReq),
    CheckConsistency(CheckConsistencyReq),
    Upload(UploadReq),
    Download(DownloadReq),
    MakeSnapshot(SnapshotReq),
    ReleaseSnapshot(ReleaseSnapshotReq),
    Move(MoveDirReq),
    RecoverTablet(RecoverTabletReq),
}

#[derive(Debug, Clone)]
pub struct CreateTabletReq {
    pub tablet_id: TabletId,
    pub schema_hash: SchemaHash,
}

#[derive(Debug, Clone)]
pub struct DropTabletReq {
    pub tablet_id: TabletId,
    pub schema_hash: SchemaHash,
}

/// Which shape of alter the task performs. The worker derives its process
/// name from this for logs and error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlterKind {
    SchemaChange,
    Rollup,
}

impl AlterKind {
    pub fn process_name(&self) -> &'static str {
        match self {
            AlterKind::SchemaChange => "schema change",
            AlterKind::Rollup => "roll up",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AlterTabletReq {
    pub alter_kind: AlterKind,
    pub base_tablet_id: TabletId,
    pub base_schema_hash: SchemaHash,
    pub new_tablet_id: TabletId,
    pub new_schema_hash: SchemaHash,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushType {
    Load,
    Delete,
    LoadDelete,
}

#[derive(Debug, Clone)]
pub struct PushReq {
    pub tablet_id: TabletId,
    pub schema_hash: SchemaHash,
    pub version: i64,
    pub version_hash: i64,
    pub push_type: PushType,
    pub http_file_path: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PartitionVersionInfo {
    pub partition_id: i64,
    pub version: i64,
    pub version_hash: i64,
}

#[derive(Debug, Clone)]
pub struct PublishVersionReq {
    pub transaction_id: i64,
    pub partition_version_infos: Vec<PartitionVersionInfo>,
}

#[derive(Debug, Clone)]
pub struct ClearAlterTaskReq {
    pub tablet_id: TabletId,
    pub schema_hash: SchemaHash,
}

#[derive(Debug, Clone)]
pub struct ClearTransactionTaskReq {
    pub transaction_id: i64,
    pub partition_ids: Vec<i64>,
}

#[derive(Debug, Clone)]
pub struct CloneReq {
    pub tablet_id: TabletId,
    pub schema_hash: SchemaHash,
    pub committed_version: i64,
    /// Candidate source nodes, as `host:port` strings.
    pub src_backends: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageMedium {
    Hdd,
    Ssd,
}

#[derive(Debug, Clone)]
pub struct StorageMediumMigrateReq {
    pub tablet_id: TabletId,
    pub schema_hash: SchemaHash,
    pub storage_medium: StorageMedium,
}

#[derive(Debug, Clone)]
pub struct CheckConsistencyReq {
    pub tablet_id: TabletId,
    pub schema_hash: SchemaHash,
    pub version: i64,
    pub version_hash: i64,
}

#[derive(Debug, Clone)]
pub struct UploadReq {
    pub job_id: i64,
    /// Local snapshot dir -> remote destination.
    pub src_dest_map: HashMap<String, String>,
    pub broker_addr: String,
    pub broker_prop: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct DownloadReq {
    pub job_id: i64,
    /// Remote source -> local tablet dir.
    pub src_dest_map: HashMap<String, String>,
    pub broker_addr: String,
    pub broker_prop: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct SnapshotReq {
    pub tablet_id: TabletId,
    pub schema_hash: SchemaHash,
    pub version: i64,
    pub version_hash: i64,
    /// When set, the finish envelope carries the snapshot's file listing.
    pub list_files: bool,
}

#[derive(Debug, Clone)]
pub struct ReleaseSnapshotReq {
    pub snapshot_path: String,
}

#[derive(Debug, Clone)]
pub struct MoveDirReq {
    pub tablet_id: TabletId,
    pub schema_hash: SchemaHash,
    pub src: String,
    pub job_id: i64,
}

#[derive(Debug, Clone)]
pub struct RecoverTabletReq {
    pub tablet_id: TabletId,
    pub schema_hash: SchemaHash,
    pub version: i64,
    pub version_hash: i64,
}
