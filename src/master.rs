//! Master RPC surface: the client trait the dispatcher reports through and
//! the finish/report envelopes it sends.

use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::TabletInfo;
use crate::task::{TabletId, TaskKind};

/// Transport-level failure talking to the master. The master's own status
/// code inside a successful response is never treated as retryable.
#[derive(Debug, Error)]
#[error("master rpc failed: {0}")]
pub struct MasterClientError(pub String);

/// Status carried inside finish envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusCode {
    Ok,
    /// Malformed request (bad push type, mismatched payload).
    AnalysisError,
    /// Engine or I/O failure.
    RuntimeError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatus {
    pub status_code: StatusCode,
    pub error_msgs: Vec<String>,
}

impl TaskStatus {
    pub fn ok() -> Self {
        Self {
            status_code: StatusCode::Ok,
            error_msgs: Vec::new(),
        }
    }
}

/// This node's identity, stamped on every outgoing request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendId {
    pub host: String,
    pub be_port: u16,
    pub http_port: u16,
}

/// Where the master currently lives. Port zero means no heartbeat has been
/// received yet; the report loops block until it flips.
#[derive(Debug, Default)]
pub struct MasterAddress {
    inner: Mutex<(String, u16)>,
}

impl MasterAddress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the address learned from a heartbeat.
    pub fn set(&self, host: &str, port: u16) {
        let mut inner = self.inner.lock().unwrap();
        *inner = (host.to_string(), port);
    }

    pub fn get(&self) -> (String, u16) {
        self.inner.lock().unwrap().clone()
    }

    pub fn is_ready(&self) -> bool {
        self.inner.lock().unwrap().1 != 0
    }
}

/// Per-task outcome envelope. The optional fields are populated per kind;
/// see the worker execution paths for which kind sets what.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinishTaskRequest {
    pub backend: BackendId,
    pub task_kind: TaskKind,
    pub signature: i64,
    pub task_status: TaskStatus,
    pub report_version: Option<u64>,
    pub finish_tablet_infos: Option<Vec<TabletInfo>>,
    pub error_tablet_ids: Option<Vec<TabletId>>,
    pub request_version: Option<i64>,
    pub request_version_hash: Option<i64>,
    pub tablet_checksum: Option<i64>,
    pub snapshot_path: Option<String>,
    pub snapshot_files: Option<Vec<String>>,
    pub tablet_files: Option<HashMap<TabletId, Vec<String>>>,
    pub downloaded_tablet_ids: Option<Vec<TabletId>>,
}

impl FinishTaskRequest {
    /// Envelope with only the always-present fields set.
    pub fn new(backend: BackendId, task_kind: TaskKind, signature: i64) -> Self {
        Self {
            backend,
            task_kind,
            signature,
            task_status: TaskStatus::ok(),
            report_version: None,
            finish_tablet_infos: None,
            error_tablet_ids: None,
            request_version: None,
            request_version_hash: None,
            tablet_checksum: None,
            snapshot_path: None,
            snapshot_files: None,
            tablet_files: None,
            downloaded_tablet_ids: None,
        }
    }
}

/// One disk's state inside a disk report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskReport {
    pub root_path: String,
    pub path_hash: i64,
    pub disk_total_capacity: f64,
    pub data_used_capacity: f64,
    pub disk_available_capacity: f64,
    pub used: bool,
}

/// Periodic state report. Exactly one of `tasks` / `disks` / `tablets` is set
/// per send; the three report loops each own one variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportRequest {
    pub backend: BackendId,
    pub force_recovery: bool,
    pub tasks: Option<HashMap<TaskKind, BTreeSet<i64>>>,
    pub disks: Option<HashMap<String, DiskReport>>,
    pub tablets: Option<HashMap<TabletId, Vec<TabletInfo>>>,
    pub report_version: Option<u64>,
}

impl ReportRequest {
    pub fn new(backend: BackendId, force_recovery: bool) -> Self {
        Self {
            backend,
            force_recovery,
            tasks: None,
            disks: None,
            tablets: None,
            report_version: None,
        }
    }
}

/// The master's response status to a finish or report call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterResult {
    pub status_code: StatusCode,
}

/// Client for the master's agent-facing RPCs. Implementations own transport
/// concerns (connection caching, serialization); retry lives in the caller.
pub trait MasterClient: Send + Sync {
    fn finish_task(&self, req: &FinishTaskRequest) -> Result<MasterResult, MasterClientError>;

    fn report(&self, req: &ReportRequest) -> Result<MasterResult, MasterClientError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn master_address_gates_on_port() {
        let addr = MasterAddress::new();
        assert!(!addr.is_ready());
        addr.set("fe-1", 9020);
        assert!(addr.is_ready());
        assert_eq!(addr.get(), ("fe-1".to_string(), 9020));
    }
}
