//! Snapshot collaborators: the broker-backed loader that moves snapshot data
//! in and out of this node, and the manager that creates and releases local
//! snapshots. Both are opaque I/O façades; the workers only relay their
//! results into finish envelopes.

use std::collections::HashMap;

use thiserror::Error;

use crate::task::{DownloadReq, SnapshotReq, TabletId, UploadReq};

#[derive(Debug, Error)]
#[error("{0}")]
pub struct LoaderError(pub String);

#[derive(Debug, Error)]
#[error("snapshot error: {0}")]
pub struct SnapshotError(pub String);

/// Moves snapshot payloads between this node and remote storage via a broker.
pub trait SnapshotLoader: Send + Sync {
    /// Upload local snapshot dirs. Returns the uploaded file names per tablet.
    fn upload(&self, req: &UploadReq) -> Result<HashMap<TabletId, Vec<String>>, LoaderError>;

    /// Download remote snapshots into local tablet dirs. Returns the ids of
    /// tablets whose data landed.
    fn download(&self, req: &DownloadReq) -> Result<Vec<TabletId>, LoaderError>;

    /// Move a downloaded snapshot dir into its tablet's live directory.
    fn move_dir(
        &self,
        src: &str,
        dest_tablet_dir: &str,
        store_path: &str,
        job_id: i64,
        overwrite: bool,
    ) -> Result<(), LoaderError>;
}

/// Creates and releases local tablet snapshots.
pub trait SnapshotManager: Send + Sync {
    /// Returns the created snapshot's path.
    fn make_snapshot(&self, req: &SnapshotReq) -> Result<String, SnapshotError>;

    fn release_snapshot(&self, snapshot_path: &str) -> Result<(), SnapshotError>;
}
