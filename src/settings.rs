use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    #[serde(default)]
    pub backend: BackendSettings,
    #[serde(default)]
    pub workers: WorkerSettings,
    #[serde(default)]
    pub report: ReportSettings,
    /// Pause between retry attempts (finish RPC, publish-version, selector
    /// backoff, thread respawn). Set to zero in tests.
    #[serde(default = "default_retry_pause_secs")]
    pub retry_pause_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            backend: BackendSettings::default(),
            workers: WorkerSettings::default(),
            report: ReportSettings::default(),
            retry_pause_secs: default_retry_pause_secs(),
        }
    }
}

fn default_retry_pause_secs() -> u64 {
    1
}

/// Identity stamped on every outgoing master request.
#[derive(Debug, Deserialize, Clone)]
pub struct BackendSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_be_port")]
    pub be_port: u16,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Propagated on every report; tells the master this node is recovering.
    #[serde(default)]
    pub force_recovery: bool,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            be_port: default_be_port(),
            http_port: default_http_port(),
            force_recovery: false,
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_be_port() -> u16 {
    9060
}

fn default_http_port() -> u16 {
    8040
}

/// Per-kind worker pool sizes. Move and recover-tablet pools are pinned to a
/// single worker and have no knob.
#[derive(Debug, Deserialize, Clone)]
pub struct WorkerSettings {
    #[serde(default = "default_three")]
    pub create_tablet_worker_count: u32,
    #[serde(default = "default_three")]
    pub drop_tablet_worker_count: u32,
    #[serde(default = "default_three")]
    pub alter_tablet_worker_count: u32,
    #[serde(default = "default_three")]
    pub push_worker_count_normal_priority: u32,
    #[serde(default = "default_three")]
    pub push_worker_count_high_priority: u32,
    #[serde(default = "default_two")]
    pub publish_version_worker_count: u32,
    #[serde(default = "default_three")]
    pub clear_alter_task_worker_count: u32,
    #[serde(default = "default_one")]
    pub clear_transaction_task_worker_count: u32,
    #[serde(default = "default_three")]
    pub delete_worker_count: u32,
    #[serde(default = "default_three")]
    pub clone_worker_count: u32,
    #[serde(default = "default_one")]
    pub storage_medium_migrate_count: u32,
    #[serde(default = "default_one")]
    pub check_consistency_worker_count: u32,
    #[serde(default = "default_one")]
    pub upload_worker_count: u32,
    #[serde(default = "default_one")]
    pub download_worker_count: u32,
    #[serde(default = "default_five")]
    pub make_snapshot_worker_count: u32,
    #[serde(default = "default_five")]
    pub release_snapshot_worker_count: u32,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            create_tablet_worker_count: default_three(),
            drop_tablet_worker_count: default_three(),
            alter_tablet_worker_count: default_three(),
            push_worker_count_normal_priority: default_three(),
            push_worker_count_high_priority: default_three(),
            publish_version_worker_count: default_two(),
            clear_alter_task_worker_count: default_three(),
            clear_transaction_task_worker_count: default_one(),
            delete_worker_count: default_three(),
            clone_worker_count: default_three(),
            storage_medium_migrate_count: default_one(),
            check_consistency_worker_count: default_one(),
            upload_worker_count: default_one(),
            download_worker_count: default_one(),
            make_snapshot_worker_count: default_five(),
            release_snapshot_worker_count: default_five(),
        }
    }
}

fn default_one() -> u32 {
    1
}

fn default_two() -> u32 {
    2
}

fn default_three() -> u32 {
    3
}

fn default_five() -> u32 {
    5
}

/// Intervals for the three report loops.
#[derive(Debug, Deserialize, Clone)]
pub struct ReportSettings {
    #[serde(default = "default_report_task_interval_secs")]
    pub report_task_interval_secs: u64,
    #[serde(default = "default_report_state_interval_secs")]
    pub report_disk_state_interval_secs: u64,
    #[serde(default = "default_report_state_interval_secs")]
    pub report_tablet_interval_secs: u64,
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            report_task_interval_secs: default_report_task_interval_secs(),
            report_disk_state_interval_secs: default_report_state_interval_secs(),
            report_tablet_interval_secs: default_report_state_interval_secs(),
        }
    }
}

fn default_report_task_interval_secs() -> u64 {
    10
}

fn default_report_state_interval_secs() -> u64 {
    60
}

impl AgentConfig {
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) => {
                let data = fs::read_to_string(p)?;
                let cfg: Self = toml::from_str(&data)?;
                Ok(cfg)
            }
            None => Ok(Self::default()),
        }
    }
}
