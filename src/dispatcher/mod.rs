//! The agent task dispatcher - the subsystem that multiplexes maintenance
//! commands from the master onto bounded per-kind worker pools.
//!
//! This module contains the dispatcher façade and its implementation, split
//! across submodules:
//!
//! - `pool`: bounded worker pools with condition-variable handoff
//! - `fair_share`: tenant-aware task selection for the push pool
//! - `execute`: per-kind execution and finish-envelope assembly
//! - `finish`: bounded-retry finish reporting

mod execute;
mod fair_share;
mod finish;
mod pool;

pub use fair_share::select_next_index;
pub use pool::WorkerPool;
pub(crate) use pool::DequeueStrategy;

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use crate::engine::StorageEngine;
use crate::master::{BackendId, MasterAddress, MasterClient};
use crate::metrics::Metrics;
use crate::registry::SignatureRegistry;
use crate::report_version::ReportVersion;
use crate::settings::AgentConfig;
use crate::snapshot::{SnapshotLoader, SnapshotManager};
use crate::task::{TaskKind, TaskRequest};

/// Shared collaborators handed to every worker pool and report loop.
pub struct AgentEnv {
    pub settings: AgentConfig,
    pub engine: Arc<dyn StorageEngine>,
    pub loader: Arc<dyn SnapshotLoader>,
    pub snapshots: Arc<dyn SnapshotManager>,
    pub master: Arc<dyn MasterClient>,
    pub master_addr: Arc<MasterAddress>,
    pub registry: Arc<SignatureRegistry>,
    pub report_version: ReportVersion,
    pub metrics: Metrics,
}

impl AgentEnv {
    pub fn new(
        settings: AgentConfig,
        engine: Arc<dyn StorageEngine>,
        loader: Arc<dyn SnapshotLoader>,
        snapshots: Arc<dyn SnapshotManager>,
        master: Arc<dyn MasterClient>,
    ) -> anyhow::Result<Arc<Self>> {
        Ok(Arc::new(Self {
            settings,
            engine,
            loader,
            snapshots,
            master,
            master_addr: Arc::new(MasterAddress::new()),
            registry: Arc::new(SignatureRegistry::new()),
            report_version: ReportVersion::new(),
            metrics: crate::metrics::init()?,
        }))
    }

    /// This node's identity, stamped on every outgoing request.
    pub fn backend(&self) -> BackendId {
        BackendId {
            host: self.settings.backend.host.clone(),
            be_port: self.settings.backend.be_port,
            http_port: self.settings.backend.http_port,
        }
    }
}

/// One worker pool to build, and which task kinds route into it.
struct PoolSpec {
    kinds: &'static [TaskKind],
    workers: u32,
    strategy: DequeueStrategy,
}

/// Accepts submissions from the RPC front-end, deduplicates them by
/// signature, and hands each admitted task to the pool owning its kind.
pub struct AgentDispatcher {
    env: Arc<AgentEnv>,
    pools: Vec<Arc<WorkerPool>>,
    routes: HashMap<TaskKind, usize>,
}

impl AgentDispatcher {
    /// Build the per-kind pools from the worker settings. Push and realtime
    /// push share the fair-share pool; delete runs the push execution path
    /// but admits strictly FIFO from its own pool; move and recover-tablet
    /// are pinned to a single worker.
    pub fn new(env: Arc<AgentEnv>) -> Self {
        let w = &env.settings.workers;
        let specs = [
            PoolSpec {
                kinds: &[TaskKind::CreateTablet],
                workers: w.create_tablet_worker_count,
                strategy: DequeueStrategy::Fifo,
            },
            PoolSpec {
                kinds: &[TaskKind::DropTablet],
                workers: w.drop_tablet_worker_count,
                strategy: DequeueStrategy::Fifo,
            },
            PoolSpec {
                kinds: &[TaskKind::AlterTablet],
                workers: w.alter_tablet_worker_count,
                strategy: DequeueStrategy::Fifo,
            },
            PoolSpec {
                kinds: &[TaskKind::Push, TaskKind::RealtimePush],
                workers: w.push_worker_count_normal_priority + w.push_worker_count_high_priority,
                strategy: DequeueStrategy::FairShare {
                    high_priority_workers: w.push_worker_count_high_priority,
                },
            },
            PoolSpec {
                kinds: &[TaskKind::PublishVersion],
                workers: w.publish_version_worker_count,
                strategy: DequeueStrategy::Fifo,
            },
            PoolSpec {
                kinds: &[TaskKind::ClearAlterTask],
                workers: w.clear_alter_task_worker_count,
                strategy: DequeueStrategy::Fifo,
            },
            PoolSpec {
                kinds: &[TaskKind::ClearTransactionTask],
                workers: w.clear_transaction_task_worker_count,
                strategy: DequeueStrategy::Fifo,
            },
            PoolSpec {
                kinds: &[TaskKind::Delete],
                workers: w.delete_worker_count,
                strategy: DequeueStrategy::Fifo,
            },
            PoolSpec {
                kinds: &[TaskKind::Clone],
                workers: w.clone_worker_count,
                strategy: DequeueStrategy::Fifo,
            },
            PoolSpec {
                kinds: &[TaskKind::StorageMediumMigrate],
                workers: w.storage_medium_migrate_count,
                strategy: DequeueStrategy::Fifo,
            },
            PoolSpec {
                kinds: &[TaskKind::CheckConsistency],
                workers: w.check_consistency_worker_count,
                strategy: DequeueStrategy::Fifo,
            },
            PoolSpec {
                kinds: &[TaskKind::Upload],
                workers: w.upload_worker_count,
                strategy: DequeueStrategy::Fifo,
            },
            PoolSpec {
                kinds: &[TaskKind::Download],
                workers: w.download_worker_count,
                strategy: DequeueStrategy::Fifo,
            },
            PoolSpec {
                kinds: &[TaskKind::MakeSnapshot],
                workers: w.make_snapshot_worker_count,
                strategy: DequeueStrategy::Fifo,
            },
            PoolSpec {
                kinds: &[TaskKind::ReleaseSnapshot],
                workers: w.release_snapshot_worker_count,
                strategy: DequeueStrategy::Fifo,
            },
            PoolSpec {
                kinds: &[TaskKind::Move],
                workers: 1,
                strategy: DequeueStrategy::Fifo,
            },
            PoolSpec {
                kinds: &[TaskKind::RecoverTablet],
                workers: 1,
                strategy: DequeueStrategy::Fifo,
            },
        ];

        let mut pools = Vec::with_capacity(specs.len());
        let mut routes = HashMap::new();
        for spec in specs {
            let index = pools.len();
            pools.push(WorkerPool::new(
                spec.kinds[0],
                spec.workers,
                spec.strategy,
                Arc::clone(&env),
            ));
            for kind in spec.kinds {
                routes.insert(*kind, index);
            }
        }

        Self { env, pools, routes }
    }

    /// Spawn every pool's worker threads. Signal policy (SIGCHLD, SIGHUP,
    /// SIGPIPE) is expected to be set by the embedding process before this
    /// is called; the workers rely on no per-thread masks.
    pub fn start(&self) {
        for pool in &self.pools {
            pool.start();
        }
        info!(pools = self.pools.len(), "agent dispatcher started");
    }

    pub fn env(&self) -> &Arc<AgentEnv> {
        &self.env
    }

    /// Admit a task from the master. Duplicate `(kind, signature)` pairs are
    /// dropped silently; the master observes the original via the task-report
    /// loop.
    pub fn submit(&self, task: TaskRequest) {
        let kind = task.kind;
        let signature = task.signature;
        let user = task.user_name().to_string();

        if !self.env.registry.admit(kind, signature, &user) {
            self.env.metrics.record_duplicate(kind.name());
            return;
        }
        self.env.metrics.record_submit(kind.name());

        let index = self.routes[&kind];
        self.pools[index].enqueue(task);
    }
}
