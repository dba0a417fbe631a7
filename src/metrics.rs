//! Prometheus metrics for the agent dispatcher.
//!
//! Provides a cloneable `Metrics` handle with pre-registered instruments for
//! task admission, finish RPCs, and the report loops. There is no exposition
//! server here; the embedding process owns how the registry is scraped.

use std::sync::Arc;

use prometheus::{core::Collector, Counter, CounterVec, Opts, Registry};

/// Metrics handle containing all agent instruments.
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,

    // Admission
    tasks_submitted: CounterVec,
    tasks_rejected: CounterVec,

    // Finish RPC
    finish_task_requests: Counter,
    finish_task_failures: Counter,

    // Report loops, labeled by loop flavor (task/disk/tablet)
    report_requests: CounterVec,
    report_failures: CounterVec,

    // Clone tasks
    clone_requests: Counter,
    clone_failures: Counter,
}

impl Metrics {
    /// Get the prometheus registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record an admitted task submission.
    pub fn record_submit(&self, kind: &str) {
        self.tasks_submitted.with_label_values(&[kind]).inc();
    }

    /// Record a duplicate submission dropped by the signature registry.
    pub fn record_duplicate(&self, kind: &str) {
        self.tasks_rejected.with_label_values(&[kind]).inc();
    }

    /// Record one finish-RPC attempt.
    pub fn record_finish_attempt(&self) {
        self.finish_task_requests.inc();
    }

    /// Record a failed finish-RPC attempt.
    pub fn record_finish_failure(&self) {
        self.finish_task_failures.inc();
    }

    /// Record one report send for the given loop flavor.
    pub fn record_report_attempt(&self, flavor: &str) {
        self.report_requests.with_label_values(&[flavor]).inc();
    }

    /// Record a failed report send for the given loop flavor.
    pub fn record_report_failure(&self, flavor: &str) {
        self.report_failures.with_label_values(&[flavor]).inc();
    }

    /// Record a clone task pickup.
    pub fn record_clone_attempt(&self) {
        self.clone_requests.inc();
    }

    /// Record a failed clone task.
    pub fn record_clone_failure(&self) {
        self.clone_failures.inc();
    }
}

/// Helper to register a metric, logging on failure.
fn register<C: Collector + Clone + 'static>(registry: &Registry, metric: C) -> C {
    if let Err(e) = registry.register(Box::new(metric.clone())) {
        // Log but don't fail - metric may already be registered
        tracing::warn!(error = %e, "failed to register metric");
    }
    metric
}

/// Initialize the metrics system with a Prometheus registry.
///
/// Returns a `Metrics` handle that can be cloned and passed to components.
pub fn init() -> anyhow::Result<Metrics> {
    let registry = Registry::new();

    let tasks_submitted = register(
        &registry,
        CounterVec::new(
            Opts::new(
                "agent_tasks_submitted_total",
                "Total number of tasks admitted into a worker pool",
            ),
            &["kind"],
        )?,
    );

    let tasks_rejected = register(
        &registry,
        CounterVec::new(
            Opts::new(
                "agent_tasks_rejected_total",
                "Total number of duplicate submissions dropped",
            ),
            &["kind"],
        )?,
    );

    let finish_task_requests = register(
        &registry,
        Counter::new(
            "agent_finish_task_requests_total",
            "Total number of finish-task RPC attempts",
        )?,
    );

    let finish_task_failures = register(
        &registry,
        Counter::new(
            "agent_finish_task_requests_failed",
            "Total number of failed finish-task RPC attempts",
        )?,
    );

    let report_requests = register(
        &registry,
        CounterVec::new(
            Opts::new(
                "agent_report_requests_total",
                "Total number of report sends per loop flavor",
            ),
            &["flavor"],
        )?,
    );

    let report_failures = register(
        &registry,
        CounterVec::new(
            Opts::new(
                "agent_report_requests_failed",
                "Total number of failed report sends per loop flavor",
            ),
            &["flavor"],
        )?,
    );

    let clone_requests = register(
        &registry,
        Counter::new(
            "agent_clone_requests_total",
            "Total number of clone tasks picked up",
        )?,
    );

    let clone_failures = register(
        &registry,
        Counter::new(
            "agent_clone_requests_failed",
            "Total number of clone tasks that failed",
        )?,
    );

    Ok(Metrics {
        registry: Arc::new(registry),
        tasks_submitted,
        tasks_rejected,
        finish_task_requests,
        finish_task_failures,
        report_requests,
        report_failures,
        clone_requests,
        clone_failures,
    })
}
