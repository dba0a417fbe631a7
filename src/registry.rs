//! Process-wide registry of in-flight task signatures.
//!
//! The registry enforces at-most-one admission per `(kind, signature)` pair
//! and keeps the per-tenant counters the push fair-share selector reads:
//! cumulative totals since process start and currently-running counts.
//!
//! Two independent locks guard the state: one for the signature/total tables,
//! one for the running counts. They are never held at the same time and never
//! across blocking I/O; `release` acquires them sequentially.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Mutex;

use tracing::info;

use crate::task::TaskKind;

#[derive(Default)]
struct SignatureTables {
    /// Signatures currently queued or running, per kind.
    live: HashMap<TaskKind, HashSet<i64>>,
    /// Cumulative admissions per tenant. Maintained for push only.
    total_by_user: HashMap<TaskKind, HashMap<String, u64>>,
    /// Sum of `total_by_user` over tenants. Maintained for push only.
    total_by_kind: HashMap<TaskKind, u64>,
}

/// Shared admission/accounting state for every worker pool.
#[derive(Default)]
pub struct SignatureRegistry {
    tables: Mutex<SignatureTables>,
    /// Currently-executing task counts per tenant. Maintained for push only,
    /// behind its own lock so the selector can bump it without touching the
    /// signature tables.
    running_by_user: Mutex<HashMap<TaskKind, HashMap<String, u64>>>,
}

impl SignatureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a task as in-flight. Returns false (and changes nothing) when
    /// the same `(kind, signature)` is already live.
    pub fn admit(&self, kind: TaskKind, signature: i64, user: &str) -> bool {
        let mut tables = self.tables.lock().unwrap();
        let set = tables.live.entry(kind).or_default();
        if !set.insert(signature) {
            info!(kind = %kind, signature, queued = set.len(), "task already inserted");
            return false;
        }
        let queued = set.len();
        if kind == TaskKind::Push {
            *tables
                .total_by_user
                .entry(kind)
                .or_default()
                .entry(user.to_string())
                .or_insert(0) += 1;
            *tables.total_by_kind.entry(kind).or_insert(0) += 1;
        }
        info!(kind = %kind, signature, queued, "task inserted");
        true
    }

    /// Drop a finished (or skipped) task from the registry. Only called after
    /// a successful `admit` for the same signature; counters never underflow.
    pub fn release(&self, kind: TaskKind, signature: i64, user: &str) {
        let queued = {
            let mut tables = self.tables.lock().unwrap();
            if let Some(set) = tables.live.get_mut(&kind) {
                set.remove(&signature);
            }
            if kind == TaskKind::Push {
                if let Some(by_user) = tables.total_by_user.get_mut(&kind) {
                    if let Some(count) = by_user.get_mut(user) {
                        *count = count.saturating_sub(1);
                        if *count == 0 {
                            by_user.remove(user);
                        }
                    }
                }
                if let Some(total) = tables.total_by_kind.get_mut(&kind) {
                    *total = total.saturating_sub(1);
                }
            }
            tables.live.get(&kind).map(|s| s.len()).unwrap_or(0)
        };

        // Running counts are only ever incremented by the fair-share
        // selector, but unwind them for every kind that passes through it
        // (push and realtime push share the pool).
        {
            let mut running = self.running_by_user.lock().unwrap();
            if let Some(by_user) = running.get_mut(&kind) {
                if let Some(count) = by_user.get_mut(user) {
                    *count = count.saturating_sub(1);
                    if *count == 0 {
                        by_user.remove(user);
                    }
                }
            }
        }

        info!(kind = %kind, signature, queued, "task erased");
    }

    /// Copy of the live table, used by the task-report loop.
    pub fn snapshot_live(&self) -> HashMap<TaskKind, BTreeSet<i64>> {
        let tables = self.tables.lock().unwrap();
        tables
            .live
            .iter()
            .map(|(kind, set)| (*kind, set.iter().copied().collect()))
            .collect()
    }

    pub fn live_count(&self, kind: TaskKind) -> usize {
        let tables = self.tables.lock().unwrap();
        tables.live.get(&kind).map(|s| s.len()).unwrap_or(0)
    }

    /// `(tenant total, kind total)` admission counts for fair-share rates.
    pub fn totals(&self, kind: TaskKind, user: &str) -> (u64, u64) {
        let tables = self.tables.lock().unwrap();
        let user_total = tables
            .total_by_user
            .get(&kind)
            .and_then(|m| m.get(user))
            .copied()
            .unwrap_or(0);
        let kind_total = tables.total_by_kind.get(&kind).copied().unwrap_or(0);
        (user_total, kind_total)
    }

    pub fn running_count(&self, kind: TaskKind, user: &str) -> u64 {
        let running = self.running_by_user.lock().unwrap();
        running
            .get(&kind)
            .and_then(|m| m.get(user))
            .copied()
            .unwrap_or(0)
    }

    /// Mark one more task for `user` as executing. Called by the selector
    /// after it picks a queue index, before the worker leaves the pool lock.
    pub fn note_running(&self, kind: TaskKind, user: &str) {
        let mut running = self.running_by_user.lock().unwrap();
        *running
            .entry(kind)
            .or_default()
            .entry(user.to_string())
            .or_insert(0) += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_admission_rejected() {
        let registry = SignatureRegistry::new();
        assert!(registry.admit(TaskKind::CreateTablet, 1, ""));
        assert!(!registry.admit(TaskKind::CreateTablet, 1, ""));
        assert_eq!(registry.live_count(TaskKind::CreateTablet), 1);
    }

    #[test]
    fn same_signature_different_kinds() {
        let registry = SignatureRegistry::new();
        assert!(registry.admit(TaskKind::CreateTablet, 7, ""));
        assert!(registry.admit(TaskKind::DropTablet, 7, ""));
    }

    #[test]
    fn push_totals_follow_admissions() {
        let registry = SignatureRegistry::new();
        registry.admit(TaskKind::Push, 1, "alice");
        registry.admit(TaskKind::Push, 2, "alice");
        registry.admit(TaskKind::Push, 3, "bob");
        assert_eq!(registry.totals(TaskKind::Push, "alice"), (2, 3));
        assert_eq!(registry.totals(TaskKind::Push, "bob"), (1, 3));

        registry.release(TaskKind::Push, 2, "alice");
        assert_eq!(registry.totals(TaskKind::Push, "alice"), (1, 2));
    }

    #[test]
    fn non_push_kinds_skip_totals() {
        let registry = SignatureRegistry::new();
        registry.admit(TaskKind::Clone, 1, "alice");
        assert_eq!(registry.totals(TaskKind::Clone, "alice"), (0, 0));
    }

    #[test]
    fn release_clears_running() {
        let registry = SignatureRegistry::new();
        registry.admit(TaskKind::Push, 1, "alice");
        registry.note_running(TaskKind::Push, "alice");
        assert_eq!(registry.running_count(TaskKind::Push, "alice"), 1);
        registry.release(TaskKind::Push, 1, "alice");
        assert_eq!(registry.running_count(TaskKind::Push, "alice"), 0);
    }
}
