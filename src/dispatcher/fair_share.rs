//! Tenant-aware task selection for the push pool.
//!
//! HIGH workers only ever take HIGH tasks; the slots they occupy stay
//! reserved even while normal work queues up. NORMAL workers balance tenants
//! by comparing each tenant's share of running slots against its share of
//! cumulative submissions.

use std::collections::{HashSet, VecDeque};

use tracing::debug;

use crate::registry::SignatureRegistry;
use crate::task::{Priority, TaskRequest};

/// Pick the queue index the calling worker should dequeue, or `None` when
/// nothing is eligible right now (HIGH worker with no HIGH task queued).
///
/// Scans from the queue head, so ties break to the oldest task. On selection
/// the chosen tenant's running count is incremented; the caller must remove
/// the returned index before releasing the pool lock.
pub fn select_next_index(
    queue: &VecDeque<TaskRequest>,
    worker_priority: Priority,
    worker_count: u32,
    registry: &SignatureRegistry,
) -> Option<usize> {
    if queue.is_empty() {
        return None;
    }

    let mut chosen: Option<usize> = None;
    let mut improper_users: HashSet<&str> = HashSet::new();

    for (i, task) in queue.iter().enumerate() {
        if worker_priority == Priority::High {
            if task.priority == Some(Priority::High) {
                chosen = Some(i);
                break;
            }
            continue;
        }

        let user = task.user_name();
        if improper_users.contains(user) {
            continue;
        }

        let (user_total, kind_total) = registry.totals(task.kind, user);
        let running = registry.running_count(task.kind, user);
        let total_rate = if kind_total == 0 {
            0.0
        } else {
            user_total as f64 / kind_total as f64
        };
        let running_rate = (running + 1) as f64 / worker_count as f64;

        debug!(
            signature = task.signature,
            user,
            user_total,
            kind_total,
            running = running + 1,
            worker_count,
            total_rate,
            running_rate,
            "consider next task"
        );

        if running == 0 || running_rate <= total_rate {
            chosen = Some(i);
            break;
        }
        improper_users.insert(user);
    }

    let index = match chosen {
        Some(i) => i,
        None => {
            if worker_priority == Priority::High {
                return None;
            }
            // Every tenant is over quota: take the head anyway so the queue
            // keeps draining.
            0
        }
    };

    let task = &queue[index];
    registry.note_running(task.kind, task.user_name());
    Some(index)
}
