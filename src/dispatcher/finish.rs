//! Bounded-retry reporting of per-task outcomes to the master.

use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use crate::dispatcher::AgentEnv;
use crate::master::FinishTaskRequest;

/// Transport attempts before the outcome is abandoned to the task-report loop.
pub(crate) const TASK_FINISH_MAX_RETRY: u32 = 3;

/// Send the finish envelope, retrying on transport failure. The master's own
/// status code is logged but never retried. Exhausting the retries is not
/// fatal: the caller releases the registry entry regardless and the
/// task-report loop keeps advertising the signature until the master
/// acknowledges it.
pub(crate) fn finish_task(env: &AgentEnv, req: &FinishTaskRequest) {
    let pause = Duration::from_secs(env.settings.retry_pause_secs);
    let mut try_time = 0;
    while try_time < TASK_FINISH_MAX_RETRY {
        env.metrics.record_finish_attempt();
        match env.master.finish_task(req) {
            Ok(result) => {
                info!(
                    kind = %req.task_kind,
                    signature = req.signature,
                    master_status = ?result.status_code,
                    "finish task success"
                );
                return;
            }
            Err(err) => {
                env.metrics.record_finish_failure();
                warn!(
                    kind = %req.task_kind,
                    signature = req.signature,
                    error = %err,
                    "finish task failed"
                );
                try_time += 1;
            }
        }
        thread::sleep(pause);
    }
    warn!(
        kind = %req.task_kind,
        signature = req.signature,
        "finish task gave up after {TASK_FINISH_MAX_RETRY} attempts"
    );
}
