//! Bounded worker pools with condition-variable handoff.
//!
//! Each pool owns an intake queue under one mutex and a fixed set of
//! detached worker threads. Workers block on the condvar while the queue is
//! empty, take one task (FIFO, or through the fair-share selector for the
//! push pool), and execute it entirely outside the lock.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use crate::dispatcher::{execute, fair_share, finish, AgentEnv};
use crate::task::{Priority, TaskKind, TaskRequest};

/// How a pool's workers pick the next task.
#[derive(Debug, Clone, Copy)]
pub(crate) enum DequeueStrategy {
    Fifo,
    FairShare { high_priority_workers: u32 },
}

struct PoolState {
    queue: VecDeque<TaskRequest>,
    /// How many workers have elected HIGH priority so far.
    high_elected: u32,
}

/// One task kind's bounded thread group and intake queue.
pub struct WorkerPool {
    kind: TaskKind,
    worker_count: u32,
    strategy: DequeueStrategy,
    state: Mutex<PoolState>,
    cv: Condvar,
    env: Arc<AgentEnv>,
}

impl WorkerPool {
    pub(crate) fn new(
        kind: TaskKind,
        worker_count: u32,
        strategy: DequeueStrategy,
        env: Arc<AgentEnv>,
    ) -> Arc<Self> {
        Arc::new(Self {
            kind,
            worker_count,
            strategy,
            state: Mutex::new(PoolState {
                queue: VecDeque::new(),
                high_elected: 0,
            }),
            cv: Condvar::new(),
            env,
        })
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    /// Spawn this pool's detached workers. Thread-creation failure is
    /// retried after a short sleep until the thread exists.
    pub fn start(self: &Arc<Self>) {
        for i in 0..self.worker_count {
            let name = format!("{}-worker-{}", self.kind, i);
            loop {
                let pool = Arc::clone(self);
                let builder = thread::Builder::new().name(name.clone());
                match builder.spawn(move || pool.run_worker()) {
                    Ok(_) => break,
                    Err(err) => {
                        warn!(worker = %name, error = %err, "failed to spawn worker thread");
                        thread::sleep(self.retry_pause());
                    }
                }
            }
        }
        info!(kind = %self.kind, workers = self.worker_count, "worker pool started");
    }

    /// Push an admitted task to the tail and wake one waiter.
    pub fn enqueue(&self, task: TaskRequest) {
        let mut state = self.state.lock().unwrap();
        state.queue.push_back(task);
        self.cv.notify_one();
    }

    fn retry_pause(&self) -> Duration {
        Duration::from_secs(self.env.settings.retry_pause_secs)
    }

    fn run_worker(self: Arc<Self>) {
        let priority = self.elect_priority();
        loop {
            let task = match self.strategy {
                DequeueStrategy::Fifo => self.next_fifo(),
                DequeueStrategy::FairShare { .. } => match self.next_fair_share(priority) {
                    Some(task) => task,
                    None => {
                        // No HIGH task for a HIGH worker: back off without
                        // spinning on the condvar.
                        thread::sleep(self.retry_pause());
                        continue;
                    }
                },
            };
            self.handle(task, priority);
        }
    }

    /// The first `high_priority_workers` workers of a fair-share pool elect
    /// themselves HIGH; the rest run NORMAL. Elected under the pool mutex.
    fn elect_priority(&self) -> Priority {
        match self.strategy {
            DequeueStrategy::Fifo => Priority::Normal,
            DequeueStrategy::FairShare {
                high_priority_workers,
            } => {
                let mut state = self.state.lock().unwrap();
                if state.high_elected < high_priority_workers {
                    state.high_elected += 1;
                    Priority::High
                } else {
                    Priority::Normal
                }
            }
        }
    }

    fn next_fifo(&self) -> TaskRequest {
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(task) = state.queue.pop_front() {
                return task;
            }
            state = self.cv.wait(state).unwrap();
        }
    }

    /// Blocks until the queue is non-empty, then runs the selector. The
    /// selector can still find nothing eligible; in that case one other
    /// waiter is woken (a NORMAL worker may be able to take the task) and
    /// `None` is returned so the caller sleeps outside the lock.
    fn next_fair_share(&self, priority: Priority) -> Option<TaskRequest> {
        let mut state = self.state.lock().unwrap();
        while state.queue.is_empty() {
            state = self.cv.wait(state).unwrap();
        }

        match fair_share::select_next_index(
            &state.queue,
            priority,
            self.worker_count,
            &self.env.registry,
        ) {
            Some(index) => state.queue.remove(index),
            None => {
                self.cv.notify_one();
                None
            }
        }
    }

    fn handle(&self, task: TaskRequest, worker_priority: Priority) {
        let kind = task.kind;
        let signature = task.signature;
        let user = task.user_name().to_string();
        info!(kind = %kind, signature, user = %user, priority = ?worker_priority, "picked up task");

        if let Some(envelope) = execute::run_task(&self.env, &task) {
            finish::finish_task(&self.env, &envelope);
        }
        self.env.registry.release(kind, signature, &user);
    }
}
