use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::oneshot;

use super::{QueueStats, Task, TaskHandle, TaskMetadata};
use crate::error::{Error, Result};

/// How often [`PerKeyQueue::drain`] re-checks the queue.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Default)]
struct Counters {
    processed: u64,
    failed: u64,
    cancelled: u64,
    total_wait: Duration,
    total_exec: Duration,
}

struct QueueState<T> {
    pending: VecDeque<Task<T>>,
    is_processing: bool,
    start_scheduled: bool,
    start_token: u64,
    clear_epoch: u64,
    last_clear_error: Arc<Error>,
    counters: Counters,
}

impl<T> QueueState<T> {
    /// Pending count, excluding the task a scheduled start is about to run.
    fn adjusted_len(&self) -> usize {
        if self.start_scheduled {
            self.pending.len().saturating_sub(1)
        } else {
            self.pending.len()
        }
    }
}

struct Inner<T> {
    name: String,
    state: Mutex<QueueState<T>>,
    next_id: AtomicU64,
}

/// FIFO queue running at most one task at a time.
///
/// Cheap to clone; clones share the same queue.
pub struct PerKeyQueue<T: Send + 'static> {
    inner: Arc<Inner<T>>,
}

impl<T: Send + 'static> Clone for PerKeyQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> PerKeyQueue<T> {
    /// Create an empty queue.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                state: Mutex::new(QueueState {
                    pending: VecDeque::new(),
                    is_processing: false,
                    start_scheduled: false,
                    start_token: 0,
                    clear_epoch: 0,
                    last_clear_error: Arc::new(default_clear_error()),
                    counters: Counters::default(),
                }),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Queue name (its key).
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Append a task.
    ///
    /// The task captures the current clear epoch. Nothing runs inside this
    /// call: the start is released one scheduler turn later, or earlier if
    /// the returned handle is polled or dropped (or the queue is drained).
    pub fn add<F, Fut>(&self, run: F, metadata: TaskMetadata) -> TaskHandle<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let (reply, rx) = oneshot::channel();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        let mut state = self.inner.state.lock();
        tracing::debug!(
            queue = %self.inner.name,
            task_id = id,
            label = metadata.label_or_default(),
            pending = state.pending.len(),
            "task enqueued"
        );
        let task = Task {
            id,
            run: Box::new(move || run().boxed()),
            reply,
            enqueued_at: Instant::now(),
            epoch: state.clear_epoch,
            metadata,
        };
        state.pending.push_back(task);
        let token = if !state.is_processing && !state.start_scheduled {
            state.start_scheduled = true;
            state.start_token += 1;
            Some(state.start_token)
        } else {
            None
        };
        drop(state);

        if let Some(token) = token {
            self.schedule_release(token);
        }

        TaskHandle {
            id,
            rx,
            queue: self.clone(),
            released: false,
        }
    }

    /// Caller-facing pending count.
    ///
    /// Excludes the task a scheduled-but-not-begun start is about to run;
    /// never negative.
    pub fn len(&self) -> usize {
        self.inner.state.lock().adjusted_len()
    }

    /// `true` if [`len`](Self::len) is zero.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw number of tasks waiting in the list.
    pub fn raw_len(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    /// A task is currently executing.
    pub fn is_processing(&self) -> bool {
        self.inner.state.lock().is_processing
    }

    /// Neither executing nor about to start.
    pub fn is_idle(&self) -> bool {
        let state = self.inner.state.lock();
        !state.is_processing && !state.start_scheduled
    }

    /// Current clear epoch.
    pub fn clear_epoch(&self) -> u64 {
        self.inner.state.lock().clear_epoch
    }

    /// Reject every task that has not started yet.
    ///
    /// Bumps the clear epoch and remembers `err` (a generic "Queue cleared"
    /// error when `None`). Pending tasks settle with [`Error::Cancelled`]
    /// wrapping it. A task that is already executing is not interrupted.
    /// Returns how many tasks were rejected.
    pub fn clear(&self, err: Option<Error>) -> usize {
        let cause = Arc::new(err.unwrap_or_else(default_clear_error));
        self.clear_with(cause)
    }

    pub(crate) fn clear_with(&self, cause: Arc<Error>) -> usize {
        let drained: Vec<Task<T>> = {
            let mut state = self.inner.state.lock();
            state.clear_epoch += 1;
            state.last_clear_error = Arc::clone(&cause);
            if !state.is_processing {
                state.start_scheduled = false;
            }
            let drained: Vec<Task<T>> = state.pending.drain(..).collect();
            state.counters.cancelled += drained.len() as u64;
            drained
        };

        let count = drained.len();
        if count > 0 {
            tracing::debug!(queue = %self.inner.name, count, cause = %cause, "queue cleared");
        }
        for task in drained {
            let _ = task.reply.send(Err(self.cancelled(&cause)));
        }
        count
    }

    /// Wait until the queue is idle and empty.
    pub async fn drain(&self) {
        loop {
            self.release_start();
            {
                let state = self.inner.state.lock();
                if !state.is_processing && state.pending.is_empty() {
                    return;
                }
            }
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }
    }

    /// Snapshot of state and counters.
    pub fn stats(&self) -> QueueStats {
        let state = self.inner.state.lock();
        let c = &state.counters;
        let ran = c.processed + c.failed;
        let avg = |total: Duration| {
            if ran == 0 {
                0.0
            } else {
                total.as_secs_f64() * 1000.0 / ran as f64
            }
        };
        QueueStats {
            name: self.inner.name.clone(),
            length: state.adjusted_len(),
            current_length: state.pending.len(),
            is_processing: state.is_processing,
            start_scheduled: state.start_scheduled,
            clear_epoch: state.clear_epoch,
            processed: c.processed,
            failed: c.failed,
            cancelled: c.cancelled,
            avg_wait_ms: avg(c.total_wait),
            avg_exec_ms: avg(c.total_exec),
        }
    }

    /// One-line diagnostic rendering.
    pub fn debug(&self) -> String {
        let state = self.inner.state.lock();
        format!(
            "PerKeyQueue(name={}, length={}, processing={})",
            self.inner.name,
            state.adjusted_len(),
            state.is_processing
        )
    }

    /// Release start `token` after the enqueuing caller has had its turn.
    ///
    /// Without a runtime the start waits for the handle or `drain()`.
    fn schedule_release(&self, token: u64) {
        let Ok(runtime) = Handle::try_current() else {
            return;
        };
        let queue = self.clone();
        runtime.spawn(async move {
            tokio::task::yield_now().await;
            queue.release(Some(token));
        });
    }

    /// Begin processing if a start is scheduled.
    pub(crate) fn release_start(&self) {
        self.release(None);
    }

    /// A `token` only releases the start it was issued for; a clear or a
    /// later schedule makes it stale.
    fn release(&self, token: Option<u64>) {
        let mut state = self.inner.state.lock();
        if !state.start_scheduled || state.is_processing {
            return;
        }
        if token.is_some_and(|t| t != state.start_token) {
            return;
        }
        let Ok(runtime) = Handle::try_current() else {
            tracing::warn!(queue = %self.inner.name, "no tokio runtime; queue start postponed");
            return;
        };
        state.start_scheduled = false;
        state.is_processing = true;
        drop(state);

        let queue = self.clone();
        runtime.spawn(async move { queue.process().await });
    }

    async fn process(self) {
        loop {
            let task = {
                let mut state = self.inner.state.lock();
                match state.pending.pop_front() {
                    Some(task) => task,
                    None => {
                        state.is_processing = false;
                        return;
                    },
                }
            };

            // A clear() may land between dequeue and execution.
            let stale = {
                let state = self.inner.state.lock();
                (task.epoch < state.clear_epoch).then(|| Arc::clone(&state.last_clear_error))
            };
            if let Some(cause) = stale {
                self.inner.state.lock().counters.cancelled += 1;
                tracing::debug!(queue = %self.inner.name, task_id = task.id, "skipping task from before clear");
                let _ = task.reply.send(Err(self.cancelled(&cause)));
                continue;
            }

            let Task {
                id,
                run,
                reply,
                enqueued_at,
                metadata,
                ..
            } = task;
            let wait = enqueued_at.elapsed();
            let started = Instant::now();
            let result = AssertUnwindSafe(run())
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    Err(Error::unclassified(format!(
                        "task '{}' panicked",
                        metadata.label_or_default()
                    )))
                });
            let exec = started.elapsed();

            {
                let mut state = self.inner.state.lock();
                let counters = &mut state.counters;
                counters.total_wait += wait;
                counters.total_exec += exec;
                if result.is_ok() {
                    counters.processed += 1;
                } else {
                    counters.failed += 1;
                }
            }
            tracing::debug!(
                queue = %self.inner.name,
                task_id = id,
                label = metadata.label_or_default(),
                wait_ms = wait.as_millis() as u64,
                exec_ms = exec.as_millis() as u64,
                ok = result.is_ok(),
                "task settled"
            );
            let _ = reply.send(result);
        }
    }

    fn cancelled(&self, cause: &Arc<Error>) -> Error {
        Error::Cancelled {
            queue: self.inner.name.clone(),
            cause: Arc::clone(cause),
        }
    }
}

impl<T: Send + 'static> std::fmt::Debug for PerKeyQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.debug())
    }
}

fn default_clear_error() -> Error {
    Error::unclassified("Queue cleared")
}
