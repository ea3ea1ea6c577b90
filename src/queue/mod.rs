//! Per-key serialized execution.
//!
//! Every target application gets its own [`PerKeyQueue`]: tasks submitted
//! under the same key run one at a time in submission order, while
//! different keys run independently. [`QueueRegistry`] owns the queues and
//! creates them on first use.
//!
//! # Deferred start
//!
//! [`PerKeyQueue::add`] never starts work itself. It records a scheduled
//! start and spawns a release that runs one scheduler turn later. The first
//! poll (or drop) of the returned [`TaskHandle`] and [`PerKeyQueue::drain`]
//! release it sooner. A `clear()` issued right after `add()` and before
//! awaiting therefore cancels the task.
//!
//! ```
//! use script_relay::queue::{PerKeyQueue, TaskMetadata};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let queue: PerKeyQueue<u32> = PerKeyQueue::new("Things3");
//! let handle = queue.add(|| async { Ok(7) }, TaskMetadata::labeled("answer"));
//! assert_eq!(queue.len(), 0);
//! assert_eq!(queue.raw_len(), 1);
//! assert_eq!(handle.await.unwrap(), 7);
//! # }
//! ```

mod per_key;
mod registry;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use futures::future::BoxFuture;
use serde::Serialize;
use tokio::sync::oneshot;

use crate::error::{Error, Result};

pub use per_key::PerKeyQueue;
pub use registry::QueueRegistry;

/// Boxed unit of work stored in a queue.
pub type TaskFn<T> = Box<dyn FnOnce() -> BoxFuture<'static, Result<T>> + Send>;

/// Descriptive data attached to a task, used for tracing.
#[derive(Debug, Clone, Default)]
pub struct TaskMetadata {
    /// Short label, usually the operation name.
    pub label: Option<String>,
    /// Free-form attributes.
    pub attributes: HashMap<String, String>,
}

impl TaskMetadata {
    /// Metadata with just a label.
    pub fn labeled(label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
            attributes: HashMap::new(),
        }
    }

    /// Add an attribute.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    fn label_or_default(&self) -> &str {
        self.label.as_deref().unwrap_or("task")
    }
}

/// A queued unit of work. Owned by its queue until dequeued.
pub(crate) struct Task<T> {
    pub(crate) id: u64,
    pub(crate) run: TaskFn<T>,
    pub(crate) reply: oneshot::Sender<Result<T>>,
    pub(crate) enqueued_at: Instant,
    pub(crate) epoch: u64,
    pub(crate) metadata: TaskMetadata,
}

/// Snapshot of a queue's state and counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueStats {
    /// Queue name (its key).
    pub name: String,
    /// Caller-facing pending count (see [`PerKeyQueue::len`]).
    pub length: usize,
    /// Raw number of tasks in the list.
    pub current_length: usize,
    /// A task is being executed.
    pub is_processing: bool,
    /// A start is scheduled but has not begun.
    pub start_scheduled: bool,
    /// Number of `clear()` calls so far.
    pub clear_epoch: u64,
    /// Tasks that ran and succeeded.
    pub processed: u64,
    /// Tasks that ran and failed.
    pub failed: u64,
    /// Tasks rejected by `clear()`.
    pub cancelled: u64,
    /// Mean time between enqueue and start, in milliseconds.
    pub avg_wait_ms: f64,
    /// Mean execution time, in milliseconds.
    pub avg_exec_ms: f64,
}

/// Completion handle returned by [`PerKeyQueue::add`].
///
/// Resolves to the task's own result, or to [`Error::Cancelled`] if the
/// queue was cleared before the task started. Polling or dropping the
/// handle releases the queue's deferred start.
#[must_use = "a TaskHandle does nothing unless awaited or dropped"]
pub struct TaskHandle<T: Send + 'static> {
    id: u64,
    rx: oneshot::Receiver<Result<T>>,
    queue: PerKeyQueue<T>,
    released: bool,
}

impl<T: Send + 'static> TaskHandle<T> {
    /// Id of the task within its queue.
    pub fn id(&self) -> u64 {
        self.id
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.queue.release_start();
        }
    }
}

impl<T: Send + 'static> Future for TaskHandle<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.release();
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(Error::unclassified(format!(
                "queue '{}' dropped task {} without settling it",
                self.queue.name(),
                self.id
            )))),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T: Send + 'static> Drop for TaskHandle<T> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<T: Send + 'static> std::fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id)
            .field("queue", &self.queue.name())
            .finish()
    }
}
