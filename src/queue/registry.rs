use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;

use super::{PerKeyQueue, QueueStats, TaskHandle, TaskMetadata};
use crate::error::{Error, Result};

/// Owns one [`PerKeyQueue`] per key, created lazily on first use.
///
/// Creation, submission and pruning of a key happen under the map's shard
/// lock, so a task can never be submitted to a queue that is concurrently
/// being pruned.
pub struct QueueRegistry<T: Send + 'static> {
    queues: DashMap<String, PerKeyQueue<T>>,
}

impl<T: Send + 'static> QueueRegistry<T> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            queues: DashMap::new(),
        }
    }

    /// Submit `run` to the queue for `key`, creating the queue if needed.
    pub fn execute<F, Fut>(&self, key: &str, run: F, metadata: TaskMetadata) -> TaskHandle<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let queue = self
            .queues
            .entry(key.to_string())
            .or_insert_with(|| PerKeyQueue::new(key));
        queue.add(run, metadata)
    }

    /// The queue for `key`, creating it if needed.
    pub fn queue(&self, key: &str) -> PerKeyQueue<T> {
        self.queues
            .entry(key.to_string())
            .or_insert_with(|| PerKeyQueue::new(key))
            .clone()
    }

    /// The queue for `key`, if it exists.
    pub fn get(&self, key: &str) -> Option<PerKeyQueue<T>> {
        self.queues.get(key).map(|q| q.clone())
    }

    /// Keys with a live queue, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.queues.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    /// Number of live queues.
    pub fn len(&self) -> usize {
        self.queues.len()
    }

    /// `true` if no queue exists.
    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    /// Sum of caller-facing pending counts across all queues.
    pub fn total_pending(&self) -> usize {
        self.queues.iter().map(|q| q.len()).sum()
    }

    /// `true` if any queue is executing a task.
    pub fn any_processing(&self) -> bool {
        self.queues.iter().any(|q| q.is_processing())
    }

    /// Clear one queue. Returns the number of rejected tasks.
    pub fn clear(&self, key: &str, err: Option<Error>) -> usize {
        self.get(key).map_or(0, |q| q.clear(err))
    }

    /// Clear every queue with the same error.
    pub fn clear_all(&self, err: Option<Error>) -> usize {
        let cause = Arc::new(err.unwrap_or_else(|| Error::unclassified("Queue cleared")));
        self.all()
            .iter()
            .map(|q| q.clear_with(Arc::clone(&cause)))
            .sum()
    }

    /// Wait for one queue to become idle and empty.
    pub async fn drain(&self, key: &str) {
        if let Some(queue) = self.get(key) {
            queue.drain().await;
        }
    }

    /// Wait for every queue to become idle and empty.
    pub async fn drain_all(&self) {
        let queues = self.all();
        futures::future::join_all(queues.iter().map(PerKeyQueue::drain)).await;
    }

    /// Remove the queue for `key` if it is idle and holds no task.
    pub fn prune(&self, key: &str) -> bool {
        self.queues
            .remove_if(key, |_, q| q.is_idle() && q.raw_len() == 0)
            .is_some()
    }

    /// Remove every idle, empty queue. Returns how many were removed.
    pub fn prune_all(&self) -> usize {
        let before = self.queues.len();
        self.queues.retain(|_, q| !(q.is_idle() && q.raw_len() == 0));
        before.saturating_sub(self.queues.len())
    }

    /// Per-queue statistics, sorted by name.
    pub fn stats(&self) -> Vec<QueueStats> {
        let mut stats: Vec<QueueStats> = self.queues.iter().map(|q| q.stats()).collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    // Cloned out so no shard lock is held while awaiting or settling tasks.
    fn all(&self) -> Vec<PerKeyQueue<T>> {
        self.queues.iter().map(|q| q.value().clone()).collect()
    }
}

impl<T: Send + 'static> Default for QueueRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> std::fmt::Debug for QueueRegistry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueRegistry")
            .field("keys", &self.keys())
            .finish()
    }
}
