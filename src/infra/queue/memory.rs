//! In-memory FIFO queues keyed by source.

use std::collections::{HashMap, VecDeque};

use crate::core::{QueueStore, SchedulerError, SourceId, WorkItem};

/// In-memory queue store; one `VecDeque` per source.
///
/// Queues are created lazily on first enqueue and persist, possibly empty,
/// until cleared.
#[derive(Debug, Default)]
pub struct InMemoryQueueStore {
    queues: HashMap<SourceId, VecDeque<WorkItem>>,
}

impl InMemoryQueueStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl QueueStore for InMemoryQueueStore {
    fn enqueue(&mut self, source: &str, item: WorkItem) -> Result<(), SchedulerError> {
        self.queues
            .entry(source.to_string())
            .or_default()
            .push_back(item);
        Ok(())
    }

    fn peek_all(&self, source: &str) -> Result<Vec<WorkItem>, SchedulerError> {
        Ok(self
            .queues
            .get(source)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn remove_prefix(
        &mut self,
        source: &str,
        count: usize,
    ) -> Result<Vec<WorkItem>, SchedulerError> {
        Ok(self
            .queues
            .get_mut(source)
            .map(|q| {
                let count = count.min(q.len());
                q.drain(..count).collect()
            })
            .unwrap_or_default())
    }

    fn push_front(&mut self, source: &str, items: Vec<WorkItem>) -> Result<(), SchedulerError> {
        let queue = self.queues.entry(source.to_string()).or_default();
        for item in items.into_iter().rev() {
            queue.push_front(item);
        }
        Ok(())
    }

    fn len(&self, source: &str) -> usize {
        self.queues.get(source).map_or(0, VecDeque::len)
    }

    fn sources(&self) -> Vec<SourceId> {
        self.queues.keys().cloned().collect()
    }

    fn clear(&mut self, source: &str) -> Result<usize, SchedulerError> {
        Ok(self.queues.remove(source).map_or(0, |q| q.len()))
    }
}
