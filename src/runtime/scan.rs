//! Periodic background scan: fetch new items, enqueue them, and flush queues
//! that are due.
//!
//! A queue is due when any of these hold:
//!
//! - its length reached the batch threshold;
//! - it is non-empty and its source just gained consumers after a tick with
//!   none (items accumulated while nobody was subscribed);
//! - it is non-empty and the interval flush period elapsed since its last flush.
//!
//! Fetched items a full queue refuses are held and offered again, ahead of
//! newer fetches, on the following ticks.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::core::{
    BatchScheduler, ConsumerRegistry, Generator, Mailbox, QueueStore, SchedulerError, SourceId,
    WorkItem,
};
use crate::util::clock::now_ms;

/// Supplies newly discovered items for each monitored source.
#[async_trait]
pub trait ItemSource: Send + Sync + 'static {
    /// Sources to poll on every tick.
    fn sources(&self) -> Vec<SourceId>;

    /// Items discovered for `source` since `since_ms` (all known items when
    /// `None`). Deduplication against already-processed items is the
    /// implementation's concern.
    async fn fetch_new_items(
        &self,
        source: &str,
        since_ms: Option<u128>,
    ) -> Result<Vec<WorkItem>, SchedulerError>;
}

/// Counters from one scan pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSummary {
    /// Sources examined.
    pub sources: usize,
    /// Items returned by the item source.
    pub fetched: usize,
    /// Items accepted into queues.
    pub enqueued: usize,
    /// Sources flushed this pass.
    pub flushed: usize,
    /// Items submitted across all flushes.
    pub submitted: usize,
    /// Fetch, enqueue and flush errors (logged, not fatal).
    pub errors: usize,
}

#[derive(Debug, Default)]
struct ScanState {
    last_fetch_ms: HashMap<SourceId, u128>,
    without_consumers: HashSet<SourceId>,
    /// Fetched items a full queue refused, retried ahead of the next fetch.
    carry: HashMap<SourceId, Vec<WorkItem>>,
}

/// Single periodic loop that feeds and flushes every known source.
pub struct ScanLoop<Q, G, R, M, S> {
    scheduler: Arc<BatchScheduler<Q, G, R, M>>,
    items: S,
    interval: Duration,
    flush_interval: Option<Duration>,
    state: Mutex<ScanState>,
}

impl<Q, G, R, M, S> ScanLoop<Q, G, R, M, S>
where
    Q: QueueStore + 'static,
    G: Generator,
    R: ConsumerRegistry + 'static,
    M: Mailbox + 'static,
    S: ItemSource,
{
    /// Create a loop ticking every `interval`.
    pub fn new(scheduler: Arc<BatchScheduler<Q, G, R, M>>, items: S, interval: Duration) -> Self {
        Self {
            scheduler,
            items,
            interval,
            flush_interval: None,
            state: Mutex::new(ScanState::default()),
        }
    }

    /// Also flush non-empty queues not flushed within `period`.
    #[must_use]
    pub const fn with_flush_interval(mut self, period: Option<Duration>) -> Self {
        self.flush_interval = period;
        self
    }

    /// Run one scan over every source.
    pub async fn tick(&self, cancel: &CancellationToken) -> Result<ScanSummary, SchedulerError> {
        let mut sources: BTreeSet<SourceId> = self.items.sources().into_iter().collect();
        sources.extend(self.scheduler.sources());
        sources.extend(self.state.lock().carry.keys().cloned());

        let mut summary = ScanSummary {
            sources: sources.len(),
            ..ScanSummary::default()
        };

        for source in &sources {
            if cancel.is_cancelled() {
                return Err(SchedulerError::Cancelled);
            }
            self.ingest(source, &mut summary).await;

            if !self.is_due(source) {
                continue;
            }
            match self.scheduler.flush(source, cancel).await {
                Ok(report) => {
                    summary.flushed += 1;
                    summary.submitted += report.submitted_items();
                }
                Err(SchedulerError::Cancelled) => return Err(SchedulerError::Cancelled),
                Err(e) => {
                    summary.errors += 1;
                    tracing::warn!(source = %source, error = %e, "scheduled flush failed");
                }
            }
        }

        tracing::debug!(
            sources = summary.sources,
            fetched = summary.fetched,
            enqueued = summary.enqueued,
            flushed = summary.flushed,
            submitted = summary.submitted,
            "scan complete"
        );
        Ok(summary)
    }

    /// Tick until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!(interval_secs = self.interval.as_secs(), "scan loop started");

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(SchedulerError::Cancelled) = self.tick(&cancel).await {
                        break;
                    }
                }
            }
        }
        tracing::info!("scan loop stopped");
    }

    /// Spawn [`Self::run`] onto the current tokio runtime.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()>
    where
        Self: Send + Sync + 'static,
    {
        tokio::spawn(async move {
            self.run(cancel).await;
        })
    }

    async fn ingest(&self, source: &str, summary: &mut ScanSummary) {
        let since = self.state.lock().last_fetch_ms.get(source).copied();
        let started_ms = now_ms();

        let fetched = match self.items.fetch_new_items(source, since).await {
            Ok(items) => Some(items),
            Err(e) => {
                summary.errors += 1;
                tracing::warn!(source, error = %e, "fetching new items failed");
                None
            }
        };

        let advance_cursor = fetched.is_some();
        let mut pending = self.state.lock().carry.remove(source).unwrap_or_default();
        if let Some(items) = fetched {
            summary.fetched += items.len();
            pending.extend(items);
        }

        let mut pending = pending.into_iter();
        while let Some(item) = pending.next() {
            if let Err(e) = self.scheduler.enqueue(source, item.clone()) {
                let rest: Vec<WorkItem> = std::iter::once(item).chain(pending).collect();
                summary.errors += 1;
                tracing::warn!(
                    source,
                    error = %e,
                    held = rest.len(),
                    "holding fetched items until the queue drains"
                );
                self.state.lock().carry.insert(source.to_string(), rest);
                break;
            }
            summary.enqueued += 1;
        }

        if advance_cursor {
            self.state
                .lock()
                .last_fetch_ms
                .insert(source.to_string(), started_ms);
        }
    }

    fn is_due(&self, source: &str) -> bool {
        let has_consumers = self
            .scheduler
            .registry()
            .consumers_for(source)
            .values()
            .any(|c| !c.is_empty());

        let newly_reachable = {
            let mut state = self.state.lock();
            if has_consumers {
                state.without_consumers.remove(source)
            } else {
                state.without_consumers.insert(source.to_string());
                false
            }
        };
        if !has_consumers {
            return false;
        }

        let len = self.scheduler.len(source);
        if len == 0 {
            return false;
        }
        if len >= self.scheduler.limits().batch_threshold || newly_reachable {
            return true;
        }
        self.flush_interval.is_some_and(|period| {
            self.scheduler
                .since_last_flush(source)
                .is_none_or(|elapsed| elapsed >= period)
        })
    }
}
