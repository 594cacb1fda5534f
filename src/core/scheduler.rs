//! Batch scheduler and the collaborator traits it drives.
//!
//! Each source owns one FIFO pending queue in a [`QueueStore`]. A flush takes a
//! snapshot, groups it by partition, fits the largest admissible prefix of each
//! partition under the per-call ceiling, waits for admission, calls the
//! [`Generator`] once and fans the result out to every consumer of the
//! partition. Only submitted (or quarantined) items leave the queue; the rest
//! are written back to the front in their original order.
//!
//! The store sits behind a `parking_lot::Mutex` held only for short
//! synchronous sections. A per-source `tokio::sync::Mutex` serialises flushes
//! of the same source, so two flushes never submit the same snapshot while
//! unrelated sources flush concurrently.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::core::admission::AdmissionManager;
use crate::core::audit::{build_audit_event, AuditAction, AuditSink};
use crate::core::error::{GenerationError, SchedulerError};
use crate::core::fitter::{max_prefix_within_budget, CostEstimator, TokenCostModel};
use crate::core::generator::{Generation, Generator, PlainPromptBuilder, PromptBuilder};
use crate::core::item::{ConsumerId, Digest, PartitionKey, SourceId, WorkItem};
use crate::util::clock::now_ms;

/// Ordered per-source storage for pending items.
///
/// The scheduler only ever appends at the back, reads the whole queue,
/// removes a prefix, or pushes items back at the front, so any ordered-list
/// store can back it.
pub trait QueueStore: Send {
    /// Append an item to the back of `source`'s queue, creating it if needed.
    fn enqueue(&mut self, source: &str, item: WorkItem) -> Result<(), SchedulerError>;
    /// Snapshot of `source`'s queue, front to back.
    fn peek_all(&self, source: &str) -> Result<Vec<WorkItem>, SchedulerError>;
    /// Remove and return up to `count` items from the front.
    fn remove_prefix(&mut self, source: &str, count: usize)
        -> Result<Vec<WorkItem>, SchedulerError>;
    /// Put `items` back at the front, keeping their relative order.
    fn push_front(&mut self, source: &str, items: Vec<WorkItem>) -> Result<(), SchedulerError>;
    /// Current queue length (0 for unknown sources).
    fn len(&self, source: &str) -> usize;
    /// Sources that currently have a queue.
    fn sources(&self) -> Vec<SourceId>;
    /// Drop `source`'s queue, returning how many items it held.
    fn clear(&mut self, source: &str) -> Result<usize, SchedulerError>;

    /// Remove `count` items from the front and put `restore` back in their
    /// place as one step. Returns the removed items.
    ///
    /// Durable stores should override this so a failure leaves the queue as
    /// it was instead of between the two halves.
    fn replace_front(
        &mut self,
        source: &str,
        count: usize,
        restore: Vec<WorkItem>,
    ) -> Result<Vec<WorkItem>, SchedulerError> {
        let removed = self.remove_prefix(source, count)?;
        if !restore.is_empty() {
            self.push_front(source, restore)?;
        }
        Ok(removed)
    }
}

impl QueueStore for Box<dyn QueueStore> {
    fn enqueue(&mut self, source: &str, item: WorkItem) -> Result<(), SchedulerError> {
        (**self).enqueue(source, item)
    }

    fn peek_all(&self, source: &str) -> Result<Vec<WorkItem>, SchedulerError> {
        (**self).peek_all(source)
    }

    fn remove_prefix(
        &mut self,
        source: &str,
        count: usize,
    ) -> Result<Vec<WorkItem>, SchedulerError> {
        (**self).remove_prefix(source, count)
    }

    fn push_front(&mut self, source: &str, items: Vec<WorkItem>) -> Result<(), SchedulerError> {
        (**self).push_front(source, items)
    }

    fn len(&self, source: &str) -> usize {
        (**self).len(source)
    }

    fn sources(&self) -> Vec<SourceId> {
        (**self).sources()
    }

    fn clear(&mut self, source: &str) -> Result<usize, SchedulerError> {
        (**self).clear(source)
    }

    fn replace_front(
        &mut self,
        source: &str,
        count: usize,
        restore: Vec<WorkItem>,
    ) -> Result<Vec<WorkItem>, SchedulerError> {
        (**self).replace_front(source, count, restore)
    }
}

/// Who should receive results for a source, grouped by partition.
pub trait ConsumerRegistry: Send + Sync {
    /// Consumers of `source`, keyed by partition.
    fn consumers_for(&self, source: &str) -> BTreeMap<PartitionKey, Vec<ConsumerId>>;
}

/// Delivery of generated digests to consumers.
pub trait Mailbox: Send {
    /// Deliver `digest` to `consumer`.
    fn deliver(&mut self, consumer: &ConsumerId, digest: &Digest) -> Result<(), SchedulerError>;
}

/// Limits applied by the scheduler around each flush.
#[derive(Debug, Clone)]
pub struct SchedulerLimits {
    /// Queue length that makes [`BatchScheduler::maybe_flush`] flush.
    pub batch_threshold: usize,
    /// Maximum items held per source.
    pub max_queue_depth: usize,
    /// Deadline for one generation call.
    pub call_timeout: Duration,
    /// Output ceiling passed to the generator.
    pub max_output_tokens: u64,
}

/// What happened to one partition during a flush.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PartitionOutcome {
    /// A batch was generated, delivered and removed from the queue.
    Submitted {
        /// Partition key.
        partition: PartitionKey,
        /// Submitted items, in queue order.
        item_ids: Vec<String>,
        /// Consumers the digest was delivered to.
        consumers: usize,
        /// Consumers whose delivery failed; the items are gone from the
        /// queue, so redelivery is up to the caller.
        undelivered: Vec<ConsumerId>,
        /// Items of this partition left queued for the next cycle.
        overflow: usize,
    },
    /// Nobody consumes this partition yet; items stay queued.
    NoConsumers {
        /// Partition key.
        partition: PartitionKey,
        /// Items left queued.
        pending: usize,
    },
    /// The head item alone exceeds the per-call ceiling and was quarantined.
    Oversized {
        /// Partition key.
        partition: PartitionKey,
        /// Quarantined item.
        item_id: String,
        /// Its estimated cost.
        estimated: u64,
    },
    /// The generation call failed; items stay queued.
    Failed {
        /// Partition key.
        partition: PartitionKey,
        /// Failure reported by the generator.
        error: String,
        /// Whether a later attempt may succeed.
        retryable: bool,
    },
    /// Not attempted this cycle because an earlier call failed.
    Deferred {
        /// Partition key.
        partition: PartitionKey,
        /// Items left queued.
        pending: usize,
    },
}

/// Result of one flush of one source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlushReport {
    /// Source that was flushed.
    pub source_id: SourceId,
    /// Per-partition outcomes in first-arrival order.
    pub outcomes: Vec<PartitionOutcome>,
    /// Flush attempts made (more than one under the retry wrapper).
    pub attempts: u32,
}

impl FlushReport {
    fn new(source: &str) -> Self {
        Self {
            source_id: source.to_string(),
            outcomes: Vec::new(),
            attempts: 1,
        }
    }

    /// Number of items submitted across all partitions.
    pub fn submitted_items(&self) -> usize {
        self.outcomes
            .iter()
            .map(|o| match o {
                PartitionOutcome::Submitted { item_ids, .. } => item_ids.len(),
                _ => 0,
            })
            .sum()
    }

    /// Whether any partition failed with a retryable error.
    pub fn has_retryable_failure(&self) -> bool {
        self.outcomes
            .iter()
            .any(|o| matches!(o, PartitionOutcome::Failed { retryable: true, .. }))
    }

    /// Whether nothing was queued.
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

/// Admission-controlled batch scheduler over per-source FIFO queues.
pub struct BatchScheduler<Q, G, R, M> {
    limits: SchedulerLimits,
    admission: Arc<AdmissionManager>,
    estimator: Arc<dyn CostEstimator>,
    prompts: Arc<dyn PromptBuilder>,
    queue: Mutex<Q>,
    generator: G,
    registry: R,
    mailbox: Mutex<M>,
    flush_guards: Mutex<HashMap<SourceId, Arc<tokio::sync::Mutex<()>>>>,
    quarantine: Mutex<HashMap<SourceId, Vec<WorkItem>>>,
    last_flush: Mutex<HashMap<SourceId, Instant>>,
    audit: Option<Mutex<Box<dyn AuditSink>>>,
}

impl<Q, G, R, M> BatchScheduler<Q, G, R, M>
where
    Q: QueueStore,
    G: Generator,
    R: ConsumerRegistry,
    M: Mailbox,
{
    /// Create a scheduler from its collaborators. Uses the default cost
    /// model and plain prompt builder until overridden.
    pub fn new(
        limits: SchedulerLimits,
        admission: Arc<AdmissionManager>,
        queue: Q,
        generator: G,
        registry: R,
        mailbox: M,
    ) -> Self {
        Self {
            limits,
            admission,
            estimator: Arc::new(TokenCostModel::default()),
            prompts: Arc::new(PlainPromptBuilder),
            queue: Mutex::new(queue),
            generator,
            registry,
            mailbox: Mutex::new(mailbox),
            flush_guards: Mutex::new(HashMap::new()),
            quarantine: Mutex::new(HashMap::new()),
            last_flush: Mutex::new(HashMap::new()),
            audit: None,
        }
    }

    /// Replace the cost estimator.
    #[must_use]
    pub fn with_estimator(mut self, estimator: Arc<dyn CostEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    /// Replace the prompt builder.
    #[must_use]
    pub fn with_prompt_builder(mut self, prompts: Arc<dyn PromptBuilder>) -> Self {
        self.prompts = prompts;
        self
    }

    /// Attach an audit sink.
    #[must_use]
    pub fn with_audit(mut self, audit: Box<dyn AuditSink>) -> Self {
        self.audit = Some(Mutex::new(audit));
        self
    }

    /// Shared admission manager.
    pub const fn admission(&self) -> &Arc<AdmissionManager> {
        &self.admission
    }

    /// Consumer registry.
    pub const fn registry(&self) -> &R {
        &self.registry
    }

    /// Scheduler limits.
    pub const fn limits(&self) -> &SchedulerLimits {
        &self.limits
    }

    /// Run `f` with exclusive access to the mailbox.
    pub fn with_mailbox<T>(&self, f: impl FnOnce(&mut M) -> T) -> T {
        f(&mut self.mailbox.lock())
    }

    /// Append `item` to `source`'s queue. Returns the new queue length.
    ///
    /// Duplicate detection is left to the caller.
    pub fn enqueue(&self, source: &str, item: WorkItem) -> Result<usize, SchedulerError> {
        let item_id = item.id.clone();
        let len = {
            let mut queue = self.queue.lock();
            if queue.len(source) >= self.limits.max_queue_depth {
                tracing::warn!(source, item = %item_id, "enqueue rejected: queue full");
                return Err(SchedulerError::QueueFull(source.to_string()));
            }
            queue.enqueue(source, item)?;
            queue.len(source)
        };
        self.last_flush
            .lock()
            .entry(source.to_string())
            .or_insert_with(Instant::now);
        self.record_audit(source, None, AuditAction::Enqueue, 1, Some(item_id));
        tracing::debug!(source, len, "item enqueued");
        Ok(len)
    }

    /// Current queue length for `source`.
    pub fn len(&self, source: &str) -> usize {
        self.queue.lock().len(source)
    }

    /// Whether `source` has nothing queued.
    pub fn is_empty(&self, source: &str) -> bool {
        self.len(source) == 0
    }

    /// Snapshot of `source`'s queue, front to back.
    pub fn pending(&self, source: &str) -> Result<Vec<WorkItem>, SchedulerError> {
        self.queue.lock().peek_all(source)
    }

    /// Sources with a queue.
    pub fn sources(&self) -> Vec<SourceId> {
        self.queue.lock().sources()
    }

    /// Items quarantined for `source` because they can never fit a call.
    pub fn oversized(&self, source: &str) -> Vec<WorkItem> {
        self.quarantine
            .lock()
            .get(source)
            .cloned()
            .unwrap_or_default()
    }

    /// Remove and return `source`'s quarantined items for manual handling.
    pub fn take_oversized(&self, source: &str) -> Vec<WorkItem> {
        self.quarantine.lock().remove(source).unwrap_or_default()
    }

    /// Time since `source` was last flushed, or since its first enqueue.
    pub fn since_last_flush(&self, source: &str) -> Option<Duration> {
        self.last_flush.lock().get(source).map(Instant::elapsed)
    }

    /// Drop all state for `source` (e.g. the source was unregistered).
    ///
    /// Waits for an in-flight flush of `source` to finish first, so a flush
    /// never writes back into a queue cleared under it.
    pub async fn clear(&self, source: &str) -> Result<usize, SchedulerError> {
        let guard = self.flush_guard(source);
        let _serialised = guard.lock().await;

        let removed = self.queue.lock().clear(source)?;
        self.quarantine.lock().remove(source);
        self.last_flush.lock().remove(source);
        self.record_audit(source, None, AuditAction::Clear, removed, None);
        tracing::info!(source, removed, "source queue cleared");
        Ok(removed)
    }

    /// Flush `source` if its queue reached the batch threshold.
    pub async fn maybe_flush(
        &self,
        source: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<FlushReport>, SchedulerError> {
        if self.len(source) < self.limits.batch_threshold {
            return Ok(None);
        }
        self.flush(source, cancel).await.map(Some)
    }

    /// Flush `source` once: every partition gets at most one generation call.
    ///
    /// Failed calls leave the queue untouched and are recorded on the
    /// admission manager; there is no retry here (see
    /// [`Self::flush_with_retry`]). Cancellation never interrupts a queue
    /// mutation; partitions committed before it fired stay committed.
    pub async fn flush(
        &self,
        source: &str,
        cancel: &CancellationToken,
    ) -> Result<FlushReport, SchedulerError> {
        let guard = self.flush_guard(source);
        let _serialised = tokio::select! {
            () = cancel.cancelled() => return Err(SchedulerError::Cancelled),
            held = guard.lock() => held,
        };

        let mut working = self.queue.lock().peek_all(source)?;
        let mut report = FlushReport::new(source);
        if working.is_empty() {
            return Ok(report);
        }

        let consumers = self.registry.consumers_for(source);
        let mut partitions: Vec<PartitionKey> = Vec::new();
        for item in &working {
            if !partitions.contains(&item.partition) {
                partitions.push(item.partition.clone());
            }
        }

        let mut halted = false;
        for partition in partitions {
            let positions: Vec<usize> = working
                .iter()
                .enumerate()
                .filter(|(_, item)| item.partition == partition)
                .map(|(idx, _)| idx)
                .collect();

            if halted {
                report.outcomes.push(PartitionOutcome::Deferred {
                    partition,
                    pending: positions.len(),
                });
                continue;
            }

            let recipients = consumers
                .get(&partition)
                .filter(|c| !c.is_empty())
                .cloned()
                .unwrap_or_default();
            if recipients.is_empty() {
                tracing::debug!(source, partition = %partition, "no consumers; leaving partition queued");
                report.outcomes.push(PartitionOutcome::NoConsumers {
                    partition,
                    pending: positions.len(),
                });
                continue;
            }

            let items: Vec<WorkItem> = positions.iter().map(|&i| working[i].clone()).collect();
            let ceiling = self.admission.config().max_tokens_per_call;
            let fit = max_prefix_within_budget(self.estimator.as_ref(), &items, ceiling);

            if fit == 0 {
                let estimated = self.estimator.estimate(&items[..1]);
                let stuck = self.commit_removal(source, &mut working, &positions[..1])?;
                let item_id = items[0].id.clone();
                tracing::warn!(
                    source,
                    partition = %partition,
                    item = %item_id,
                    estimated,
                    ceiling,
                    "item exceeds per-call ceiling; quarantined"
                );
                self.quarantine
                    .lock()
                    .entry(source.to_string())
                    .or_default()
                    .extend(stuck);
                self.record_audit(
                    source,
                    Some(&partition),
                    AuditAction::Oversized,
                    1,
                    Some(format!("{item_id}: {estimated} > {ceiling}")),
                );
                report.outcomes.push(PartitionOutcome::Oversized {
                    partition,
                    item_id,
                    estimated,
                });
                continue;
            }

            let batch = &items[..fit];
            let overflow = items.len() - fit;
            let estimated = self.estimator.estimate(batch);
            self.admission.await_admission(estimated, cancel).await?;

            match self.call_generator(&partition, batch, cancel).await? {
                Ok(generation) => {
                    let tokens = generation.tokens_used.unwrap_or(estimated);
                    self.admission.record_success(tokens);
                    self.commit_removal(source, &mut working, &positions[..fit])?;

                    let digest = Digest {
                        source_id: source.to_string(),
                        partition: partition.clone(),
                        item_ids: batch.iter().map(|i| i.id.clone()).collect(),
                        text: generation.text,
                        created_at_ms: now_ms(),
                    };
                    let undelivered = self.fan_out(&recipients, &digest);
                    let delivered = recipients.len() - undelivered.len();

                    tracing::info!(
                        source,
                        partition = %partition,
                        items = fit,
                        overflow,
                        tokens,
                        consumers = delivered,
                        "batch submitted"
                    );
                    self.record_audit(source, Some(&partition), AuditAction::Submit, fit, None);
                    if overflow > 0 {
                        self.record_audit(
                            source,
                            Some(&partition),
                            AuditAction::Overflow,
                            overflow,
                            None,
                        );
                    }
                    report.outcomes.push(PartitionOutcome::Submitted {
                        partition,
                        item_ids: digest.item_ids,
                        consumers: delivered,
                        undelivered,
                        overflow,
                    });
                }
                Err(error) => {
                    self.admission.record_failure();
                    let retryable = error.is_retryable();
                    tracing::warn!(
                        source,
                        partition = %partition,
                        items = fit,
                        retryable,
                        error = %error,
                        "generation failed; batch left queued"
                    );
                    self.record_audit(
                        source,
                        Some(&partition),
                        AuditAction::Failure,
                        fit,
                        Some(error.to_string()),
                    );
                    halted = !retryable || self.admission.is_circuit_open();
                    report.outcomes.push(PartitionOutcome::Failed {
                        partition,
                        error: error.to_string(),
                        retryable,
                    });
                }
            }
        }

        self.last_flush
            .lock()
            .insert(source.to_string(), Instant::now());
        Ok(report)
    }

    /// Flush `source`, re-flushing with exponential backoff while a
    /// partition fails with a retryable error, up to the configured attempt
    /// count. Each failed attempt is recorded on the circuit breaker.
    pub async fn flush_with_retry(
        &self,
        source: &str,
        cancel: &CancellationToken,
    ) -> Result<FlushReport, SchedulerError> {
        let max_attempts = self.admission.config().retry_attempts.max(1);
        let mut carried: Vec<PartitionOutcome> = Vec::new();
        let mut attempt = 0;

        loop {
            let mut report = self.flush(source, cancel).await?;
            attempt += 1;

            if !report.has_retryable_failure() || attempt >= max_attempts {
                carried.append(&mut report.outcomes);
                report.outcomes = carried;
                report.attempts = attempt;
                return Ok(report);
            }

            carried.extend(report.outcomes.into_iter().filter(|o| {
                matches!(
                    o,
                    PartitionOutcome::Submitted { .. } | PartitionOutcome::Oversized { .. }
                )
            }));

            let delay = self.admission.backoff(attempt - 1);
            tracing::info!(
                source,
                attempt,
                max_attempts,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "retrying flush after retryable failure"
            );
            tokio::select! {
                () = cancel.cancelled() => return Err(SchedulerError::Cancelled),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn flush_guard(&self, source: &str) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(
            self.flush_guards
                .lock()
                .entry(source.to_string())
                .or_default(),
        )
    }

    /// Call the generator under the configured deadline. The outer error is
    /// cancellation; the inner one is the call's own failure.
    async fn call_generator(
        &self,
        partition: &str,
        batch: &[WorkItem],
        cancel: &CancellationToken,
    ) -> Result<Result<Generation, GenerationError>, SchedulerError> {
        let prompt = self.prompts.build(partition, batch);
        let call = tokio::time::timeout(
            self.limits.call_timeout,
            self.generator.generate(&prompt, self.limits.max_output_tokens),
        );
        tokio::select! {
            () = cancel.cancelled() => Err(SchedulerError::Cancelled),
            outcome = call => Ok(outcome.unwrap_or(Err(GenerationError::Timeout))),
        }
    }

    /// Remove `working[positions]` from the front of the stored queue and
    /// write the survivors back in order. Returns the removed items.
    ///
    /// The stored queue must still start with `working` (the flush guard
    /// keeps other writers to appends). If it does not, nothing is removed and
    /// a backend error is returned.
    fn commit_removal(
        &self,
        source: &str,
        working: &mut Vec<WorkItem>,
        positions: &[usize],
    ) -> Result<Vec<WorkItem>, SchedulerError> {
        let mut queue = self.queue.lock();

        let stored = queue.peek_all(source)?;
        let unchanged = stored.len() >= working.len()
            && stored.iter().zip(working.iter()).all(|(a, b)| a.id == b.id);
        if !unchanged {
            tracing::error!(
                source,
                expected = working.len(),
                stored = stored.len(),
                "queue changed during flush; nothing removed"
            );
            return Err(SchedulerError::Backend(format!(
                "queue for {source} changed during flush"
            )));
        }

        let (removed, survivors): (Vec<_>, Vec<_>) = working
            .iter()
            .cloned()
            .enumerate()
            .partition(|(idx, _)| positions.contains(idx));
        let survivors: Vec<WorkItem> = survivors.into_iter().map(|(_, item)| item).collect();

        queue.replace_front(source, working.len(), survivors.clone())?;
        drop(queue);

        *working = survivors;
        Ok(removed.into_iter().map(|(_, item)| item).collect())
    }

    /// Deliver `digest` to every recipient. Returns those that failed.
    fn fan_out(&self, recipients: &[ConsumerId], digest: &Digest) -> Vec<ConsumerId> {
        let mut mailbox = self.mailbox.lock();
        recipients
            .iter()
            .filter(|consumer| match mailbox.deliver(consumer, digest) {
                Ok(()) => false,
                Err(e) => {
                    tracing::error!(consumer = %consumer, error = %e, "digest delivery failed");
                    true
                }
            })
            .cloned()
            .collect()
    }

    fn record_audit(
        &self,
        source: &str,
        partition: Option<&str>,
        action: AuditAction,
        item_count: usize,
        detail: Option<String>,
    ) {
        if let Some(audit) = &self.audit {
            audit
                .lock()
                .record(build_audit_event(source, partition, action, item_count, detail));
        }
    }
}
