//! Builders to construct a batch scheduler from configuration.

use std::sync::Arc;

use crate::config::{QueueBackendConfig, SchedulerConfig};
use crate::core::{
    AdmissionManager, BatchScheduler, ConsumerRegistry, Generator, Mailbox, QueueStore,
    SchedulerError, SchedulerLimits, TokenCostModel,
};
use crate::infra::queue::{FileQueueStore, InMemoryQueueStore};

/// Scheduler limits taken from configuration.
pub fn build_limits(cfg: &SchedulerConfig) -> SchedulerLimits {
    SchedulerLimits {
        batch_threshold: cfg.batch_threshold,
        max_queue_depth: cfg.max_queue_depth,
        call_timeout: cfg.call_timeout(),
        max_output_tokens: cfg.max_output_tokens,
    }
}

/// Open the configured queue backend.
pub fn build_queue_store(cfg: &SchedulerConfig) -> Result<Box<dyn QueueStore>, SchedulerError> {
    Ok(match &cfg.queue {
        QueueBackendConfig::InMemory => Box::new(InMemoryQueueStore::new()),
        QueueBackendConfig::File { path } => Box::new(FileQueueStore::open(path)?),
    })
}

/// Validate `cfg` and assemble a scheduler with its own admission manager,
/// the configured queue backend and the heuristic cost model.
pub fn build_scheduler<G, R, M>(
    cfg: &SchedulerConfig,
    generator: G,
    registry: R,
    mailbox: M,
) -> Result<BatchScheduler<Box<dyn QueueStore>, G, R, M>, SchedulerError>
where
    G: Generator,
    R: ConsumerRegistry,
    M: Mailbox,
{
    cfg.validate().map_err(SchedulerError::Config)?;

    let admission = Arc::new(AdmissionManager::new(cfg.quota.clone()));
    let queue = build_queue_store(cfg)?;
    tracing::info!(
        requests_per_minute = cfg.quota.max_requests_per_minute,
        tokens_per_minute = cfg.quota.max_tokens_per_minute,
        tokens_per_call = cfg.quota.max_tokens_per_call,
        batch_threshold = cfg.batch_threshold,
        "batch scheduler configured"
    );

    Ok(
        BatchScheduler::new(build_limits(cfg), admission, queue, generator, registry, mailbox)
            .with_estimator(Arc::new(TokenCostModel::new(cfg.cost.clone()))),
    )
}
