//! Manual (admin-initiated) flushes, each running as its own task.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::{
    BatchScheduler, ConsumerRegistry, FlushReport, Generator, Mailbox, QueueStore, SchedulerError,
};

/// Spawn an out-of-band flush of `source` with retry and backoff.
///
/// The task shares the scheduler and admission manager with the scan loop;
/// per-source flush serialisation keeps the two from submitting the same
/// items twice.
pub fn spawn_manual_flush<Q, G, R, M>(
    scheduler: Arc<BatchScheduler<Q, G, R, M>>,
    source: impl Into<String>,
    cancel: CancellationToken,
) -> JoinHandle<Result<FlushReport, SchedulerError>>
where
    Q: QueueStore + 'static,
    G: Generator,
    R: ConsumerRegistry + 'static,
    M: Mailbox + 'static,
{
    let source = source.into();
    tokio::spawn(async move {
        tracing::info!(source = %source, "manual flush triggered");
        let report = scheduler.flush_with_retry(&source, &cancel).await;
        match &report {
            Ok(r) => tracing::info!(
                source = %source,
                submitted = r.submitted_items(),
                attempts = r.attempts,
                "manual flush finished"
            ),
            Err(e) => tracing::warn!(source = %source, error = %e, "manual flush aborted"),
        }
        report
    })
}
