//! Tests for builder functions

use anyhow::Context;
use async_trait::async_trait;
use batchgate::builders::{build_limits, build_scheduler};
use batchgate::config::{QueueBackendConfig, SchedulerConfig};
use batchgate::core::{AppResult, Generation, GenerationError, Generator, SchedulerError, WorkItem};
use batchgate::infra::{InMemoryMailbox, InMemoryRegistry};

struct EchoGenerator;

#[async_trait]
impl Generator for EchoGenerator {
    async fn generate(
        &self,
        prompt: &str,
        _max_output_tokens: u64,
    ) -> Result<Generation, GenerationError> {
        Ok(Generation::text(prompt.len().to_string()))
    }
}

#[test]
fn test_build_limits_copies_config() {
    let cfg = SchedulerConfig {
        batch_threshold: 7,
        call_timeout_secs: 9,
        ..SchedulerConfig::default()
    };
    let limits = build_limits(&cfg);
    assert_eq!(limits.batch_threshold, 7);
    assert_eq!(limits.max_queue_depth, 500);
    assert_eq!(limits.call_timeout.as_secs(), 9);
}

#[test]
fn test_build_scheduler_in_memory() {
    let cfg = SchedulerConfig::default();
    let sched = build_scheduler(&cfg, EchoGenerator, InMemoryRegistry::new(), InMemoryMailbox::new())
        .unwrap();

    sched.enqueue("feed/a", WorkItem::new("1", "en", "t", "c")).unwrap();
    assert_eq!(sched.len("feed/a"), 1);
    assert_eq!(sched.admission().config().max_requests_per_minute, 15);
}

#[test]
fn test_build_scheduler_file_backend_persists() -> AppResult<()> {
    let dir = tempfile::tempdir().context("creating temp dir")?;
    let cfg = SchedulerConfig {
        queue: QueueBackendConfig::File {
            path: dir.path().join("queues"),
        },
        ..SchedulerConfig::default()
    };

    let sched = build_scheduler(&cfg, EchoGenerator, InMemoryRegistry::new(), InMemoryMailbox::new())
        .context("building file-backed scheduler")?;
    sched.enqueue("feed/a", WorkItem::new("1", "en", "t", "c"))?;
    drop(sched);

    let reopened =
        build_scheduler(&cfg, EchoGenerator, InMemoryRegistry::new(), InMemoryMailbox::new())
            .context("reopening file-backed scheduler")?;
    assert_eq!(reopened.len("feed/a"), 1);
    Ok(())
}

#[test]
fn test_build_scheduler_rejects_invalid_config() {
    let cfg = SchedulerConfig {
        batch_threshold: 0,
        ..SchedulerConfig::default()
    };
    let result = build_scheduler(&cfg, EchoGenerator, InMemoryRegistry::new(), InMemoryMailbox::new());
    assert!(matches!(result, Err(SchedulerError::Config(_))));
}
