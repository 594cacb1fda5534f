//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use batchgate::config::{CostConfig, QuotaConfig};
use batchgate::core::{
    AdmissionManager, BatchScheduler, Generation, GenerationError, Generator, SchedulerLimits,
    TokenCostModel, WorkItem,
};
use batchgate::infra::{InMemoryMailbox, InMemoryQueueStore, InMemoryRegistry};
use parking_lot::Mutex;

pub type TestScheduler =
    BatchScheduler<InMemoryQueueStore, ScriptedGenerator, InMemoryRegistry, InMemoryMailbox>;

/// Generator that replays scripted outcomes, then succeeds.
#[derive(Clone, Default)]
pub struct ScriptedGenerator {
    prompts: Arc<Mutex<Vec<String>>>,
    script: Arc<Mutex<VecDeque<Result<Generation, GenerationError>>>>,
    delay: Option<Duration>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn push(&self, outcome: Result<Generation, GenerationError>) {
        self.script.lock().push_back(outcome);
    }

    pub fn fail_with(&self, error: GenerationError) {
        self.push(Err(error));
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().len()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(
        &self,
        prompt: &str,
        _max_output_tokens: u64,
    ) -> Result<Generation, GenerationError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let call = {
            let mut prompts = self.prompts.lock();
            prompts.push(prompt.to_string());
            prompts.len()
        };
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(Generation::text(format!("digest #{call}"))))
    }
}

/// Each item built by [`item`] costs exactly 150 tokens under this model.
pub fn flat_cost() -> CostConfig {
    CostConfig {
        fixed_overhead_tokens: 0,
        chars_per_token: 4,
        max_item_tokens: 10_000,
        output_tokens_per_item: 0,
    }
}

pub fn quota(ceiling: u64) -> QuotaConfig {
    QuotaConfig {
        max_requests_per_minute: 1_000,
        max_tokens_per_minute: 10_000_000,
        max_tokens_per_call: ceiling,
        failure_threshold: 3,
        cooldown_secs: 30,
        retry_attempts: 3,
        backoff_base_ms: 100,
    }
}

pub fn limits(threshold: usize) -> SchedulerLimits {
    SchedulerLimits {
        batch_threshold: threshold,
        max_queue_depth: 1_000,
        call_timeout: Duration::from_secs(30),
        max_output_tokens: 1_024,
    }
}

pub fn scheduler_with(
    quota: QuotaConfig,
    limits: SchedulerLimits,
    generator: ScriptedGenerator,
) -> TestScheduler {
    BatchScheduler::new(
        limits,
        Arc::new(AdmissionManager::new(quota)),
        InMemoryQueueStore::new(),
        generator,
        InMemoryRegistry::new(),
        InMemoryMailbox::new(),
    )
    .with_estimator(Arc::new(TokenCostModel::new(flat_cost())))
}

pub fn scheduler(threshold: usize, ceiling: u64, generator: ScriptedGenerator) -> TestScheduler {
    scheduler_with(quota(ceiling), limits(threshold), generator)
}

/// 150-token item.
pub fn item(id: &str, partition: &str) -> WorkItem {
    sized_item(id, partition, 600)
}

pub fn sized_item(id: &str, partition: &str, chars: usize) -> WorkItem {
    WorkItem::new(id, partition, "", "x".repeat(chars))
}

pub fn ids(items: &[WorkItem]) -> Vec<String> {
    items.iter().map(|i| i.id.clone()).collect()
}
