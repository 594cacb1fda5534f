//! Core admission control, batch fitting and scheduling.

pub mod admission;
pub mod audit;
pub mod error;
pub mod fitter;
pub mod generator;
pub mod item;
pub mod scheduler;

pub use admission::{backoff, AdmissionManager, AdmissionStats, CircuitState};
pub use audit::{build_audit_event, AuditAction, AuditEvent, AuditSink, InMemoryAuditSink};
pub use error::{AdmissionDenied, AppResult, GenerationError, SchedulerError};
pub use fitter::{estimate_cost, max_prefix_within_budget, CostEstimator, TokenCostModel};
pub use generator::{Generation, Generator, PlainPromptBuilder, PromptBuilder};
pub use item::{ConsumerId, Digest, PartitionKey, SourceId, WorkItem};
pub use scheduler::{
    BatchScheduler, ConsumerRegistry, FlushReport, Mailbox, PartitionOutcome, QueueStore,
    SchedulerLimits,
};
