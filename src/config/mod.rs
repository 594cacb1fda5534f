//! Configuration models for quotas, cost estimation and the batch scheduler.

pub mod scheduler;

pub use scheduler::{CostConfig, QueueBackendConfig, QuotaConfig, SchedulerConfig};
