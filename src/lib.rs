//! # Batchgate
//!
//! An admission-controlled batch scheduler for metered generation services.
//!
//! Work items (newly discovered articles, releases, posts) arrive per source
//! and must eventually be submitted, in batches, to an external generation
//! service that enforces per-minute request and token quotas and fails
//! transiently. This crate decides when and how much to submit.
//!
//! ## Components
//!
//! - **`AdmissionManager`**: a rolling one-minute request/token window plus a
//!   circuit breaker that opens after repeated failures and admits a trial
//!   call once its cool-down elapses.
//! - **Batch fitting**: `max_prefix_within_budget` binary-searches the largest
//!   prefix of a queue whose estimated cost stays under the per-call ceiling.
//! - **`BatchScheduler`**: one FIFO queue per source, threshold-, interval- or
//!   manually-triggered flushes, one generation call per partition with the
//!   result fanned out to every consumer, and overflow written back to the
//!   front of the queue.
//! - **`ScanLoop`**: the periodic background loop that fetches new items and
//!   flushes queues that are due.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use batchgate::builders::build_scheduler;
//! use batchgate::config::SchedulerConfig;
//! use batchgate::infra::{InMemoryMailbox, InMemoryRegistry};
//! use batchgate::runtime::ScanLoop;
//! use tokio_util::sync::CancellationToken;
//!
//! let cfg = SchedulerConfig::from_env()?;
//! let scheduler = Arc::new(build_scheduler(
//!     &cfg,
//!     my_generator,            // implements Generator
//!     InMemoryRegistry::new(),
//!     InMemoryMailbox::new(),
//! )?);
//!
//! let cancel = CancellationToken::new();
//! let scan = ScanLoop::new(Arc::clone(&scheduler), my_feeds, cfg.scan_interval())
//!     .with_flush_interval(cfg.flush_interval());
//! let handle = scan.spawn(cancel.clone());
//! ```
//!
//! See `tests/scheduler_flow_test.rs` for end-to-end scenarios.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core admission control, batch fitting and scheduling.
pub mod core;
/// Configuration models for quotas, costs and scheduling.
pub mod config;
/// Builders to construct scheduler components from configuration.
pub mod builders;
/// Infrastructure adapters for queues, registries and mailboxes.
pub mod infra;
/// Runtime drivers (scan loop, manual triggers).
pub mod runtime;
/// Shared utilities.
pub mod util;
