//! Audit trail of queue and batch events.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::util::clock::now_ms;

/// Kind of event recorded by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// Item appended to a source queue.
    Enqueue,
    /// Batch generated and removed from the queue.
    Submit,
    /// Items left queued because they did not fit the batch.
    Overflow,
    /// Item larger than the per-call ceiling moved to quarantine.
    Oversized,
    /// Generation call failed; queue untouched.
    Failure,
    /// Source queue cleared.
    Clear,
}

/// Audit event structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Event identifier.
    pub event_id: String,
    /// Source the event concerns.
    pub source_id: String,
    /// Partition, when the event is partition-scoped.
    pub partition: Option<String>,
    /// Action taken.
    pub action: AuditAction,
    /// Number of items affected.
    pub item_count: usize,
    /// Timestamp milliseconds.
    pub created_at_ms: u128,
    /// Additional context.
    pub detail: Option<String>,
}

/// Audit sink abstraction.
pub trait AuditSink: Send {
    /// Record an audit event.
    fn record(&mut self, event: AuditEvent);
}

/// Bounded in-memory audit sink for testing and dev.
pub struct InMemoryAuditSink {
    events: VecDeque<AuditEvent>,
    max_events: usize,
}

impl InMemoryAuditSink {
    /// Create a new in-memory sink with a bounded buffer.
    pub fn new(max_events: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(max_events.min(1024)),
            max_events,
        }
    }

    /// Retrieve a snapshot of stored events.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.iter().cloned().collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&mut self, event: AuditEvent) {
        if self.max_events == 0 {
            return;
        }
        if self.events.len() >= self.max_events {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }
}

/// Helper to build an audit event with a fresh id and timestamp.
pub fn build_audit_event(
    source_id: impl Into<String>,
    partition: Option<&str>,
    action: AuditAction,
    item_count: usize,
    detail: Option<String>,
) -> AuditEvent {
    AuditEvent {
        event_id: uuid::Uuid::new_v4().to_string(),
        source_id: source_id.into(),
        partition: partition.map(str::to_string),
        action,
        item_count,
        created_at_ms: now_ms(),
        detail,
    }
}
