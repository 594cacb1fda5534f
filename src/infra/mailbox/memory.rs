//! In-memory mailbox backend.

use std::collections::HashMap;

use crate::core::{ConsumerId, Digest, Mailbox, SchedulerError};
use crate::util::clock::now_ms;

/// Mailbox message container.
#[derive(Debug, Clone)]
pub struct MailboxMessage {
    /// Delivered digest.
    pub digest: Digest,
    /// Delivery timestamp milliseconds.
    pub delivered_at_ms: u128,
}

/// Simple in-memory mailbox for development and testing.
#[derive(Debug, Default)]
pub struct InMemoryMailbox {
    messages: HashMap<ConsumerId, Vec<MailboxMessage>>,
}

impl InMemoryMailbox {
    /// Create a new mailbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch messages for a consumer, optionally since a timestamp.
    pub fn fetch(
        &self,
        consumer: &ConsumerId,
        since_ms: Option<u128>,
        limit: usize,
    ) -> Vec<MailboxMessage> {
        self.messages
            .get(consumer)
            .map(|msgs| {
                msgs.iter()
                    .filter(|m| since_ms.is_none_or(|s| m.delivered_at_ms >= s))
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Total messages held across all consumers.
    pub fn total(&self) -> usize {
        self.messages.values().map(Vec::len).sum()
    }
}

impl Mailbox for InMemoryMailbox {
    fn deliver(&mut self, consumer: &ConsumerId, digest: &Digest) -> Result<(), SchedulerError> {
        self.messages
            .entry(consumer.clone())
            .or_default()
            .push(MailboxMessage {
                digest: digest.clone(),
                delivered_at_ms: now_ms(),
            });
        Ok(())
    }
}
