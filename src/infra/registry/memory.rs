//! In-memory consumer registry.

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;

use crate::core::{ConsumerId, ConsumerRegistry, PartitionKey, SourceId};

/// Subscriptions of consumers to sources, each with one partition key.
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    subscriptions: RwLock<HashMap<SourceId, BTreeMap<ConsumerId, PartitionKey>>>,
}

impl InMemoryRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `consumer` to `source` under `partition`. Re-subscribing
    /// replaces the partition. Returns `true` if the consumer was new.
    pub fn subscribe(
        &self,
        source: &str,
        consumer: impl Into<ConsumerId>,
        partition: impl Into<PartitionKey>,
    ) -> bool {
        self.subscriptions
            .write()
            .entry(source.to_string())
            .or_default()
            .insert(consumer.into(), partition.into())
            .is_none()
    }

    /// Remove `consumer` from `source`. Returns `true` if it was subscribed.
    pub fn unsubscribe(&self, source: &str, consumer: &ConsumerId) -> bool {
        let mut subs = self.subscriptions.write();
        let Some(consumers) = subs.get_mut(source) else {
            return false;
        };
        let removed = consumers.remove(consumer).is_some();
        if consumers.is_empty() {
            subs.remove(source);
        }
        removed
    }

    /// Sources with at least one consumer.
    pub fn sources(&self) -> Vec<SourceId> {
        self.subscriptions.read().keys().cloned().collect()
    }
}

impl ConsumerRegistry for InMemoryRegistry {
    fn consumers_for(&self, source: &str) -> BTreeMap<PartitionKey, Vec<ConsumerId>> {
        let mut grouped: BTreeMap<PartitionKey, Vec<ConsumerId>> = BTreeMap::new();
        if let Some(consumers) = self.subscriptions.read().get(source) {
            for (consumer, partition) in consumers {
                grouped
                    .entry(partition.clone())
                    .or_default()
                    .push(consumer.clone());
            }
        }
        grouped
    }
}
