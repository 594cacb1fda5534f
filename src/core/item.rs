//! Work items, consumers and generated digests.

use serde::{Deserialize, Serialize};

use crate::util::clock::now_ms;

/// Identifier of a work source (a monitored feed or repository).
pub type SourceId = String;

/// Grouping attribute shared by consumers that receive one generated result.
pub type PartitionKey = String;

/// Identifier of a consumer that receives digests (e.g. a chat channel).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConsumerId(pub String);

impl From<&str> for ConsumerId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl std::fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A newly discovered unit of work waiting to be batched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Stable identity assigned by the item source.
    pub id: String,
    /// Partition the item is generated for.
    pub partition: PartitionKey,
    /// Short title line.
    pub title: String,
    /// Body text fed into the prompt.
    pub content: String,
    /// Discovery timestamp in milliseconds since epoch.
    pub discovered_at_ms: u128,
}

impl WorkItem {
    /// Create an item discovered now.
    pub fn new(
        id: impl Into<String>,
        partition: impl Into<PartitionKey>,
        title: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            partition: partition.into(),
            title: title.into(),
            content: content.into(),
            discovered_at_ms: now_ms(),
        }
    }

    /// Characters contributing to the prompt.
    pub fn prompt_chars(&self) -> usize {
        self.title.chars().count() + self.content.chars().count()
    }
}

/// One generated result, fanned out to every consumer of a partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Digest {
    /// Source the batch was drawn from.
    pub source_id: SourceId,
    /// Partition the batch was generated for.
    pub partition: PartitionKey,
    /// Items included, in queue order.
    pub item_ids: Vec<String>,
    /// Generated text.
    pub text: String,
    /// Creation timestamp in milliseconds since epoch.
    pub created_at_ms: u128,
}
