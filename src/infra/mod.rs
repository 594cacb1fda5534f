//! Infrastructure adapters for queues, consumer registries and mailboxes.

pub mod mailbox;
pub mod queue;
pub mod registry;

pub use mailbox::InMemoryMailbox;
pub use queue::{FileQueueStore, InMemoryQueueStore};
pub use registry::InMemoryRegistry;
