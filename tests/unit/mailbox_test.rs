//! Tests for mailbox functionality

use batchgate::core::{ConsumerId, Digest, Mailbox};
use batchgate::infra::InMemoryMailbox;

fn digest(text: &str) -> Digest {
    Digest {
        source_id: "feed/a".to_string(),
        partition: "en".to_string(),
        item_ids: vec!["1".to_string(), "2".to_string()],
        text: text.to_string(),
        created_at_ms: 1,
    }
}

#[test]
fn test_mailbox_deliver_and_fetch() {
    let mut mailbox = InMemoryMailbox::new();
    let chan = ConsumerId::from("chan-1");

    mailbox.deliver(&chan, &digest("first")).unwrap();
    mailbox.deliver(&chan, &digest("second")).unwrap();

    let messages = mailbox.fetch(&chan, None, 10);
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].digest.text, "first");
    assert_eq!(messages[1].digest.text, "second");
    assert_eq!(mailbox.total(), 2);
}

#[test]
fn test_mailbox_fetch_limit_and_since() {
    let mut mailbox = InMemoryMailbox::new();
    let chan = ConsumerId::from("chan-1");
    for text in ["a", "b", "c"] {
        mailbox.deliver(&chan, &digest(text)).unwrap();
    }

    assert_eq!(mailbox.fetch(&chan, None, 2).len(), 2);
    assert!(mailbox.fetch(&chan, Some(u128::MAX), 10).is_empty());
    assert!(mailbox
        .fetch(&ConsumerId::from("nobody"), None, 10)
        .is_empty());
}
