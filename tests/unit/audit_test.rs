//! Tests for audit sink

use batchgate::core::{build_audit_event, AuditAction, AuditSink, InMemoryAuditSink};

#[test]
fn test_in_memory_audit_sink() {
    let mut sink = InMemoryAuditSink::new(10);

    let event = build_audit_event(
        "feed/a",
        Some("en"),
        AuditAction::Submit,
        4,
        Some("digest".to_string()),
    );

    sink.record(event.clone());
    let events = sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_id, event.event_id);
    assert_eq!(events[0].source_id, "feed/a");
    assert_eq!(events[0].action, AuditAction::Submit);
}

#[test]
fn test_audit_sink_overflow() {
    let mut sink = InMemoryAuditSink::new(2);

    for count in 1..=3 {
        sink.record(build_audit_event("feed/a", None, AuditAction::Enqueue, count, None));
    }

    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].item_count, 2); // oldest evicted
    assert_eq!(events[1].item_count, 3);
}

#[test]
fn test_zero_capacity_sink_keeps_nothing() {
    let mut sink = InMemoryAuditSink::new(0);
    sink.record(build_audit_event("feed/a", None, AuditAction::Clear, 0, None));
    assert!(sink.events().is_empty());
}

#[test]
fn test_build_audit_event() {
    let first = build_audit_event(
        "feed/a",
        Some("fr"),
        AuditAction::Oversized,
        1,
        Some("item-9".to_string()),
    );
    let second = build_audit_event("feed/a", None, AuditAction::Failure, 3, None);

    assert_eq!(first.partition.as_deref(), Some("fr"));
    assert_eq!(first.detail.as_deref(), Some("item-9"));
    assert!(first.created_at_ms > 0);
    assert_ne!(first.event_id, second.event_id);
    assert!(second.partition.is_none());
}

#[test]
fn test_audit_event_serialises_action_name() {
    let event = build_audit_event("feed/a", Some("en"), AuditAction::Overflow, 2, None);
    let json = serde_json::to_value(&event).unwrap();
    assert_eq!(json["action"], "overflow");
    assert_eq!(json["item_count"], 2);
}
