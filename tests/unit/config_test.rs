//! Tests for configuration validation

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use batchgate::config::{CostConfig, QueueBackendConfig, QuotaConfig, SchedulerConfig};

fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn test_defaults_are_valid() {
    let cfg = SchedulerConfig::default();
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.quota.max_requests_per_minute, 15);
    assert_eq!(cfg.quota.max_tokens_per_call, 30_000);
    assert_eq!(cfg.batch_threshold, 5);
    assert_eq!(cfg.scan_interval(), Duration::from_secs(300));
    assert!(cfg.flush_interval().is_none());
}

#[test]
fn test_quota_config_invalid_values() {
    let zero_rpm = QuotaConfig {
        max_requests_per_minute: 0,
        ..QuotaConfig::default()
    };
    assert!(zero_rpm.validate().is_err());

    let ceiling_above_window = QuotaConfig {
        max_tokens_per_minute: 10_000,
        max_tokens_per_call: 20_000,
        ..QuotaConfig::default()
    };
    assert_eq!(
        ceiling_above_window.validate().unwrap_err(),
        "max_tokens_per_call cannot exceed max_tokens_per_minute"
    );

    let no_threshold = QuotaConfig {
        failure_threshold: 0,
        ..QuotaConfig::default()
    };
    assert!(no_threshold.validate().is_err());
}

#[test]
fn test_cost_config_invalid_values() {
    let invalid = CostConfig {
        chars_per_token: 0,
        ..CostConfig::default()
    };
    assert!(invalid.validate().is_err());
}

#[test]
fn test_scheduler_config_invalid_values() {
    let shallow = SchedulerConfig {
        batch_threshold: 10,
        max_queue_depth: 5,
        ..SchedulerConfig::default()
    };
    assert_eq!(
        shallow.validate().unwrap_err(),
        "max_queue_depth must be at least batch_threshold"
    );

    let zero_flush = SchedulerConfig {
        flush_interval_secs: Some(0),
        ..SchedulerConfig::default()
    };
    assert!(zero_flush.validate().is_err());

    let nested = SchedulerConfig {
        quota: QuotaConfig {
            retry_attempts: 0,
            ..QuotaConfig::default()
        },
        ..SchedulerConfig::default()
    };
    assert!(nested.validate().unwrap_err().starts_with("quota invalid"));
}

#[test]
fn test_from_json_str_fills_defaults() {
    let cfg = SchedulerConfig::from_json_str(
        r#"{
            "quota": { "max_requests_per_minute": 60 },
            "batch_threshold": 10,
            "flush_interval_secs": 900,
            "queue": { "file": { "path": "/var/lib/batchgate" } }
        }"#,
    )
    .unwrap();

    assert_eq!(cfg.quota.max_requests_per_minute, 60);
    assert_eq!(cfg.quota.max_tokens_per_minute, 1_000_000);
    assert_eq!(cfg.batch_threshold, 10);
    assert_eq!(cfg.flush_interval(), Some(Duration::from_secs(900)));
    assert_eq!(
        cfg.queue,
        QueueBackendConfig::File {
            path: PathBuf::from("/var/lib/batchgate")
        }
    );
}

#[test]
fn test_from_json_str_rejects_bad_input() {
    assert!(SchedulerConfig::from_json_str("{ not json")
        .unwrap_err()
        .starts_with("parse error"));
    assert!(SchedulerConfig::from_json_str(r#"{ "batch_threshold": 0 }"#).is_err());
}

#[test]
fn test_from_lookup_reads_prefixed_variables() {
    let cfg = SchedulerConfig::from_lookup(lookup(&[
        ("BATCHGATE_REQUESTS_PER_MINUTE", "30"),
        ("BATCHGATE_TOKENS_PER_CALL", " 12000 "),
        ("BATCHGATE_BATCH_THRESHOLD", "8"),
        ("BATCHGATE_FLUSH_INTERVAL_SECS", "600"),
        ("BATCHGATE_QUEUE_DIR", "/tmp/queues"),
        ("UNRELATED", "ignored"),
    ]))
    .unwrap();

    assert_eq!(cfg.quota.max_requests_per_minute, 30);
    assert_eq!(cfg.quota.max_tokens_per_call, 12_000);
    assert_eq!(cfg.batch_threshold, 8);
    assert_eq!(cfg.flush_interval_secs, Some(600));
    assert_eq!(
        cfg.queue,
        QueueBackendConfig::File {
            path: PathBuf::from("/tmp/queues")
        }
    );
}

#[test]
fn test_from_lookup_without_variables_is_default() {
    let cfg = SchedulerConfig::from_lookup(|_| None).unwrap();
    assert_eq!(cfg, SchedulerConfig::default());
}

#[test]
fn test_from_lookup_reports_bad_values() {
    let err = SchedulerConfig::from_lookup(lookup(&[("BATCHGATE_COOLDOWN_SECS", "soon")]))
        .unwrap_err();
    assert!(err.starts_with("BATCHGATE_COOLDOWN_SECS=\"soon\""), "{err}");

    let err = SchedulerConfig::from_lookup(lookup(&[("BATCHGATE_MAX_QUEUE_DEPTH", "2")]))
        .unwrap_err();
    assert_eq!(err, "max_queue_depth must be at least batch_threshold");
}
