//! Tests for error types

use std::time::Duration;

use batchgate::core::{AdmissionDenied, GenerationError, SchedulerError};

#[test]
fn test_queue_full_error() {
    let err = SchedulerError::QueueFull("feed/a".to_string());
    assert_eq!(format!("{err}"), "queue full: feed/a");
    assert!(!err.is_retryable());
}

#[test]
fn test_backend_error() {
    let err = SchedulerError::Backend("disk full".to_string());
    assert_eq!(format!("{err}"), "backend error: disk full");
}

#[test]
fn test_cancelled_and_config_errors() {
    assert_eq!(SchedulerError::Cancelled.to_string(), "operation cancelled");
    assert_eq!(
        SchedulerError::Config("batch_threshold must be greater than 0".into()).to_string(),
        "config invalid: batch_threshold must be greater than 0"
    );
}

#[test]
fn test_admission_denial_wraps() {
    let denied = AdmissionDenied::OversizedCall {
        estimated: 40_000,
        ceiling: 30_000,
    };
    assert!(!denied.is_retryable());
    assert!(denied.retry_after().is_none());

    let err = SchedulerError::from(denied);
    assert_eq!(
        err.to_string(),
        "admission denied: estimated 40000 tokens exceeds per-call ceiling of 30000"
    );
    assert!(!err.is_retryable());

    let quota = AdmissionDenied::RequestQuota {
        retry_after: Duration::from_secs(12),
    };
    assert!(quota.is_retryable());
    assert_eq!(quota.retry_after(), Some(Duration::from_secs(12)));
}

#[test]
fn test_generation_errors_pass_through() {
    let err = SchedulerError::from(GenerationError::RateLimited("429".into()));
    assert_eq!(err.to_string(), "rate limited: 429");
    assert!(err.is_retryable());

    let err = SchedulerError::from(GenerationError::from_status(401, "bad key"));
    assert_eq!(err.to_string(), "unauthorized: bad key");
    assert!(!err.is_retryable());
}
