//! Quota and scheduler configuration structures.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Prefix shared by every recognised environment variable.
pub const ENV_PREFIX: &str = "BATCHGATE_";

/// Quota limits for one admission manager. Fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    /// Maximum calls per one-minute window.
    pub max_requests_per_minute: u32,
    /// Maximum tokens per one-minute window.
    pub max_tokens_per_minute: u64,
    /// Maximum estimated tokens for a single call.
    pub max_tokens_per_call: u64,
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Seconds the circuit stays open before a trial call is admitted.
    pub cooldown_secs: u64,
    /// Attempts made by the retry wrapper for retryable failures.
    pub retry_attempts: u32,
    /// Base for exponential backoff between attempts, in milliseconds.
    pub backoff_base_ms: u64,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            max_requests_per_minute: 15,
            max_tokens_per_minute: 1_000_000,
            max_tokens_per_call: 30_000,
            failure_threshold: 5,
            cooldown_secs: 60,
            retry_attempts: 3,
            backoff_base_ms: 2_000,
        }
    }
}

impl QuotaConfig {
    /// Circuit cool-down as a duration.
    pub const fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    /// Backoff base as a duration.
    pub const fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    /// Validate quota values.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_requests_per_minute == 0 {
            return Err("max_requests_per_minute must be greater than 0".into());
        }
        if self.max_tokens_per_minute == 0 {
            return Err("max_tokens_per_minute must be greater than 0".into());
        }
        if self.max_tokens_per_call == 0 {
            return Err("max_tokens_per_call must be greater than 0".into());
        }
        if self.max_tokens_per_call > self.max_tokens_per_minute {
            return Err("max_tokens_per_call cannot exceed max_tokens_per_minute".into());
        }
        if self.failure_threshold == 0 {
            return Err("failure_threshold must be greater than 0".into());
        }
        if self.retry_attempts == 0 {
            return Err("retry_attempts must be greater than 0".into());
        }
        Ok(())
    }
}

/// Parameters of the token-cost heuristic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostConfig {
    /// Fixed prompt overhead charged once per call.
    pub fixed_overhead_tokens: u64,
    /// Characters assumed per token when no precise count is available.
    pub chars_per_token: u64,
    /// Upper bound on the marginal cost of one item.
    pub max_item_tokens: u64,
    /// Expected output tokens per item in the batch.
    pub output_tokens_per_item: u64,
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            fixed_overhead_tokens: 500,
            chars_per_token: 4,
            max_item_tokens: 2_000,
            output_tokens_per_item: 150,
        }
    }
}

impl CostConfig {
    /// Validate cost heuristic values.
    pub fn validate(&self) -> Result<(), String> {
        if self.chars_per_token == 0 {
            return Err("chars_per_token must be greater than 0".into());
        }
        if self.max_item_tokens == 0 {
            return Err("max_item_tokens must be greater than 0".into());
        }
        Ok(())
    }
}

/// Queue backend selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueBackendConfig {
    /// In-memory queue, lost on restart.
    InMemory,
    /// One JSONL file per source under `path`.
    File {
        /// Directory holding the queue files.
        path: PathBuf,
    },
}

/// Root scheduler configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Quota and circuit settings.
    pub quota: QuotaConfig,
    /// Cost heuristic settings.
    pub cost: CostConfig,
    /// Queue length that triggers a flush.
    pub batch_threshold: usize,
    /// Maximum items held per source before enqueue is rejected.
    pub max_queue_depth: usize,
    /// Seconds between periodic scans.
    pub scan_interval_secs: u64,
    /// Flush any non-empty queue not flushed within this many seconds.
    pub flush_interval_secs: Option<u64>,
    /// Deadline for one generation call, in seconds.
    pub call_timeout_secs: u64,
    /// Output token ceiling passed to the generation call.
    pub max_output_tokens: u64,
    /// Queue backend selection.
    pub queue: QueueBackendConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            quota: QuotaConfig::default(),
            cost: CostConfig::default(),
            batch_threshold: 5,
            max_queue_depth: 500,
            scan_interval_secs: 300,
            flush_interval_secs: None,
            call_timeout_secs: 120,
            max_output_tokens: 8_192,
            queue: QueueBackendConfig::InMemory,
        }
    }
}

impl SchedulerConfig {
    /// Periodic scan interval.
    pub const fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }

    /// Interval flush period, if enabled.
    pub fn flush_interval(&self) -> Option<Duration> {
        self.flush_interval_secs.map(Duration::from_secs)
    }

    /// Generation call deadline.
    pub const fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    /// Validate all sections.
    pub fn validate(&self) -> Result<(), String> {
        self.quota.validate().map_err(|e| format!("quota invalid: {e}"))?;
        self.cost.validate().map_err(|e| format!("cost invalid: {e}"))?;
        if self.batch_threshold == 0 {
            return Err("batch_threshold must be greater than 0".into());
        }
        if self.max_queue_depth < self.batch_threshold {
            return Err("max_queue_depth must be at least batch_threshold".into());
        }
        if self.scan_interval_secs == 0 {
            return Err("scan_interval_secs must be greater than 0".into());
        }
        if self.flush_interval_secs == Some(0) {
            return Err("flush_interval_secs must be greater than 0 when set".into());
        }
        if self.call_timeout_secs == 0 {
            return Err("call_timeout_secs must be greater than 0".into());
        }
        if self.max_output_tokens == 0 {
            return Err("max_output_tokens must be greater than 0".into());
        }
        Ok(())
    }

    /// Parse scheduler configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load configuration from the process environment, reading a `.env`
    /// file first if one exists. Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, String> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                return Err(format!(".env error: {e}"));
            }
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup. Keys are the
    /// `BATCHGATE_*` variable names.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));
        let mut cfg = Self::default();

        set_parsed(&get, "REQUESTS_PER_MINUTE", &mut cfg.quota.max_requests_per_minute)?;
        set_parsed(&get, "TOKENS_PER_MINUTE", &mut cfg.quota.max_tokens_per_minute)?;
        set_parsed(&get, "TOKENS_PER_CALL", &mut cfg.quota.max_tokens_per_call)?;
        set_parsed(&get, "FAILURE_THRESHOLD", &mut cfg.quota.failure_threshold)?;
        set_parsed(&get, "COOLDOWN_SECS", &mut cfg.quota.cooldown_secs)?;
        set_parsed(&get, "RETRY_ATTEMPTS", &mut cfg.quota.retry_attempts)?;
        set_parsed(&get, "BACKOFF_BASE_MS", &mut cfg.quota.backoff_base_ms)?;
        set_parsed(&get, "BATCH_THRESHOLD", &mut cfg.batch_threshold)?;
        set_parsed(&get, "MAX_QUEUE_DEPTH", &mut cfg.max_queue_depth)?;
        set_parsed(&get, "SCAN_INTERVAL_SECS", &mut cfg.scan_interval_secs)?;
        set_parsed(&get, "CALL_TIMEOUT_SECS", &mut cfg.call_timeout_secs)?;
        set_parsed(&get, "MAX_OUTPUT_TOKENS", &mut cfg.max_output_tokens)?;

        if let Some(raw) = get("FLUSH_INTERVAL_SECS") {
            cfg.flush_interval_secs = Some(parse_value("FLUSH_INTERVAL_SECS", &raw)?);
        }
        if let Some(dir) = get("QUEUE_DIR").filter(|d| !d.trim().is_empty()) {
            cfg.queue = QueueBackendConfig::File {
                path: PathBuf::from(dir),
            };
        }

        cfg.validate()?;
        Ok(cfg)
    }
}

fn set_parsed<T, G>(get: &G, name: &str, slot: &mut T) -> Result<(), String>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    if let Some(raw) = get(name) {
        *slot = parse_value(name, &raw)?;
    }
    Ok(())
}

fn parse_value<T>(name: &str, raw: &str) -> Result<T, String>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| format!("{ENV_PREFIX}{name}={raw:?}: {e}"))
}
