//! Batch fitting: how many queued items fit under a per-call token ceiling.

use crate::config::CostConfig;
use crate::core::item::WorkItem;

/// Estimates the token cost of submitting a batch of items in one call.
///
/// Implementations must be deterministic and monotonically non-decreasing in
/// prefix length: `estimate(&items[..k]) <= estimate(&items[..k + 1])`.
/// [`max_prefix_within_budget`] relies on this to binary-search.
pub trait CostEstimator: Send + Sync {
    /// Estimated tokens for one call over `items`. Empty input costs nothing.
    fn estimate(&self, items: &[WorkItem]) -> u64;
}

/// Character-count heuristic: overhead + clipped per-item input + per-item output.
///
/// The characters-per-token ratio is a tunable approximation, not a
/// guaranteed bound on the real tokenizer.
#[derive(Debug, Clone)]
pub struct TokenCostModel {
    config: CostConfig,
}

impl TokenCostModel {
    /// Create a model from cost settings.
    pub const fn new(config: CostConfig) -> Self {
        Self { config }
    }

    /// Marginal input tokens of one item, clipped to `max_item_tokens`.
    pub fn item_tokens(&self, item: &WorkItem) -> u64 {
        let chars = u64::try_from(item.prompt_chars()).unwrap_or(u64::MAX);
        chars
            .div_ceil(self.config.chars_per_token.max(1))
            .min(self.config.max_item_tokens)
    }
}

impl Default for TokenCostModel {
    fn default() -> Self {
        Self::new(CostConfig::default())
    }
}

impl CostEstimator for TokenCostModel {
    fn estimate(&self, items: &[WorkItem]) -> u64 {
        if items.is_empty() {
            return 0;
        }
        let count = u64::try_from(items.len()).unwrap_or(u64::MAX);
        let input = items
            .iter()
            .fold(0u64, |acc, item| acc.saturating_add(self.item_tokens(item)));
        self.config
            .fixed_overhead_tokens
            .saturating_add(input)
            .saturating_add(self.config.output_tokens_per_item.saturating_mul(count))
    }
}

/// Estimated cost of submitting `items` as one call.
pub fn estimate_cost<E: CostEstimator + ?Sized>(estimator: &E, items: &[WorkItem]) -> u64 {
    estimator.estimate(items)
}

/// Largest `k` in `0..=items.len()` with `estimate(&items[..k]) <= max_tokens`.
///
/// Takes the whole sequence if it fits, otherwise binary-searches `1..=len`
/// for O(log n) estimator calls. Returns 0 when even the first item is over
/// budget; the caller must treat that as a stuck batch.
pub fn max_prefix_within_budget<E: CostEstimator + ?Sized>(
    estimator: &E,
    items: &[WorkItem],
    max_tokens: u64,
) -> usize {
    if items.is_empty() {
        return 0;
    }
    if estimator.estimate(items) <= max_tokens {
        return items.len();
    }

    let (mut lo, mut hi) = (1usize, items.len());
    let mut best = 0;
    while lo <= hi {
        let mid = lo + (hi - lo) / 2;
        if estimator.estimate(&items[..mid]) <= max_tokens {
            best = mid;
            lo = mid + 1;
        } else {
            hi = mid - 1;
        }
    }
    best
}
