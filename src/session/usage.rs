//! Cumulative token usage
//!
//! Shared between the session record (totals across modes) and each
//! persistent session (totals for one live process).

use std::sync::atomic::{AtomicU64, Ordering};

use crate::types::TokenUsage;

fn nonzero(v: u64) -> Option<u64> {
    (v > 0).then_some(v)
}

/// Lock-free running totals
#[derive(Debug, Default)]
pub struct UsageTracker {
    input_tokens: AtomicU64,
    output_tokens: AtomicU64,
    cache_read_input_tokens: AtomicU64,
    cache_creation_input_tokens: AtomicU64,
    turns: AtomicU64,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one turn's usage and return the new total
    pub fn add(&self, usage: &TokenUsage) -> TokenUsage {
        self.input_tokens
            .fetch_add(usage.input_tokens, Ordering::Relaxed);
        self.output_tokens
            .fetch_add(usage.output_tokens, Ordering::Relaxed);
        if let Some(v) = usage.cache_read_input_tokens {
            self.cache_read_input_tokens.fetch_add(v, Ordering::Relaxed);
        }
        if let Some(v) = usage.cache_creation_input_tokens {
            self.cache_creation_input_tokens
                .fetch_add(v, Ordering::Relaxed);
        }
        self.turns.fetch_add(1, Ordering::Relaxed);
        self.get()
    }

    /// Current totals; cache counters are omitted until something was cached
    pub fn get(&self) -> TokenUsage {
        TokenUsage {
            input_tokens: self.input_tokens.load(Ordering::Relaxed),
            output_tokens: self.output_tokens.load(Ordering::Relaxed),
            cache_read_input_tokens: nonzero(self.cache_read_input_tokens.load(Ordering::Relaxed)),
            cache_creation_input_tokens: nonzero(
                self.cache_creation_input_tokens.load(Ordering::Relaxed),
            ),
        }
    }

    /// Turns that reported usage
    pub fn turns(&self) -> u64 {
        self.turns.load(Ordering::Relaxed)
    }

    pub fn total_tokens(&self) -> u64 {
        self.input_tokens.load(Ordering::Relaxed) + self.output_tokens.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_usage_tracker_new() {
        let tracker = UsageTracker::new();
        assert_eq!(tracker.get(), TokenUsage::default());
        assert_eq!(tracker.turns(), 0);
    }

    #[test]
    fn test_usage_tracker_cumulative() {
        let tracker = UsageTracker::new();
        tracker.add(&TokenUsage::from_counts(100, 50));
        let total = tracker.add(&TokenUsage::from_counts(200, 100));

        assert_eq!(total, TokenUsage::from_counts(300, 150));
        assert_eq!(tracker.get(), total);
        assert_eq!(tracker.total_tokens(), 450);
        assert_eq!(tracker.turns(), 2);
    }

    #[test]
    fn test_usage_tracker_cache_counters() {
        let tracker = UsageTracker::new();
        tracker.add(&TokenUsage {
            input_tokens: 100,
            output_tokens: 50,
            cache_read_input_tokens: Some(10),
            cache_creation_input_tokens: None,
        });
        let total = tracker.get();
        assert_eq!(total.cache_read_input_tokens, Some(10));
        assert_eq!(total.cache_creation_input_tokens, None);
    }
}
