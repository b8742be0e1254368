//! Pluggable token counting for budget allocation (C4 Response Shaper).
//!
//! Provides a `TokenCounter` trait with two implementations: `BytesEstimateCounter`
//! (fast bytes/3 heuristic, no dependencies) and `TiktokenCounter` (accurate BPE
//! counting, feature-gated behind `tiktoken`). Whichever counter is active is used
//! consistently for both shaping a single response and the multi-file water-fill
//! allocation in `shaper::allocate_budget`.

use std::sync::Arc;

pub trait TokenCounter: Send + Sync {
    fn count_tokens(&self, text: &str) -> usize;
    fn name(&self) -> &str;
}

/// Default: bytes/3 estimation (fast, no dependencies)
pub struct BytesEstimateCounter;

impl TokenCounter for BytesEstimateCounter {
    fn count_tokens(&self, text: &str) -> usize {
        text.len().div_ceil(3)
    }
    fn name(&self) -> &str {
        "bytes-estimate"
    }
}

/// Tiktoken-based counter for Claude/GPT-style models (requires `tiktoken` feature)
#[cfg(feature = "tiktoken")]
pub struct TiktokenCounter {
    bpe: tiktoken_rs::CoreBPE,
}

#[cfg(feature = "tiktoken")]
impl TiktokenCounter {
    pub fn new() -> Self {
        Self { bpe: tiktoken_rs::cl100k_base().unwrap() }
    }
}

#[cfg(feature = "tiktoken")]
impl TokenCounter for TiktokenCounter {
    fn count_tokens(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }
    fn name(&self) -> &str {
        "tiktoken"
    }
}

/// Create a counter by name. Falls back to bytes-estimate for unknown names.
pub fn create_counter(name: &str) -> Arc<dyn TokenCounter> {
    match name {
        #[cfg(feature = "tiktoken")]
        "tiktoken" => Arc::new(TiktokenCounter::new()),
        _ => Arc::new(BytesEstimateCounter),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_estimate_rounds_up() {
        let c = BytesEstimateCounter;
        assert_eq!(c.count_tokens("ab"), 1);
        assert_eq!(c.count_tokens("abcd"), 2);
        assert_eq!(c.count_tokens(""), 0);
    }

    #[test]
    fn unknown_name_falls_back() {
        let c = create_counter("nonexistent");
        assert_eq!(c.name(), "bytes-estimate");
    }
}
