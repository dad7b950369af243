//! Token estimation backends for chunk budgeting.
//!
//! Chunk budgets are expressed in model tokens. The default estimator is a
//! cheap heuristic over unicode words and raw length, which tracks BPE
//! tokenizers closely enough for budgeting; the `tiktoken` feature swaps in
//! an exact `cl100k_base` count for deployments that want it.

use unicode_segmentation::UnicodeSegmentation;

/// Token counting contract used by the chunker.
pub trait TokenEstimator: Send + Sync {
    fn count(&self, text: &str) -> usize;
}

/// Word- and length-based estimate: roughly 4 characters or 3/4 of a word per
/// token, whichever signal is larger. Dense non-prose text (tables, code)
/// is dominated by the length signal.
#[derive(Clone, Copy, Debug, Default)]
pub struct HeuristicEstimator;

impl TokenEstimator for HeuristicEstimator {
    fn count(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        let words = text.unicode_words().count();
        let by_words = (words * 4).div_ceil(3);
        let by_length = text.chars().count().div_ceil(4);
        by_words.max(by_length)
    }
}

/// Exact token count via `tiktoken-rs` (`cl100k_base`).
#[cfg(feature = "tiktoken")]
pub struct TiktokenEstimator {
    bpe: tiktoken_rs::CoreBPE,
}

#[cfg(feature = "tiktoken")]
impl TiktokenEstimator {
    /// Build the estimator; fails only if the bundled encoder data is
    /// unavailable.
    pub fn new() -> Result<Self, crate::error::PipelineError> {
        let bpe = tiktoken_rs::cl100k_base()
            .map_err(|err| crate::error::PipelineError::InvalidConfig(err.to_string()))?;
        Ok(Self { bpe })
    }
}

#[cfg(feature = "tiktoken")]
impl TokenEstimator for TiktokenEstimator {
    fn count(&self, text: &str) -> usize {
        self.bpe.encode_ordinary(text).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_is_zero_tokens() {
        assert_eq!(HeuristicEstimator.count(""), 0);
    }

    #[test]
    fn estimate_scales_with_text() {
        let est = HeuristicEstimator;
        let short = est.count("access control policy");
        let long = est.count(&"access control policy ".repeat(50));
        assert!(short >= 3);
        assert!(long > short * 30);
    }

    #[test]
    fn dense_text_counts_by_length() {
        // Table-ish content with few unicode words still costs tokens.
        let est = HeuristicEstimator;
        assert!(est.count("|----|----|----|----|") >= 5);
    }
}
