//! Pipeline configuration.
//!
//! Every heuristic the pipeline relies on — similarity thresholds, token
//! budgets, relation ceilings, promotion signals, concurrency limits — is
//! plain data here rather than a constant, so corpora can tune them without
//! code changes. Defaults are the calibration the test suite exercises.
//!
//! Configs deserialize from JSON and can be overlaid from the environment
//! (`ANCHORGRAPH_*` variables, loaded through `dotenvy`).

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::PipelineError;

/// Quote-location calibration shared by anchor and relation extraction.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MatchingConfig {
    /// Similarity at or above which an anchor is exact (`approximate=false`).
    pub exact_threshold: f64,
    /// Similarity floor; matches in `[floor, exact_threshold)` produce
    /// approximate anchors, anything below is rejected outright.
    pub approximate_floor: f64,
    /// Step, in characters, of the fuzzy sliding window. Smaller steps find
    /// tighter spans at higher cost.
    pub window_step: usize,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            exact_threshold: 0.85,
            approximate_floor: 0.70,
            window_step: 8,
        }
    }
}

/// Layout-aware chunking parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Target token budget per chunk.
    pub token_budget: usize,
    /// Overlap, in tokens, carried from the tail of one chunk into the next.
    pub overlap_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            token_budget: 512,
            overlap_tokens: 64,
        }
    }
}

/// Relation extraction budgets and gate weights.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RelationConfig {
    /// Hard cap on the concept catalog handed to the relation model.
    pub catalog_max: usize,
    /// Number of document-frequent concepts added as weak catalog signal.
    pub frequent_concepts: usize,
    /// Anchored-concept count below which the lexical fallback kicks in.
    pub lexical_fallback_below: usize,
    /// Ceiling on accepted relations per chunk window.
    pub max_relations_per_chunk: usize,
    /// Ceiling on accepted relations per document.
    pub max_relations_per_document: usize,
    /// Ceiling on items read from a single model response; the rest is
    /// truncated unread.
    pub max_response_items: usize,
    /// Gate score below which a window's model call is skipped entirely.
    pub gate_threshold: f32,
    /// Gate weight: anchors per kilotoken of window text.
    pub gate_anchor_density_weight: f32,
    /// Gate weight: distinct concepts anchored in the window.
    pub gate_diversity_weight: f32,
    /// Gate bonus for requirements/definition segments in the window.
    pub gate_segment_bonus: f32,
    /// Gate penalty applied to purely narrative windows.
    pub gate_narrative_penalty: f32,
}

impl Default for RelationConfig {
    fn default() -> Self {
        Self {
            catalog_max: 100,
            frequent_concepts: 10,
            lexical_fallback_below: 3,
            max_relations_per_chunk: 12,
            max_relations_per_document: 200,
            max_response_items: 32,
            gate_threshold: 0.35,
            gate_anchor_density_weight: 0.5,
            gate_diversity_weight: 0.3,
            gate_segment_bonus: 0.3,
            gate_narrative_penalty: 0.2,
        }
    }
}

/// Corpus promotion calibration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PromotionConfig {
    /// Anchor confidence at or above which a member counts as strongly
    /// grounded for the multi-document stability rule.
    pub strong_confidence: f32,
    /// Normative modals recognized in quotes for the singleton test.
    pub normative_modals: Vec<String>,
    /// A normalized quote repeated across this many protos is treated as
    /// boilerplate.
    pub boilerplate_repeats: usize,
    /// Minimum segment length, in characters, for a zone to count as
    /// content-bearing rather than a title fragment.
    pub min_content_len: usize,
}

impl Default for PromotionConfig {
    fn default() -> Self {
        Self {
            strong_confidence: 0.75,
            normative_modals: [
                "shall",
                "must",
                "is required",
                "are required",
                "shall not",
                "must not",
                "mandatory",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
            boilerplate_repeats: 3,
            min_content_len: 80,
        }
    }
}

/// Concurrency, rate limiting, and retry policy for provider calls.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    /// Documents processed in parallel during pass 1.
    pub max_concurrent_documents: usize,
    /// Concurrent extraction calls within one document.
    pub max_concurrent_segments: usize,
    /// Sustained provider request rate (token bucket refill).
    pub requests_per_second: u32,
    /// Transient-failure retry budget per unit.
    pub max_retries: u32,
    /// Initial backoff delay; doubles per attempt with jitter.
    pub backoff_base_ms: u64,
    /// Backoff ceiling.
    pub backoff_max_ms: u64,
}

impl ConcurrencyConfig {
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_concurrent_documents: 4,
            max_concurrent_segments: 4,
            requests_per_second: 5,
            max_retries: 3,
            backoff_base_ms: 200,
            backoff_max_ms: 5_000,
        }
    }
}

/// How pass 2 is scheduled relative to pass 1.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pass2Mode {
    /// Run enrichment right after promotion when compute is available.
    Immediate,
    /// Mark documents pending and leave them for a background worker.
    #[default]
    Deferred,
    /// Enrichment is driven by an external batch scheduler; documents are
    /// marked skipped until it claims them.
    Scheduled,
}

/// Aggregate pipeline configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub matching: MatchingConfig,
    pub chunking: ChunkingConfig,
    pub relations: RelationConfig,
    pub promotion: PromotionConfig,
    pub concurrency: ConcurrencyConfig,
    pub pass2_mode: Pass2Mode,
}

impl PipelineConfig {
    /// Load defaults, then overlay any `ANCHORGRAPH_*` environment variables
    /// (a `.env` file is honored if present).
    pub fn from_env() -> Result<Self, PipelineError> {
        let _ = dotenvy::dotenv();
        let mut config = Self::default();

        if let Ok(raw) = std::env::var("ANCHORGRAPH_TOKEN_BUDGET") {
            config.chunking.token_budget = parse_env("ANCHORGRAPH_TOKEN_BUDGET", &raw)?;
        }
        if let Ok(raw) = std::env::var("ANCHORGRAPH_EXACT_THRESHOLD") {
            config.matching.exact_threshold = parse_env("ANCHORGRAPH_EXACT_THRESHOLD", &raw)?;
        }
        if let Ok(raw) = std::env::var("ANCHORGRAPH_APPROXIMATE_FLOOR") {
            config.matching.approximate_floor = parse_env("ANCHORGRAPH_APPROXIMATE_FLOOR", &raw)?;
        }
        if let Ok(raw) = std::env::var("ANCHORGRAPH_CATALOG_MAX") {
            config.relations.catalog_max = parse_env("ANCHORGRAPH_CATALOG_MAX", &raw)?;
        }
        if let Ok(raw) = std::env::var("ANCHORGRAPH_MAX_CONCURRENT_DOCUMENTS") {
            config.concurrency.max_concurrent_documents =
                parse_env("ANCHORGRAPH_MAX_CONCURRENT_DOCUMENTS", &raw)?;
        }
        if let Ok(raw) = std::env::var("ANCHORGRAPH_PASS2_MODE") {
            config.pass2_mode = match raw.as_str() {
                "immediate" => Pass2Mode::Immediate,
                "deferred" => Pass2Mode::Deferred,
                "scheduled" => Pass2Mode::Scheduled,
                other => {
                    return Err(PipelineError::InvalidConfig(format!(
                        "ANCHORGRAPH_PASS2_MODE: unknown mode '{other}'"
                    )));
                }
            };
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would violate pipeline invariants.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if !(0.0..=1.0).contains(&self.matching.exact_threshold)
            || !(0.0..=1.0).contains(&self.matching.approximate_floor)
        {
            return Err(PipelineError::InvalidConfig(
                "similarity thresholds must lie in [0, 1]".into(),
            ));
        }
        if self.matching.approximate_floor > self.matching.exact_threshold {
            return Err(PipelineError::InvalidConfig(
                "approximate_floor must not exceed exact_threshold".into(),
            ));
        }
        if self.chunking.token_budget == 0 {
            return Err(PipelineError::InvalidConfig(
                "token_budget must be positive".into(),
            ));
        }
        if self.chunking.overlap_tokens >= self.chunking.token_budget {
            return Err(PipelineError::InvalidConfig(
                "overlap_tokens must be smaller than token_budget".into(),
            ));
        }
        if self.relations.catalog_max == 0 {
            return Err(PipelineError::InvalidConfig(
                "catalog_max must be positive".into(),
            ));
        }
        if self.concurrency.max_concurrent_documents == 0
            || self.concurrency.max_concurrent_segments == 0
        {
            return Err(PipelineError::InvalidConfig(
                "concurrency limits must be positive".into(),
            ));
        }
        if self.concurrency.requests_per_second == 0 {
            return Err(PipelineError::InvalidConfig(
                "requests_per_second must be positive".into(),
            ));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, PipelineError> {
    raw.parse()
        .map_err(|_| PipelineError::InvalidConfig(format!("{key}: cannot parse '{raw}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        PipelineConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_inverted_thresholds() {
        let mut config = PipelineConfig::default();
        config.matching.approximate_floor = 0.9;
        config.matching.exact_threshold = 0.8;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_overlap_at_or_above_budget() {
        let mut config = PipelineConfig::default();
        config.chunking.overlap_tokens = config.chunking.token_budget;
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = PipelineConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: PipelineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.relations.catalog_max, config.relations.catalog_max);
    }
}
