//! Relation extraction gate.
//!
//! Relation model calls are the most expensive step of pass 1, so every
//! window is scored cheaply first and skipped when the evidence density does
//! not justify a call. The score combines anchor density, concept diversity,
//! and the structural kinds the window overlaps; all weights live in
//! [`RelationConfig`].

use rustc_hash::FxHashSet;

use crate::config::RelationConfig;
use crate::model::Anchor;
use crate::types::{ConceptId, SegmentKind};

/// Cheap signal bundle for one chunk window.
#[derive(Clone, Copy, Debug)]
pub struct WindowSignals {
    /// Rough token size of the window text (chars / 4).
    pub tokens: usize,
    pub anchor_count: usize,
    pub distinct_concepts: usize,
    pub has_normative_or_definition: bool,
    pub purely_narrative: bool,
}

impl WindowSignals {
    #[must_use]
    pub fn collect(window_text: &str, anchors: &[&Anchor], kinds: &[SegmentKind]) -> Self {
        let distinct: FxHashSet<ConceptId> =
            anchors.iter().map(|anchor| anchor.concept).collect();
        let structural = |kind: &SegmentKind| {
            matches!(
                kind,
                SegmentKind::Requirements | SegmentKind::Definition | SegmentKind::Procedure
            )
        };
        Self {
            tokens: (window_text.chars().count() / 4).max(1),
            anchor_count: anchors.len(),
            distinct_concepts: distinct.len(),
            has_normative_or_definition: kinds.iter().any(structural),
            purely_narrative: !kinds.is_empty()
                && kinds
                    .iter()
                    .all(|kind| matches!(kind, SegmentKind::Narrative | SegmentKind::FrontMatter)),
        }
    }
}

/// Score a window in `[0, ~1.1]`; windows below
/// [`RelationConfig::gate_threshold`] are skipped.
#[must_use]
pub fn gate_score(signals: &WindowSignals, config: &RelationConfig) -> f32 {
    // Anchors per kilotoken, saturating at 10.
    let density = (signals.anchor_count as f32 * 1_000.0 / signals.tokens as f32 / 10.0).min(1.0);
    // Two distinct concepts is the minimum for any relation; five saturates.
    let diversity = (signals.distinct_concepts as f32 / 5.0).min(1.0);

    let mut score = config.gate_anchor_density_weight * density
        + config.gate_diversity_weight * diversity;
    if signals.has_normative_or_definition {
        score += config.gate_segment_bonus;
    }
    if signals.purely_narrative {
        score -= config.gate_narrative_penalty;
    }
    score.max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signals(
        tokens: usize,
        anchor_count: usize,
        distinct: usize,
        structural: bool,
        narrative: bool,
    ) -> WindowSignals {
        WindowSignals {
            tokens,
            anchor_count,
            distinct_concepts: distinct,
            has_normative_or_definition: structural,
            purely_narrative: narrative,
        }
    }

    #[test]
    fn dense_requirements_window_passes() {
        let config = RelationConfig::default();
        let score = gate_score(&signals(800, 6, 4, true, false), &config);
        assert!(score >= config.gate_threshold, "score {score}");
    }

    #[test]
    fn anchorless_narrative_window_is_gated_out() {
        let config = RelationConfig::default();
        let score = gate_score(&signals(1_200, 0, 0, false, true), &config);
        assert!(score < config.gate_threshold, "score {score}");
    }

    #[test]
    fn single_concept_window_scores_below_diverse_one() {
        let config = RelationConfig::default();
        let lone = gate_score(&signals(500, 3, 1, false, false), &config);
        let diverse = gate_score(&signals(500, 3, 3, false, false), &config);
        assert!(diverse > lone);
    }

    #[test]
    fn score_never_goes_negative() {
        let config = RelationConfig::default();
        assert_eq!(gate_score(&signals(10_000, 0, 0, false, true), &config), 0.0);
    }
}
