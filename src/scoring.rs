//! Document-level concept importance scoring.
//!
//! Ranks a document's proto-concepts by how much grounded evidence they
//! carry: every anchor contributes the weight of the segment kind it sits in,
//! plus a small bonus when the quote matched exactly. The score orders
//! catalogs and retrieval hints only; it never gates promotion.

use crate::model::{ProtoConcept, Segment};
use crate::types::ConceptId;

/// Bonus added per exactly-located anchor.
const EXACT_BONUS: f64 = 0.15;

#[derive(Clone, Debug, PartialEq)]
pub struct ConceptScore {
    pub concept: ConceptId,
    pub score: f64,
}

/// Score and rank `protos` for one document, highest first.
///
/// Anchors outside any segment (possible after aggressive trimming) fall back
/// to a neutral weight of one. Ties break on label so the ordering is
/// deterministic.
#[must_use]
pub fn rank_document_concepts(protos: &[ProtoConcept], segments: &[Segment]) -> Vec<ConceptScore> {
    let mut scored: Vec<(&ProtoConcept, f64)> = protos
        .iter()
        .map(|proto| {
            let score = proto
                .anchors()
                .iter()
                .map(|anchor| {
                    let weight = segments
                        .iter()
                        .find(|segment| segment.contains(anchor.char_start))
                        .map_or(1.0, |segment| f64::from(segment.kind.score_weight()));
                    weight + if anchor.approximate { 0.0 } else { EXACT_BONUS }
                })
                .sum::<f64>();
            (proto, score)
        })
        .collect();

    scored.sort_by(|(a, sa), (b, sb)| {
        sb.partial_cmp(sa)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.label.cmp(&b.label))
    });

    scored
        .into_iter()
        .map(|(proto, score)| ConceptScore {
            concept: proto.id,
            score,
        })
        .collect()
}
