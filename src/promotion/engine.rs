//! Corpus promotion: proto-concepts in, canonical concepts out.
//!
//! Promotion is a pure corpus-level computation, no model calls. Grouping
//! runs in two stages: exact normalized-label equality first, then a merge of
//! groups whose embedding centroids clear the exact-similarity threshold
//! (catches trivial surface variants the normalizer misses). Each surviving
//! group is classified:
//!
//! - [`StabilityTag::Stable`] when any of three conditions holds: the label
//!   is anchored two or more times within one document, its anchors span two
//!   or more structural sections of one document, or it appears in two or
//!   more documents with at least one strongly grounded member,
//! - a single-member group that misses all three → promoted as a
//!   [`StabilityTag::Singleton`] only if the three-part signal test passes,
//!   always flagged for confirmation,
//! - otherwise dropped (the protos and their anchors remain in the graph
//!   store, just without a canonical parent).
//!
//! Canonical ids derive from the normalized label, so promoting the same
//! corpus twice produces identical output.

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, info};

use super::normalize::{canonical_id, normalize_label};
use super::signals::{evaluate_singleton, quote_repeats};
use crate::config::{MatchingConfig, PromotionConfig};
use crate::error::PipelineError;
use crate::model::{CanonicalConcept, ProtoConcept, Segment};
use crate::types::{CanonicalId, ConceptId, DocumentId, SegmentId, StabilityTag};

/// Result of one promotion run over the corpus.
#[derive(Clone, Debug, Default)]
pub struct PromotionOutcome {
    /// Canonical concepts, ordered by label.
    pub canonical: Vec<CanonicalConcept>,
    pub stable: usize,
    pub singletons: usize,
    /// Proto-concepts that did not make the cut.
    pub dropped: Vec<ConceptId>,
}

/// Consolidates a corpus of proto-concepts into canonical concepts.
pub struct PromotionEngine<'a> {
    promotion: &'a PromotionConfig,
    matching: &'a MatchingConfig,
}

struct Group<'p> {
    key: String,
    id: CanonicalId,
    members: Vec<&'p ProtoConcept>,
    centroid: Vec<f32>,
    /// Set when a centroid merge folded another label group into this one.
    absorbed_variant: bool,
}

impl<'a> PromotionEngine<'a> {
    pub fn new(promotion: &'a PromotionConfig, matching: &'a MatchingConfig) -> Self {
        Self {
            promotion,
            matching,
        }
    }

    /// Promote `protos` into canonical concepts.
    ///
    /// `segments_by_document` supplies the structural context the singleton
    /// test needs; a missing document degrades that test, it does not fail.
    pub fn promote(
        &self,
        protos: &[ProtoConcept],
        segments_by_document: &FxHashMap<DocumentId, Vec<Segment>>,
    ) -> Result<PromotionOutcome, PipelineError> {
        let repeats = quote_repeats(protos);
        let groups = self.merge_similar(self.group_by_label(protos)?);

        let mut outcome = PromotionOutcome::default();

        for group in groups {
            let stability = if self.is_stable(&group, segments_by_document) {
                Some(StabilityTag::Stable)
            } else if group.members.len() == 1 {
                let only = group.members[0];
                let segments = segments_by_document
                    .get(&only.document)
                    .map_or(&[][..], Vec::as_slice);
                evaluate_singleton(only, segments, &repeats, self.promotion)
                    .qualifies()
                    .then_some(StabilityTag::Singleton)
            } else {
                None
            };

            let Some(stability) = stability else {
                debug!(label = %group.key, members = group.members.len(), "group not promoted");
                outcome
                    .dropped
                    .extend(group.members.iter().map(|proto| proto.id));
                continue;
            };

            // An absorbed surface variant means the label grouping was not
            // purely lexical, so a reviewer gets the final say.
            let needs_confirmation = match stability {
                StabilityTag::Singleton => true,
                StabilityTag::Stable => {
                    group.absorbed_variant
                        || !group.members.iter().any(|proto| {
                            proto.has_strong_anchor(self.promotion.strong_confidence)
                        })
                }
            };

            match stability {
                StabilityTag::Stable => outcome.stable += 1,
                StabilityTag::Singleton => outcome.singletons += 1,
            }
            outcome.canonical.push(CanonicalConcept {
                id: group.id,
                label: representative_label(&group.members),
                stability,
                needs_confirmation,
                embedding: group.centroid,
                refined_embedding: None,
                refined_definition: None,
                members: group.members.iter().map(|proto| proto.id).collect(),
            });
        }

        outcome.canonical.sort_by(|a, b| a.label.cmp(&b.label));
        info!(
            canonical = outcome.canonical.len(),
            stable = outcome.stable,
            singletons = outcome.singletons,
            dropped = outcome.dropped.len(),
            "corpus promotion complete"
        );
        Ok(outcome)
    }

    /// Stability test, any one clause suffices:
    ///
    /// 1. the label is anchored at least twice within a single document,
    /// 2. its anchors fall in at least two structural sections of a single
    ///    document,
    /// 3. it spans at least two documents and some member carries a strong
    ///    grounding signal.
    fn is_stable(
        &self,
        group: &Group<'_>,
        segments_by_document: &FxHashMap<DocumentId, Vec<Segment>>,
    ) -> bool {
        let mut anchors_per_document: FxHashMap<DocumentId, usize> = FxHashMap::default();
        let mut sections_per_document: FxHashMap<DocumentId, FxHashSet<SegmentId>> =
            FxHashMap::default();
        for proto in &group.members {
            for anchor in proto.anchors() {
                *anchors_per_document.entry(proto.document).or_insert(0) += 1;
                if let Some(segment) = segments_by_document
                    .get(&proto.document)
                    .and_then(|segments| {
                        segments.iter().find(|segment| segment.contains(anchor.char_start))
                    })
                {
                    sections_per_document
                        .entry(proto.document)
                        .or_default()
                        .insert(segment.id);
                }
            }
        }

        if anchors_per_document.values().any(|&count| count >= 2) {
            return true;
        }
        if sections_per_document.values().any(|sections| sections.len() >= 2) {
            return true;
        }
        let documents: FxHashSet<DocumentId> =
            group.members.iter().map(|proto| proto.document).collect();
        documents.len() >= 2
            && group
                .members
                .iter()
                .any(|proto| proto.has_strong_anchor(self.promotion.strong_confidence))
    }

    fn group_by_label<'p>(
        &self,
        protos: &'p [ProtoConcept],
    ) -> Result<Vec<Group<'p>>, PipelineError> {
        let mut by_label: FxHashMap<String, Vec<&'p ProtoConcept>> = FxHashMap::default();
        for proto in protos {
            by_label
                .entry(normalize_label(&proto.label))
                .or_default()
                .push(proto);
        }

        // Canonical ids derive from the normalized label before any centroid
        // merge. Two distinct labels landing on one id would make grouping
        // non-idempotent across reruns, so it is checked at the derivation
        // point rather than trusted.
        let mut ids: FxHashMap<CanonicalId, String> = FxHashMap::default();
        let mut groups: Vec<Group<'p>> = Vec::with_capacity(by_label.len());
        for (key, members) in by_label {
            let id = canonical_id(&key);
            if let Some(previous) = ids.insert(id, key.clone()) {
                return Err(PipelineError::PromotionInconsistency {
                    label: format!("'{previous}' and '{key}' derive the same canonical id"),
                });
            }
            let centroid = centroid(&members);
            groups.push(Group {
                key,
                id,
                members,
                centroid,
                absorbed_variant: false,
            });
        }
        // Largest first so embedding merges fold variants into the dominant
        // spelling; key tiebreak keeps the order deterministic.
        groups.sort_by(|a, b| {
            b.members
                .len()
                .cmp(&a.members.len())
                .then_with(|| a.key.cmp(&b.key))
        });
        Ok(groups)
    }

    /// Fold groups whose centroids clear the exact-similarity threshold into
    /// the larger group.
    fn merge_similar<'p>(&self, groups: Vec<Group<'p>>) -> Vec<Group<'p>> {
        let threshold = self.matching.exact_threshold as f32;
        let mut accepted: Vec<Group<'p>> = Vec::new();

        for group in groups {
            let target = accepted
                .iter()
                .position(|existing| cosine(&existing.centroid, &group.centroid) >= threshold);
            match target {
                Some(index) => {
                    debug!(
                        into = %accepted[index].key,
                        from = %group.key,
                        "merging near-identical label groups"
                    );
                    accepted[index].members.extend(group.members);
                    accepted[index].absorbed_variant = true;
                    let recomputed = centroid(&accepted[index].members);
                    accepted[index].centroid = recomputed;
                }
                None => accepted.push(group),
            }
        }
        accepted
    }
}

/// The most frequent original-cased label among members; ties break toward
/// the lexicographically smallest so output is stable across runs.
fn representative_label(members: &[&ProtoConcept]) -> String {
    let mut counts: FxHashMap<&str, usize> = FxHashMap::default();
    for proto in members {
        *counts.entry(proto.label.as_str()).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .max_by(|(label_a, count_a), (label_b, count_b)| {
            count_a.cmp(count_b).then_with(|| label_b.cmp(label_a))
        })
        .map(|(label, _)| label.to_string())
        .unwrap_or_default()
}

/// Normalized mean of member embeddings.
fn centroid(members: &[&ProtoConcept]) -> Vec<f32> {
    let Some(first) = members.first() else {
        return Vec::new();
    };
    let mut sum = vec![0.0f32; first.embedding.len()];
    for proto in members {
        for (accumulator, value) in sum.iter_mut().zip(&proto.embedding) {
            *accumulator += value;
        }
    }
    let count = members.len() as f32;
    sum.iter_mut().for_each(|value| *value /= count);
    let norm = sum.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 1e-6 {
        sum.iter_mut().for_each(|value| *value /= norm);
    }
    sum
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm_a < 1e-6 || norm_b < 1e-6 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
