//! Anchored concept extraction (pass 1, per segment).
//!
//! For each segment the extraction model proposes concept candidates as
//! `{label, definition, role, quote}`. A candidate only becomes a
//! [`ProtoConcept`] if its quote can be located in the segment's text by the
//! [`locate`] module — exact matches produce regular anchors, matches in the
//! approximate band produce audit-flagged ones, and anything below the floor
//! is rejected outright. This is the single place in the system where
//! concepts come into existence; everything downstream reads, groups, or
//! consolidates.

pub mod locate;

use std::sync::Arc;

use futures_util::StreamExt;
use futures_util::stream;
use tracing::{debug, warn};

use crate::config::MatchingConfig;
use crate::limits::RateGate;
use crate::model::{Anchor, Document, DocumentChunk, ProtoConcept, Segment};
use crate::promotion::normalize::normalize_label;
use crate::providers::{ConceptExtractionModel, EmbeddingProvider, parse_concept_candidates};
use crate::types::{ConceptId, SemanticRole};

/// Instructions sent with every extraction request.
pub const EXTRACTION_INSTRUCTIONS: &str = "Identify the domain concepts this text \
defines, mandates, or materially discusses. For each concept report its label, a \
one-sentence definition, its semantic role (definition, requirement, process, \
actor, constraint, or mention), and a short supporting quote copied verbatim \
from the text.";

/// Counters describing one document's anchor extraction run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AnchorTelemetry {
    pub segments_processed: usize,
    pub candidates_seen: usize,
    pub anchors_exact: usize,
    pub anchors_approximate: usize,
    pub candidates_rejected: usize,
    pub segments_failed: usize,
}

/// Per-segment concept extraction with grounding enforcement.
pub struct AnchorExtractor {
    matching: MatchingConfig,
    model: Arc<dyn ConceptExtractionModel>,
    embedder: Arc<dyn EmbeddingProvider>,
    gate: Arc<RateGate>,
    max_concurrent_segments: usize,
}

impl AnchorExtractor {
    pub fn new(
        matching: MatchingConfig,
        model: Arc<dyn ConceptExtractionModel>,
        embedder: Arc<dyn EmbeddingProvider>,
        gate: Arc<RateGate>,
        max_concurrent_segments: usize,
    ) -> Self {
        Self {
            matching,
            model,
            embedder,
            gate,
            max_concurrent_segments: max_concurrent_segments.max(1),
        }
    }

    /// Extract grounded proto-concepts for one document.
    ///
    /// Segment extraction calls run concurrently up to the configured limit;
    /// failures are per-segment and fail-soft. Candidates with the same
    /// normalized label merge into one proto-concept carrying all anchors.
    pub async fn extract_document(
        &self,
        document: &Document,
        segments: &[Segment],
        chunks: &[DocumentChunk],
    ) -> (Vec<ProtoConcept>, AnchorTelemetry) {
        let mut telemetry = AnchorTelemetry::default();

        // Fan out per segment, keeping the segment order for deterministic
        // merging afterwards.
        let mut per_segment: Vec<(usize, SegmentExtraction)> =
            stream::iter(segments.iter().enumerate().map(|(index, segment)| {
                let text = segment.text(&document.text);
                async move { (index, self.extract_segment(segment, text).await) }
            }))
            .buffer_unordered(self.max_concurrent_segments)
            .collect()
            .await;
        per_segment.sort_by_key(|(index, _)| *index);

        let mut protos: Vec<ProtoConcept> = Vec::new();
        let mut by_label: rustc_hash::FxHashMap<String, usize> = rustc_hash::FxHashMap::default();

        for (_, extraction) in per_segment {
            telemetry.segments_processed += 1;
            match extraction {
                SegmentExtraction::Failed => telemetry.segments_failed += 1,
                SegmentExtraction::Candidates(located) => {
                    telemetry.candidates_seen += located.seen;
                    telemetry.candidates_rejected += located.rejected;
                    for accepted in located.accepted {
                        self.merge_candidate(
                            document,
                            chunks,
                            accepted,
                            &mut protos,
                            &mut by_label,
                            &mut telemetry,
                        )
                        .await;
                    }
                }
            }
        }

        debug!(
            document = %document.id,
            concepts = protos.len(),
            exact = telemetry.anchors_exact,
            approximate = telemetry.anchors_approximate,
            rejected = telemetry.candidates_rejected,
            "anchor extraction complete"
        );
        (protos, telemetry)
    }

    async fn extract_segment(&self, segment: &Segment, text: &str) -> SegmentExtraction {
        if text.trim().is_empty() {
            return SegmentExtraction::Candidates(LocatedCandidates::default());
        }

        let raw = match self
            .gate
            .call("concept extraction", || {
                self.model.extract_concepts(text, EXTRACTION_INSTRUCTIONS)
            })
            .await
        {
            Ok(raw) => raw,
            Err(err) => {
                warn!(segment = %segment.id, error = %err, "segment extraction dropped after retries");
                return SegmentExtraction::Failed;
            }
        };

        let candidates = parse_concept_candidates(&raw);
        let mut located = LocatedCandidates {
            seen: candidates.len(),
            ..LocatedCandidates::default()
        };

        for candidate in candidates {
            let Some(found) = locate::locate_quote(text, &candidate.quote, &self.matching) else {
                debug!(segment = %segment.id, label = %candidate.label, "quote not locatable; candidate rejected");
                located.rejected += 1;
                continue;
            };
            located.accepted.push(AcceptedCandidate {
                label: candidate.label,
                definition: candidate.definition,
                role: SemanticRole::parse_lenient(&candidate.role),
                quote: found.matched(text).to_string(),
                abs_start: segment.char_start + found.start,
                abs_end: segment.char_start + found.end,
                score: found.score,
            });
        }
        SegmentExtraction::Candidates(located)
    }

    async fn merge_candidate(
        &self,
        document: &Document,
        chunks: &[DocumentChunk],
        candidate: AcceptedCandidate,
        protos: &mut Vec<ProtoConcept>,
        by_label: &mut rustc_hash::FxHashMap<String, usize>,
        telemetry: &mut AnchorTelemetry,
    ) {
        let Some(chunk) = owning_chunk(chunks, candidate.abs_start, candidate.abs_end) else {
            // Anchors always land inside some chunk because chunks cover the
            // document; an empty chunk list means chunking was skipped.
            warn!(label = %candidate.label, "no owning chunk for anchor; candidate rejected");
            telemetry.candidates_rejected += 1;
            return;
        };

        let approximate = candidate.score < self.matching.exact_threshold;
        if approximate {
            telemetry.anchors_approximate += 1;
        } else {
            telemetry.anchors_exact += 1;
        }

        let key = normalize_label(&candidate.label);
        if let Some(&index) = by_label.get(&key) {
            let proto = &mut protos[index];
            proto.push_anchor(Anchor {
                concept: proto.id,
                chunk: chunk.id,
                quote: candidate.quote,
                role: candidate.role,
                char_start: candidate.abs_start,
                char_end: candidate.abs_end,
                confidence: candidate.score as f32,
                approximate,
            });
            if proto.definition.is_empty() && !candidate.definition.is_empty() {
                proto.definition = candidate.definition;
            }
            return;
        }

        let embedding_input = format!("{}: {}", candidate.label, candidate.quote);
        let embedding = match self
            .gate
            .call("concept embedding", || self.embedder.embed(&embedding_input))
            .await
        {
            Ok(embedding) => embedding,
            Err(err) => {
                warn!(label = %candidate.label, error = %err, "embedding failed; candidate rejected");
                telemetry.candidates_rejected += 1;
                // Roll back the anchor count recorded above.
                if approximate {
                    telemetry.anchors_approximate -= 1;
                } else {
                    telemetry.anchors_exact -= 1;
                }
                return;
            }
        };

        let id = ConceptId::new();
        let proto = ProtoConcept::new(
            id,
            document.id,
            candidate.label,
            candidate.definition,
            embedding,
            Anchor {
                concept: id,
                chunk: chunk.id,
                quote: candidate.quote,
                role: candidate.role,
                char_start: candidate.abs_start,
                char_end: candidate.abs_end,
                confidence: candidate.score as f32,
                approximate,
            },
        );
        by_label.insert(key, protos.len());
        protos.push(proto);
    }
}

enum SegmentExtraction {
    Candidates(LocatedCandidates),
    Failed,
}

#[derive(Default)]
struct LocatedCandidates {
    seen: usize,
    rejected: usize,
    accepted: Vec<AcceptedCandidate>,
}

struct AcceptedCandidate {
    label: String,
    definition: String,
    role: SemanticRole,
    quote: String,
    abs_start: usize,
    abs_end: usize,
    score: f64,
}

/// The chunk an anchor belongs to: full containment wins, otherwise the chunk
/// containing the span start (possible when a quote straddles an overlap
/// boundary).
fn owning_chunk(chunks: &[DocumentChunk], start: usize, end: usize) -> Option<&DocumentChunk> {
    chunks
        .iter()
        .find(|chunk| chunk.contains_span(start, end))
        .or_else(|| chunks.iter().find(|chunk| chunk.contains(start)))
}
