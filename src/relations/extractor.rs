//! Windowed relation extraction.
//!
//! Every chunk `i` gets a sliding context window of its neighbors,
//! `[i-1, i, i+1]` clamped at the document edges: wide enough for
//! cross-sentence structure, narrow enough that the evidence quote must be
//! locatable nearby, and overlapping so that concepts in adjacent chunks are
//! always co-presented at least once. Every window passes the gate first;
//! gated-in windows get one model call whose response is validated item by
//! item, and every surviving candidate must have its evidence quote located
//! inside the window text or it is dropped. A (subject, predicate, object)
//! triple already accepted from an overlapping window is suppressed, not
//! double-counted. Ceilings truncate, they never error.

use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, warn};

use super::catalog::build_catalog;
use super::gate::{WindowSignals, gate_score};
use crate::anchor::locate::locate_quote;
use crate::config::{MatchingConfig, RelationConfig};
use crate::limits::RateGate;
use crate::model::{Anchor, Document, DocumentChunk, ProtoConcept, RawRelation, Segment};
use crate::providers::{RelationModel, parse_relation_candidates};
use crate::scoring::ConceptScore;
use crate::types::{ConceptId, Predicate};

/// Counters describing one document's relation extraction run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RelationTelemetry {
    pub windows_total: usize,
    pub windows_gated_out: usize,
    pub windows_failed: usize,
    pub candidates_seen: usize,
    pub relations_accepted: usize,
    pub evidence_rejected: usize,
    /// Triples re-proposed by an overlapping window after acceptance.
    pub duplicates_suppressed: usize,
    pub truncated: usize,
}

/// Extracts typed, evidence-grounded relations per document.
pub struct RelationExtractor {
    config: RelationConfig,
    matching: MatchingConfig,
    model: Arc<dyn RelationModel>,
    gate: Arc<RateGate>,
}

impl RelationExtractor {
    pub fn new(
        config: RelationConfig,
        matching: MatchingConfig,
        model: Arc<dyn RelationModel>,
        gate: Arc<RateGate>,
    ) -> Self {
        Self {
            config,
            matching,
            model,
            gate,
        }
    }

    pub async fn extract_document(
        &self,
        document: &Document,
        chunks: &[DocumentChunk],
        segments: &[Segment],
        protos: &[ProtoConcept],
        ranking: &[ConceptScore],
    ) -> (Vec<RawRelation>, RelationTelemetry) {
        let mut telemetry = RelationTelemetry::default();
        let mut relations: Vec<RawRelation> = Vec::new();
        let mut emitted: FxHashSet<(ConceptId, Predicate, ConceptId)> = FxHashSet::default();

        let protos_by_id: FxHashMap<ConceptId, &ProtoConcept> =
            protos.iter().map(|proto| (proto.id, proto)).collect();
        let anchors: Vec<&Anchor> = protos.iter().flat_map(|proto| proto.anchors()).collect();

        for center in 0..chunks.len() {
            let window = &chunks[center.saturating_sub(1)..(center + 2).min(chunks.len())];
            telemetry.windows_total += 1;
            if relations.len() >= self.config.max_relations_per_document {
                telemetry.truncated += 1;
                debug!(document = %document.id, "document relation ceiling reached; remaining windows skipped");
                break;
            }

            let window_start = window[0].char_start;
            let window_end = window[window.len() - 1].char_end;
            let window_text = &document.text[window_start..window_end];
            let window_ids: Vec<_> = window.iter().map(|chunk| chunk.id).collect();

            let window_anchors: Vec<&Anchor> = anchors
                .iter()
                .copied()
                .filter(|anchor| anchor.char_start >= window_start && anchor.char_start < window_end)
                .collect();
            let kinds: Vec<_> = segments
                .iter()
                .filter(|segment| segment.char_start < window_end && segment.char_end > window_start)
                .map(|segment| segment.kind)
                .collect();

            let signals = WindowSignals::collect(window_text, &window_anchors, &kinds);
            let score = gate_score(&signals, &self.config);
            if score < self.config.gate_threshold {
                telemetry.windows_gated_out += 1;
                debug!(score, threshold = self.config.gate_threshold, "window gated out");
                continue;
            }

            let mut anchored: Vec<ConceptId> = Vec::new();
            for anchor in &window_anchors {
                if !anchored.contains(&anchor.concept) {
                    anchored.push(anchor.concept);
                }
            }
            let catalog =
                build_catalog(window_text, &anchored, &protos_by_id, ranking, &self.config);
            if catalog.len() < 2 {
                telemetry.windows_gated_out += 1;
                continue;
            }

            let raw = match self
                .gate
                .call("relation extraction", || {
                    self.model.extract_relations(window_text, &catalog)
                })
                .await
            {
                Ok(raw) => raw,
                Err(err) => {
                    warn!(document = %document.id, error = %err, "relation window dropped after retries");
                    telemetry.windows_failed += 1;
                    continue;
                }
            };

            let candidates =
                parse_relation_candidates(&raw, &catalog, self.config.max_response_items);
            telemetry.candidates_seen += candidates.len();

            let mut accepted_in_window = 0usize;
            for candidate in candidates {
                if accepted_in_window >= self.config.max_relations_per_chunk
                    || relations.len() >= self.config.max_relations_per_document
                {
                    telemetry.truncated += 1;
                    break;
                }
                let triple = (candidate.subject_id, candidate.predicate, candidate.object_id);
                if emitted.contains(&triple) {
                    telemetry.duplicates_suppressed += 1;
                    continue;
                }
                let Some(found) =
                    locate_quote(window_text, &candidate.evidence_quote, &self.matching)
                else {
                    debug!(predicate = %candidate.predicate, "evidence quote not locatable in window; relation dropped");
                    telemetry.evidence_rejected += 1;
                    continue;
                };
                emitted.insert(triple);
                relations.push(RawRelation {
                    subject: candidate.subject_id,
                    predicate: candidate.predicate,
                    object: candidate.object_id,
                    evidence_quote: found.matched(window_text).to_string(),
                    confidence: candidate.confidence.min(found.score as f32),
                    window: window_ids.clone(),
                });
                accepted_in_window += 1;
                telemetry.relations_accepted += 1;
            }
        }

        debug!(
            document = %document.id,
            windows = telemetry.windows_total,
            gated_out = telemetry.windows_gated_out,
            accepted = telemetry.relations_accepted,
            "relation extraction complete"
        );
        (relations, telemetry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConcurrencyConfig;
    use crate::model::DocumentChunk;
    use crate::providers::{ScriptedRelation, ScriptedRelationModel};
    use crate::scoring::rank_document_concepts;
    use crate::types::{ChunkId, Predicate, SegmentId, SegmentKind, SemanticRole, TenantId};

    const TEXT: &str = "\
1. REQUIREMENTS\n\
Access control shall be enforced on every request. Each access decision must \
be written to the audit log within one second. The audit log shall be \
retained for twelve months.\n";

    fn fixture() -> (Document, Vec<DocumentChunk>, Vec<Segment>, Vec<ProtoConcept>) {
        let document = Document::new(TenantId::new(), TEXT);
        let chunk = DocumentChunk {
            id: ChunkId::new(),
            document: document.id,
            index: 0,
            char_start: 0,
            char_end: TEXT.len(),
            text: TEXT.to_string(),
            atomic: false,
        };
        let segment = Segment {
            id: SegmentId::new(),
            document: document.id,
            kind: SegmentKind::Requirements,
            heading: Some("1. REQUIREMENTS".into()),
            char_start: 0,
            char_end: TEXT.len(),
        };

        let make_proto = |label: &str, quote: &str, chunk_id: ChunkId, doc| {
            let id = ConceptId::new();
            let start = TEXT.find(quote).expect("quote present");
            ProtoConcept::new(
                id,
                doc,
                label,
                "",
                vec![0.1; 4],
                Anchor {
                    concept: id,
                    chunk: chunk_id,
                    quote: quote.into(),
                    role: SemanticRole::Requirement,
                    char_start: start,
                    char_end: start + quote.len(),
                    confidence: 0.95,
                    approximate: false,
                },
            )
        };
        let protos = vec![
            make_proto(
                "Access Control",
                "Access control shall be enforced",
                chunk.id,
                document.id,
            ),
            make_proto(
                "Audit Log",
                "The audit log shall be retained",
                chunk.id,
                document.id,
            ),
        ];
        (document, vec![chunk], vec![segment], protos)
    }

    fn extractor(
        config: RelationConfig,
        relations: Vec<ScriptedRelation>,
    ) -> RelationExtractor {
        RelationExtractor::new(
            config,
            MatchingConfig::default(),
            Arc::new(ScriptedRelationModel::new(relations)),
            Arc::new(RateGate::new(&ConcurrencyConfig {
                requests_per_second: 1_000,
                ..ConcurrencyConfig::default()
            })),
        )
    }

    fn scripted(quote: &str, confidence: f32) -> ScriptedRelation {
        ScriptedRelation {
            subject_label: "Access Control".into(),
            predicate: Predicate::Requires,
            object_label: "Audit Log".into(),
            evidence_quote: quote.into(),
            confidence,
        }
    }

    #[tokio::test]
    async fn grounded_relation_is_accepted() {
        let (document, chunks, segments, protos) = fixture();
        let ranking = rank_document_concepts(&protos, &segments);
        let extractor = extractor(
            RelationConfig::default(),
            vec![scripted(
                "Each access decision must be written to the audit log",
                0.9,
            )],
        );
        let (relations, telemetry) = extractor
            .extract_document(&document, &chunks, &segments, &protos, &ranking)
            .await;

        assert_eq!(relations.len(), 1);
        let relation = &relations[0];
        assert_eq!(relation.predicate, Predicate::Requires);
        assert_eq!(relation.subject, protos[0].id);
        assert_eq!(relation.object, protos[1].id);
        assert!(TEXT.contains(&relation.evidence_quote));
        assert_eq!(relation.window, vec![chunks[0].id]);
        assert_eq!(telemetry.relations_accepted, 1);
    }

    #[tokio::test]
    async fn fabricated_evidence_is_rejected() {
        let (document, chunks, segments, protos) = fixture();
        let ranking = rank_document_concepts(&protos, &segments);
        let extractor = extractor(
            RelationConfig::default(),
            vec![scripted(
                "a completely invented sentence about compliance dashboards",
                0.9,
            )],
        );
        let (relations, telemetry) = extractor
            .extract_document(&document, &chunks, &segments, &protos, &ranking)
            .await;

        assert!(relations.is_empty());
        assert_eq!(telemetry.evidence_rejected, 1);
    }

    #[tokio::test]
    async fn per_chunk_ceiling_truncates() {
        let (document, chunks, segments, protos) = fixture();
        let ranking = rank_document_concepts(&protos, &segments);
        // Distinct predicates so every item is a distinct triple.
        let script: Vec<ScriptedRelation> = [
            Predicate::Requires,
            Predicate::DependsOn,
            Predicate::Enables,
            Predicate::Causes,
            Predicate::AppliesTo,
            Predicate::GovernedBy,
        ]
        .into_iter()
        .map(|predicate| ScriptedRelation {
            predicate,
            ..scripted("Access control shall be enforced on every request", 0.8)
        })
        .collect();
        let extractor = extractor(
            RelationConfig {
                max_relations_per_chunk: 2,
                ..RelationConfig::default()
            },
            script,
        );
        let (relations, telemetry) = extractor
            .extract_document(&document, &chunks, &segments, &protos, &ranking)
            .await;

        assert_eq!(relations.len(), 2);
        assert!(telemetry.truncated >= 1);
    }

    #[tokio::test]
    async fn repeated_triple_in_one_response_is_suppressed() {
        let (document, chunks, segments, protos) = fixture();
        let ranking = rank_document_concepts(&protos, &segments);
        let script: Vec<ScriptedRelation> = (0..3)
            .map(|_| scripted("Access control shall be enforced on every request", 0.8))
            .collect();
        let extractor = extractor(RelationConfig::default(), script);
        let (relations, telemetry) = extractor
            .extract_document(&document, &chunks, &segments, &protos, &ranking)
            .await;

        assert_eq!(relations.len(), 1);
        assert_eq!(telemetry.duplicates_suppressed, 2);
    }

    const SPAN_TEXT: &str = "\
1. RETENTION REQUIREMENTS\n\
All records shall be catalogued on arrival at the registry desk.\n\
Catalogued records move to long-term storage after thirty days.\n\
The retention policy shall govern long-term storage of all records.\n\
Every exception to the retention policy requires sign-off from the records officer.\n";

    #[tokio::test]
    async fn concepts_in_adjacent_chunks_meet_in_an_overlapping_window() {
        let document = Document::new(TenantId::new(), SPAN_TEXT);
        let starts = [
            0,
            SPAN_TEXT.find("Catalogued records").unwrap(),
            SPAN_TEXT.find("The retention policy").unwrap(),
            SPAN_TEXT.find("Every exception").unwrap(),
        ];
        let chunks: Vec<DocumentChunk> = starts
            .iter()
            .enumerate()
            .map(|(index, &start)| {
                let end = starts.get(index + 1).copied().unwrap_or(SPAN_TEXT.len());
                DocumentChunk {
                    id: ChunkId::new(),
                    document: document.id,
                    index,
                    char_start: start,
                    char_end: end,
                    text: SPAN_TEXT[start..end].to_string(),
                    atomic: false,
                }
            })
            .collect();
        let segments = vec![Segment {
            id: SegmentId::new(),
            document: document.id,
            kind: SegmentKind::Requirements,
            heading: Some("1. RETENTION REQUIREMENTS".into()),
            char_start: 0,
            char_end: SPAN_TEXT.len(),
        }];

        let proto_at = |label: &str, quote: &str, chunk: &DocumentChunk| {
            let id = ConceptId::new();
            let start = SPAN_TEXT.find(quote).expect("quote present");
            ProtoConcept::new(
                id,
                document.id,
                label,
                "",
                vec![0.1; 4],
                Anchor {
                    concept: id,
                    chunk: chunk.id,
                    quote: quote.into(),
                    role: SemanticRole::Requirement,
                    char_start: start,
                    char_end: start + quote.len(),
                    confidence: 0.95,
                    approximate: false,
                },
            )
        };
        // Subject anchored only in chunk 2, object only in chunk 3. A disjoint
        // triple grouping would never co-present them; the sliding window does.
        let protos = vec![
            proto_at("Retention Policy", "The retention policy shall govern", &chunks[2]),
            proto_at("Records Officer", "sign-off from the records officer", &chunks[3]),
        ];
        let ranking = rank_document_concepts(&protos, &segments);

        let extractor = extractor(
            RelationConfig {
                frequent_concepts: 0,
                lexical_fallback_below: 0,
                ..RelationConfig::default()
            },
            vec![ScriptedRelation {
                subject_label: "Retention Policy".into(),
                predicate: Predicate::Requires,
                object_label: "Records Officer".into(),
                evidence_quote: "Every exception to the retention policy requires \
                                 sign-off from the records officer"
                    .into(),
                confidence: 0.85,
            }],
        );
        let (relations, telemetry) = extractor
            .extract_document(&document, &chunks, &segments, &protos, &ranking)
            .await;

        assert_eq!(relations.len(), 1);
        assert_eq!(
            relations[0].window,
            vec![chunks[1].id, chunks[2].id, chunks[3].id]
        );
        assert_eq!(telemetry.windows_total, 4);
        // The trailing window re-proposes the same triple.
        assert_eq!(telemetry.duplicates_suppressed, 1);
    }

    #[tokio::test]
    async fn anchorless_document_makes_no_model_calls() {
        let (document, chunks, segments, _) = fixture();
        let extractor = extractor(
            RelationConfig::default(),
            vec![scripted("Access control shall be enforced", 0.9)],
        );
        let (relations, telemetry) = extractor
            .extract_document(&document, &chunks, &segments, &[], &[])
            .await;

        assert!(relations.is_empty());
        assert_eq!(telemetry.windows_gated_out, 1);
    }
}
