//! Pass-2 enrichment: consolidated definitions and refined embeddings for
//! canonical concepts.
//!
//! Enrichment never mutates pass-1 output in place. It writes the
//! `refined_definition` and `refined_embedding` fields *next to* the pass-1
//! centroid, so retrieval can prefer the refined view while every pass-1
//! record stays reproducible. Progress is tracked per document through the
//! [`EnrichmentStatus`] state machine; a failing document lands in
//! `Pass2Failed` and can be re-queued without touching any other document.

use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{info, warn};

use crate::config::Pass2Mode;
use crate::error::PipelineError;
use crate::limits::RateGate;
use crate::providers::{ConceptRefinementModel, EmbeddingProvider};
use crate::stores::GraphStore;
use crate::types::{ConceptId, DocumentId, EnrichmentStatus};

/// Evidence quotes handed to the refinement model per concept.
const MAX_EVIDENCE_QUOTES: usize = 8;

/// Outcome of enriching one document.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EnrichmentReport {
    pub concepts_considered: usize,
    pub concepts_refined: usize,
    pub concepts_already_refined: usize,
    /// Set when the run aborted and the document moved to `Pass2Failed`.
    pub failed: bool,
}

/// Runs pass-2 refinement over the canonical concepts a document touches.
pub struct Pass2Enricher {
    graph: Arc<dyn GraphStore>,
    model: Arc<dyn ConceptRefinementModel>,
    embedder: Arc<dyn EmbeddingProvider>,
    gate: Arc<RateGate>,
}

impl Pass2Enricher {
    pub fn new(
        graph: Arc<dyn GraphStore>,
        model: Arc<dyn ConceptRefinementModel>,
        embedder: Arc<dyn EmbeddingProvider>,
        gate: Arc<RateGate>,
    ) -> Self {
        Self {
            graph,
            model,
            embedder,
            gate,
        }
    }

    /// Move a freshly promoted document into the state its [`Pass2Mode`]
    /// dictates.
    pub async fn mark_after_promotion(
        &self,
        document: DocumentId,
        mode: Pass2Mode,
    ) -> Result<EnrichmentStatus, PipelineError> {
        let current = self
            .graph
            .enrichment_status(document)
            .await?
            .ok_or(PipelineError::MissingPass1(document))?;
        let target = match mode {
            Pass2Mode::Immediate | Pass2Mode::Deferred => EnrichmentStatus::Pass2Pending,
            Pass2Mode::Scheduled => EnrichmentStatus::Pass2Skipped,
        };
        if current == target {
            return Ok(current);
        }
        self.transition(document, current, target).await?;
        Ok(target)
    }

    /// Re-queue a document whose enrichment finished, failed, or was skipped.
    pub async fn requeue(&self, document: DocumentId) -> Result<(), PipelineError> {
        let current = self
            .graph
            .enrichment_status(document)
            .await?
            .ok_or(PipelineError::MissingPass1(document))?;
        self.transition(document, current, EnrichmentStatus::Pass2Pending)
            .await
    }

    /// Enrich one pending document.
    ///
    /// Provider failures do not propagate: the document is parked in
    /// `Pass2Failed` and the report says so. Only storage faults and illegal
    /// state transitions surface as errors.
    pub async fn enrich_document(
        &self,
        document: DocumentId,
    ) -> Result<EnrichmentReport, PipelineError> {
        let current = self
            .graph
            .enrichment_status(document)
            .await?
            .ok_or(PipelineError::MissingPass1(document))?;
        self.transition(document, current, EnrichmentStatus::Pass2Running)
            .await?;

        let mut report = EnrichmentReport::default();

        let member_ids: FxHashSet<ConceptId> = self
            .graph
            .protos_for(document)
            .await?
            .iter()
            .map(|proto| proto.id)
            .collect();

        let all_protos = self.graph.all_protos().await?;
        let protos_by_id: FxHashMap<ConceptId, _> =
            all_protos.iter().map(|proto| (proto.id, proto)).collect();

        for concept in self.graph.canonical_concepts().await? {
            if !concept.members.iter().any(|id| member_ids.contains(id)) {
                continue;
            }
            report.concepts_considered += 1;
            if concept.refined_definition.is_some() {
                report.concepts_already_refined += 1;
                continue;
            }

            let mut definitions: Vec<String> = Vec::new();
            let mut quotes: Vec<String> = Vec::new();
            for member in &concept.members {
                let Some(proto) = protos_by_id.get(member) else {
                    continue;
                };
                if !proto.definition.is_empty() {
                    definitions.push(proto.definition.clone());
                }
                for anchor in proto.anchors() {
                    if quotes.len() >= MAX_EVIDENCE_QUOTES {
                        break;
                    }
                    quotes.push(anchor.quote.clone());
                }
            }

            let refined = match self
                .gate
                .call("definition refinement", || {
                    self.model
                        .refine_definition(&concept.label, &definitions, &quotes)
                })
                .await
            {
                Ok(refined) => refined,
                Err(err) => {
                    return self.fail_document(document, report, &err.to_string()).await;
                }
            };
            let refined_embedding = match self
                .gate
                .call("refined embedding", || self.embedder.embed(&refined))
                .await
            {
                Ok(embedding) => embedding,
                Err(err) => {
                    return self.fail_document(document, report, &err.to_string()).await;
                }
            };

            let mut updated = concept;
            updated.refined_definition = Some(refined);
            updated.refined_embedding = Some(refined_embedding);
            self.graph.update_canonical(updated).await?;
            report.concepts_refined += 1;
        }

        self.transition(
            document,
            EnrichmentStatus::Pass2Running,
            EnrichmentStatus::Pass2Done,
        )
        .await?;
        info!(
            %document,
            refined = report.concepts_refined,
            considered = report.concepts_considered,
            "pass-2 enrichment complete"
        );
        Ok(report)
    }

    async fn fail_document(
        &self,
        document: DocumentId,
        mut report: EnrichmentReport,
        reason: &str,
    ) -> Result<EnrichmentReport, PipelineError> {
        warn!(%document, reason, "pass-2 enrichment failed; parking document");
        self.transition(
            document,
            EnrichmentStatus::Pass2Running,
            EnrichmentStatus::Pass2Failed,
        )
        .await?;
        report.failed = true;
        Ok(report)
    }

    async fn transition(
        &self,
        document: DocumentId,
        from: EnrichmentStatus,
        to: EnrichmentStatus,
    ) -> Result<(), PipelineError> {
        if !from.can_transition_to(to) {
            return Err(PipelineError::IllegalTransition { document, from, to });
        }
        self.graph.set_enrichment_status(document, to).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConcurrencyConfig;
    use crate::model::{Anchor, CanonicalConcept, Document, ProtoConcept};
    use crate::promotion::canonical_id;
    use crate::providers::{
        FailingRefinementModel, MockEmbeddingProvider, ScriptedRefinementModel,
    };
    use crate::stores::memory::InMemoryGraphStore;
    use crate::types::{ChunkId, SemanticRole, StabilityTag, TenantId};

    async fn seeded_store() -> (Arc<InMemoryGraphStore>, DocumentId) {
        let store = Arc::new(InMemoryGraphStore::new());
        let document = Document::new(TenantId::new(), "audit logs shall be retained");
        let document_id = document.id;
        store.put_document(document).await.unwrap();

        let concept_id = ConceptId::new();
        let proto = ProtoConcept::new(
            concept_id,
            document_id,
            "Audit Log",
            "A chronological record of system events.",
            vec![1.0, 0.0],
            Anchor {
                concept: concept_id,
                chunk: ChunkId::new(),
                quote: "audit logs shall be retained".into(),
                role: SemanticRole::Requirement,
                char_start: 0,
                char_end: 28,
                confidence: 0.95,
                approximate: false,
            },
        );
        store
            .put_protos(document_id, vec![proto])
            .await
            .unwrap();
        store
            .replace_canonical(vec![CanonicalConcept {
                id: canonical_id("audit log"),
                label: "Audit Log".into(),
                stability: StabilityTag::Stable,
                needs_confirmation: false,
                embedding: vec![1.0, 0.0],
                refined_embedding: None,
                refined_definition: None,
                members: vec![concept_id],
            }])
            .await
            .unwrap();
        store
            .set_enrichment_status(document_id, EnrichmentStatus::Pass1Done)
            .await
            .unwrap();
        (store, document_id)
    }

    fn enricher(
        store: Arc<InMemoryGraphStore>,
        model: Arc<dyn ConceptRefinementModel>,
    ) -> Pass2Enricher {
        Pass2Enricher::new(
            store,
            model,
            Arc::new(MockEmbeddingProvider::new()),
            Arc::new(RateGate::new(&ConcurrencyConfig {
                requests_per_second: 1_000,
                max_retries: 1,
                backoff_base_ms: 1,
                backoff_max_ms: 2,
                ..ConcurrencyConfig::default()
            })),
        )
    }

    #[tokio::test]
    async fn refinement_is_additive() {
        let (store, document) = seeded_store().await;
        let enricher = enricher(store.clone(), Arc::new(ScriptedRefinementModel));

        enricher
            .mark_after_promotion(document, Pass2Mode::Deferred)
            .await
            .unwrap();
        let report = enricher.enrich_document(document).await.unwrap();

        assert_eq!(report.concepts_refined, 1);
        assert!(!report.failed);
        assert_eq!(
            store.enrichment_status(document).await.unwrap(),
            Some(EnrichmentStatus::Pass2Done)
        );

        let concept = &store.canonical_concepts().await.unwrap()[0];
        assert!(concept.refined_definition.is_some());
        assert!(concept.refined_embedding.is_some());
        // Pass-1 centroid is untouched.
        assert_eq!(concept.embedding, vec![1.0, 0.0]);
    }

    #[tokio::test]
    async fn enriching_an_unqueued_document_is_illegal() {
        let (store, document) = seeded_store().await;
        let enricher = enricher(store, Arc::new(ScriptedRefinementModel));
        // Still Pass1Done, never queued.
        let err = enricher.enrich_document(document).await.unwrap_err();
        assert!(matches!(err, PipelineError::IllegalTransition { .. }));
    }

    #[tokio::test]
    async fn failure_parks_document_and_requeue_recovers() {
        let (store, document) = seeded_store().await;
        let failing = enricher(store.clone(), Arc::new(FailingRefinementModel));
        failing
            .mark_after_promotion(document, Pass2Mode::Deferred)
            .await
            .unwrap();
        let report = failing.enrich_document(document).await.unwrap();
        assert!(report.failed);
        assert_eq!(
            store.enrichment_status(document).await.unwrap(),
            Some(EnrichmentStatus::Pass2Failed)
        );

        let working = enricher(store.clone(), Arc::new(ScriptedRefinementModel));
        working.requeue(document).await.unwrap();
        let report = working.enrich_document(document).await.unwrap();
        assert_eq!(report.concepts_refined, 1);
    }

    #[tokio::test]
    async fn already_refined_concepts_are_not_overwritten() {
        let (store, document) = seeded_store().await;
        let mut concepts = store.canonical_concepts().await.unwrap();
        concepts[0].refined_definition = Some("hand-written".into());
        store.replace_canonical(concepts).await.unwrap();

        let enricher = enricher(store.clone(), Arc::new(ScriptedRefinementModel));
        enricher
            .mark_after_promotion(document, Pass2Mode::Deferred)
            .await
            .unwrap();
        let report = enricher.enrich_document(document).await.unwrap();

        assert_eq!(report.concepts_already_refined, 1);
        assert_eq!(report.concepts_refined, 0);
        let concept = &store.canonical_concepts().await.unwrap()[0];
        assert_eq!(concept.refined_definition.as_deref(), Some("hand-written"));
    }

    #[tokio::test]
    async fn scheduled_mode_marks_documents_skipped() {
        let (store, document) = seeded_store().await;
        let enricher = enricher(store.clone(), Arc::new(ScriptedRefinementModel));
        let status = enricher
            .mark_after_promotion(document, Pass2Mode::Scheduled)
            .await
            .unwrap();
        assert_eq!(status, EnrichmentStatus::Pass2Skipped);
    }

    #[tokio::test]
    async fn unknown_document_is_missing_pass1() {
        let store = Arc::new(InMemoryGraphStore::new());
        let enricher = enricher(store, Arc::new(ScriptedRefinementModel));
        let err = enricher
            .enrich_document(DocumentId::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::MissingPass1(_)));
    }
}
