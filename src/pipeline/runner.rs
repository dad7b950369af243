//! The pipeline runner.
//!
//! [`Pipeline`] wires the per-document pass-1 stages (segment, chunk, anchor,
//! score, relate, persist, project), corpus promotion, and pass-2 enrichment
//! over the store and provider seams. Construction goes through
//! [`PipelineBuilder`]; every collaborator is an `Arc`'d trait object, so a
//! single pipeline value is cheap to share across tasks.
//!
//! Failure policy, end to end: provider trouble degrades the affected unit
//! (segment, window, chunk projection) and is counted in the outcome;
//! structural violations — a split atomic region, an illegal enrichment
//! transition, a storage fault — abort the operation that hit them.

use std::sync::Arc;

use futures_util::StreamExt;
use futures_util::stream;
use rustc_hash::FxHashMap;
use tracing::{info, warn};

use crate::anchor::{AnchorExtractor, AnchorTelemetry};
use crate::chunking::{HeuristicEstimator, LayoutAwareChunker, validate_chunks};
use crate::config::{Pass2Mode, PipelineConfig};
use crate::enrichment::{EnrichmentReport, Pass2Enricher};
use crate::error::PipelineError;
use crate::limits::RateGate;
use crate::model::Document;
use crate::promotion::{PromotionEngine, PromotionOutcome};
use crate::providers::{
    ConceptExtractionModel, ConceptRefinementModel, EmbeddingProvider, RelationModel,
};
use crate::relations::{RelationExtractor, RelationTelemetry};
use crate::scoring::rank_document_concepts;
use crate::segmenter::split_segments;
use crate::stores::{ChunkPayload, GraphStore, ScoredChunk, VectorStore};
use crate::types::{ChunkId, DocumentId, EnrichmentStatus, TenantId};

/// Everything pass 1 produced for one document.
#[derive(Clone, Debug)]
pub struct Pass1Outcome {
    pub document: DocumentId,
    pub segments: usize,
    pub chunks: usize,
    pub oversized_chunks: usize,
    pub concepts: usize,
    pub relations: usize,
    pub anchors: AnchorTelemetry,
    pub relation_telemetry: RelationTelemetry,
    pub projected_chunks: usize,
    pub skipped_projections: usize,
}

/// Difference between the graph store's chunks and the vector projection.
#[derive(Clone, Debug, Default)]
pub struct ProjectionDiff {
    /// Chunks the graph store has but the projection is missing.
    pub missing: Vec<ChunkId>,
    /// Chunks the projection has that the graph store does not know.
    pub orphaned: Vec<ChunkId>,
}

impl ProjectionDiff {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty() && self.orphaned.is_empty()
    }
}

/// Builder for [`Pipeline`]; stores and providers are all required.
#[derive(Default)]
pub struct PipelineBuilder {
    config: Option<PipelineConfig>,
    graph: Option<Arc<dyn GraphStore>>,
    vectors: Option<Arc<dyn VectorStore>>,
    extraction: Option<Arc<dyn ConceptExtractionModel>>,
    relations: Option<Arc<dyn RelationModel>>,
    refinement: Option<Arc<dyn ConceptRefinementModel>>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
}

impl PipelineBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = Some(config);
        self
    }

    #[must_use]
    pub fn graph_store(mut self, store: Arc<dyn GraphStore>) -> Self {
        self.graph = Some(store);
        self
    }

    #[must_use]
    pub fn vector_store(mut self, store: Arc<dyn VectorStore>) -> Self {
        self.vectors = Some(store);
        self
    }

    #[must_use]
    pub fn extraction_model(mut self, model: Arc<dyn ConceptExtractionModel>) -> Self {
        self.extraction = Some(model);
        self
    }

    #[must_use]
    pub fn relation_model(mut self, model: Arc<dyn RelationModel>) -> Self {
        self.relations = Some(model);
        self
    }

    #[must_use]
    pub fn refinement_model(mut self, model: Arc<dyn ConceptRefinementModel>) -> Self {
        self.refinement = Some(model);
        self
    }

    #[must_use]
    pub fn embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(provider);
        self
    }

    pub fn build(self) -> Result<Pipeline, PipelineError> {
        let config = self.config.unwrap_or_default();
        config.validate()?;
        let missing =
            |what: &str| PipelineError::InvalidConfig(format!("pipeline builder: {what} not set"));
        let gate = Arc::new(RateGate::new(&config.concurrency));
        Ok(Pipeline {
            config,
            graph: self.graph.ok_or_else(|| missing("graph store"))?,
            vectors: self.vectors.ok_or_else(|| missing("vector store"))?,
            extraction: self.extraction.ok_or_else(|| missing("extraction model"))?,
            relations: self.relations.ok_or_else(|| missing("relation model"))?,
            refinement: self.refinement.ok_or_else(|| missing("refinement model"))?,
            embedder: self.embedder.ok_or_else(|| missing("embedding provider"))?,
            gate,
        })
    }
}

/// The two-pass extraction and consolidation pipeline.
pub struct Pipeline {
    config: PipelineConfig,
    graph: Arc<dyn GraphStore>,
    vectors: Arc<dyn VectorStore>,
    extraction: Arc<dyn ConceptExtractionModel>,
    relations: Arc<dyn RelationModel>,
    refinement: Arc<dyn ConceptRefinementModel>,
    embedder: Arc<dyn EmbeddingProvider>,
    gate: Arc<RateGate>,
}

impl Pipeline {
    #[must_use]
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Ingest a fresh document for `tenant`.
    pub async fn ingest_text(
        &self,
        tenant: TenantId,
        text: impl Into<String>,
    ) -> Result<Pass1Outcome, PipelineError> {
        self.ingest(Document::new(tenant, text.into())).await
    }

    /// Run pass 1 for `document`.
    ///
    /// Re-ingesting an id the store already knows replaces the document and
    /// everything derived from it, in both stores, before the new run is
    /// persisted.
    pub async fn ingest(&self, document: Document) -> Result<Pass1Outcome, PipelineError> {
        let document_id = document.id;
        if self.graph.document(document_id).await?.is_some() {
            info!(document = %document_id, "re-ingest: replacing existing document state");
            self.graph.delete_document(document_id).await?;
            self.vectors.delete_document(document_id).await?;
        }

        let mut document = document;
        let segments = split_segments(document_id, &document.text);
        document.segment_ids = segments.iter().map(|segment| segment.id).collect();

        let estimator = HeuristicEstimator;
        let chunker = LayoutAwareChunker::new(&self.config.chunking, &estimator);
        let chunking = chunker.chunk(document_id, &document.text);
        validate_chunks(document_id, &chunking.chunks, &chunking.regions)?;

        let extractor = AnchorExtractor::new(
            self.config.matching.clone(),
            self.extraction.clone(),
            self.embedder.clone(),
            self.gate.clone(),
            self.config.concurrency.max_concurrent_segments,
        );
        let (protos, anchors) = extractor
            .extract_document(&document, &segments, &chunking.chunks)
            .await;

        let ranking = rank_document_concepts(&protos, &segments);

        let relation_extractor = RelationExtractor::new(
            self.config.relations.clone(),
            self.config.matching.clone(),
            self.relations.clone(),
            self.gate.clone(),
        );
        let (relations, relation_telemetry) = relation_extractor
            .extract_document(&document, &chunking.chunks, &segments, &protos, &ranking)
            .await;

        // Persist the authoritative records first, then project.
        self.graph.put_document(document).await?;
        self.graph
            .put_segments(document_id, segments)
            .await?;
        self.graph
            .put_chunks(document_id, chunking.chunks.clone())
            .await?;
        self.graph.put_protos(document_id, protos.clone()).await?;
        self.graph
            .put_relations(document_id, relations.clone())
            .await?;
        self.graph
            .set_enrichment_status(document_id, EnrichmentStatus::Pass1Done)
            .await?;

        let mut projected = 0usize;
        let mut skipped = 0usize;
        for chunk in &chunking.chunks {
            let embedding = match self
                .gate
                .call("chunk embedding", || self.embedder.embed(&chunk.text))
                .await
            {
                Ok(embedding) => embedding,
                Err(err) => {
                    warn!(chunk = %chunk.id, error = %err, "chunk projection skipped");
                    skipped += 1;
                    continue;
                }
            };
            let payload = serde_json::to_value(ChunkPayload::project(chunk, &protos))?;
            self.vectors.upsert_chunk(payload, embedding).await?;
            projected += 1;
        }

        let outcome = Pass1Outcome {
            document: document_id,
            segments: self.graph.segments_for(document_id).await?.len(),
            chunks: chunking.chunks.len(),
            oversized_chunks: chunking.oversized,
            concepts: protos.len(),
            relations: relations.len(),
            anchors,
            relation_telemetry,
            projected_chunks: projected,
            skipped_projections: skipped,
        };
        info!(
            document = %document_id,
            segments = outcome.segments,
            chunks = outcome.chunks,
            concepts = outcome.concepts,
            relations = outcome.relations,
            "pass 1 complete"
        );
        Ok(outcome)
    }

    /// Run pass 1 for a batch of documents, bounded by the configured
    /// document concurrency. Results come back in input order; one failing
    /// document does not abort the others.
    pub async fn run_pass1_batch(
        &self,
        documents: Vec<Document>,
    ) -> Vec<Result<Pass1Outcome, PipelineError>> {
        let limit = self.config.concurrency.max_concurrent_documents.max(1);
        let mut indexed: Vec<(usize, Result<Pass1Outcome, PipelineError>)> =
            stream::iter(documents.into_iter().enumerate().map(|(index, document)| {
                async move { (index, self.ingest(document).await) }
            }))
            .buffer_unordered(limit)
            .collect()
            .await;
        indexed.sort_by_key(|(index, _)| *index);
        indexed.into_iter().map(|(_, result)| result).collect()
    }

    /// Consolidate the whole corpus into canonical concepts and queue every
    /// document for pass 2 according to the configured mode.
    pub async fn promote_corpus(&self) -> Result<PromotionOutcome, PipelineError> {
        let protos = self.graph.all_protos().await?;
        let mut segments_by_document = FxHashMap::default();
        for document in self.graph.document_ids().await? {
            segments_by_document.insert(document, self.graph.segments_for(document).await?);
        }

        let engine = PromotionEngine::new(&self.config.promotion, &self.config.matching);
        let outcome = engine.promote(&protos, &segments_by_document)?;
        self.graph
            .replace_canonical(outcome.canonical.clone())
            .await?;

        let enricher = self.enricher();
        for document in self.graph.document_ids().await? {
            let status = enricher
                .mark_after_promotion(document, self.config.pass2_mode)
                .await?;
            if self.config.pass2_mode == Pass2Mode::Immediate
                && status == EnrichmentStatus::Pass2Pending
            {
                enricher.enrich_document(document).await?;
            }
        }
        Ok(outcome)
    }

    /// Enrich every document currently queued for pass 2.
    pub async fn run_pass2(
        &self,
    ) -> Result<Vec<(DocumentId, EnrichmentReport)>, PipelineError> {
        let enricher = self.enricher();
        let mut reports = Vec::new();
        for document in self.graph.document_ids().await? {
            if self.graph.enrichment_status(document).await?
                == Some(EnrichmentStatus::Pass2Pending)
            {
                reports.push((document, enricher.enrich_document(document).await?));
            }
        }
        Ok(reports)
    }

    /// Embed `query` and search the chunk projection.
    pub async fn search_chunks(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<ScoredChunk>, PipelineError> {
        let embedding = self
            .gate
            .call("query embedding", || self.embedder.embed(query))
            .await?;
        Ok(self.vectors.search(&embedding, top_k).await?)
    }

    /// Compare the projection against the authoritative chunk set.
    pub async fn verify_projection(&self) -> Result<ProjectionDiff, PipelineError> {
        let mut diff = ProjectionDiff::default();
        for document in self.graph.document_ids().await? {
            let authoritative: Vec<ChunkId> = self
                .graph
                .chunks_for(document)
                .await?
                .iter()
                .map(|chunk| chunk.id)
                .collect();
            let projected = self.vectors.chunk_ids_for(document).await?;
            for id in &authoritative {
                if !projected.contains(id) {
                    diff.missing.push(*id);
                }
            }
            for id in &projected {
                if !authoritative.contains(id) {
                    diff.orphaned.push(*id);
                }
            }
        }
        Ok(diff)
    }

    /// Drop and re-project every document's chunks from the graph store.
    /// Returns the number of chunks projected.
    pub async fn rebuild_projection(&self) -> Result<usize, PipelineError> {
        let mut projected = 0usize;
        for document in self.graph.document_ids().await? {
            self.vectors.delete_document(document).await?;
            let protos = self.graph.protos_for(document).await?;
            for chunk in self.graph.chunks_for(document).await? {
                let embedding = self
                    .gate
                    .call("chunk embedding", || self.embedder.embed(&chunk.text))
                    .await
                    .map_err(PipelineError::Provider)?;
                let payload = serde_json::to_value(ChunkPayload::project(&chunk, &protos))?;
                self.vectors.upsert_chunk(payload, embedding).await?;
                projected += 1;
            }
        }
        info!(projected, "vector projection rebuilt");
        Ok(projected)
    }

    fn enricher(&self) -> Pass2Enricher {
        Pass2Enricher::new(
            self.graph.clone(),
            self.refinement.clone(),
            self.embedder.clone(),
            self.gate.clone(),
        )
    }
}
