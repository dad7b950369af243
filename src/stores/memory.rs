//! In-memory store implementations.
//!
//! Reference implementations of both store traits, used by the test suite and
//! by short-lived batch runs that do not need persistence. Interior
//! mutability through `parking_lot` locks; all methods are effectively
//! non-blocking.

use async_trait::async_trait;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use super::{ChunkPayload, GraphStore, ScoredChunk, VectorStore};
use crate::error::StoreError;
use crate::model::{CanonicalConcept, Document, DocumentChunk, ProtoConcept, RawRelation, Segment};
use crate::types::{CanonicalId, ChunkId, DocumentId, EnrichmentStatus};

#[derive(Default)]
struct GraphInner {
    documents: FxHashMap<DocumentId, Document>,
    segments: FxHashMap<DocumentId, Vec<Segment>>,
    chunks: FxHashMap<DocumentId, Vec<DocumentChunk>>,
    protos: FxHashMap<DocumentId, Vec<ProtoConcept>>,
    relations: FxHashMap<DocumentId, Vec<RawRelation>>,
    canonical: FxHashMap<CanonicalId, CanonicalConcept>,
    enrichment: FxHashMap<DocumentId, EnrichmentStatus>,
    /// Insertion order of documents, for stable listings.
    document_order: Vec<DocumentId>,
}

/// In-memory authoritative store.
#[derive(Default)]
pub struct InMemoryGraphStore {
    inner: RwLock<GraphInner>,
}

impl InMemoryGraphStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn put_document(&self, document: Document) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        if !inner.documents.contains_key(&document.id) {
            inner.document_order.push(document.id);
        }
        inner.documents.insert(document.id, document);
        Ok(())
    }

    async fn document(&self, id: DocumentId) -> Result<Option<Document>, StoreError> {
        Ok(self.inner.read().documents.get(&id).cloned())
    }

    async fn document_ids(&self) -> Result<Vec<DocumentId>, StoreError> {
        Ok(self.inner.read().document_order.clone())
    }

    async fn delete_document(&self, document: DocumentId) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        inner.documents.remove(&document);
        inner.segments.remove(&document);
        inner.chunks.remove(&document);
        inner.protos.remove(&document);
        inner.relations.remove(&document);
        inner.enrichment.remove(&document);
        inner.document_order.retain(|id| *id != document);
        Ok(())
    }

    async fn put_segments(
        &self,
        document: DocumentId,
        segments: Vec<Segment>,
    ) -> Result<(), StoreError> {
        self.inner.write().segments.insert(document, segments);
        Ok(())
    }

    async fn segments_for(&self, document: DocumentId) -> Result<Vec<Segment>, StoreError> {
        Ok(self
            .inner
            .read()
            .segments
            .get(&document)
            .cloned()
            .unwrap_or_default())
    }

    async fn put_chunks(
        &self,
        document: DocumentId,
        chunks: Vec<DocumentChunk>,
    ) -> Result<(), StoreError> {
        self.inner.write().chunks.insert(document, chunks);
        Ok(())
    }

    async fn chunks_for(&self, document: DocumentId) -> Result<Vec<DocumentChunk>, StoreError> {
        Ok(self
            .inner
            .read()
            .chunks
            .get(&document)
            .cloned()
            .unwrap_or_default())
    }

    async fn put_protos(
        &self,
        document: DocumentId,
        protos: Vec<ProtoConcept>,
    ) -> Result<(), StoreError> {
        self.inner.write().protos.insert(document, protos);
        Ok(())
    }

    async fn protos_for(&self, document: DocumentId) -> Result<Vec<ProtoConcept>, StoreError> {
        Ok(self
            .inner
            .read()
            .protos
            .get(&document)
            .cloned()
            .unwrap_or_default())
    }

    async fn all_protos(&self) -> Result<Vec<ProtoConcept>, StoreError> {
        let inner = self.inner.read();
        Ok(inner
            .document_order
            .iter()
            .filter_map(|id| inner.protos.get(id))
            .flatten()
            .cloned()
            .collect())
    }

    async fn put_relations(
        &self,
        document: DocumentId,
        relations: Vec<RawRelation>,
    ) -> Result<(), StoreError> {
        self.inner.write().relations.insert(document, relations);
        Ok(())
    }

    async fn relations_for(&self, document: DocumentId) -> Result<Vec<RawRelation>, StoreError> {
        Ok(self
            .inner
            .read()
            .relations
            .get(&document)
            .cloned()
            .unwrap_or_default())
    }

    async fn replace_canonical(
        &self,
        concepts: Vec<CanonicalConcept>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        inner.canonical = concepts
            .into_iter()
            .map(|concept| (concept.id, concept))
            .collect();
        Ok(())
    }

    async fn canonical_concepts(&self) -> Result<Vec<CanonicalConcept>, StoreError> {
        let mut concepts: Vec<CanonicalConcept> =
            self.inner.read().canonical.values().cloned().collect();
        concepts.sort_by(|a, b| a.label.cmp(&b.label));
        Ok(concepts)
    }

    async fn update_canonical(&self, concept: CanonicalConcept) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        if !inner.canonical.contains_key(&concept.id) {
            return Err(StoreError::UnknownId {
                entity: "canonical concept",
                id: concept.id.to_string(),
            });
        }
        inner.canonical.insert(concept.id, concept);
        Ok(())
    }

    async fn enrichment_status(
        &self,
        document: DocumentId,
    ) -> Result<Option<EnrichmentStatus>, StoreError> {
        Ok(self.inner.read().enrichment.get(&document).copied())
    }

    async fn set_enrichment_status(
        &self,
        document: DocumentId,
        status: EnrichmentStatus,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        if !inner.documents.contains_key(&document) {
            return Err(StoreError::UnknownId {
                entity: "document",
                id: document.to_string(),
            });
        }
        inner.enrichment.insert(document, status);
        Ok(())
    }
}

/// In-memory vector projection with brute-force cosine search.
#[derive(Default)]
pub struct InMemoryVectorStore {
    inner: RwLock<FxHashMap<ChunkId, (ChunkPayload, Vec<f32>)>>,
}

impl InMemoryVectorStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert_chunk(
        &self,
        payload: serde_json::Value,
        embedding: Vec<f32>,
    ) -> Result<(), StoreError> {
        let payload = ChunkPayload::validate(payload)?;
        self.inner
            .write()
            .insert(payload.chunk_id, (payload, embedding));
        Ok(())
    }

    async fn delete_document(&self, document: DocumentId) -> Result<usize, StoreError> {
        let mut inner = self.inner.write();
        let before = inner.len();
        inner.retain(|_, (payload, _)| payload.document_id != document);
        Ok(before - inner.len())
    }

    async fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<ScoredChunk>, StoreError> {
        let inner = self.inner.read();
        let mut hits: Vec<ScoredChunk> = inner
            .values()
            .map(|(payload, embedding)| ScoredChunk {
                payload: payload.clone(),
                similarity: cosine(query, embedding),
            })
            .collect();
        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn chunk_ids_for(&self, document: DocumentId) -> Result<Vec<ChunkId>, StoreError> {
        let inner = self.inner.read();
        let mut ids: Vec<ChunkId> = inner
            .values()
            .filter(|(payload, _)| payload.document_id == document)
            .map(|(payload, _)| payload.chunk_id)
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.inner.read().len())
    }
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
