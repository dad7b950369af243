//! Persistence seams: the authoritative graph store and the derived vector
//! projection.
//!
//! The graph store owns every record the pipeline produces — documents,
//! segments, chunks, proto-concepts with their anchors, relations, canonical
//! concepts, and enrichment state. The vector store is strictly a projection
//! for retrieval: it holds chunk text plus a whitelisted payload and can be
//! dropped and rebuilt from the graph store at any time. Writing anything
//! outside the [`ChunkPayload`] whitelist into the projection is rejected,
//! not silently stored.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::model::{CanonicalConcept, Document, DocumentChunk, ProtoConcept, RawRelation, Segment};
use crate::types::{ChunkId, DocumentId, EnrichmentStatus, SemanticRole};

/// One anchored concept reference inside a projected chunk payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnchoredConceptRef {
    pub concept_id: crate::types::ConceptId,
    pub label: String,
    pub role: SemanticRole,
    pub char_start: usize,
    pub char_end: usize,
}

/// The complete whitelist of what the vector store may hold per chunk.
///
/// `deny_unknown_fields` is the enforcement mechanism: any extra field in an
/// incoming payload fails deserialization and the write is rejected with
/// [`StoreError::PayloadRejected`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChunkPayload {
    pub chunk_id: ChunkId,
    pub document_id: DocumentId,
    pub text: String,
    pub char_start: usize,
    pub char_end: usize,
    pub anchored_concepts: Vec<AnchoredConceptRef>,
}

impl ChunkPayload {
    /// Build the projection payload for a chunk and the anchors that live in
    /// it.
    #[must_use]
    pub fn project(chunk: &DocumentChunk, protos: &[ProtoConcept]) -> Self {
        let anchored_concepts = protos
            .iter()
            .flat_map(|proto| {
                proto
                    .anchors()
                    .iter()
                    .filter(|anchor| anchor.chunk == chunk.id)
                    .map(|anchor| AnchoredConceptRef {
                        concept_id: proto.id,
                        label: proto.label.clone(),
                        role: anchor.role,
                        char_start: anchor.char_start,
                        char_end: anchor.char_end,
                    })
            })
            .collect();
        Self {
            chunk_id: chunk.id,
            document_id: chunk.document,
            text: chunk.text.clone(),
            char_start: chunk.char_start,
            char_end: chunk.char_end,
            anchored_concepts,
        }
    }

    /// Validate an arbitrary JSON payload against the whitelist.
    pub fn validate(value: serde_json::Value) -> Result<Self, StoreError> {
        serde_json::from_value(value).map_err(|err| StoreError::PayloadRejected {
            reason: err.to_string(),
        })
    }
}

/// A search hit from the vector projection.
#[derive(Clone, Debug)]
pub struct ScoredChunk {
    pub payload: ChunkPayload,
    /// Cosine similarity in `[-1, 1]`, higher is closer.
    pub similarity: f32,
}

/// Authoritative store for everything the pipeline produces.
#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn put_document(&self, document: Document) -> Result<(), StoreError>;
    async fn document(&self, id: DocumentId) -> Result<Option<Document>, StoreError>;
    async fn document_ids(&self) -> Result<Vec<DocumentId>, StoreError>;
    /// Remove a document and every derived record (segments, chunks, protos,
    /// relations, enrichment state). Canonical concepts are corpus-scoped and
    /// untouched until the next promotion run.
    async fn delete_document(&self, document: DocumentId) -> Result<(), StoreError>;

    async fn put_segments(
        &self,
        document: DocumentId,
        segments: Vec<Segment>,
    ) -> Result<(), StoreError>;
    async fn segments_for(&self, document: DocumentId) -> Result<Vec<Segment>, StoreError>;

    async fn put_chunks(
        &self,
        document: DocumentId,
        chunks: Vec<DocumentChunk>,
    ) -> Result<(), StoreError>;
    async fn chunks_for(&self, document: DocumentId) -> Result<Vec<DocumentChunk>, StoreError>;

    async fn put_protos(
        &self,
        document: DocumentId,
        protos: Vec<ProtoConcept>,
    ) -> Result<(), StoreError>;
    async fn protos_for(&self, document: DocumentId) -> Result<Vec<ProtoConcept>, StoreError>;
    async fn all_protos(&self) -> Result<Vec<ProtoConcept>, StoreError>;

    async fn put_relations(
        &self,
        document: DocumentId,
        relations: Vec<RawRelation>,
    ) -> Result<(), StoreError>;
    async fn relations_for(&self, document: DocumentId) -> Result<Vec<RawRelation>, StoreError>;

    /// Replace the whole canonical layer; promotion always writes a full
    /// corpus snapshot.
    async fn replace_canonical(
        &self,
        concepts: Vec<CanonicalConcept>,
    ) -> Result<(), StoreError>;
    async fn canonical_concepts(&self) -> Result<Vec<CanonicalConcept>, StoreError>;
    /// Update one canonical concept in place (pass-2 refinement).
    async fn update_canonical(&self, concept: CanonicalConcept) -> Result<(), StoreError>;

    async fn enrichment_status(
        &self,
        document: DocumentId,
    ) -> Result<Option<EnrichmentStatus>, StoreError>;
    async fn set_enrichment_status(
        &self,
        document: DocumentId,
        status: EnrichmentStatus,
    ) -> Result<(), StoreError>;
}

/// Derived retrieval projection over chunk embeddings.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Upsert one chunk. The payload arrives as raw JSON and is validated
    /// against the [`ChunkPayload`] whitelist before anything is written.
    async fn upsert_chunk(
        &self,
        payload: serde_json::Value,
        embedding: Vec<f32>,
    ) -> Result<(), StoreError>;

    /// Remove all chunks projected from `document`, returning how many.
    async fn delete_document(&self, document: DocumentId) -> Result<usize, StoreError>;

    async fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<ScoredChunk>, StoreError>;

    async fn chunk_ids_for(&self, document: DocumentId) -> Result<Vec<ChunkId>, StoreError>;

    async fn count(&self) -> Result<usize, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    #[test]
    fn whitelisted_payload_validates() {
        let value = json!({
            "chunk_id": Uuid::new_v4(),
            "document_id": Uuid::new_v4(),
            "text": "the system shall log access",
            "char_start": 0,
            "char_end": 27,
            "anchored_concepts": [{
                "concept_id": Uuid::new_v4(),
                "label": "Access Logging",
                "role": "requirement",
                "char_start": 0,
                "char_end": 27,
            }],
        });
        ChunkPayload::validate(value).unwrap();
    }

    #[test]
    fn extra_fields_are_rejected() {
        let value = json!({
            "chunk_id": Uuid::new_v4(),
            "document_id": Uuid::new_v4(),
            "text": "x",
            "char_start": 0,
            "char_end": 1,
            "anchored_concepts": [],
            "definition": "concept definitions do not belong in the projection",
        });
        let err = ChunkPayload::validate(value).unwrap_err();
        assert!(matches!(err, StoreError::PayloadRejected { .. }));
        assert!(err.to_string().contains("definition"));
    }

    #[test]
    fn extra_fields_inside_anchored_concepts_are_rejected() {
        let value = json!({
            "chunk_id": Uuid::new_v4(),
            "document_id": Uuid::new_v4(),
            "text": "x",
            "char_start": 0,
            "char_end": 1,
            "anchored_concepts": [{
                "concept_id": Uuid::new_v4(),
                "label": "X",
                "role": "mention",
                "char_start": 0,
                "char_end": 1,
                "embedding": [0.1, 0.2],
            }],
        });
        assert!(ChunkPayload::validate(value).is_err());
    }
}
