//! Core records of the anchorgraph data model.
//!
//! These types mirror the graph store schema: [`Document`], [`Segment`],
//! [`DocumentChunk`], [`Anchor`], [`ProtoConcept`], [`CanonicalConcept`], and
//! [`RawRelation`]. They are plain serde-friendly data; all behavior that
//! creates them lives in the pipeline components, which is where the
//! invariants are enforced:
//!
//! - an [`Anchor`] exists only for a quote that was actually located,
//! - a [`ProtoConcept`] is constructed through [`ProtoConcept::new`], which
//!   requires at least one anchor,
//! - a [`CanonicalConcept`] is only ever written by corpus promotion.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{
    CanonicalId, ChunkId, ConceptId, DocumentId, Predicate, SegmentId, SegmentKind, SemanticRole,
    StabilityTag, TenantId,
};

/// One ingested document: the unit of pass-1 processing.
///
/// Immutable once pass 1 completes; re-ingesting the same id replaces the
/// document and everything derived from it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub tenant: TenantId,
    /// Linearized text as delivered by the upstream extractors, including
    /// atomic-region markers.
    pub text: String,
    /// Segment ids in document order.
    pub segment_ids: Vec<SegmentId>,
    pub ingested_at: DateTime<Utc>,
}

impl Document {
    pub fn new(tenant: TenantId, text: impl Into<String>) -> Self {
        Self {
            id: DocumentId::new(),
            tenant,
            text: text.into(),
            segment_ids: Vec::new(),
            ingested_at: Utc::now(),
        }
    }
}

/// A contiguous span of a document's text with a coarse structural type.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Segment {
    pub id: SegmentId,
    pub document: DocumentId,
    pub kind: SegmentKind,
    /// Heading line that opened this segment, when one was detected.
    pub heading: Option<String>,
    pub char_start: usize,
    pub char_end: usize,
}

impl Segment {
    /// Slice this segment's text out of the owning document's text.
    #[must_use]
    pub fn text<'a>(&self, document_text: &'a str) -> &'a str {
        &document_text[self.char_start..self.char_end]
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.char_end - self.char_start
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.char_start == self.char_end
    }

    /// Whether the given document offset falls inside this segment.
    #[must_use]
    pub fn contains(&self, offset: usize) -> bool {
        (self.char_start..self.char_end).contains(&offset)
    }
}

/// A fixed-size span of document text, independent of concept boundaries.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub id: ChunkId,
    pub document: DocumentId,
    /// Zero-based position within the document.
    pub index: usize,
    pub char_start: usize,
    pub char_end: usize,
    pub text: String,
    /// Set when the chunk wraps an atomic region (table, figure) that must
    /// never be split; such chunks may exceed the token budget.
    pub atomic: bool,
}

impl DocumentChunk {
    /// Whether the given document offset falls inside this chunk.
    #[must_use]
    pub fn contains(&self, offset: usize) -> bool {
        (self.char_start..self.char_end).contains(&offset)
    }

    /// Whether the span `[start, end)` lies entirely inside this chunk.
    #[must_use]
    pub fn contains_span(&self, start: usize, end: usize) -> bool {
        start >= self.char_start && end <= self.char_end
    }
}

/// Proof that a concept is grounded: a located quote inside one chunk.
///
/// Anchors are immutable after creation and deleted only with their owning
/// concept.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Anchor {
    pub concept: ConceptId,
    /// Owning chunk: the chunk whose text contains the located quote.
    pub chunk: ChunkId,
    /// The quote as located in source text (not the model's rendition).
    pub quote: String,
    pub role: SemanticRole,
    /// Character span in document coordinates.
    pub char_start: usize,
    pub char_end: usize,
    /// Similarity score achieved while locating the quote.
    pub confidence: f32,
    /// True when the match fell below the exact threshold but above the
    /// floor; flagged for audit, still usable.
    pub approximate: bool,
}

/// A concept as observed in one document, always carrying at least one anchor.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProtoConcept {
    pub id: ConceptId,
    pub document: DocumentId,
    pub label: String,
    /// Short definition as extracted; may be empty for bare mentions.
    pub definition: String,
    /// Heuristic type hint from extraction (free-form, refined in pass 2).
    pub kind_hint: Option<String>,
    pub embedding: Vec<f32>,
    anchors: Vec<Anchor>,
}

impl ProtoConcept {
    /// Construct a proto-concept from its first anchor.
    ///
    /// There is deliberately no constructor taking zero anchors: an
    /// unanchored concept cannot exist.
    #[must_use]
    pub fn new(
        id: ConceptId,
        document: DocumentId,
        label: impl Into<String>,
        definition: impl Into<String>,
        embedding: Vec<f32>,
        first_anchor: Anchor,
    ) -> Self {
        Self {
            id,
            document,
            label: label.into(),
            definition: definition.into(),
            kind_hint: None,
            embedding,
            anchors: vec![first_anchor],
        }
    }

    #[must_use]
    pub fn with_kind_hint(mut self, hint: impl Into<String>) -> Self {
        self.kind_hint = Some(hint.into());
        self
    }

    pub fn push_anchor(&mut self, anchor: Anchor) {
        self.anchors.push(anchor);
    }

    #[must_use]
    pub fn anchors(&self) -> &[Anchor] {
        &self.anchors
    }

    /// Whether any anchor carries a strong grounding signal: an exact match,
    /// a normative role, or confidence above `threshold`.
    #[must_use]
    pub fn has_strong_anchor(&self, threshold: f32) -> bool {
        self.anchors.iter().any(|anchor| {
            !anchor.approximate || anchor.role.is_normative() || anchor.confidence >= threshold
        })
    }
}

/// A corpus-level concept consolidated from one or more proto-concepts.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CanonicalConcept {
    /// Deterministic id (UUID v5 over the normalized label).
    pub id: CanonicalId,
    pub label: String,
    pub stability: StabilityTag,
    /// Singletons always start life needing human confirmation.
    pub needs_confirmation: bool,
    /// Centroid of member embeddings, computed at promotion time. Never
    /// replaced; pass 2 writes `refined_embedding` alongside it.
    pub embedding: Vec<f32>,
    /// Pass-2 synthesized embedding, strictly additive.
    pub refined_embedding: Option<Vec<f32>>,
    /// Pass-2 consolidated definition, strictly additive.
    pub refined_definition: Option<String>,
    /// Member proto-concept ids across the corpus.
    pub members: Vec<ConceptId>,
}

impl CanonicalConcept {
    /// The best embedding available: the refined one when pass 2 has run,
    /// otherwise the pass-1 centroid.
    #[must_use]
    pub fn retrieval_embedding(&self) -> &[f32] {
        self.refined_embedding.as_deref().unwrap_or(&self.embedding)
    }
}

/// A typed relation between two concepts, grounded in an evidence quote
/// located inside its extraction window.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RawRelation {
    pub subject: ConceptId,
    pub predicate: Predicate,
    pub object: ConceptId,
    /// The evidence quote as located in the window text.
    pub evidence_quote: String,
    pub confidence: f32,
    /// Chunk ids forming the context window the evidence was located in.
    pub window: Vec<ChunkId>,
}
