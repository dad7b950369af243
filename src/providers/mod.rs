//! Model provider seams.
//!
//! The pipeline never talks to an LLM or embedding service directly; it goes
//! through the traits here, so deployments can plug in any provider and tests
//! can run fully offline. The contracts are deliberately thin:
//!
//! - [`ConceptExtractionModel`] — segment text in, raw JSON out.
//! - [`RelationModel`] — window text + concept catalog in, raw JSON out.
//! - [`EmbeddingProvider`] — text in, vector out.
//! - [`ConceptRefinementModel`] — label, member definitions and evidence
//!   quotes in, one consolidated definition out (pass 2 only).
//!
//! Model output is duck-typed JSON; the [`parse_concept_candidates`] and
//! [`parse_relation_candidates`] helpers validate it into closed candidate
//! types, discarding each malformed item individually. A response that is not
//! even a JSON array counts as zero candidates — never a pipeline abort.
//!
//! The mock implementations at the bottom are first-class exports: the
//! integration suite drives the full pipeline with them.

#[cfg(feature = "rig")]
pub mod rig;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ProviderError;
use crate::types::{ConceptId, Predicate};

/// A concept candidate as proposed by the extraction model, before any
/// grounding has been attempted.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConceptCandidate {
    pub label: String,
    #[serde(default)]
    pub definition: String,
    pub role: String,
    pub quote: String,
}

/// One entry of the bounded concept catalog handed to the relation model.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: ConceptId,
    pub label: String,
}

/// A relation candidate as proposed by the relation model, before evidence
/// verification.
#[derive(Clone, Debug)]
pub struct RelationCandidate {
    pub subject_id: ConceptId,
    pub predicate: Predicate,
    pub object_id: ConceptId,
    pub evidence_quote: String,
    pub confidence: f32,
}

/// Extraction model contract: per-segment concept candidates.
///
/// Implementations return the provider's raw JSON; schema validation happens
/// in [`parse_concept_candidates`] so that every provider gets the same
/// per-item discard behavior.
#[async_trait]
pub trait ConceptExtractionModel: Send + Sync {
    async fn extract_concepts(
        &self,
        segment_text: &str,
        instructions: &str,
    ) -> Result<serde_json::Value, ProviderError>;
}

/// Relation model contract: typed relations over a chunk window.
#[async_trait]
pub trait RelationModel: Send + Sync {
    async fn extract_relations(
        &self,
        window_text: &str,
        catalog: &[CatalogEntry],
    ) -> Result<serde_json::Value, ProviderError>;
}

/// Embedding provider contract.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Vector length produced by this provider.
    fn dimensions(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError>;
}

/// Pass-2 refinement contract: synthesize one consolidated definition for a
/// canonical concept from its member evidence.
#[async_trait]
pub trait ConceptRefinementModel: Send + Sync {
    async fn refine_definition(
        &self,
        label: &str,
        member_definitions: &[String],
        evidence_quotes: &[String],
    ) -> Result<String, ProviderError>;
}

/// Validate a raw extraction response into concept candidates.
///
/// Each array element is parsed independently; malformed elements are dropped
/// with a debug log. A non-array response yields an empty list.
#[must_use]
pub fn parse_concept_candidates(raw: &serde_json::Value) -> Vec<ConceptCandidate> {
    let Some(items) = raw.as_array() else {
        debug!(kind = %json_kind(raw), "extraction response is not an array; treating as zero candidates");
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| {
            match serde_json::from_value::<ConceptCandidate>(item.clone()) {
                Ok(candidate) if !candidate.label.trim().is_empty() && !candidate.quote.trim().is_empty() => {
                    Some(candidate)
                }
                Ok(_) => {
                    debug!("discarding concept candidate with empty label or quote");
                    None
                }
                Err(err) => {
                    debug!(error = %err, "discarding malformed concept candidate");
                    None
                }
            }
        })
        .collect()
}

/// Wire shape of one relation item; kept private, callers see
/// [`RelationCandidate`] with ids and predicate already validated.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRelationItem {
    subject_id: uuid::Uuid,
    predicate: String,
    object_id: uuid::Uuid,
    evidence_quote: String,
    #[serde(default = "default_confidence")]
    confidence: f32,
}

fn default_confidence() -> f32 {
    0.5
}

/// Validate a raw relation response into relation candidates.
///
/// Reads at most `max_items` array elements (the rest is truncated unread,
/// never an error); drops items with unknown predicates, empty quotes, or ids
/// outside the supplied catalog.
#[must_use]
pub fn parse_relation_candidates(
    raw: &serde_json::Value,
    catalog: &[CatalogEntry],
    max_items: usize,
) -> Vec<RelationCandidate> {
    let Some(items) = raw.as_array() else {
        debug!(kind = %json_kind(raw), "relation response is not an array; treating as zero candidates");
        return Vec::new();
    };

    let known: rustc_hash::FxHashSet<ConceptId> =
        catalog.iter().map(|entry| entry.id).collect();

    items
        .iter()
        .take(max_items)
        .filter_map(|item| {
            let parsed = match serde_json::from_value::<RawRelationItem>(item.clone()) {
                Ok(parsed) => parsed,
                Err(err) => {
                    debug!(error = %err, "discarding malformed relation candidate");
                    return None;
                }
            };
            let predicate = match parsed.predicate.parse::<Predicate>() {
                Ok(predicate) => predicate,
                Err(err) => {
                    debug!(error = %err, "discarding relation with out-of-vocabulary predicate");
                    return None;
                }
            };
            if parsed.evidence_quote.trim().is_empty() {
                debug!("discarding relation without evidence quote");
                return None;
            }
            let subject = ConceptId::from(parsed.subject_id);
            let object = ConceptId::from(parsed.object_id);
            if !known.contains(&subject) || !known.contains(&object) {
                debug!(%subject, %object, "discarding relation referencing concepts outside the catalog");
                return None;
            }
            if subject == object {
                debug!(%subject, "discarding self-relation");
                return None;
            }
            Some(RelationCandidate {
                subject_id: subject,
                predicate,
                object_id: object,
                evidence_quote: parsed.evidence_quote,
                confidence: parsed.confidence.clamp(0.0, 1.0),
            })
        })
        .collect()
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

// ============================================================================
// Mock providers
// ============================================================================

/// Deterministic embedding provider for tests and offline runs.
///
/// Hashes the input text into a seeded pseudo-random unit vector, so equal
/// texts always embed identically and similar-but-different texts do not.
#[derive(Clone, Debug)]
pub struct MockEmbeddingProvider {
    dimensions: usize,
}

impl MockEmbeddingProvider {
    #[must_use]
    pub fn new() -> Self {
        Self { dimensions: 64 }
    }

    #[must_use]
    pub fn with_dimensions(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        use std::hash::{Hash, Hasher};
        let mut hasher = rustc_hash::FxHasher::default();
        text.hash(&mut hasher);
        let mut state = hasher.finish() | 1;

        let mut vector = Vec::with_capacity(self.dimensions);
        for _ in 0..self.dimensions {
            // xorshift64*
            state ^= state >> 12;
            state ^= state << 25;
            state ^= state >> 27;
            let sample = state.wrapping_mul(0x2545_F491_4F6C_DD1D);
            vector.push(((sample >> 33) as f32 / (1u64 << 31) as f32) - 0.5);
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt().max(1e-6);
        vector.iter_mut().for_each(|v| *v /= norm);
        vector
    }
}

impl Default for MockEmbeddingProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        Ok(self.vector_for(text))
    }
}

/// Scripted extraction model: answers every segment with the configured
/// candidate list.
///
/// The anchor extractor rejects any candidate whose quote does not locate in
/// the segment at hand, so a single script naturally distributes candidates
/// across the segments that actually contain their quotes.
#[derive(Clone, Debug, Default)]
pub struct ScriptedExtractionModel {
    candidates: Vec<ConceptCandidate>,
}

impl ScriptedExtractionModel {
    #[must_use]
    pub fn new(candidates: Vec<ConceptCandidate>) -> Self {
        Self { candidates }
    }
}

#[async_trait]
impl ConceptExtractionModel for ScriptedExtractionModel {
    async fn extract_concepts(
        &self,
        _segment_text: &str,
        _instructions: &str,
    ) -> Result<serde_json::Value, ProviderError> {
        serde_json::to_value(&self.candidates).map_err(|err| ProviderError::Malformed(err.to_string()))
    }
}

/// One scripted relation, referenced by concept label; resolved against the
/// catalog at call time.
#[derive(Clone, Debug)]
pub struct ScriptedRelation {
    pub subject_label: String,
    pub predicate: Predicate,
    pub object_label: String,
    pub evidence_quote: String,
    pub confidence: f32,
}

/// Scripted relation model: emits the configured relations whose subject and
/// object labels both appear in the supplied catalog.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRelationModel {
    relations: Vec<ScriptedRelation>,
}

impl ScriptedRelationModel {
    #[must_use]
    pub fn new(relations: Vec<ScriptedRelation>) -> Self {
        Self { relations }
    }
}

#[async_trait]
impl RelationModel for ScriptedRelationModel {
    async fn extract_relations(
        &self,
        _window_text: &str,
        catalog: &[CatalogEntry],
    ) -> Result<serde_json::Value, ProviderError> {
        let find = |label: &str| {
            catalog
                .iter()
                .find(|entry| entry.label.eq_ignore_ascii_case(label))
                .map(|entry| entry.id)
        };

        let items: Vec<serde_json::Value> = self
            .relations
            .iter()
            .filter_map(|relation| {
                let subject = find(&relation.subject_label)?;
                let object = find(&relation.object_label)?;
                Some(serde_json::json!({
                    "subject_id": subject.as_uuid(),
                    "predicate": relation.predicate.as_str(),
                    "object_id": object.as_uuid(),
                    "evidence_quote": relation.evidence_quote,
                    "confidence": relation.confidence,
                }))
            })
            .collect();

        Ok(serde_json::Value::Array(items))
    }
}

/// Scripted refinement model: joins the member material into a deterministic
/// consolidated definition.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRefinementModel;

#[async_trait]
impl ConceptRefinementModel for ScriptedRefinementModel {
    async fn refine_definition(
        &self,
        label: &str,
        member_definitions: &[String],
        _evidence_quotes: &[String],
    ) -> Result<String, ProviderError> {
        let best = member_definitions
            .iter()
            .max_by_key(|definition| definition.len())
            .map(String::as_str)
            .unwrap_or("");
        Ok(format!("{label}: {best}").trim_end_matches([':', ' ']).to_string())
    }
}

/// Refinement model that always fails with a transient error.
#[derive(Clone, Debug, Default)]
pub struct FailingRefinementModel;

#[async_trait]
impl ConceptRefinementModel for FailingRefinementModel {
    async fn refine_definition(
        &self,
        _label: &str,
        _member_definitions: &[String],
        _evidence_quotes: &[String],
    ) -> Result<String, ProviderError> {
        Err(ProviderError::Transient("simulated outage".into()))
    }
}

/// Provider that always fails with a transient error; used to exercise the
/// retry/backoff path.
#[derive(Clone, Debug, Default)]
pub struct FailingExtractionModel;

#[async_trait]
impl ConceptExtractionModel for FailingExtractionModel {
    async fn extract_concepts(
        &self,
        _segment_text: &str,
        _instructions: &str,
    ) -> Result<serde_json::Value, ProviderError> {
        Err(ProviderError::Transient("simulated rate limit".into()))
    }
}

/// Relation model that always fails with a transient error.
#[derive(Clone, Debug, Default)]
pub struct FailingRelationModel;

#[async_trait]
impl RelationModel for FailingRelationModel {
    async fn extract_relations(
        &self,
        _window_text: &str,
        _catalog: &[CatalogEntry],
    ) -> Result<serde_json::Value, ProviderError> {
        Err(ProviderError::Transient("simulated rate limit".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn malformed_items_are_dropped_individually() {
        let raw = json!([
            {"label": "DPIA", "definition": "an assessment", "role": "definition",
             "quote": "A DPIA shall be carried out"},
            {"label": "", "role": "definition", "quote": "x"},
            {"unexpected": true},
            "not even an object",
        ]);
        let candidates = parse_concept_candidates(&raw);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].label, "DPIA");
    }

    #[test]
    fn non_array_response_is_zero_candidates() {
        assert!(parse_concept_candidates(&json!({"oops": 1})).is_empty());
        assert!(parse_concept_candidates(&json!(null)).is_empty());
    }

    #[test]
    fn relation_parsing_enforces_vocabulary_and_catalog() {
        let a = ConceptId::new();
        let b = ConceptId::new();
        let stranger = ConceptId::new();
        let catalog = vec![
            CatalogEntry { id: a, label: "Access Control".into() },
            CatalogEntry { id: b, label: "Audit Log".into() },
        ];

        let raw = json!([
            {"subject_id": a.as_uuid(), "predicate": "requires", "object_id": b.as_uuid(),
             "evidence_quote": "access control requires audit logging", "confidence": 0.9},
            {"subject_id": a.as_uuid(), "predicate": "synonym_of", "object_id": b.as_uuid(),
             "evidence_quote": "nope"},
            {"subject_id": a.as_uuid(), "predicate": "requires", "object_id": stranger.as_uuid(),
             "evidence_quote": "outside catalog"},
            {"subject_id": a.as_uuid(), "predicate": "requires", "object_id": a.as_uuid(),
             "evidence_quote": "self loop"},
        ]);

        let parsed = parse_relation_candidates(&raw, &catalog, 32);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].predicate, Predicate::Requires);
    }

    #[test]
    fn relation_parsing_truncates_at_max_items() {
        let a = ConceptId::new();
        let b = ConceptId::new();
        let catalog = vec![
            CatalogEntry { id: a, label: "A".into() },
            CatalogEntry { id: b, label: "B".into() },
        ];
        let item = json!({
            "subject_id": a.as_uuid(), "predicate": "enables", "object_id": b.as_uuid(),
            "evidence_quote": "A enables B", "confidence": 0.8,
        });
        let raw = serde_json::Value::Array(vec![item; 10]);
        assert_eq!(parse_relation_candidates(&raw, &catalog, 4).len(), 4);
    }

    #[tokio::test]
    async fn mock_embeddings_are_deterministic_unit_vectors() {
        let provider = MockEmbeddingProvider::new();
        let a = provider.embed("data protection").await.unwrap();
        let b = provider.embed("data protection").await.unwrap();
        let c = provider.embed("something else").await.unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-3);
    }
}
