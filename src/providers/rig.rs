//! rig-core adapter for the provider traits.
//!
//! Gated behind the `rig` feature. Maps [`ConceptExtractionModel`],
//! [`RelationModel`], and [`EmbeddingProvider`] onto a rig agent and
//! embedding model: prompt with the instructions plus the unit text, then
//! hand the raw JSON back to the pipeline's validating parsers.

use async_trait::async_trait;
use rig::agent::Agent;
use rig::completion::{CompletionModel, Prompt};
use rig::embeddings::EmbeddingModel as RigEmbeddingModel;
use tracing::debug;

use super::{CatalogEntry, ConceptExtractionModel, EmbeddingProvider, RelationModel};
use crate::error::ProviderError;

/// Extraction/relation adapter over a rig [`Agent`].
pub struct RigExtractionAdapter<M: CompletionModel> {
    agent: Agent<M>,
}

impl<M: CompletionModel> RigExtractionAdapter<M> {
    pub fn new(agent: Agent<M>) -> Self {
        Self { agent }
    }

    async fn prompt_json(&self, prompt: String) -> Result<serde_json::Value, ProviderError> {
        let raw = self
            .agent
            .prompt(prompt.as_str())
            .await
            .map_err(|err| ProviderError::Transient(err.to_string()))?;
        // Providers occasionally wrap JSON in a code fence; strip it before
        // parsing, and treat anything unparseable as zero candidates.
        let trimmed = raw
            .trim()
            .trim_start_matches("```json")
            .trim_start_matches("```")
            .trim_end_matches("```")
            .trim();
        match serde_json::from_str(trimmed) {
            Ok(value) => Ok(value),
            Err(err) => {
                debug!(error = %err, "rig response was not valid JSON");
                Ok(serde_json::Value::Array(Vec::new()))
            }
        }
    }
}

#[async_trait]
impl<M: CompletionModel> ConceptExtractionModel for RigExtractionAdapter<M> {
    async fn extract_concepts(
        &self,
        segment_text: &str,
        instructions: &str,
    ) -> Result<serde_json::Value, ProviderError> {
        let prompt = format!(
            "{instructions}\n\nReturn a JSON array of objects with keys \
             label, definition, role, quote. The quote must be copied verbatim \
             from the text.\n\nTEXT:\n{segment_text}"
        );
        self.prompt_json(prompt).await
    }
}

#[async_trait]
impl<M: CompletionModel> RelationModel for RigExtractionAdapter<M> {
    async fn extract_relations(
        &self,
        window_text: &str,
        catalog: &[CatalogEntry],
    ) -> Result<serde_json::Value, ProviderError> {
        let catalog_json = serde_json::to_string(catalog)
            .map_err(|err| ProviderError::Malformed(err.to_string()))?;
        let vocabulary: Vec<&str> = crate::types::Predicate::ALL
            .iter()
            .map(|p| p.as_str())
            .collect();
        let prompt = format!(
            "Identify typed relations between the cataloged concepts, using only \
             the predicates {vocabulary:?}. Return a JSON array of objects with \
             keys subject_id, predicate, object_id, evidence_quote, confidence. \
             The evidence_quote must be copied verbatim from the text.\n\n\
             CONCEPTS:\n{catalog_json}\n\nTEXT:\n{window_text}"
        );
        self.prompt_json(prompt).await
    }
}

/// Embedding adapter over a rig embedding model.
pub struct RigEmbeddingAdapter<E: RigEmbeddingModel> {
    model: E,
}

impl<E: RigEmbeddingModel> RigEmbeddingAdapter<E> {
    pub fn new(model: E) -> Self {
        Self { model }
    }
}

#[async_trait]
impl<E: RigEmbeddingModel + Sync + Send> EmbeddingProvider for RigEmbeddingAdapter<E> {
    fn dimensions(&self) -> usize {
        self.model.ndims()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let embedding = self
            .model
            .embed_text(text)
            .await
            .map_err(|err| ProviderError::Transient(err.to_string()))?;
        Ok(embedding.vec.into_iter().map(|v| v as f32).collect())
    }
}
