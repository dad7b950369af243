//! Error taxonomy for the anchorgraph pipeline.
//!
//! Errors follow the propagation policy of the pipeline:
//!
//! - *Grounding failures* (an unlocatable quote) are not errors at all — the
//!   offending candidate is dropped and counted in telemetry.
//! - *Budget overruns* truncate the current unit's output and continue.
//! - *Transient provider failures* are retried with backoff and, once the
//!   retry budget is exhausted, the affected unit is skipped.
//! - Only genuine configuration or storage faults surface as [`PipelineError`]
//!   and abort the current operation.

use miette::Diagnostic;
use thiserror::Error;

use crate::types::{ChunkId, DocumentId};

/// Errors surfaced by provider implementations (extraction, relation, and
/// embedding models).
///
/// The `Transient` variant is the only one the retry loop will re-attempt;
/// everything else fails the current unit immediately.
#[derive(Debug, Error, Diagnostic)]
pub enum ProviderError {
    /// Network-level or rate-limit failure worth retrying.
    #[error("transient provider failure: {0}")]
    #[diagnostic(
        code(anchorgraph::provider::transient),
        help("Retried automatically with exponential backoff; check provider availability if persistent.")
    )]
    Transient(String),

    /// The provider answered but the payload did not fit the expected schema.
    /// The caller treats this as zero candidates for the unit.
    #[error("malformed provider response: {0}")]
    #[diagnostic(code(anchorgraph::provider::malformed))]
    Malformed(String),

    /// Unrecoverable provider failure (bad credentials, unsupported model).
    #[error("provider failure: {0}")]
    #[diagnostic(code(anchorgraph::provider::fatal))]
    Fatal(String),
}

impl ProviderError {
    /// Whether the retry loop should re-attempt this failure.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }
}

/// Errors surfaced by the graph and vector stores.
#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    /// Underlying backend failure (SQLite, connection pool, …).
    #[error("storage backend error: {0}")]
    #[diagnostic(code(anchorgraph::store::backend))]
    Backend(String),

    /// A projection payload carried fields outside the whitelist.
    #[error("projection payload rejected: {reason}")]
    #[diagnostic(
        code(anchorgraph::store::payload_whitelist),
        help("The vector store accepts only the minimal whitelisted chunk payload; strip extra fields at the source.")
    )]
    PayloadRejected { reason: String },

    /// A record referenced an entity the store has never seen.
    #[error("unknown {entity} id {id}")]
    #[diagnostic(code(anchorgraph::store::unknown_id))]
    UnknownId { entity: &'static str, id: String },

    /// Serialization failure while persisting a record.
    #[error(transparent)]
    #[diagnostic(code(anchorgraph::store::serde_json))]
    Serde(#[from] serde_json::Error),
}

/// Top-level pipeline error.
#[derive(Debug, Error, Diagnostic)]
pub enum PipelineError {
    /// Chunk layout validation failed: an atomic region spans two chunks.
    /// This is a release-blocking property, not a degradable one.
    #[error("atomic region split across chunks {first} and {second} in document {document}")]
    #[diagnostic(
        code(anchorgraph::chunking::atomic_split),
        help("Atomic regions must be emitted whole, as a single oversized chunk if necessary.")
    )]
    AtomicRegionSplit {
        document: DocumentId,
        first: ChunkId,
        second: ChunkId,
    },

    /// Corpus promotion produced conflicting stability decisions for one
    /// label group. Grouping is deterministic, so this indicates a
    /// configuration bug and is never papered over.
    #[error("corpus promotion inconsistency for label group '{label}'")]
    #[diagnostic(
        code(anchorgraph::promotion::inconsistent),
        help("Promotion must be idempotent; divergent reruns point at unstable configuration or non-deterministic input snapshots.")
    )]
    PromotionInconsistency { label: String },

    /// Illegal enrichment status transition.
    #[error("illegal enrichment transition {from} -> {to} for document {document}")]
    #[diagnostic(code(anchorgraph::enrichment::illegal_transition))]
    IllegalTransition {
        document: DocumentId,
        from: crate::types::EnrichmentStatus,
        to: crate::types::EnrichmentStatus,
    },

    /// A pass-2 run was requested for a document without pass-1 state.
    #[error("document {0} has no pass-1 state")]
    #[diagnostic(code(anchorgraph::enrichment::missing_pass1))]
    MissingPass1(DocumentId),

    /// Provider failure that exhausted its retry budget on a fatal path.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Provider(#[from] ProviderError),

    /// Store failure.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    /// JSON (de)serialization failure.
    #[error(transparent)]
    #[diagnostic(code(anchorgraph::serde_json))]
    Serde(#[from] serde_json::Error),

    /// Configuration rejected at load time.
    #[error("invalid configuration: {0}")]
    #[diagnostic(code(anchorgraph::config::invalid))]
    InvalidConfig(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_is_retryable() {
        assert!(ProviderError::Transient("429".into()).is_transient());
        assert!(!ProviderError::Malformed("bad json".into()).is_transient());
        assert!(!ProviderError::Fatal("no key".into()).is_transient());
    }

    #[test]
    fn store_error_wraps_into_pipeline_error() {
        let err = StoreError::PayloadRejected {
            reason: "unexpected field 'definition'".into(),
        };
        let pipeline: PipelineError = err.into();
        assert!(pipeline.to_string().contains("projection payload rejected"));
    }
}
