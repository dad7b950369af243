//! # Anchorgraph: anchored concept extraction and consolidation
//!
//! Anchorgraph turns a corpus of linearized documents into a grounded
//! knowledge graph plus a retrieval-ready chunk index, in two passes:
//!
//! - **Pass 1** (per document): split into structural segments, chunk with
//!   layout awareness, extract concept candidates per segment, and keep only
//!   the ones whose supporting quote can actually be located in the text.
//!   Every surviving concept carries at least one [`model::Anchor`] — an
//!   unanchored concept cannot exist. Typed relations are extracted over
//!   chunk windows under the same rule: no locatable evidence, no relation.
//! - **Corpus promotion**: proto-concepts from all documents are grouped and
//!   consolidated into canonical concepts with deterministic ids; singletons
//!   must pass an extra signal test and are flagged for review.
//! - **Pass 2** (deferred): canonical concepts gain a consolidated definition
//!   and a refined embedding, strictly additive next to the pass-1 output.
//!
//! Storage is split between an authoritative graph store and a derived
//! vector projection that can be rebuilt from it at any time.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use anchorgraph::pipeline::Pipeline;
//! use anchorgraph::providers::{
//!     MockEmbeddingProvider, ScriptedExtractionModel, ScriptedRefinementModel,
//!     ScriptedRelationModel,
//! };
//! use anchorgraph::stores::memory::{InMemoryGraphStore, InMemoryVectorStore};
//! use anchorgraph::types::TenantId;
//!
//! #[tokio::main]
//! async fn main() -> miette::Result<()> {
//!     let pipeline = Pipeline::builder()
//!         .graph_store(Arc::new(InMemoryGraphStore::new()))
//!         .vector_store(Arc::new(InMemoryVectorStore::new()))
//!         .extraction_model(Arc::new(ScriptedExtractionModel::new(vec![])))
//!         .relation_model(Arc::new(ScriptedRelationModel::new(vec![])))
//!         .refinement_model(Arc::new(ScriptedRefinementModel))
//!         .embedding_provider(Arc::new(MockEmbeddingProvider::new()))
//!         .build()?;
//!
//!     let outcome = pipeline
//!         .ingest_text(
//!             TenantId::new(),
//!             "1. SCOPE\nThis standard applies to all production services.\n",
//!         )
//!         .await?;
//!     println!("segments: {}, chunks: {}", outcome.segments, outcome.chunks);
//!
//!     pipeline.promote_corpus().await?;
//!     pipeline.run_pass2().await?;
//!
//!     for hit in pipeline.search_chunks("production services", 3).await? {
//!         println!("{:.3} {}", hit.similarity, hit.payload.text);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! Real deployments swap the scripted providers for live ones (the `rig`
//! feature ships adapters) and the in-memory projection for
//! [`stores::sqlite::SqliteVectorStore`].
//!
//! ## Module guide
//!
//! - [`types`] - Typed ids and the closed vocabularies (roles, predicates)
//! - [`model`] - Core records: documents, segments, chunks, anchors, concepts
//! - [`config`] - All tunable calibration, loadable from the environment
//! - [`segmenter`] - Heuristic structural segmentation
//! - [`chunking`] - Layout-aware token-budgeted chunking
//! - [`anchor`] - Quote location and anchored concept extraction
//! - [`scoring`] - Document-level concept ranking
//! - [`relations`] - Gated, windowed, evidence-grounded relation extraction
//! - [`promotion`] - Corpus consolidation into canonical concepts
//! - [`enrichment`] - Pass-2 refinement state machine
//! - [`providers`] - Model/embedding seams, parsers, and offline mocks
//! - [`stores`] - Graph store and vector projection
//! - [`limits`] - Rate limiting and retry policy
//! - [`pipeline`] - The end-to-end runner

pub mod anchor;
pub mod chunking;
pub mod config;
pub mod enrichment;
pub mod error;
pub mod limits;
pub mod model;
pub mod pipeline;
pub mod promotion;
pub mod providers;
pub mod relations;
pub mod scoring;
pub mod segmenter;
pub mod stores;
pub mod types;
