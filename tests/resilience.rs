//! Degradation behavior: provider outages shrink the output of the affected
//! stage instead of failing the ingest.

use std::sync::Arc;

use anchorgraph::config::{ConcurrencyConfig, PipelineConfig};
use anchorgraph::pipeline::Pipeline;
use anchorgraph::providers::{
    ConceptCandidate, ConceptExtractionModel, FailingExtractionModel, FailingRelationModel,
    MockEmbeddingProvider, RelationModel, ScriptedExtractionModel, ScriptedRefinementModel,
    ScriptedRelationModel,
};
use anchorgraph::stores::GraphStore;
use anchorgraph::stores::memory::{InMemoryGraphStore, InMemoryVectorStore};
use anchorgraph::types::TenantId;

const TEXT: &str = "\
1. REQUIREMENTS\n\
Backups shall be encrypted at rest. Restore procedures must be tested every \
quarter and the results must be reported to the security board.\n";

fn pipeline(
    graph: Arc<InMemoryGraphStore>,
    extraction: Arc<dyn ConceptExtractionModel>,
    relations: Arc<dyn RelationModel>,
) -> Pipeline {
    let config = PipelineConfig {
        concurrency: ConcurrencyConfig {
            requests_per_second: 1_000,
            max_retries: 2,
            backoff_base_ms: 1,
            backoff_max_ms: 2,
            ..ConcurrencyConfig::default()
        },
        ..PipelineConfig::default()
    };
    Pipeline::builder()
        .config(config)
        .graph_store(graph)
        .vector_store(Arc::new(InMemoryVectorStore::new()))
        .extraction_model(extraction)
        .relation_model(relations)
        .refinement_model(Arc::new(ScriptedRefinementModel))
        .embedding_provider(Arc::new(MockEmbeddingProvider::new()))
        .build()
        .expect("pipeline builds")
}

#[tokio::test]
async fn extraction_outage_still_produces_chunks_and_projection() {
    let graph = Arc::new(InMemoryGraphStore::new());
    let pipeline = pipeline(
        graph.clone(),
        Arc::new(FailingExtractionModel),
        Arc::new(ScriptedRelationModel::new(Vec::new())),
    );

    let outcome = pipeline.ingest_text(TenantId::new(), TEXT).await.unwrap();

    assert_eq!(outcome.concepts, 0);
    assert_eq!(outcome.anchors.segments_failed, outcome.anchors.segments_processed);
    assert!(outcome.anchors.segments_failed >= 1);
    // Chunking and projection are independent of the model outage.
    assert!(outcome.chunks >= 1);
    assert_eq!(outcome.projected_chunks, outcome.chunks);
    assert!(pipeline.verify_projection().await.unwrap().is_clean());
    // Retry budget was spent before giving up, then the document completed.
    assert!(graph.document(outcome.document).await.unwrap().is_some());
}

#[tokio::test]
async fn relation_outage_keeps_concepts() {
    let graph = Arc::new(InMemoryGraphStore::new());
    let candidates = vec![
        ConceptCandidate {
            label: "Backup Encryption".into(),
            definition: "Encryption of backups at rest.".into(),
            role: "requirement".into(),
            quote: "Backups shall be encrypted at rest".into(),
        },
        ConceptCandidate {
            label: "Restore Testing".into(),
            definition: "Quarterly restore verification.".into(),
            role: "requirement".into(),
            quote: "Restore procedures must be tested every quarter".into(),
        },
    ];
    let pipeline = pipeline(
        graph.clone(),
        Arc::new(ScriptedExtractionModel::new(candidates)),
        Arc::new(FailingRelationModel),
    );

    let outcome = pipeline.ingest_text(TenantId::new(), TEXT).await.unwrap();

    assert_eq!(outcome.concepts, 2);
    assert_eq!(outcome.relations, 0);
    assert!(outcome.relation_telemetry.windows_failed >= 1);
    assert!(graph.relations_for(outcome.document).await.unwrap().is_empty());
    assert_eq!(graph.protos_for(outcome.document).await.unwrap().len(), 2);
}
