//! End-to-end orchestration: pass 1 per document, corpus promotion, pass 2,
//! and the retrieval facade over the projected chunks.

pub mod runner;

pub use runner::{Pass1Outcome, Pipeline, PipelineBuilder, ProjectionDiff};
