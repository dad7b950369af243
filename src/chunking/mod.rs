//! Layout-aware chunking: atomic region detection, token estimation, and the
//! budgeted chunker itself.

pub mod chunker;
pub mod regions;
pub mod tokenizer;

pub use chunker::{ChunkingOutcome, LayoutAwareChunker, validate_chunks};
pub use regions::{AtomicRegion, RegionKind, scan_atomic_regions};
pub use tokenizer::{HeuristicEstimator, TokenEstimator};
