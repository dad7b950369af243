//! Typed relation extraction over chunk windows: the gate, the concept
//! catalog, and the extractor that grounds every candidate in a located
//! evidence quote.

pub mod catalog;
pub mod extractor;
pub mod gate;

pub use catalog::build_catalog;
pub use extractor::{RelationExtractor, RelationTelemetry};
pub use gate::{WindowSignals, gate_score};
