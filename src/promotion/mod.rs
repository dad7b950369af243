//! Corpus promotion: consolidating document-scoped proto-concepts into
//! canonical concepts with deterministic ids.

pub mod engine;
pub mod normalize;
pub mod signals;

pub use engine::{PromotionEngine, PromotionOutcome};
pub use normalize::{canonical_id, normalize_label};
pub use signals::SingletonSignals;
