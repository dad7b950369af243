//! Singleton promotion signals.
//!
//! A concept seen in only one document is promoted only when its grounding
//! looks intentional rather than incidental. Three independent signals must
//! all hold:
//!
//! 1. **normative** — some anchor carries a normative role or its quote uses a
//!    normative modal,
//! 2. **non-boilerplate** — some anchor's quote is not a phrase repeated
//!    verbatim across the corpus (headers, footers, legal stamps),
//! 3. **content-bearing** — some anchor sits in a substantive segment, not in
//!    front matter or a title fragment.

use rustc_hash::FxHashMap;

use super::normalize::normalize_quote;
use crate::config::PromotionConfig;
use crate::model::{ProtoConcept, Segment};
use crate::types::SegmentKind;

/// Outcome of the three-part singleton test.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SingletonSignals {
    pub normative: bool,
    pub non_boilerplate: bool,
    pub content_bearing: bool,
}

impl SingletonSignals {
    /// All three signals must hold for a singleton to be promoted.
    #[must_use]
    pub fn qualifies(&self) -> bool {
        self.normative && self.non_boilerplate && self.content_bearing
    }
}

/// Count normalized anchor quotes across the whole proto-concept set, the
/// corpus-wide input to the boilerplate signal.
#[must_use]
pub fn quote_repeats(protos: &[ProtoConcept]) -> FxHashMap<String, usize> {
    let mut counts = FxHashMap::default();
    for proto in protos {
        for anchor in proto.anchors() {
            *counts.entry(normalize_quote(&anchor.quote)).or_insert(0) += 1;
        }
    }
    counts
}

/// Evaluate the singleton test for one proto-concept.
///
/// `segments` are the segments of the proto's own document; an anchor whose
/// offset matches no segment is treated as content-bearing only if its quote
/// alone clears the length bar.
#[must_use]
pub fn evaluate_singleton(
    proto: &ProtoConcept,
    segments: &[Segment],
    repeats: &FxHashMap<String, usize>,
    config: &PromotionConfig,
) -> SingletonSignals {
    let mut signals = SingletonSignals::default();

    for anchor in proto.anchors() {
        if !signals.normative {
            let quote_lower = anchor.quote.to_lowercase();
            signals.normative = anchor.role.is_normative()
                || config
                    .normative_modals
                    .iter()
                    .any(|modal| quote_lower.contains(modal.as_str()));
        }

        if !signals.non_boilerplate {
            let count = repeats
                .get(&normalize_quote(&anchor.quote))
                .copied()
                .unwrap_or(1);
            signals.non_boilerplate = count < config.boilerplate_repeats;
        }

        if !signals.content_bearing {
            signals.content_bearing = match segments
                .iter()
                .find(|segment| segment.contains(anchor.char_start))
            {
                Some(segment) => {
                    segment.kind != SegmentKind::FrontMatter && segment.len() >= config.min_content_len
                }
                None => anchor.quote.len() >= config.min_content_len,
            };
        }
    }

    signals
}
