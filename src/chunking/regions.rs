//! Atomic region detection.
//!
//! Upstream vision/table extractors deliver linearized text in which table
//! and diagram regions are wrapped in begin/end markers carrying an optional
//! confidence, e.g.
//!
//! ```text
//! <<<TABLE conf=0.93>>>
//! | control | owner |
//! | AC-1    | CISO  |
//! <<<END_TABLE>>>
//! ```
//!
//! Both the segmenter and the chunker honor these regions as indivisible:
//! a region is never split across two chunks, and it forms its own segment.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tracing::warn;

/// Kind of atomic region announced by the upstream marker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionKind {
    Table,
    Figure,
    Diagram,
}

impl RegionKind {
    fn from_marker(raw: &str) -> Option<Self> {
        match raw {
            "TABLE" => Some(RegionKind::Table),
            "FIGURE" => Some(RegionKind::Figure),
            "DIAGRAM" => Some(RegionKind::Diagram),
            _ => None,
        }
    }
}

/// One atomic region, spanning the full marker block (markers included).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AtomicRegion {
    pub kind: RegionKind,
    /// Extraction confidence reported by the upstream producer, when present.
    pub confidence: Option<f32>,
    /// Byte offset of the opening marker.
    pub start: usize,
    /// Byte offset one past the closing marker (or end of text for an
    /// unterminated region).
    pub end: usize,
}

impl AtomicRegion {
    /// Whether the span `[start, end)` overlaps this region.
    #[must_use]
    pub fn overlaps(&self, start: usize, end: usize) -> bool {
        start < self.end && end > self.start
    }
}

fn begin_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"<<<(TABLE|FIGURE|DIAGRAM)(?:\s+conf=([0-9]*\.?[0-9]+))?>>>")
            .expect("begin marker regex is valid")
    })
}

/// Scan `text` for atomic regions, in order of appearance.
///
/// An opening marker without its closing counterpart extends to the end of
/// the text; this is logged but not an error (truncated upstream output must
/// not break chunking).
#[must_use]
pub fn scan_atomic_regions(text: &str) -> Vec<AtomicRegion> {
    let mut regions = Vec::new();
    let mut cursor = 0;

    while let Some(found) = begin_marker().captures_at(text, cursor) {
        let whole = found.get(0).expect("capture 0 always present");
        let kind_raw = found.get(1).expect("marker kind captured").as_str();
        let Some(kind) = RegionKind::from_marker(kind_raw) else {
            cursor = whole.end();
            continue;
        };
        let confidence = found
            .get(2)
            .and_then(|m| m.as_str().parse::<f32>().ok());

        let close = format!("<<<END_{kind_raw}>>>");
        let end = match text[whole.end()..].find(&close) {
            Some(relative) => whole.end() + relative + close.len(),
            None => {
                warn!(kind = kind_raw, start = whole.start(), "unterminated atomic region; extending to end of text");
                text.len()
            }
        };

        regions.push(AtomicRegion {
            kind,
            confidence,
            start: whole.start(),
            end,
        });
        cursor = end;
        if cursor >= text.len() {
            break;
        }
    }

    regions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_marked_regions_with_confidence() {
        let text = "before\n<<<TABLE conf=0.93>>>\n| a | b |\n<<<END_TABLE>>>\nafter\n\
                    <<<FIGURE>>>\ncaption\n<<<END_FIGURE>>>\ntail";
        let regions = scan_atomic_regions(text);
        assert_eq!(regions.len(), 2);
        assert_eq!(regions[0].kind, RegionKind::Table);
        assert!((regions[0].confidence.unwrap() - 0.93).abs() < 1e-6);
        assert!(text[regions[0].start..regions[0].end].ends_with("<<<END_TABLE>>>"));
        assert_eq!(regions[1].kind, RegionKind::Figure);
        assert_eq!(regions[1].confidence, None);
    }

    #[test]
    fn unterminated_region_runs_to_end() {
        let text = "intro\n<<<DIAGRAM conf=0.5>>>\nnodes and edges";
        let regions = scan_atomic_regions(text);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].end, text.len());
    }

    #[test]
    fn plain_text_has_no_regions() {
        assert!(scan_atomic_regions("nothing marked here").is_empty());
    }

    #[test]
    fn overlap_detection() {
        let region = AtomicRegion {
            kind: RegionKind::Table,
            confidence: None,
            start: 10,
            end: 30,
        };
        assert!(region.overlaps(5, 15));
        assert!(region.overlaps(29, 40));
        assert!(!region.overlaps(30, 40));
        assert!(!region.overlaps(0, 10));
    }
}
