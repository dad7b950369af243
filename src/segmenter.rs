//! Heuristic segment splitting.
//!
//! Splits a document's linearized text into ordered structural segments —
//! sections and paragraph groups — and tags each with a coarse
//! [`SegmentKind`]. Pure function over the text: headings, normative modals,
//! list shapes, and atomic-region markers are the only signals, no model
//! calls. A long document typically lands in the 40–60 segment range.

use regex::Regex;
use std::sync::OnceLock;

use crate::chunking::regions::scan_atomic_regions;
use crate::model::Segment;
use crate::types::{DocumentId, SegmentId, SegmentKind};

fn heading_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Numbered headings ("3.", "2.4.1 Scope"), markdown headings, annex/article
    // openers, or short all-caps lines.
    RE.get_or_init(|| {
        Regex::new(
            r"(?x)^(
                \#{1,6}\s+\S
              | \d+(\.\d+)*\.?\s+\S
              | (ANNEX|APPENDIX|ARTICLE|SECTION|CHAPTER)\b.*
              | [A-Z][A-Z0-9\s\-&/,]{3,60}
            )$",
        )
        .expect("heading regex is valid")
    })
}

fn is_heading(line: &str) -> bool {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.len() > 90 || trimmed.ends_with('.') {
        return false;
    }
    heading_pattern().is_match(trimmed)
}

/// Split `text` into ordered segments for `document`.
///
/// Empty or whitespace-only text yields zero segments.
#[must_use]
pub fn split_segments(document: DocumentId, text: &str) -> Vec<Segment> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let regions = scan_atomic_regions(text);
    let mut segments = Vec::new();
    let mut cursor = 0;

    for region in &regions {
        if region.start > cursor {
            split_prose(document, text, cursor, region.start, &mut segments);
        }
        segments.push(Segment {
            id: SegmentId::new(),
            document,
            kind: SegmentKind::TableRegion,
            heading: None,
            char_start: region.start,
            char_end: region.end,
        });
        cursor = region.end;
    }
    if cursor < text.len() {
        split_prose(document, text, cursor, text.len(), &mut segments);
    }

    segments
}

/// Split a marker-free stretch of text on headings and blank-line groups.
fn split_prose(
    document: DocumentId,
    text: &str,
    start: usize,
    end: usize,
    segments: &mut Vec<Segment>,
) {
    let slice = &text[start..end];

    // Collect line spans relative to `slice`.
    let mut lines: Vec<(usize, usize)> = Vec::new();
    let mut line_start = 0;
    for (offset, ch) in slice.char_indices() {
        if ch == '\n' {
            lines.push((line_start, offset));
            line_start = offset + 1;
        }
    }
    lines.push((line_start, slice.len()));

    let mut open: Option<(usize, Option<String>)> = None; // (seg start, heading)
    let mut last_content_end = 0;

    let mut close = |open: &mut Option<(usize, Option<String>)>,
                     seg_end: usize,
                     segments: &mut Vec<Segment>| {
        if let Some((seg_start, heading)) = open.take() {
            let body = &slice[seg_start..seg_end];
            if body.trim().is_empty() {
                return;
            }
            let first_for_document = segments.is_empty();
            segments.push(Segment {
                id: SegmentId::new(),
                document,
                kind: classify(heading.as_deref(), body, first_for_document),
                heading,
                char_start: start + seg_start,
                char_end: start + seg_end,
            });
        }
    };

    for &(l_start, l_end) in &lines {
        let line = &slice[l_start..l_end];
        if is_heading(line) {
            close(&mut open, last_content_end, segments);
            open = Some((l_start, Some(line.trim().to_string())));
            last_content_end = l_end;
        } else {
            if open.is_none() && !line.trim().is_empty() {
                open = Some((l_start, None));
            }
            if !line.trim().is_empty() {
                last_content_end = l_end;
            }
        }
    }
    close(&mut open, slice.len(), segments);
}

fn classify(heading: Option<&str>, body: &str, first_for_document: bool) -> SegmentKind {
    let heading_lower = heading.map(str::to_lowercase).unwrap_or_default();
    let body_lower = body.to_lowercase();

    if heading_lower.contains("definition")
        || heading_lower.contains("glossary")
        || heading_lower.contains("terms")
        || body_lower.contains(" means ") && body_lower.contains('"')
    {
        return SegmentKind::Definition;
    }
    if heading_lower.contains("summary")
        || heading_lower.contains("abstract")
        || heading_lower.contains("overview")
    {
        return SegmentKind::Summary;
    }
    if heading_lower.contains("procedure")
        || heading_lower.contains("process")
        || heading_lower.contains("steps")
        || looks_like_numbered_list(body)
    {
        return SegmentKind::Procedure;
    }

    let modal_hits = ["shall", "must", "required to", "prohibited"]
        .iter()
        .map(|modal| body_lower.matches(modal).count())
        .sum::<usize>();
    let sentences = body.split('.').count().max(1);
    if heading_lower.contains("requirement") || modal_hits * 3 >= sentences {
        return SegmentKind::Requirements;
    }

    if first_for_document && heading.is_none() && body.len() < 400 {
        // Leading unheaded short block: title page / front matter.
        return SegmentKind::FrontMatter;
    }
    if body_lower.contains("table of contents") || body_lower.contains("©") {
        return SegmentKind::FrontMatter;
    }

    SegmentKind::Narrative
}

fn looks_like_numbered_list(body: &str) -> bool {
    let numbered = body
        .lines()
        .filter(|line| {
            let trimmed = line.trim_start();
            trimmed
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_digit())
                && (trimmed.contains(". ") || trimmed.contains(") "))
        })
        .count();
    numbered >= 3
}
