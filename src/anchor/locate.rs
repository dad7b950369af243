//! Approximate quote location in source text.
//!
//! Model-proposed quotes rarely come back byte-identical to the source:
//! whitespace gets collapsed, casing drifts, OCR artifacts leak in. The
//! locator resolves a quote to an exact character span anyway, in three
//! stages of increasing cost:
//!
//! 1. exact substring search,
//! 2. case- and whitespace-normalized search (span mapped back to the
//!    original text),
//! 3. fuzzy sliding window scored with normalized Levenshtein similarity.
//!
//! The returned score feeds the exact/approximate decision; callers reject
//! anything below the configured floor. There is no "unverified" outcome.

use crate::config::MatchingConfig;

/// A located quote: an exact span in the haystack plus the similarity score
/// that produced it.
#[derive(Clone, Debug, PartialEq)]
pub struct QuoteMatch {
    /// Byte offset of the span start within the haystack.
    pub start: usize,
    /// Byte offset one past the span end.
    pub end: usize,
    /// Similarity in `[0, 1]`; `1.0` for exact substring hits.
    pub score: f64,
}

impl QuoteMatch {
    /// Slice the matched text out of the haystack this match was located in.
    #[must_use]
    pub fn matched<'a>(&self, haystack: &'a str) -> &'a str {
        &haystack[self.start..self.end]
    }
}

/// Locate `quote` inside `haystack`, returning the best match at or above the
/// approximate floor, or `None` when the quote cannot be grounded.
#[must_use]
pub fn locate_quote(haystack: &str, quote: &str, config: &MatchingConfig) -> Option<QuoteMatch> {
    let quote = quote.trim();
    if quote.is_empty() || haystack.is_empty() {
        return None;
    }

    // Stage 1: verbatim hit.
    if let Some(start) = haystack.find(quote) {
        return Some(QuoteMatch {
            start,
            end: start + quote.len(),
            score: 1.0,
        });
    }

    // Stage 2: normalized hit, mapped back to original offsets.
    if let Some(found) = normalized_find(haystack, quote) {
        return Some(found);
    }

    // Stage 3: fuzzy sliding window over normalized text.
    let best = fuzzy_scan(haystack, quote, config.window_step.max(1))?;
    (best.score >= config.approximate_floor).then_some(best)
}

/// Convenience similarity between two short strings, normalized the same way
/// the locator normalizes text. Used for relation-evidence checks that only
/// need a score, not a span.
#[must_use]
pub fn similarity(a: &str, b: &str) -> f64 {
    strsim::normalized_levenshtein(&normalize(a), &normalize(b))
}

fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_was_space = true;
    for ch in text.chars() {
        if ch.is_whitespace() {
            if !last_was_space {
                out.push(' ');
                last_was_space = true;
            }
        } else {
            out.extend(ch.to_lowercase());
            last_was_space = false;
        }
    }
    while out.ends_with(' ') {
        out.pop();
    }
    out
}

/// Normalized character stream with a map back to original byte offsets.
///
/// Each emitted normalized char remembers the byte offset of the original
/// char it came from, so a hit in normalized space converts to a span in the
/// original text.
fn normalized_chars(text: &str) -> (Vec<char>, Vec<usize>) {
    let mut chars = Vec::with_capacity(text.len());
    let mut offsets = Vec::with_capacity(text.len());
    let mut last_was_space = true;
    for (byte_offset, ch) in text.char_indices() {
        if ch.is_whitespace() {
            if !last_was_space {
                chars.push(' ');
                offsets.push(byte_offset);
                last_was_space = true;
            }
        } else {
            for lowered in ch.to_lowercase() {
                chars.push(lowered);
                offsets.push(byte_offset);
            }
            last_was_space = false;
        }
    }
    while chars.last() == Some(&' ') {
        chars.pop();
        offsets.pop();
    }
    (chars, offsets)
}

fn end_offset_of(text: &str, start_byte: usize) -> usize {
    start_byte
        + text[start_byte..]
            .chars()
            .next()
            .map_or(0, char::len_utf8)
}

fn normalized_find(haystack: &str, quote: &str) -> Option<QuoteMatch> {
    let needle: Vec<char> = normalize(quote).chars().collect();
    if needle.is_empty() {
        return None;
    }
    let (chars, offsets) = normalized_chars(haystack);
    if chars.len() < needle.len() {
        return None;
    }

    for window_start in 0..=(chars.len() - needle.len()) {
        if chars[window_start..window_start + needle.len()] == needle[..] {
            let start = offsets[window_start];
            let end = end_offset_of(haystack, offsets[window_start + needle.len() - 1]);
            return Some(QuoteMatch {
                start,
                end,
                score: 1.0,
            });
        }
    }
    None
}

fn fuzzy_scan(haystack: &str, quote: &str, step: usize) -> Option<QuoteMatch> {
    let needle = normalize(quote);
    let needle_len = needle.chars().count();
    if needle_len == 0 {
        return None;
    }
    let (chars, offsets) = normalized_chars(haystack);

    if chars.len() <= needle_len {
        let window: String = chars.iter().collect();
        let score = strsim::normalized_levenshtein(&window, &needle);
        return Some(QuoteMatch {
            start: 0,
            end: haystack.len(),
            score,
        });
    }

    // Coarse pass at the configured step, then a step-1 refinement around the
    // best coarse hit so the span aligns tightly.
    let score_at = |window_start: usize| {
        let window: String = chars[window_start..window_start + needle_len].iter().collect();
        strsim::normalized_levenshtein(&window, &needle)
    };

    let last_start = chars.len() - needle_len;
    let mut best_start = 0;
    let mut best_score = f64::MIN;
    let mut window_start = 0;
    loop {
        let score = score_at(window_start);
        if score > best_score {
            best_score = score;
            best_start = window_start;
        }
        if window_start == last_start || best_score >= 0.999 {
            break;
        }
        window_start = (window_start + step).min(last_start);
    }

    if best_score < 0.999 {
        let refine_from = best_start.saturating_sub(step);
        let refine_to = (best_start + step).min(last_start);
        for candidate in refine_from..=refine_to {
            let score = score_at(candidate);
            if score > best_score {
                best_score = score;
                best_start = candidate;
            }
        }
    }

    let start = offsets[best_start];
    let end = end_offset_of(haystack, offsets[best_start + needle_len - 1]);
    Some(QuoteMatch {
        start,
        end,
        score: best_score,
    })
}
