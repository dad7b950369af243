//! Layout-aware, token-budgeted chunking.
//!
//! The chunker splits a document into fixed-size retrieval chunks with
//! overlap. It is deliberately ignorant of concepts — chunk boundaries are a
//! function of layout and budget only, which keeps retrieval volumetrics
//! predictable. Two rules govern layout:
//!
//! - atomic regions (tables, figures) are never split across chunks; a region
//!   larger than the budget is emitted as a single oversized chunk,
//! - overlap never crosses an atomic boundary — the chunk after a standalone
//!   region starts immediately behind it.
//!
//! [`validate_chunks`] re-checks the atomicity property after the fact and is
//! wired into the pipeline as a release-blocking assertion.

use tracing::debug;

use super::regions::{AtomicRegion, scan_atomic_regions};
use super::tokenizer::TokenEstimator;
use crate::config::ChunkingConfig;
use crate::error::PipelineError;
use crate::model::DocumentChunk;
use crate::types::{ChunkId, DocumentId};

/// Result of chunking one document.
#[derive(Clone, Debug)]
pub struct ChunkingOutcome {
    pub chunks: Vec<DocumentChunk>,
    /// The atomic regions detected in the text, for downstream validation.
    pub regions: Vec<AtomicRegion>,
    /// Chunks that exceeded the token budget because an atomic region did.
    pub oversized: usize,
}

/// A maximal span that chunking will not subdivide further.
#[derive(Clone, Copy, Debug)]
struct Unit {
    start: usize,
    end: usize,
    atomic: bool,
}

/// Splits document text into budgeted chunks around atomic regions.
pub struct LayoutAwareChunker<'a> {
    config: &'a ChunkingConfig,
    estimator: &'a dyn TokenEstimator,
}

impl<'a> LayoutAwareChunker<'a> {
    pub fn new(config: &'a ChunkingConfig, estimator: &'a dyn TokenEstimator) -> Self {
        Self { config, estimator }
    }

    /// Chunk `text` for `document`. Empty text yields zero chunks.
    #[must_use]
    pub fn chunk(&self, document: DocumentId, text: &str) -> ChunkingOutcome {
        if text.trim().is_empty() {
            return ChunkingOutcome {
                chunks: Vec::new(),
                regions: Vec::new(),
                oversized: 0,
            };
        }

        let regions = scan_atomic_regions(text);
        let units = self.units(text, &regions);

        let budget = self.config.token_budget;
        let mut chunks: Vec<DocumentChunk> = Vec::new();
        let mut oversized = 0;

        // Current buffer of contiguous non-atomic units.
        let mut buffer: Option<(usize, usize, usize)> = None; // (start, end, tokens)
        let mut overlap_barrier = 0; // overlap may not reach before this offset

        let mut flush =
            |buffer: &mut Option<(usize, usize, usize)>, chunks: &mut Vec<DocumentChunk>| {
                if let Some((start, end, _)) = buffer.take() {
                    push_chunk(chunks, document, text, start, end, false);
                }
            };

        for unit in units {
            let unit_tokens = self.estimator.count(&text[unit.start..unit.end]);

            if unit.atomic {
                let fits_in_buffer = buffer
                    .map(|(_, _, tokens)| tokens + unit_tokens <= budget)
                    .unwrap_or(unit_tokens <= budget);

                if fits_in_buffer && buffer.is_some() {
                    // Small region rides along inside the current text chunk.
                    let (start, _, _) = buffer.take().expect("buffer checked above");
                    push_chunk(&mut chunks, document, text, start, unit.end, true);
                } else {
                    flush(&mut buffer, &mut chunks);
                    if unit_tokens > budget {
                        oversized += 1;
                        debug!(
                            tokens = unit_tokens,
                            budget, "atomic region exceeds budget; emitting oversized chunk"
                        );
                    }
                    push_chunk(&mut chunks, document, text, unit.start, unit.end, true);
                }
                overlap_barrier = unit.end;
                continue;
            }

            match buffer {
                None => {
                    let start = self.overlap_start(text, &chunks, unit.start, overlap_barrier);
                    let tokens = self.estimator.count(&text[start..unit.end]);
                    buffer = Some((start, unit.end, tokens));
                }
                Some((start, _end, tokens)) => {
                    if tokens + unit_tokens > budget {
                        flush(&mut buffer, &mut chunks);
                        let new_start =
                            self.overlap_start(text, &chunks, unit.start, overlap_barrier);
                        let new_tokens = self.estimator.count(&text[new_start..unit.end]);
                        buffer = Some((new_start, unit.end, new_tokens));
                    } else {
                        buffer = Some((start, unit.end, tokens + unit_tokens));
                    }
                }
            }
        }
        flush(&mut buffer, &mut chunks);

        ChunkingOutcome {
            chunks,
            regions,
            oversized,
        }
    }

    /// Where the next chunk should start: backed up into the tail of the
    /// previous chunk by roughly `overlap_tokens`, clamped at the last atomic
    /// boundary.
    fn overlap_start(
        &self,
        text: &str,
        chunks: &[DocumentChunk],
        unit_start: usize,
        barrier: usize,
    ) -> usize {
        let Some(previous) = chunks.last() else {
            return unit_start;
        };
        if self.config.overlap_tokens == 0 || previous.char_end <= barrier || previous.atomic {
            return unit_start;
        }

        // Walk back whitespace-delimited words until the overlap budget is
        // spent; cheap and independent of unit boundaries.
        let tail = &text[previous.char_start.max(barrier)..previous.char_end];
        let mut candidate = previous.char_end;
        for (offset, _) in tail.char_indices().rev() {
            let absolute = previous.char_start.max(barrier) + offset;
            if self.estimator.count(&text[absolute..previous.char_end])
                >= self.config.overlap_tokens
            {
                candidate = absolute;
                break;
            }
        }
        // Snap forward to a word boundary.
        let snapped = text[candidate..]
            .find(char::is_whitespace)
            .map(|ws| candidate + ws + 1)
            .unwrap_or(candidate);
        snapped.min(unit_start)
    }

    /// Build the unit list: atomic regions verbatim, the text between them
    /// split into paragraphs (and further into sentences or raw windows when
    /// a paragraph alone exceeds the budget).
    fn units(&self, text: &str, regions: &[AtomicRegion]) -> Vec<Unit> {
        let mut units = Vec::new();
        let mut cursor = 0;

        for region in regions {
            if region.start > cursor {
                self.push_text_units(text, cursor, region.start, &mut units);
            }
            units.push(Unit {
                start: region.start,
                end: region.end,
                atomic: true,
            });
            cursor = region.end;
        }
        if cursor < text.len() {
            self.push_text_units(text, cursor, text.len(), &mut units);
        }
        units
    }

    fn push_text_units(&self, text: &str, start: usize, end: usize, units: &mut Vec<Unit>) {
        let slice = &text[start..end];

        for (p_start, p_end) in split_keeping_offsets(slice, "\n\n") {
            if slice[p_start..p_end].trim().is_empty() {
                continue;
            }
            if self.estimator.count(&slice[p_start..p_end]) <= self.config.token_budget {
                units.push(Unit {
                    start: start + p_start,
                    end: start + p_end,
                    atomic: false,
                });
            } else {
                self.push_sentence_units(text, start + p_start, start + p_end, units);
            }
        }
    }

    fn push_sentence_units(&self, text: &str, start: usize, end: usize, units: &mut Vec<Unit>) {
        let slice = &text[start..end];
        let mut unit_start = 0;
        let mut last_break = None;

        let bytes = slice.as_bytes();
        for index in 0..bytes.len() {
            let is_break = matches!(bytes[index], b'.' | b'!' | b'?' | b'\n')
                && bytes
                    .get(index + 1)
                    .is_none_or(|next| next.is_ascii_whitespace());
            if is_break {
                last_break = Some(index + 1);
            }
            let over_budget = self
                .estimator
                .count(&slice[unit_start..=index.min(bytes.len() - 1)])
                > self.config.token_budget;
            if over_budget {
                let cut = last_break.filter(|b| *b > unit_start).unwrap_or_else(|| {
                    // No sentence break available: hard cut at a char boundary.
                    let mut cut = index;
                    while cut > unit_start && !slice.is_char_boundary(cut) {
                        cut -= 1;
                    }
                    cut.max(unit_start + 1)
                });
                units.push(Unit {
                    start: start + unit_start,
                    end: start + cut,
                    atomic: false,
                });
                unit_start = cut;
                last_break = None;
            }
        }
        if unit_start < slice.len() {
            units.push(Unit {
                start: start + unit_start,
                end,
                atomic: false,
            });
        }
    }
}

fn push_chunk(
    chunks: &mut Vec<DocumentChunk>,
    document: DocumentId,
    text: &str,
    start: usize,
    end: usize,
    atomic: bool,
) {
    let index = chunks.len();
    chunks.push(DocumentChunk {
        id: ChunkId::new(),
        document,
        index,
        char_start: start,
        char_end: end,
        text: text[start..end].to_string(),
        atomic,
    });
}

fn split_keeping_offsets<'a>(text: &'a str, separator: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut cursor = 0;
    while let Some(found) = text[cursor..].find(separator) {
        spans.push((cursor, cursor + found));
        cursor += found + separator.len();
    }
    spans.push((cursor, text.len()));
    spans
}

/// Release-blocking assertion: no atomic region spans two chunks.
///
/// Every region must be fully contained in each chunk that touches it; a
/// chunk that overlaps a region only partially has split it.
pub fn validate_chunks(
    document: DocumentId,
    chunks: &[DocumentChunk],
    regions: &[AtomicRegion],
) -> Result<(), PipelineError> {
    for region in regions {
        for (index, chunk) in chunks.iter().enumerate() {
            let overlaps = region.overlaps(chunk.char_start, chunk.char_end);
            if overlaps && !chunk.contains_span(region.start, region.end) {
                let second = chunks
                    .get(index + 1)
                    .map(|next| next.id)
                    .unwrap_or(chunk.id);
                return Err(PipelineError::AtomicRegionSplit {
                    document,
                    first: chunk.id,
                    second,
                });
            }
        }
    }
    Ok(())
}
