//! Property coverage for the layout-aware chunker: whatever the mix of prose
//! and atomic regions, no region is ever split and the chunk sequence stays
//! ordered and covering.

use anchorgraph::chunking::{HeuristicEstimator, LayoutAwareChunker, validate_chunks};
use anchorgraph::config::ChunkingConfig;
use anchorgraph::types::DocumentId;
use proptest::prelude::*;

fn prose(sentences: usize, seed: usize) -> String {
    (0..sentences)
        .map(|i| {
            format!(
                "Requirement {seed}-{i} covers access control, logging and the review cadence. "
            )
        })
        .collect()
}

fn table(rows: usize) -> String {
    let body: String = (0..rows)
        .map(|i| format!("| control-{i} | owner-{i} | quarterly |\n"))
        .collect();
    format!("<<<TABLE conf=0.9>>>\n{body}<<<END_TABLE>>>")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn atomic_regions_are_never_split(
        lead in 0usize..30,
        rows in 1usize..80,
        tail in 1usize..30,
        budget in 60usize..300,
    ) {
        let text = format!("{}\n\n{}\n\n{}", prose(lead, 1), table(rows), prose(tail, 2));
        let config = ChunkingConfig {
            token_budget: budget,
            overlap_tokens: budget / 8,
        };
        let estimator = HeuristicEstimator;
        let document = DocumentId::new();
        let outcome = LayoutAwareChunker::new(&config, &estimator).chunk(document, &text);

        validate_chunks(document, &outcome.chunks, &outcome.regions).unwrap();

        // Exactly one region, wholly inside some chunk.
        prop_assert_eq!(outcome.regions.len(), 1);
        let region = &outcome.regions[0];
        prop_assert!(
            outcome
                .chunks
                .iter()
                .any(|c| c.char_start <= region.start && region.end <= c.char_end)
        );

        // Ordered starts, spans inside the text, text matches the span.
        for window in outcome.chunks.windows(2) {
            prop_assert!(window[0].char_start < window[1].char_start);
        }
        for chunk in &outcome.chunks {
            prop_assert!(chunk.char_end <= text.len());
            prop_assert_eq!(chunk.text.as_str(), &text[chunk.char_start..chunk.char_end]);
        }

        // The document tail is covered.
        prop_assert_eq!(outcome.chunks.last().unwrap().char_end, text.len());
    }

    #[test]
    fn oversized_count_matches_overbudget_atomic_chunks(
        rows in 1usize..120,
        budget in 60usize..200,
    ) {
        let text = format!("Short intro paragraph.\n\n{}\n\nShort outro paragraph.", table(rows));
        let config = ChunkingConfig {
            token_budget: budget,
            overlap_tokens: 0,
        };
        let estimator = HeuristicEstimator;
        let outcome =
            LayoutAwareChunker::new(&config, &estimator).chunk(DocumentId::new(), &text);

        let overbudget_atomic = outcome
            .chunks
            .iter()
            .filter(|c| {
                c.atomic
                    && anchorgraph::chunking::TokenEstimator::count(&HeuristicEstimator, &c.text)
                        > budget
            })
            .count();
        prop_assert_eq!(outcome.oversized, overbudget_atomic);
    }
}
