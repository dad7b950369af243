//! Label and quote normalization for corpus consolidation.
//!
//! Normalized labels are the grouping key and the input to deterministic
//! canonical ids, so the rules here are deliberately conservative: casefold,
//! collapse whitespace, strip surrounding punctuation, and undo trivial
//! plurals. Anything smarter (stemming, synonym tables) belongs in pass 2.

use uuid::Uuid;

use crate::types::CanonicalId;

/// Fixed namespace for canonical-concept UUID v5 derivation. Changing it
/// would re-key every canonical concept in every deployment.
const LABEL_NAMESPACE: Uuid = Uuid::from_u128(0x6f54_c3a1_9b42_4e18_a7d0_5c21_88e4_31fa);

/// Normalize a concept label for grouping and id derivation.
#[must_use]
pub fn normalize_label(label: &str) -> String {
    label
        .split_whitespace()
        .map(|word| {
            let word = word
                .trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase();
            singularize(&word)
        })
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Strip a trivial plural `s`. Words ending in `ss`, `us`, or `is` are left
/// alone ("access", "status", "analysis").
fn singularize(word: &str) -> String {
    if word.len() > 3
        && word.ends_with('s')
        && !word.ends_with("ss")
        && !word.ends_with("us")
        && !word.ends_with("is")
    {
        word[..word.len() - 1].to_string()
    } else {
        word.to_string()
    }
}

/// Derive the deterministic canonical id for a normalized label.
///
/// UUID v5 over the label bytes: promoting the same corpus twice yields the
/// same ids, which is what makes re-promotion idempotent.
#[must_use]
pub fn canonical_id(normalized_label: &str) -> CanonicalId {
    CanonicalId::from(Uuid::new_v5(&LABEL_NAMESPACE, normalized_label.as_bytes()))
}

/// Normalize an evidence quote for boilerplate detection: casefold and
/// collapse whitespace, nothing else.
#[must_use]
pub fn normalize_quote(quote: &str) -> String {
    quote.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_normalize_case_whitespace_and_plurals() {
        assert_eq!(
            normalize_label("  Audit   Logs "),
            normalize_label("audit log")
        );
        assert_eq!(normalize_label("Access Controls,"), "access control");
        assert_eq!(normalize_label("Analysis"), "analysis");
    }

    #[test]
    fn short_and_suffix_protected_words_keep_their_s() {
        assert_eq!(normalize_label("DPIAs"), "dpia");
        assert_eq!(normalize_label("access"), "access");
        assert_eq!(normalize_label("status"), "status");
        assert_eq!(normalize_label("gas"), "gas");
    }

    #[test]
    fn canonical_ids_are_deterministic_and_label_sensitive() {
        let a = canonical_id("audit log");
        let b = canonical_id("audit log");
        let c = canonical_id("access control");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn quotes_collapse_whitespace_only() {
        assert_eq!(
            normalize_quote("The system  SHALL enforce\naccess control."),
            "the system shall enforce access control."
        );
    }
}
