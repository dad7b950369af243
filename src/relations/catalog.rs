//! Concept catalog assembly for relation windows.
//!
//! The relation model may only relate concepts it is explicitly handed, so
//! the catalog is the whole vocabulary of a window call. It is built from
//! three sources, strongest first:
//!
//! 1. concepts anchored inside the window (always included),
//! 2. the document's top-ranked concepts as weak context,
//! 3. a lexical fallback — concepts whose label literally appears in the
//!    window text — used only when almost nothing is anchored, and logged,
//!    because it signals the anchor pass missed material.
//!
//! The catalog is hard-capped; overflow is truncated, never an error.

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::warn;

use crate::config::RelationConfig;
use crate::model::ProtoConcept;
use crate::promotion::normalize_label;
use crate::providers::CatalogEntry;
use crate::scoring::ConceptScore;
use crate::types::ConceptId;

/// Build the catalog for one window.
///
/// `anchored` are the concept ids with an anchor inside the window, in
/// document order; `ranking` is the document-level importance ranking.
#[must_use]
pub fn build_catalog(
    window_text: &str,
    anchored: &[ConceptId],
    protos_by_id: &FxHashMap<ConceptId, &ProtoConcept>,
    ranking: &[ConceptScore],
    config: &RelationConfig,
) -> Vec<CatalogEntry> {
    let mut seen: FxHashSet<ConceptId> = FxHashSet::default();
    let mut catalog: Vec<CatalogEntry> = Vec::new();

    let mut push = |id: ConceptId, catalog: &mut Vec<CatalogEntry>, seen: &mut FxHashSet<ConceptId>| {
        if catalog.len() >= config.catalog_max || !seen.insert(id) {
            return;
        }
        if let Some(proto) = protos_by_id.get(&id) {
            catalog.push(CatalogEntry {
                id,
                label: proto.label.clone(),
            });
        }
    };

    for &id in anchored {
        push(id, &mut catalog, &mut seen);
    }

    for score in ranking.iter().take(config.frequent_concepts) {
        push(score.concept, &mut catalog, &mut seen);
    }

    if anchored.len() < config.lexical_fallback_below {
        let window_lower = window_text.to_lowercase();
        let mut added = 0usize;
        for score in ranking {
            if catalog.len() >= config.catalog_max {
                break;
            }
            let Some(proto) = protos_by_id.get(&score.concept) else {
                continue;
            };
            let needle = normalize_label(&proto.label);
            if !needle.is_empty() && window_lower.contains(&needle) && seen.insert(score.concept) {
                catalog.push(CatalogEntry {
                    id: score.concept,
                    label: proto.label.clone(),
                });
                added += 1;
            }
        }
        if added > 0 {
            warn!(
                anchored = anchored.len(),
                added, "window is under-anchored; lexical catalog fallback engaged"
            );
        }
    }

    catalog
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Anchor;
    use crate::types::{ChunkId, DocumentId, SemanticRole};

    fn proto(label: &str, document: DocumentId) -> ProtoConcept {
        let id = ConceptId::new();
        ProtoConcept::new(
            id,
            document,
            label,
            "",
            vec![0.0; 4],
            Anchor {
                concept: id,
                chunk: ChunkId::new(),
                quote: label.into(),
                role: SemanticRole::Mention,
                char_start: 0,
                char_end: label.len(),
                confidence: 0.9,
                approximate: false,
            },
        )
    }

    fn fixture(labels: &[&str]) -> (Vec<ProtoConcept>, Vec<ConceptScore>) {
        let document = DocumentId::new();
        let protos: Vec<ProtoConcept> =
            labels.iter().map(|label| proto(label, document)).collect();
        let ranking = protos
            .iter()
            .enumerate()
            .map(|(i, p)| ConceptScore {
                concept: p.id,
                score: (labels.len() - i) as f64,
            })
            .collect();
        (protos, ranking)
    }

    fn by_id(protos: &[ProtoConcept]) -> FxHashMap<ConceptId, &ProtoConcept> {
        protos.iter().map(|p| (p.id, p)).collect()
    }

    #[test]
    fn anchored_concepts_lead_the_catalog() {
        let (protos, ranking) = fixture(&["Access Control", "Audit Log", "Encryption"]);
        let config = RelationConfig::default();
        let catalog = build_catalog(
            "whatever text",
            &[protos[2].id, protos[1].id],
            &by_id(&protos),
            &ranking,
            &config,
        );
        assert_eq!(catalog[0].label, "Encryption");
        assert_eq!(catalog[1].label, "Audit Log");
        // Frequent concepts follow, deduplicated.
        assert_eq!(catalog.len(), 3);
    }

    #[test]
    fn catalog_is_capped() {
        let labels: Vec<String> = (0..30).map(|i| format!("Concept {i}")).collect();
        let refs: Vec<&str> = labels.iter().map(String::as_str).collect();
        let (protos, ranking) = fixture(&refs);
        let config = RelationConfig {
            catalog_max: 5,
            ..RelationConfig::default()
        };
        let anchored: Vec<ConceptId> = protos.iter().map(|p| p.id).collect();
        let catalog = build_catalog("text", &anchored, &by_id(&protos), &ranking, &config);
        assert_eq!(catalog.len(), 5);
    }

    #[test]
    fn lexical_fallback_finds_labels_in_text() {
        let (protos, ranking) = fixture(&["Incident Response", "Key Rotation"]);
        let config = RelationConfig::default();
        let catalog = build_catalog(
            "the incident response team handles key rotation quarterly",
            &[],
            &by_id(&protos),
            &ranking,
            &config,
        );
        assert_eq!(catalog.len(), 2);
    }

    #[test]
    fn no_fallback_when_well_anchored() {
        let (protos, ranking) = fixture(&["Incident Response", "Key Rotation", "Backup", "Recovery"]);
        let config = RelationConfig {
            frequent_concepts: 0,
            lexical_fallback_below: 3,
            ..RelationConfig::default()
        };
        let anchored: Vec<ConceptId> = protos.iter().take(3).map(|p| p.id).collect();
        let catalog = build_catalog(
            "backup and recovery are discussed here",
            &anchored,
            &by_id(&protos),
            &ranking,
            &config,
        );
        // Only the anchored three; lexical matches are not consulted.
        assert_eq!(catalog.len(), 3);
    }
}
