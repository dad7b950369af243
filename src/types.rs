//! Core identifier and vocabulary types for the anchorgraph pipeline.
//!
//! This module defines the typed identifiers used across the pipeline and the
//! closed vocabularies that keep model-produced data inside a validated shape:
//!
//! - Id newtypes ([`DocumentId`], [`ConceptId`], …) wrap [`Uuid`] so that a
//!   chunk id can never be passed where a concept id is expected.
//! - [`SemanticRole`] and [`Predicate`] are closed enums: any string outside
//!   the vocabulary fails to parse, and that single item is discarded rather
//!   than stored as free text.
//! - [`SegmentKind`] is the coarse structural tag produced by the segmenter.
//! - [`StabilityTag`] and [`EnrichmentStatus`] drive corpus promotion and the
//!   pass-2 state machine.
//!
//! # Examples
//!
//! ```
//! use anchorgraph::types::{Predicate, SemanticRole};
//!
//! let p: Predicate = "requires".parse().unwrap();
//! assert_eq!(p.as_str(), "requires");
//! assert!("invented_predicate".parse::<Predicate>().is_err());
//!
//! let role = SemanticRole::parse_lenient("DEFINITION");
//! assert_eq!(role, SemanticRole::Definition);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! id_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generate a fresh random id.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Access the underlying UUID.
            #[must_use]
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }
    };
}

id_newtype!(
    /// Identifies one ingested document.
    DocumentId
);
id_newtype!(
    /// Identifies a tenant owning documents.
    TenantId
);
id_newtype!(
    /// Identifies a structural segment within a document.
    SegmentId
);
id_newtype!(
    /// Identifies a fixed-size retrieval chunk.
    ChunkId
);
id_newtype!(
    /// Identifies a document-scoped proto-concept.
    ConceptId
);
id_newtype!(
    /// Identifies a corpus-level canonical concept.
    ///
    /// Canonical ids are derived deterministically (UUID v5 over the
    /// normalized label) so that re-running corpus promotion on the same
    /// proto-concept set yields the same ids.
    CanonicalId
);

/// Coarse structural type of a segment, assigned by heading/pattern
/// heuristics without any model call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentKind {
    /// Normative requirement text ("shall", numbered requirement sections).
    Requirements,
    /// Definition or glossary material.
    Definition,
    /// Step-by-step procedural text.
    Procedure,
    /// Free-flowing prose.
    Narrative,
    /// Title pages, headers, footers, tables of contents.
    FrontMatter,
    /// An atomic table/diagram region delivered by upstream extractors.
    TableRegion,
    /// Abstracts and summary sections.
    Summary,
}

impl SegmentKind {
    /// Structural weight used by the document scorer; requirements and
    /// definitions carry more signal than summaries or boilerplate.
    #[must_use]
    pub fn score_weight(&self) -> f32 {
        match self {
            SegmentKind::Requirements => 1.0,
            SegmentKind::Definition => 0.9,
            SegmentKind::Procedure => 0.7,
            SegmentKind::TableRegion => 0.6,
            SegmentKind::Narrative => 0.5,
            SegmentKind::Summary => 0.3,
            SegmentKind::FrontMatter => 0.1,
        }
    }
}

impl fmt::Display for SegmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SegmentKind::Requirements => "requirements",
            SegmentKind::Definition => "definition",
            SegmentKind::Procedure => "procedure",
            SegmentKind::Narrative => "narrative",
            SegmentKind::FrontMatter => "front_matter",
            SegmentKind::TableRegion => "table_region",
            SegmentKind::Summary => "summary",
        };
        write!(f, "{s}")
    }
}

/// Semantic role an anchor plays for its concept.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticRole {
    /// The quote defines the concept.
    Definition,
    /// The quote states an obligation involving the concept.
    Requirement,
    /// The quote describes a process the concept participates in.
    Process,
    /// The concept is an actor/party in the quote.
    Actor,
    /// The quote constrains the concept.
    Constraint,
    /// Plain mention without stronger signal.
    Mention,
}

impl SemanticRole {
    /// Roles that count as normative grounding for promotion purposes.
    #[must_use]
    pub fn is_normative(&self) -> bool {
        matches!(self, SemanticRole::Definition | SemanticRole::Requirement)
    }

    /// Parse a model-produced role string, falling back to [`Mention`] for
    /// anything outside the vocabulary. Roles are a soft signal, so an
    /// unknown role degrades rather than rejecting the candidate.
    ///
    /// [`Mention`]: SemanticRole::Mention
    #[must_use]
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "definition" | "defines" => SemanticRole::Definition,
            "requirement" | "obligation" | "mandate" => SemanticRole::Requirement,
            "process" | "procedure" => SemanticRole::Process,
            "actor" | "party" | "role" => SemanticRole::Actor,
            "constraint" | "restriction" => SemanticRole::Constraint,
            _ => SemanticRole::Mention,
        }
    }
}

impl fmt::Display for SemanticRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SemanticRole::Definition => "definition",
            SemanticRole::Requirement => "requirement",
            SemanticRole::Process => "process",
            SemanticRole::Actor => "actor",
            SemanticRole::Constraint => "constraint",
            SemanticRole::Mention => "mention",
        };
        write!(f, "{s}")
    }
}

/// The closed predicate vocabulary for typed relations.
///
/// Relation candidates whose predicate falls outside this vocabulary fail to
/// parse and are discarded individually; the vocabulary is never extended at
/// runtime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    Defines,
    Requires,
    Enables,
    Prevents,
    Causes,
    AppliesTo,
    PartOf,
    DependsOn,
    Mitigates,
    ConflictsWith,
    ExampleOf,
    GovernedBy,
}

impl Predicate {
    /// All predicates, in catalog order. Used to render the vocabulary into
    /// relation-model instructions.
    pub const ALL: [Predicate; 12] = [
        Predicate::Defines,
        Predicate::Requires,
        Predicate::Enables,
        Predicate::Prevents,
        Predicate::Causes,
        Predicate::AppliesTo,
        Predicate::PartOf,
        Predicate::DependsOn,
        Predicate::Mitigates,
        Predicate::ConflictsWith,
        Predicate::ExampleOf,
        Predicate::GovernedBy,
    ];

    /// Wire form of the predicate.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Predicate::Defines => "defines",
            Predicate::Requires => "requires",
            Predicate::Enables => "enables",
            Predicate::Prevents => "prevents",
            Predicate::Causes => "causes",
            Predicate::AppliesTo => "applies_to",
            Predicate::PartOf => "part_of",
            Predicate::DependsOn => "depends_on",
            Predicate::Mitigates => "mitigates",
            Predicate::ConflictsWith => "conflicts_with",
            Predicate::ExampleOf => "example_of",
            Predicate::GovernedBy => "governed_by",
        }
    }
}

impl FromStr for Predicate {
    type Err = UnknownPredicate;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        Predicate::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == normalized)
            .ok_or_else(|| UnknownPredicate(s.to_string()))
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned when a relation candidate names a predicate outside the
/// closed vocabulary.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown predicate '{0}'")]
pub struct UnknownPredicate(pub String);

/// Stability classification of a canonical concept group.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StabilityTag {
    /// Corroborated across occurrences, sections, or documents.
    Stable,
    /// Promoted from a single high-signal occurrence; flagged for review.
    Singleton,
}

impl fmt::Display for StabilityTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StabilityTag::Stable => write!(f, "stable"),
            StabilityTag::Singleton => write!(f, "singleton"),
        }
    }
}

/// Per-document enrichment (pass 2) status.
///
/// Pass 2 is modeled as an explicit state machine rather than background
/// mutation of served state: a document is fully usable from `Pass1Done`
/// onward, and every later transition is observable and retryable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentStatus {
    Pass1Done,
    Pass2Pending,
    Pass2Running,
    Pass2Done,
    Pass2Failed,
    Pass2Skipped,
}

impl EnrichmentStatus {
    /// Whether a transition from `self` to `next` is legal.
    ///
    /// `Pass2Failed` may transition back to `Pass2Pending` (retry);
    /// `Pass2Done` and `Pass2Skipped` are terminal except for an explicit
    /// re-enqueue.
    #[must_use]
    pub fn can_transition_to(&self, next: EnrichmentStatus) -> bool {
        use EnrichmentStatus::*;
        matches!(
            (self, next),
            (Pass1Done, Pass2Pending)
                | (Pass1Done, Pass2Skipped)
                | (Pass2Pending, Pass2Running)
                | (Pass2Pending, Pass2Skipped)
                | (Pass2Running, Pass2Done)
                | (Pass2Running, Pass2Failed)
                | (Pass2Failed, Pass2Pending)
                | (Pass2Done, Pass2Pending)
                | (Pass2Skipped, Pass2Pending)
        )
    }
}

impl fmt::Display for EnrichmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EnrichmentStatus::Pass1Done => "pass1_done",
            EnrichmentStatus::Pass2Pending => "pass2_pending",
            EnrichmentStatus::Pass2Running => "pass2_running",
            EnrichmentStatus::Pass2Done => "pass2_done",
            EnrichmentStatus::Pass2Failed => "pass2_failed",
            EnrichmentStatus::Pass2Skipped => "pass2_skipped",
        };
        write!(f, "{s}")
    }
}
