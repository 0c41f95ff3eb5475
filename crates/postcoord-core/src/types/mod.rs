//! # Core Type Definitions
//!
//! This module contains the persisted graph types of the repository:
//! - Concept identifiers (`ConceptId`)
//! - Materialized graph nodes (`Concept`, `Relationship`)
//! - Expression reference set members (`ReferenceSetMember`)
//! - Error types (`RepositoryError`)
//!
//! ## Determinism Guarantees
//!
//! All types in this module:
//! - Implement `Ord` for deterministic ordering in `BTreeMap`/`BTreeSet`
//! - Order identifiers the way their decimal text orders, never numerically

use crate::primitives::{DEFINED, ISA, PRIMITIVE};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// =============================================================================
// CONCEPT IDENTIFIER
// =============================================================================

/// A SNOMED CT identifier.
///
/// Ordering follows the decimal text of the identifier, so `421720008`
/// sorts before `7946007`. Canonical forms depend on this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConceptId(pub u64);

/// Smallest identifier length accepted from text input.
const MIN_ID_DIGITS: usize = 6;

/// Largest identifier length accepted from text input.
const MAX_ID_DIGITS: usize = 18;

impl ConceptId {
    /// Get the raw identifier value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Write the decimal digits of this identifier into `buf`, returning the
    /// used tail of the buffer.
    pub(crate) fn digits(self, buf: &mut [u8; 20]) -> &[u8] {
        let mut value = self.0;
        let mut pos = buf.len();
        loop {
            pos -= 1;
            buf[pos] = b'0' + (value % 10) as u8;
            value /= 10;
            if value == 0 {
                break;
            }
        }
        &buf[pos..]
    }
}

impl Ord for ConceptId {
    fn cmp(&self, other: &Self) -> Ordering {
        let mut left = [0u8; 20];
        let mut right = [0u8; 20];
        self.digits(&mut left).cmp(other.digits(&mut right))
    }
}

impl PartialOrd for ConceptId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ConceptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ConceptId {
    type Err = RepositoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.len() < MIN_ID_DIGITS
            || s.len() > MAX_ID_DIGITS
            || !s.bytes().all(|b| b.is_ascii_digit())
            || s.starts_with('0')
        {
            return Err(RepositoryError::InvalidIdentifier(s.to_string()));
        }
        s.parse::<u64>()
            .map(ConceptId)
            .map_err(|_| RepositoryError::InvalidIdentifier(s.to_string()))
    }
}

// =============================================================================
// CONCEPT GRAPH
// =============================================================================

/// Definition status of a materialized concept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ConceptDefinitionStatus {
    /// Necessary conditions only.
    Primitive,
    /// Necessary and sufficient conditions.
    Defined,
}

impl ConceptDefinitionStatus {
    /// The metadata concept identifying this status.
    #[must_use]
    pub const fn concept_id(self) -> ConceptId {
        match self {
            Self::Primitive => PRIMITIVE,
            Self::Defined => DEFINED,
        }
    }
}

/// The part of a relationship that identifies it within its source concept.
///
/// Two concepts have the same definition when their sets of shapes are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RelationshipShape {
    /// 0 for ungrouped relationships, groups count from 1.
    pub group: u32,
    /// Attribute type, or `ISA` for parents.
    pub type_id: ConceptId,
    /// Parent or attribute value.
    pub destination_id: ConceptId,
}

/// Exact relationship-set key used for concept lookup.
pub type RelationshipSet = BTreeSet<RelationshipShape>;

/// A directed, typed, optionally grouped edge of the concept graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Relationship {
    /// Source concept; `None` until the candidate concept receives its id.
    pub source_id: Option<ConceptId>,
    /// Attribute type, or `ISA` for parents.
    pub type_id: ConceptId,
    /// Parent or attribute value.
    pub destination_id: ConceptId,
    /// 0 = ungrouped.
    pub group: u32,
}

impl Relationship {
    /// An `ISA` relationship to a parent concept.
    #[must_use]
    pub const fn is_a(parent: ConceptId) -> Self {
        Self::new(ISA, parent, 0)
    }

    /// A relationship without a source.
    #[must_use]
    pub const fn new(type_id: ConceptId, destination_id: ConceptId, group: u32) -> Self {
        Self {
            source_id: None,
            type_id,
            destination_id,
            group,
        }
    }

    /// The source-independent part of this relationship.
    #[must_use]
    pub const fn shape(&self) -> RelationshipShape {
        RelationshipShape {
            group: self.group,
            type_id: self.type_id,
            destination_id: self.destination_id,
        }
    }
}

/// A materialized concept: one node of the expression graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Concept {
    /// Assigned when the concept is minted.
    pub id: Option<ConceptId>,
    pub module_id: ConceptId,
    pub definition_status: ConceptDefinitionStatus,
    pub relationships: BTreeSet<Relationship>,
}

impl Concept {
    /// Create a candidate concept with no id and no relationships.
    #[must_use]
    pub fn candidate(module_id: ConceptId, definition_status: ConceptDefinitionStatus) -> Self {
        Self {
            id: None,
            module_id,
            definition_status,
            relationships: BTreeSet::new(),
        }
    }

    /// Add a relationship to the candidate.
    pub fn add_relationship(&mut self, relationship: Relationship) {
        self.relationships.insert(relationship);
    }

    /// Assign the identifier to the concept and as source of every relationship.
    pub fn assign_id(&mut self, id: ConceptId) {
        self.id = Some(id);
        self.relationships = std::mem::take(&mut self.relationships)
            .into_iter()
            .map(|r| Relationship {
                source_id: Some(id),
                ..r
            })
            .collect();
    }

    /// The relationship set used for exact-match lookup.
    #[must_use]
    pub fn relationship_set(&self) -> RelationshipSet {
        self.relationships.iter().map(Relationship::shape).collect()
    }
}

/// Render a relationship set as a stable text key.
///
/// Used by storage backends that need a scalar index key.
#[must_use]
pub fn relationship_fingerprint(set: &RelationshipSet) -> String {
    let mut out = String::new();
    for (i, shape) in set.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&format!(
            "{}:{}={}",
            shape.group, shape.type_id, shape.destination_id
        ));
    }
    out
}

// =============================================================================
// REFERENCE SET MEMBER
// =============================================================================

/// An expression reference set member.
///
/// Two members are written per persisted expression: one in the canonical
/// close-to-user form reference set and one in the classifiable form set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceSetMember {
    pub module_id: ConceptId,
    pub refset_id: ConceptId,
    pub referenced_component_id: ConceptId,
    /// Canonical expression text with all whitespace removed.
    pub expression: String,
    pub active: bool,
}

impl ReferenceSetMember {
    /// Create an active member. Whitespace is stripped from `expression`.
    #[must_use]
    pub fn new(
        module_id: ConceptId,
        refset_id: ConceptId,
        referenced_component_id: ConceptId,
        expression: &str,
    ) -> Self {
        Self {
            module_id,
            refset_id,
            referenced_component_id,
            expression: strip_whitespace(expression),
            active: true,
        }
    }
}

/// Remove every whitespace character from `text`.
#[must_use]
pub fn strip_whitespace(text: &str) -> String {
    text.chars().filter(|c| !c.is_whitespace()).collect()
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur in the repository.
///
/// - No silent failures
/// - Use `Result<T, RepositoryError>` for fallible operations
/// - Per-expression errors are stored on that expression's outcome, so the
///   type is `Clone` and carries text payloads only
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
pub enum RepositoryError {
    /// The expression text does not follow the compositional grammar.
    #[error("Failed to parse expression: {0}")]
    Parse(String),

    /// A modeling rule rejected the expression. The message is user facing.
    #[error("{0}")]
    Validation(String),

    /// The classifier could not compute a necessary normal form.
    #[error("Classification failed: {0}")]
    Classification(String),

    /// No identifier could be reserved.
    #[error("Identifier allocation failed: {0}")]
    IdentifierAllocation(String),

    /// A store lookup or write failed.
    #[error("Store error: {0}")]
    Store(String),

    /// A commit is already open on the branch.
    #[error("Branch {0} already has an open commit")]
    BranchLocked(String),

    /// A batch exceeded `MAX_BATCH_SIZE`.
    #[error("Batch of {0} expressions exceeds the maximum batch size")]
    BatchTooLarge(usize),

    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// An identifier is malformed or fails its check digit.
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(String),
}

impl RepositoryError {
    /// Whether this error aborts a whole batch call rather than a single
    /// expression.
    #[must_use]
    pub fn is_batch_fatal(&self) -> bool {
        matches!(
            self,
            Self::IdentifierAllocation(_)
                | Self::Store(_)
                | Self::BranchLocked(_)
                | Self::BatchTooLarge(_)
                | Self::Serialization(_)
                | Self::IoError(_)
        )
    }
}

// =============================================================================
// TESTS
// =============================================================================
