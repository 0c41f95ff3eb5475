//! # postcoord-core
//!
//! The repository layer for post-coordinated SNOMED CT expressions.
//!
//! This crate turns compositional grammar expressions into a deduplicated
//! concept graph and persists them all-or-nothing:
//! - `expression`: the canonical, order-independent expression model
//! - `pipeline`: the per-input state machine (parse, dedup lookup,
//!   validate/transform, classify, humanize)
//! - `materializer`: concept graph construction with two-tier deduplication
//! - `repository`: batch orchestration over a single commit
//!
//! ## Architectural Constraints
//!
//! - Parsing, validation, classification, terms and identifiers are
//!   collaborators behind traits
//! - Deterministic: BTreeMap/BTreeSet only, no floats
//! - Single-threaded within a batch; commits are exclusive per branch
//! - Has NO async, NO network dependencies (pure Rust)

// =============================================================================
// MODULES
// =============================================================================

pub mod classify;
pub mod expression;
pub mod formats;
pub mod identifiers;
pub mod materializer;
pub mod pipeline;
pub mod primitives;
pub mod record;
pub mod repository;
pub mod sctid;
pub mod storage;
pub mod store;
pub mod terms;
pub mod types;
pub mod validation;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    Concept, ConceptDefinitionStatus, ConceptId, ReferenceSetMember, Relationship,
    RelationshipSet, RelationshipShape, RepositoryError, relationship_fingerprint,
    strip_whitespace,
};

// =============================================================================
// RE-EXPORTS: Expression Model
// =============================================================================

pub use expression::{
    Attribute, AttributeGroup, AttributeValue, CanonicalExpression, DefinitionStatus,
    ExpressionParser, ScgParser,
};

// =============================================================================
// RE-EXPORTS: Collaborators
// =============================================================================

pub use classify::{ClassificationRequest, Classifier, PassThroughClassifier};
pub use identifiers::{IdentifierSource, SequentialIdentifierSource};
pub use terms::{ConceptTerms, ConfiguredTerms, TermSource};
pub use validation::{
    AttributeRange, ConceptHierarchy, ExpressionContext, ExpressionTransformer, RangeValidator,
};

// =============================================================================
// RE-EXPORTS: Repository
// =============================================================================

pub use materializer::{ConceptGraphMaterializer, ExpressionIdCache, concept_to_expression};
pub use pipeline::{ExpressionPipeline, ProcessingStage, StageTimer};
pub use record::{ExpressionOutcome, FailedExpression, PostCoordinatedExpression};
pub use repository::{ExpressionRepository, PendingWrites, WriteSummary};
pub use storage::RedbStore;
pub use store::{Commit, CommitStats, ExpressionStore, MemoryStore};
