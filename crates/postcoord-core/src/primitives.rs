//! # Fixed Primitives
//!
//! Hardcoded constants for the expression repository.
//!
//! These values are compiled into the binary and are immutable at runtime.
//! Reference set and metadata concept identifiers come from the SNOMED CT
//! foundation metadata hierarchy.

use crate::ConceptId;

// =============================================================================
// REFERENCE SETS
// =============================================================================

/// 1119435002 | Canonical close to user form expression reference set |
///
/// - `referencedComponentId`: the generated identifier of the expression
/// - `expression`: the canonical close-to-user form, whitespace removed
pub const CANONICAL_CLOSE_TO_USER_FORM_REFSET: ConceptId = ConceptId(1_119_435_002);

/// 1119468009 | Classifiable form expression reference set |
///
/// - `referencedComponentId`: the same identifier as the close-to-user member
/// - `expression`: the classifiable form, whitespace removed
pub const CLASSIFIABLE_FORM_REFSET: ConceptId = ConceptId(1_119_468_009);

// =============================================================================
// METADATA CONCEPTS
// =============================================================================

/// 116680003 | Is a |
pub const ISA: ConceptId = ConceptId(116_680_003);

/// 900000000000073002 | Defined |
pub const DEFINED: ConceptId = ConceptId(900_000_000_000_073_002);

/// 900000000000074008 | Primitive |
pub const PRIMITIVE: ConceptId = ConceptId(900_000_000_000_074_008);

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Partition for post-coordinated expression identifiers in an extension.
pub const EXPRESSION_PARTITION: &str = "16";

/// Namespace used for throwaway identifiers during classification.
pub const DEMO_NAMESPACE: u32 = 1_000_003;

// =============================================================================
// BATCHING
// =============================================================================

/// Pending write count at which queued concepts and members are flushed
/// to the open commit.
pub const FLUSH_THRESHOLD: usize = 100;

/// Maximum number of expressions accepted in one batch call.
pub const MAX_BATCH_SIZE: usize = 10_000;

// =============================================================================
// INPUT VALIDATION LIMITS
// =============================================================================

/// Maximum length of a single input expression in bytes.
pub const MAX_EXPRESSION_LENGTH: usize = 65_536;

/// Maximum depth of nested sub-expressions accepted by the parser.
///
/// Bounds recursion in parsing, ordering and materialization.
pub const MAX_NESTING_DEPTH: usize = 32;

// =============================================================================
// PERSISTENCE FORMAT
// =============================================================================

/// Magic bytes preceding every persisted record.
pub const MAGIC_BYTES: &[u8; 4] = b"PCEX";

/// Current record format version.
///
/// Increment this when making breaking changes to persisted records.
pub const FORMAT_VERSION: u8 = 1;
