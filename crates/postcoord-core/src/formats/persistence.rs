//! # Record Format
//!
//! Binary encoding of persisted concepts and reference set members.
//!
//! Format: Header (5 bytes) + postcard-serialized record.
//! - 4 bytes: Magic ("PCEX")
//! - 1 byte: Version
//!
//! Size and header are validated before the payload is deserialized.

use crate::{RepositoryError, primitives};
use serde::Serialize;
use serde::de::DeserializeOwned;

// =============================================================================
// LIMITS
// =============================================================================

/// Maximum size of a single encoded record.
///
/// A concept of a deeply refined expression stays far below this.
pub const MAX_RECORD_SIZE: usize = 4 * 1024 * 1024;

/// Header length in bytes.
const HEADER_SIZE: usize = 5;

// =============================================================================
// RECORD HEADER
// =============================================================================

/// The header that precedes every record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub magic: [u8; 4],
    pub version: u8,
}

impl RecordHeader {
    /// Header for the current format version.
    #[must_use]
    pub fn new() -> Self {
        Self {
            magic: *primitives::MAGIC_BYTES,
            version: primitives::FORMAT_VERSION,
        }
    }

    pub fn validate(&self) -> Result<(), RepositoryError> {
        if &self.magic != primitives::MAGIC_BYTES {
            return Err(RepositoryError::Serialization(
                "Invalid magic bytes".to_string(),
            ));
        }
        if self.version != primitives::FORMAT_VERSION {
            return Err(RepositoryError::Serialization(format!(
                "Unsupported version: {} (expected {})",
                self.version,
                primitives::FORMAT_VERSION
            )));
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0..4].copy_from_slice(&self.magic);
        bytes[4] = self.version;
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RepositoryError> {
        if bytes.len() < HEADER_SIZE {
            return Err(RepositoryError::Serialization(
                "Header too short".to_string(),
            ));
        }
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[0..4]);
        Ok(Self {
            magic,
            version: bytes[4],
        })
    }
}

impl Default for RecordHeader {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// ENCODING
// =============================================================================

/// Encode a record as header + postcard payload.
pub fn encode_record<T: Serialize>(record: &T) -> Result<Vec<u8>, RepositoryError> {
    let payload =
        postcard::to_stdvec(record).map_err(|e| RepositoryError::Serialization(e.to_string()))?;
    if payload.len() + HEADER_SIZE > MAX_RECORD_SIZE {
        return Err(RepositoryError::Serialization(format!(
            "Record of {} bytes exceeds maximum allowed {} bytes",
            payload.len() + HEADER_SIZE,
            MAX_RECORD_SIZE
        )));
    }

    let mut bytes = Vec::with_capacity(HEADER_SIZE + payload.len());
    bytes.extend_from_slice(&RecordHeader::new().to_bytes());
    bytes.extend_from_slice(&payload);
    Ok(bytes)
}

/// Decode a record written by [`encode_record`].
pub fn decode_record<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, RepositoryError> {
    if bytes.len() > MAX_RECORD_SIZE {
        return Err(RepositoryError::Serialization(format!(
            "Record of {} bytes exceeds maximum allowed {} bytes",
            bytes.len(),
            MAX_RECORD_SIZE
        )));
    }
    RecordHeader::from_bytes(bytes)?.validate()?;

    postcard::from_bytes(&bytes[HEADER_SIZE..]).map_err(|e| {
        RepositoryError::Serialization(format!("Failed to deserialize record: {}", e))
    })
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::CLASSIFIABLE_FORM_REFSET;
    use crate::{Concept, ConceptDefinitionStatus, ConceptId, ReferenceSetMember, Relationship};

    #[test]
    fn header_layout() {
        let bytes = RecordHeader::new().to_bytes();
        assert_eq!(&bytes[0..4], b"PCEX");
        assert_eq!(bytes[4], primitives::FORMAT_VERSION);
    }

    #[test]
    fn concept_survives_encoding() {
        let mut concept =
            Concept::candidate(ConceptId(11_000_003_104), ConceptDefinitionStatus::Defined);
        concept.add_relationship(Relationship::is_a(ConceptId(15_497_006)));
        concept.add_relationship(Relationship::new(
            ConceptId(272_741_003),
            ConceptId(24_028_007),
            0,
        ));
        concept.assign_id(ConceptId(11_000_003_162));

        let bytes = encode_record(&concept).expect("encode");
        let decoded: Concept = decode_record(&bytes).expect("decode");
        assert_eq!(decoded, concept);
    }

    #[test]
    fn member_encoding_is_deterministic() {
        let member = ReferenceSetMember::new(
            ConceptId(11_000_003_104),
            CLASSIFIABLE_FORM_REFSET,
            ConceptId(11_000_003_162),
            "=== 83152002",
        );
        assert_eq!(
            encode_record(&member).expect("encode"),
            encode_record(&member.clone()).expect("encode")
        );
    }

    #[test]
    fn invalid_magic_rejected() {
        let mut bytes = vec![0u8; 10];
        bytes[0..4].copy_from_slice(b"XXXX");
        let result: Result<Concept, _> = decode_record(&bytes);
        assert!(matches!(result, Err(RepositoryError::Serialization(_))));
    }

    #[test]
    fn truncated_record_rejected() {
        let result: Result<Concept, _> = decode_record(b"PC");
        assert!(result.is_err());
    }
}
