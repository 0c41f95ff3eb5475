//! # SNOMED CT Identifiers
//!
//! Construction and validation of SCTIDs.
//!
//! An SCTID is `item + [namespace] + partition + check digit`:
//! - Extension partitions (`1x`) carry a seven digit namespace.
//! - International partitions (`0x`) carry no namespace.
//! - The check digit is computed with the Verhoeff algorithm.

use crate::{ConceptId, RepositoryError};

const MULTIPLICATION: [[u8; 10]; 10] = [
    [0, 1, 2, 3, 4, 5, 6, 7, 8, 9],
    [1, 2, 3, 4, 0, 6, 7, 8, 9, 5],
    [2, 3, 4, 0, 1, 7, 8, 9, 5, 6],
    [3, 4, 0, 1, 2, 8, 9, 5, 6, 7],
    [4, 0, 1, 2, 3, 9, 5, 6, 7, 8],
    [5, 9, 8, 7, 6, 0, 4, 3, 2, 1],
    [6, 5, 9, 8, 7, 1, 0, 4, 3, 2],
    [7, 6, 5, 9, 8, 2, 1, 0, 4, 3],
    [8, 7, 6, 5, 9, 3, 2, 1, 0, 4],
    [9, 8, 7, 6, 5, 4, 3, 2, 1, 0],
];

const PERMUTATION: [[u8; 10]; 8] = [
    [0, 1, 2, 3, 4, 5, 6, 7, 8, 9],
    [1, 5, 7, 6, 2, 8, 3, 0, 9, 4],
    [5, 8, 0, 3, 7, 9, 6, 1, 4, 2],
    [8, 9, 1, 6, 0, 4, 3, 5, 2, 7],
    [9, 4, 5, 3, 1, 2, 6, 8, 7, 0],
    [4, 2, 8, 6, 5, 7, 3, 9, 0, 1],
    [2, 7, 9, 3, 8, 0, 6, 4, 1, 5],
    [7, 0, 4, 6, 9, 1, 3, 2, 5, 8],
];

const INVERSE: [u8; 10] = [0, 4, 3, 2, 1, 5, 6, 7, 8, 9];

/// Largest namespace that fits in seven digits.
const MAX_NAMESPACE: u32 = 9_999_999;

/// Compute the Verhoeff check digit for a digit string without check digit.
fn check_digit(digits: &[u8]) -> u8 {
    let mut c = 0u8;
    for (i, d) in digits.iter().rev().enumerate() {
        c = MULTIPLICATION[c as usize][PERMUTATION[(i + 1) % 8][(d - b'0') as usize] as usize];
    }
    INVERSE[c as usize]
}

/// Whether `id` carries a valid Verhoeff check digit.
#[must_use]
pub fn is_valid(id: ConceptId) -> bool {
    let mut buf = [0u8; 20];
    let digits = id.digits(&mut buf);
    if digits.len() < 6 {
        return false;
    }
    let mut c = 0u8;
    for (i, d) in digits.iter().rev().enumerate() {
        c = MULTIPLICATION[c as usize][PERMUTATION[i % 8][(d - b'0') as usize] as usize];
    }
    c == 0
}

/// Validate `id`, returning it unchanged.
pub fn validate(id: ConceptId) -> Result<ConceptId, RepositoryError> {
    if is_valid(id) {
        Ok(id)
    } else {
        Err(RepositoryError::InvalidIdentifier(format!(
            "{id} fails its check digit"
        )))
    }
}

/// The two partition digits of `id`.
pub fn partition_of(id: ConceptId) -> Result<[u8; 2], RepositoryError> {
    let mut buf = [0u8; 20];
    let digits = id.digits(&mut buf);
    if digits.len() < 6 {
        return Err(RepositoryError::InvalidIdentifier(id.to_string()));
    }
    let n = digits.len();
    Ok([digits[n - 3], digits[n - 2]])
}

/// The namespace an identifier was minted in, 0 for the international edition.
///
/// Module identifiers use this to choose where new expression ids are reserved.
pub fn namespace_of(id: ConceptId) -> Result<u32, RepositoryError> {
    let id = validate(id)?;
    let partition = partition_of(id)?;
    if partition[0] != b'1' {
        return Ok(0);
    }
    let mut buf = [0u8; 20];
    let digits = id.digits(&mut buf);
    let n = digits.len();
    if n < 11 {
        return Err(RepositoryError::InvalidIdentifier(format!(
            "{id} is too short for an extension identifier"
        )));
    }
    let namespace = &digits[n - 10..n - 3];
    let mut value = 0u32;
    for d in namespace {
        value = value * 10 + u32::from(d - b'0');
    }
    Ok(value)
}

/// Build an identifier from its item number, namespace and partition.
///
/// `partition` is given in its extension form (for example `"16"`); for
/// namespace 0 the international counterpart (`"06"`) is used.
pub fn build(item: u64, namespace: u32, partition: &str) -> Result<ConceptId, RepositoryError> {
    let bytes = partition.as_bytes();
    if bytes.len() != 2 || !bytes.iter().all(u8::is_ascii_digit) {
        return Err(RepositoryError::InvalidIdentifier(format!(
            "bad partition '{partition}'"
        )));
    }
    if namespace > MAX_NAMESPACE {
        return Err(RepositoryError::InvalidIdentifier(format!(
            "namespace {namespace} exceeds seven digits"
        )));
    }
    if item == 0 {
        return Err(RepositoryError::InvalidIdentifier(
            "item number must be positive".to_string(),
        ));
    }

    let mut text = item.to_string();
    if namespace == 0 {
        text.push('0');
        text.push(bytes[1] as char);
    } else {
        text.push_str(&format!("{namespace:07}"));
        text.push('1');
        text.push(bytes[1] as char);
    }
    if text.len() > 17 {
        return Err(RepositoryError::InvalidIdentifier(format!(
            "item {item} does not fit in an identifier"
        )));
    }
    let check = check_digit(text.as_bytes());
    text.push((b'0' + check) as char);

    text.parse::<u64>()
        .map(ConceptId)
        .map_err(|_| RepositoryError::InvalidIdentifier(text))
}
