//! # Formats
//!
//! Serialization formats for persisted records.

pub mod persistence;

pub use persistence::{MAX_RECORD_SIZE, RecordHeader, decode_record, encode_record};
