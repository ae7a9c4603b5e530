use bincode::Options;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Serialize to deterministic bincode bytes
pub fn to_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, CoreError> {
    bincode::serialize(value).map_err(|e| CoreError::Serialization(e.to_string()))
}

/// Deserialize from bincode bytes
pub fn from_bytes<'a, T: Deserialize<'a>>(bytes: &'a [u8]) -> Result<T, CoreError> {
    bincode::deserialize(bytes).map_err(|e| CoreError::Deserialization(e.to_string()))
}

fn bounded(limit: u64) -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .reject_trailing_bytes()
        .with_limit(limit)
}

/// Serialize to bincode bytes, failing if the output would exceed `limit`
pub fn to_bounded_bytes<T: Serialize>(value: &T, limit: u64) -> Result<Vec<u8>, CoreError> {
    bounded(limit)
        .serialize(value)
        .map_err(|e| CoreError::Serialization(e.to_string()))
}

/// Deserialize untrusted bincode bytes, bounding allocations by `limit`
/// and rejecting trailing garbage
pub fn from_bounded_bytes<'a, T: Deserialize<'a>>(
    bytes: &'a [u8],
    limit: u64,
) -> Result<T, CoreError> {
    bounded(limit)
        .deserialize(bytes)
        .map_err(|e| CoreError::Deserialization(e.to_string()))
}
