use ocr_core::{serialize, OracleId, OracleValue};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CanonicalizeError {
    #[error("No values to aggregate")]
    Empty,

    #[error("Value from {0} is not an integer reading")]
    Malformed(OracleId),

    #[error("Encoding failed: {0}")]
    Encoding(String),
}

/// Turns the ordered per-oracle values of a round into report bytes.
///
/// Must be deterministic: every honest oracle recomputes the bytes from the
/// same list and only signs when it arrives at the same result.
pub trait Canonicalizer: Send + Sync {
    fn canonicalize(&self, values: &[OracleValue]) -> Result<Vec<u8>, CanonicalizeError>;
}

/// Report body produced by [`MedianCanonicalizer`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MedianReport {
    /// Contributing oracles, permuted together with `observations` so that
    /// `observers[i]` reported `observations[i]`
    pub observers: Vec<OracleId>,
    /// Readings sorted ascending, ties broken by oracle id
    pub observations: Vec<i64>,
    pub median: i64,
}

impl MedianReport {
    pub fn decode(bytes: &[u8]) -> Result<Self, CanonicalizeError> {
        serialize::from_bytes(bytes).map_err(|e| CanonicalizeError::Encoding(e.to_string()))
    }
}

/// Aggregates 8-byte integer readings into their median
#[derive(Debug, Default, Clone, Copy)]
pub struct MedianCanonicalizer;

impl Canonicalizer for MedianCanonicalizer {
    fn canonicalize(&self, values: &[OracleValue]) -> Result<Vec<u8>, CanonicalizeError> {
        if values.is_empty() {
            return Err(CanonicalizeError::Empty);
        }

        let mut pairs = values
            .iter()
            .map(|v| {
                v.value
                    .as_i64()
                    .map(|reading| (reading, v.oracle_id))
                    .ok_or(CanonicalizeError::Malformed(v.oracle_id))
            })
            .collect::<Result<Vec<_>, _>>()?;
        pairs.sort_unstable();

        let (observations, observers): (Vec<i64>, Vec<OracleId>) = pairs.into_iter().unzip();
        let report = MedianReport {
            observers,
            median: observations[observations.len() / 2],
            observations,
        };

        serialize::to_bytes(&report).map_err(|e| CanonicalizeError::Encoding(e.to_string()))
    }
}
