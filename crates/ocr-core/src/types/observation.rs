use serde::{Deserialize, Serialize};

use crate::crypto::Sig;
use crate::types::context::{OracleId, ReportingContext};

/// Opaque value produced by an oracle's data source
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct ObservationValue(pub Vec<u8>);

impl ObservationValue {
    /// Encode an integer reading as 8 big-endian bytes
    pub fn from_i64(value: i64) -> Self {
        ObservationValue(value.to_be_bytes().to_vec())
    }

    /// Decode an 8-byte big-endian integer reading
    pub fn as_i64(&self) -> Option<i64> {
        let bytes: [u8; 8] = self.0.as_slice().try_into().ok()?;
        Some(i64::from_be_bytes(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// One oracle's signed datum for a round
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    pub context: ReportingContext,
    pub value: ObservationValue,
    pub signature: Sig,
    pub oracle_id: OracleId,
}

impl Observation {
    /// Strip the signature, keeping what goes into a report body
    pub fn to_oracle_value(&self) -> OracleValue {
        OracleValue {
            oracle_id: self.oracle_id,
            value: self.value.clone(),
        }
    }
}

/// An observation without its signature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleValue {
    pub oracle_id: OracleId,
    pub value: ObservationValue,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_encoding() {
        let value = ObservationValue::from_i64(-42);
        assert_eq!(value.as_bytes().len(), 8);
        assert_eq!(value.as_i64(), Some(-42));
    }

    #[test]
    fn test_non_integer_payload() {
        let value = ObservationValue(b"not eight".to_vec());
        assert_eq!(value.as_i64(), None);
    }
}
