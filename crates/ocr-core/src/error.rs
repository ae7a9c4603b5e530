use thiserror::Error;

use crate::types::OracleId;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Invalid public key")]
    InvalidPublicKey,

    #[error("Unknown oracle: {0}")]
    UnknownOracle(OracleId),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Invalid config digest length")]
    InvalidDigestLength,

    #[error("Hex decode error: {0}")]
    HexDecode(#[from] hex::FromHexError),
}
