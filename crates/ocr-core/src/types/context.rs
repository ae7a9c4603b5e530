use serde::{Deserialize, Serialize};
use std::fmt;

use crate::crypto::{hash_blake3, PublicKey};
use crate::error::CoreError;
use crate::serialize;

/// Leadership term number
pub type Epoch = u64;

/// Report attempt number within an epoch
pub type Round = u64;

/// Index of an oracle within its committee (0..N-1)
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct OracleId(pub u8);

impl OracleId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for OracleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OracleId({})", self.0)
    }
}

impl fmt::Display for OracleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "oracle#{}", self.0)
    }
}

/// 16-byte identifier of one committee configuration
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct ConfigDigest(pub [u8; 16]);

impl ConfigDigest {
    /// Derive the digest from the committee's keys (in oracle order), the
    /// fault bound, and a free-form label naming the report destination
    pub fn compute(keys: &[PublicKey], f: u8, label: &str) -> Result<Self, CoreError> {
        let bytes = serialize::to_bytes(&("ocr-config-digest", keys, f, label))?;
        let hash = hash_blake3(&bytes);
        let mut digest = [0u8; 16];
        digest.copy_from_slice(&hash.as_bytes()[..16]);
        Ok(ConfigDigest(digest))
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    pub fn from_hex(s: &str) -> Result<Self, CoreError> {
        let bytes = hex::decode(s)?;
        let digest: [u8; 16] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| CoreError::InvalidDigestLength)?;
        Ok(ConfigDigest(digest))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for ConfigDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConfigDigest({})", self.to_hex())
    }
}

impl fmt::Display for ConfigDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// (config digest, epoch, round) triple bound into every signature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReportingContext {
    pub config_digest: ConfigDigest,
    pub epoch: Epoch,
    pub round: Round,
}

impl ReportingContext {
    pub fn new(config_digest: ConfigDigest, epoch: Epoch, round: Round) -> Self {
        ReportingContext {
            config_digest,
            epoch,
            round,
        }
    }
}

impl fmt::Display for ReportingContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/e{}/r{}", self.config_digest, self.epoch, self.round)
    }
}
