//! Context-bound signing for observations and reports.
//!
//! Every signed payload is a domain-separated hash over the reporting
//! context and the payload bytes, so a signature made for one
//! (digest, epoch, round) never verifies under another.

use std::fmt;

use crate::crypto::hash::{hash_parts, Hash};
use crate::crypto::keys::{PublicKey, SecretKey};
use crate::crypto::signature::{sign, verify, Sig};
use crate::error::CoreError;
use crate::types::{Observation, ObservationValue, OracleId, ReportingContext};

const OBSERVATION_DOMAIN: &[u8] = b"ocr-observation";
const REPORT_DOMAIN: &[u8] = b"ocr-report";

fn signing_payload(domain: &[u8], context: &ReportingContext, payload: &[u8]) -> Hash {
    hash_parts(&[
        domain,
        context.config_digest.as_bytes(),
        &context.epoch.to_le_bytes(),
        &context.round.to_le_bytes(),
        &(payload.len() as u64).to_le_bytes(),
        payload,
    ])
}

/// Public keys of the committee, indexed by oracle id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Committee {
    keys: Vec<PublicKey>,
}

impl Committee {
    pub fn new(keys: Vec<PublicKey>) -> Self {
        Committee { keys }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn keys(&self) -> &[PublicKey] {
        &self.keys
    }

    pub fn contains(&self, oracle_id: OracleId) -> bool {
        oracle_id.index() < self.keys.len()
    }

    pub fn public_key(&self, oracle_id: OracleId) -> Result<&PublicKey, CoreError> {
        self.keys
            .get(oracle_id.index())
            .ok_or(CoreError::UnknownOracle(oracle_id))
    }

    /// Check an observation's signature against its claimed oracle
    pub fn verify_observation(&self, observation: &Observation) -> Result<(), CoreError> {
        let key = self.public_key(observation.oracle_id)?;
        let payload = signing_payload(
            OBSERVATION_DOMAIN,
            &observation.context,
            observation.value.as_bytes(),
        );
        verify(key, payload.as_bytes(), &observation.signature)
    }

    /// Check a report signature over canonical report bytes
    pub fn verify_report(
        &self,
        signer: OracleId,
        context: &ReportingContext,
        report_bytes: &[u8],
        signature: &Sig,
    ) -> Result<(), CoreError> {
        let key = self.public_key(signer)?;
        let payload = signing_payload(REPORT_DOMAIN, context, report_bytes);
        verify(key, payload.as_bytes(), signature)
    }
}

/// The local oracle's signing identity
#[derive(Clone)]
pub struct OracleSigner {
    oracle_id: OracleId,
    secret: SecretKey,
}

impl OracleSigner {
    pub fn new(oracle_id: OracleId, secret: SecretKey) -> Self {
        OracleSigner { oracle_id, secret }
    }

    pub fn oracle_id(&self) -> OracleId {
        self.oracle_id
    }

    pub fn public_key(&self) -> PublicKey {
        self.secret.public_key()
    }

    pub fn sign_observation(
        &self,
        context: &ReportingContext,
        value: ObservationValue,
    ) -> Observation {
        let payload = signing_payload(OBSERVATION_DOMAIN, context, value.as_bytes());
        Observation {
            context: *context,
            signature: sign(&self.secret, payload.as_bytes()),
            value,
            oracle_id: self.oracle_id,
        }
    }

    pub fn sign_report(&self, context: &ReportingContext, report_bytes: &[u8]) -> Sig {
        let payload = signing_payload(REPORT_DOMAIN, context, report_bytes);
        sign(&self.secret, payload.as_bytes())
    }
}

impl fmt::Debug for OracleSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OracleSigner")
            .field("oracle_id", &self.oracle_id)
            .field("public", &self.public_key())
            .finish()
    }
}
