use ocr_core::{ConfigDigest, CoreError, Epoch, OracleId, ReportingContext};
use thiserror::Error;

use crate::canonical::CanonicalizeError;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unknown oracle: {0}")]
    UnknownOracle(OracleId),

    #[error("Foreign config digest: {0}")]
    ForeignConfig(ConfigDigest),

    #[error("Context mismatch: expected {expected}, got {got}")]
    ContextMismatch {
        expected: ReportingContext,
        got: ReportingContext,
    },

    #[error("Sender {sender} does not match claimed oracle {claimed}")]
    SenderMismatch { sender: OracleId, claimed: OracleId },

    #[error("Not the leader of epoch {epoch}: expected {expected}, got {got}")]
    WrongLeader {
        epoch: Epoch,
        expected: OracleId,
        got: OracleId,
    },

    #[error("Invalid observation set: {0}")]
    InvalidObservations(String),

    #[error("Report body from {0} does not match the request")]
    BodyMismatch(OracleId),

    #[error("Duplicate signature from {0}")]
    DuplicateSigner(OracleId),

    #[error("Insufficient signatures: have {have}, need {need}")]
    InsufficientSignatures { have: usize, need: usize },

    #[error("Round {round} exceeds the per-epoch maximum {max}")]
    RoundLimit { round: u64, max: u64 },

    #[error("Canonicalization failed: {0}")]
    Canonicalize(#[from] CanonicalizeError),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),
}
