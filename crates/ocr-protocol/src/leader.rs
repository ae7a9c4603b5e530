use ocr_core::crypto::hash_parts;
use ocr_core::{ConfigDigest, Epoch, OracleId};

/// Leader of `epoch` in a committee of `n` oracles.
///
/// Pure function of the digest and epoch, so every node computes the same
/// leader without exchanging messages.
pub fn leader_for_epoch(config_digest: &ConfigDigest, epoch: Epoch, n: usize) -> OracleId {
    let n = n.max(1) as u64;
    let seed = hash_parts(&[b"ocr-leader", config_digest.as_bytes(), &epoch.to_le_bytes()]);
    OracleId((seed.prefix_u64() % n) as u8)
}
