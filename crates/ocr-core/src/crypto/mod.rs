pub mod hash;
pub mod keys;
pub mod signature;
pub mod signing;

pub use hash::{hash_blake3, hash_parts, Hash};
pub use keys::{KeyPair, PublicKey, SecretKey};
pub use signature::{sign, verify, Sig};
pub use signing::{Committee, OracleSigner};
