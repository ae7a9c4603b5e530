//! OCR Core - Data model, cryptography, and the wire codec
//!
//! This crate provides the types shared by every oracle in a reporting
//! committee: reporting contexts, observations, contract reports, the seven
//! protocol messages, and the context-bound signing scheme.

pub mod crypto;
pub mod error;
pub mod serialize;
pub mod types;

pub use crypto::{
    hash_blake3, sign, verify, Committee, Hash, KeyPair, OracleSigner, PublicKey, SecretKey, Sig,
};
pub use error::CoreError;
pub use types::*;
