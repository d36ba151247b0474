use sha2::{Digest, Sha256};

/// Deterministic one-way function a candidate is tested against.
pub trait HashOracle: Send + Sync + std::fmt::Debug {
    fn hash(&self, plaintext: &str) -> String;
}

/// SHA-256 over the UTF-8 bytes, lowercase hex.
#[derive(Debug, Default, Clone, Copy)]
pub struct Sha256Oracle;

impl HashOracle for Sha256Oracle {
    fn hash(&self, plaintext: &str) -> String {
        hex::encode(Sha256::digest(plaintext.as_bytes()))
    }
}
