use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroize;

/// Symmetric and agreement keys are raw 32 bytes everywhere inside the SDK.
pub const KEY_LEN: usize = 32;
/// IV length for both AES-256-GCM (message bodies) and AES-256-CBC (headers).
pub const IV_LEN: usize = 16;
/// GCM authentication tag length (128 bit).
pub const TAG_LEN: usize = 16;
/// Salt length for passphrase key derivation.
pub const SALT_LEN: usize = 16;
/// Ed25519 signature length.
pub const SIGNATURE_LEN: usize = 64;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("base64 error: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("invalid key length: {0}")]
    InvalidKeyLen(String),
    #[error("invalid key: {0}")]
    InvalidKey(String),
    #[error("random source unavailable: {0}")]
    Random(String),
    #[error("key derivation failed: {0}")]
    Kdf(String),
    #[error("argon2 error: {0}")]
    Argon2(String),
    /// AEAD tag mismatch. Never accompanied by partial plaintext.
    #[error("authentication failed")]
    Authentication,
    #[error("decryption failed: {0}")]
    Decryption(String),
    /// Passphrase unwrap failed. Deliberately carries no detail.
    #[error("incorrect password")]
    IncorrectPassword,
    #[error("signature verification failed")]
    SignatureVerification,
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("invalid ratchet state: {0}")]
    InvalidState(String),
    #[error("too many skipped messages (max: {max}, requested: {requested})")]
    TooManySkipped { max: u32, requested: u32 },
}

/// Argon2id parameters used to turn a passphrase into a wrapping key.
///
/// The same parameters must be used to unwrap what they wrapped.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Argon2Config {
    /// Memory size in KiB (default: 64 MiB = 65536 KiB)
    pub memory_kib: u32,
    /// Number of iterations (default: 3)
    pub iterations: u32,
    /// Degree of parallelism (default: 4)
    pub parallelism: u32,
}

impl Default for Argon2Config {
    fn default() -> Self {
        // OWASP recommended parameters for password hashing (2023)
        Argon2Config {
            memory_kib: 65536,
            iterations: 3,
            parallelism: 4,
        }
    }
}

/// A raw key pair. Used for both Ed25519 (signing) and X25519 (agreement).
///
/// For Ed25519 `private_key` is the 32-byte seed.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyPair {
    pub private_key: [u8; KEY_LEN],
    pub public_key: [u8; KEY_LEN],
}

impl Drop for KeyPair {
    fn drop(&mut self) {
        self.private_key.zeroize();
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &crate::crypto::b64_encode(&self.public_key))
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Output of an AES-256-GCM encryption with the tag kept detached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AeadCiphertext {
    pub ciphertext: Vec<u8>,
    pub auth_tag: [u8; TAG_LEN],
}
