/// Encrypted message header
///
/// The header carries the sender's ratchet key and counters. It is serialized
/// as JSON and encrypted with AES-256-CBC under the sender's header key, so
/// none of that metadata travels in the clear inside the ciphertext.

use serde::{Deserialize, Serialize};

use crate::crypto::{b64_serde, cbc_decrypt, cbc_encrypt, generate_iv, CryptoError, IV_LEN, KEY_LEN};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    #[serde(with = "b64_serde::array")]
    pub sender_ratchet_key: [u8; KEY_LEN],
    pub message_number: u32,
    pub previous_chain_length: u32,
}

impl MessageHeader {
    /// Encrypts the header under `header_key` with a fresh IV.
    ///
    /// # Returns
    /// * `Ok((ciphertext, iv))`
    pub fn encrypt(
        &self,
        header_key: &[u8; KEY_LEN],
    ) -> Result<(Vec<u8>, [u8; IV_LEN]), CryptoError> {
        let iv = generate_iv()?;
        let json = serde_json::to_vec(self)?;
        Ok((cbc_encrypt(&json, header_key, &iv)?, iv))
    }

    /// Decrypts and parses a header. Any failure, wrong key included, is a
    /// `CryptoError::Decryption`.
    pub fn decrypt(
        ciphertext: &[u8],
        iv: &[u8; IV_LEN],
        header_key: &[u8; KEY_LEN],
    ) -> Result<Self, CryptoError> {
        let json = cbc_decrypt(ciphertext, header_key, iv)
            .map_err(|_| CryptoError::Decryption("header could not be decrypted".into()))?;
        serde_json::from_slice(&json)
            .map_err(|_| CryptoError::Decryption("header could not be decrypted".into()))
    }
}
