/// Public and sealed forms of a Key Bundle
///
/// `PublicKeyBundle` is what peers exchange to start a conversation.
/// `SealedKeyBundle` is what the store keeps: public keys in the clear,
/// every private key wrapped under the owner's passphrase.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::{
    agreement_public_key, b64_decode_array, keys_equal, signing_public_key,
    unwrap_with_passphrase, verify_signature, Argon2Config, CryptoError, KeyPair, KEY_LEN,
    SIGNATURE_LEN,
};
use crate::x3dh::identity::KeyBundle;
use zeroize::Zeroizing;

/// Public Key Bundle
///
/// # Fields
/// * `user_id` - owner of the bundle
/// * `identity_signing_key` - Ed25519 identity key (Base64, 32 bytes)
/// * `identity_agreement_key` - X25519 identity key (Base64, 32 bytes)
/// * `signed_pre_key` - X25519 signed pre-key (Base64, 32 bytes)
/// * `signed_pre_key_signature` - Ed25519 signature over the pre-key (Base64, 64 bytes)
/// * `ephemeral_key` - X25519 ephemeral key (Base64, 32 bytes)
/// * `expires_at` - end of the validity window
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PublicKeyBundle {
    pub user_id: i32,
    pub identity_signing_key: String,
    pub identity_agreement_key: String,
    pub signed_pre_key: String,
    pub signed_pre_key_signature: String,
    pub ephemeral_key: String,
    pub expires_at: DateTime<Utc>,
}

/// Decoded public keys of a verified bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifiedPublicKeys {
    pub identity_signing_key: [u8; KEY_LEN],
    pub identity_agreement_key: [u8; KEY_LEN],
    pub signed_pre_key: [u8; KEY_LEN],
    pub ephemeral_key: [u8; KEY_LEN],
}

impl PublicKeyBundle {
    /// Checks the pre-key signature against the identity signing key.
    ///
    /// # Returns
    /// * `Ok(VerifiedPublicKeys)` - decoded keys, safe to use in the handshake
    /// * `Err(CryptoError::SignatureVerification)` - the pre-key is not trusted
    pub fn verify(&self) -> Result<VerifiedPublicKeys, CryptoError> {
        let identity_signing_key = b64_decode_array::<KEY_LEN>(&self.identity_signing_key)?;
        let signed_pre_key = b64_decode_array::<KEY_LEN>(&self.signed_pre_key)?;
        let signature = b64_decode_array::<SIGNATURE_LEN>(&self.signed_pre_key_signature)
            .map_err(|_| CryptoError::SignatureVerification)?;

        verify_signature(&identity_signing_key, &signed_pre_key, &signature)?;

        Ok(VerifiedPublicKeys {
            identity_signing_key,
            identity_agreement_key: b64_decode_array(&self.identity_agreement_key)?,
            signed_pre_key,
            ephemeral_key: b64_decode_array(&self.ephemeral_key)?,
        })
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Stored form of a Key Bundle.
///
/// Each `wrapped_*` field is `base64(salt)|base64(iv)|base64(ciphertext)`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SealedKeyBundle {
    pub identity_signing_key: String,
    pub identity_agreement_key: String,
    pub signed_pre_key: String,
    pub signed_pre_key_signature: String,
    pub ephemeral_key: String,
    pub wrapped_identity_signing_key: String,
    pub wrapped_identity_agreement_key: String,
    pub wrapped_signed_pre_key: String,
    pub wrapped_ephemeral_key: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SealedKeyBundle {
    /// Public half, readable without the passphrase.
    pub fn public_bundle(&self, user_id: i32) -> PublicKeyBundle {
        PublicKeyBundle {
            user_id,
            identity_signing_key: self.identity_signing_key.clone(),
            identity_agreement_key: self.identity_agreement_key.clone(),
            signed_pre_key: self.signed_pre_key.clone(),
            signed_pre_key_signature: self.signed_pre_key_signature.clone(),
            ephemeral_key: self.ephemeral_key.clone(),
            expires_at: self.expires_at,
        }
    }

    /// Unwraps every private key and rebuilds the full bundle.
    ///
    /// Each public key is re-derived from its unwrapped private key and
    /// compared with the stored one, so a blob that decrypts to the wrong
    /// key is rejected instead of returned.
    ///
    /// # Returns
    /// * `Ok(KeyBundle)` - the bundle
    /// * `Err(CryptoError::IncorrectPassword)` - wrong passphrase or mismatched keys
    pub fn open(&self, passphrase: &str, config: &Argon2Config) -> Result<KeyBundle, CryptoError> {
        let identity_signing = open_key_pair(
            &self.wrapped_identity_signing_key,
            &self.identity_signing_key,
            passphrase,
            config,
            signing_public_key,
        )?;
        let identity_agreement = open_key_pair(
            &self.wrapped_identity_agreement_key,
            &self.identity_agreement_key,
            passphrase,
            config,
            agreement_public_key,
        )?;
        let signed_pre_key = open_key_pair(
            &self.wrapped_signed_pre_key,
            &self.signed_pre_key,
            passphrase,
            config,
            agreement_public_key,
        )?;
        let ephemeral = open_key_pair(
            &self.wrapped_ephemeral_key,
            &self.ephemeral_key,
            passphrase,
            config,
            agreement_public_key,
        )?;

        Ok(KeyBundle {
            identity_signing,
            identity_agreement,
            signed_pre_key,
            signed_pre_key_signature: b64_decode_array(&self.signed_pre_key_signature)?,
            ephemeral,
            created_at: self.created_at,
            expires_at: self.expires_at,
        })
    }
}

fn open_key_pair(
    wrapped: &str,
    public_b64: &str,
    passphrase: &str,
    config: &Argon2Config,
    derive_public: fn(&[u8; KEY_LEN]) -> [u8; KEY_LEN],
) -> Result<KeyPair, CryptoError> {
    let raw = Zeroizing::new(unwrap_with_passphrase(wrapped, passphrase, config)?);
    let private_key: [u8; KEY_LEN] = raw
        .as_slice()
        .try_into()
        .map_err(|_| CryptoError::IncorrectPassword)?;
    let public_key = b64_decode_array::<KEY_LEN>(public_b64)?;

    if !keys_equal(&derive_public(&private_key), &public_key) {
        return Err(CryptoError::IncorrectPassword);
    }
    Ok(KeyPair { private_key, public_key })
}
