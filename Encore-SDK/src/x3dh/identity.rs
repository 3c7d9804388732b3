/// Key Bundle for the 4-DH handshake
///
/// Holds everything a user needs to take part in a conversation:
/// - Identity Signing Key Pair (Ed25519) - signs the pre-key
/// - Identity Agreement Key Pair (X25519) - long-term agreement key
/// - Signed PreKey (X25519) - medium-term key, signed by the identity key
/// - Ephemeral Key Pair (X25519) - published with the bundle

use chrono::{DateTime, Duration, Utc};

use crate::crypto::{
    generate_agreement_key_pair, generate_signing_key_pair, sign, wrap_with_passphrase,
    Argon2Config, CryptoError, KeyPair, SIGNATURE_LEN,
};
use crate::x3dh::bundle::{PublicKeyBundle, SealedKeyBundle};
use crate::crypto::b64_encode;

/// Default validity window of a bundle before it must be rotated.
pub const DEFAULT_VALIDITY_DAYS: i64 = 30;

/// Full key bundle, private halves included. Never leaves the process unsealed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyBundle {
    pub identity_signing: KeyPair,
    pub identity_agreement: KeyPair,
    pub signed_pre_key: KeyPair,
    pub signed_pre_key_signature: [u8; SIGNATURE_LEN],
    pub ephemeral: KeyPair,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl KeyBundle {
    /// Generates a fresh bundle valid for `validity_days`.
    ///
    /// # Returns
    /// * `Ok(KeyBundle)` - four new key pairs, pre-key signed
    /// * `Err(CryptoError)` - the random source failed
    pub fn generate(validity_days: i64) -> Result<Self, CryptoError> {
        let identity_signing = generate_signing_key_pair()?;
        let identity_agreement = generate_agreement_key_pair()?;
        let signed_pre_key = generate_agreement_key_pair()?;
        let ephemeral = generate_agreement_key_pair()?;

        let signed_pre_key_signature =
            sign(&identity_signing.private_key, &signed_pre_key.public_key);

        let created_at = Utc::now();
        Ok(Self {
            identity_signing,
            identity_agreement,
            signed_pre_key,
            signed_pre_key_signature,
            ephemeral,
            created_at,
            expires_at: created_at + Duration::days(validity_days),
        })
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Public half of the bundle, base64-encoded for exchange.
    pub fn export_public(&self, user_id: i32) -> PublicKeyBundle {
        PublicKeyBundle {
            user_id,
            identity_signing_key: b64_encode(&self.identity_signing.public_key),
            identity_agreement_key: b64_encode(&self.identity_agreement.public_key),
            signed_pre_key: b64_encode(&self.signed_pre_key.public_key),
            signed_pre_key_signature: b64_encode(&self.signed_pre_key_signature),
            ephemeral_key: b64_encode(&self.ephemeral.public_key),
            expires_at: self.expires_at,
        }
    }

    /// Wraps each private key individually under `passphrase`.
    ///
    /// Every key gets its own salt and IV, so the four blobs share nothing
    /// but the passphrase.
    pub fn seal(
        &self,
        passphrase: &str,
        config: &Argon2Config,
    ) -> Result<SealedKeyBundle, CryptoError> {
        Ok(SealedKeyBundle {
            identity_signing_key: b64_encode(&self.identity_signing.public_key),
            identity_agreement_key: b64_encode(&self.identity_agreement.public_key),
            signed_pre_key: b64_encode(&self.signed_pre_key.public_key),
            signed_pre_key_signature: b64_encode(&self.signed_pre_key_signature),
            ephemeral_key: b64_encode(&self.ephemeral.public_key),
            wrapped_identity_signing_key: wrap_with_passphrase(
                &self.identity_signing.private_key,
                passphrase,
                config,
            )?,
            wrapped_identity_agreement_key: wrap_with_passphrase(
                &self.identity_agreement.private_key,
                passphrase,
                config,
            )?,
            wrapped_signed_pre_key: wrap_with_passphrase(
                &self.signed_pre_key.private_key,
                passphrase,
                config,
            )?,
            wrapped_ephemeral_key: wrap_with_passphrase(
                &self.ephemeral.private_key,
                passphrase,
                config,
            )?,
            created_at: self.created_at,
            expires_at: self.expires_at,
        })
    }
}

/// Generates a bundle with the default 30-day validity.
pub fn generate_key_bundle() -> Result<KeyBundle, CryptoError> {
    KeyBundle::generate(DEFAULT_VALIDITY_DAYS)
}

pub fn export_public_bundle(user_id: i32, bundle: &KeyBundle) -> PublicKeyBundle {
    bundle.export_public(user_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{agreement_public_key, signing_public_key, verify_signature};

    #[test]
    fn test_generate_key_bundle() {
        let bundle = generate_key_bundle().unwrap();

        assert_eq!(
            bundle.identity_signing.public_key,
            signing_public_key(&bundle.identity_signing.private_key)
        );
        assert_eq!(
            bundle.signed_pre_key.public_key,
            agreement_public_key(&bundle.signed_pre_key.private_key)
        );
        assert_ne!(bundle.identity_agreement.public_key, bundle.ephemeral.public_key);
        assert_eq!(bundle.expires_at - bundle.created_at, Duration::days(30));
    }

    #[test]
    fn test_pre_key_signature_verifies() {
        let bundle = generate_key_bundle().unwrap();
        assert!(verify_signature(
            &bundle.identity_signing.public_key,
            &bundle.signed_pre_key.public_key,
            &bundle.signed_pre_key_signature,
        )
        .is_ok());
    }

    #[test]
    fn test_export_strips_private_keys() {
        let bundle = generate_key_bundle().unwrap();
        let public = bundle.export_public(7);
        let json = serde_json::to_string(&public).unwrap();

        assert_eq!(public.user_id, 7);
        // Base64 encoded 32 bytes = 44 characters
        assert_eq!(public.signed_pre_key.len(), 44);
        assert!(!json.contains(&b64_encode(&bundle.identity_signing.private_key)));
        assert!(!json.contains(&b64_encode(&bundle.ephemeral.private_key)));
    }

    #[test]
    fn test_expiry() {
        let bundle = KeyBundle::generate(1).unwrap();
        assert!(!bundle.is_expired(Utc::now()));
        assert!(bundle.is_expired(Utc::now() + Duration::days(2)));
    }
}
