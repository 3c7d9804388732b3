use chrono::{DateTime, Utc};
use encore_sdk::{PublicKeyBundle, SealedKeyBundle};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Key material columns of a `key_bundles` row
#[derive(Debug, Clone, FromRow)]
pub struct KeyBundleRow {
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

impl From<KeyBundleRow> for SealedKeyBundle {
    fn from(row: KeyBundleRow) -> Self {
        SealedKeyBundle {
            identity_signing_key: row.identity_signing_key,
            identity_agreement_key: row.identity_agreement_key,
            signed_pre_key: row.signed_pre_key,
            signed_pre_key_signature: row.signed_pre_key_signature,
            ephemeral_key: row.ephemeral_key,
            wrapped_identity_signing_key: row.wrapped_identity_signing_key,
            wrapped_identity_agreement_key: row.wrapped_identity_agreement_key,
            wrapped_signed_pre_key: row.wrapped_signed_pre_key,
            wrapped_ephemeral_key: row.wrapped_ephemeral_key,
            created_at: row.created_at,
            expires_at: row.expires_at,
        }
    }
}

/// Request body for key setup and rotation
#[derive(Debug, Clone, Deserialize)]
pub struct KeySetupRequest {
    pub user_id: i32,
    pub passphrase: String,
}

/// Public bundle for the API response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicKeyBundleResponse {
    pub bundle: PublicKeyBundle,
}
