//! Persistence side of the Key Bundle Manager.
//!
//! Private keys only ever reach the store sealed under the owner's
//! passphrase. Argon2 work runs on the blocking pool.

use std::sync::Arc;

use encore_sdk::crypto::{derive_key_from_passphrase, random_bytes, SALT_LEN};
use encore_sdk::{Argon2Config, KeyBundle, PublicKeyBundle, SealedKeyBundle};
use tracing::{debug, info};

use crate::error::ServiceError;
use crate::store::{Store, StoreError};

#[derive(Clone)]
pub struct KeyBundleManager {
    store: Arc<dyn Store>,
    argon2: Argon2Config,
    validity_days: i64,
}

impl KeyBundleManager {
    pub fn new(store: Arc<dyn Store>, argon2: Argon2Config, validity_days: i64) -> Self {
        Self { store, argon2, validity_days }
    }

    pub fn argon2(&self) -> &Argon2Config {
        &self.argon2
    }

    /// Fresh bundle with the configured validity window.
    pub fn generate(&self) -> Result<KeyBundle, ServiceError> {
        Ok(KeyBundle::generate(self.validity_days)?)
    }

    /// Seals `bundle` under `passphrase` and stores it as the active bundle.
    ///
    /// # Errors
    /// * `ServiceError::Conflict` - the user already has an active bundle
    pub async fn store_bundle(
        &self,
        user_id: i32,
        bundle: &KeyBundle,
        passphrase: &str,
    ) -> Result<PublicKeyBundle, ServiceError> {
        let sealed = self.seal(bundle.clone(), passphrase).await?;
        let public = sealed.public_bundle(user_id);

        self.store
            .put_key_bundle(user_id, sealed)
            .await
            .map_err(|e| match e {
                StoreError::Duplicate(_) => {
                    ServiceError::Conflict(format!("user {user_id} already has a key bundle"))
                }
                other => other.into(),
            })?;

        info!(user_id, expires_at = %public.expires_at, "key bundle stored");
        Ok(public)
    }

    /// Opens the active bundle of `user_id`.
    ///
    /// A missing bundle fails exactly like a wrong passphrase.
    pub async fn load_private_bundle(
        &self,
        user_id: i32,
        passphrase: &str,
    ) -> Result<KeyBundle, ServiceError> {
        let Some(sealed) = self.store.get_key_bundle(user_id).await? else {
            debug!(user_id, "no active key bundle");
            self.burn_passphrase(passphrase).await?;
            return Err(ServiceError::Decryption("incorrect password".into()));
        };

        let passphrase = passphrase.to_string();
        let config = self.argon2.clone();
        let bundle =
            tokio::task::spawn_blocking(move || sealed.open(&passphrase, &config)).await??;
        Ok(bundle)
    }

    pub async fn fetch_public_bundle(&self, user_id: i32) -> Result<PublicKeyBundle, ServiceError> {
        self.store
            .get_key_bundle(user_id)
            .await?
            .map(|sealed| sealed.public_bundle(user_id))
            .ok_or_else(|| ServiceError::NotFound(format!("no key bundle for user {user_id}")))
    }

    /// Replaces the active bundle with a fresh one.
    ///
    /// The passphrase must open the current bundle first.
    pub async fn rotate_bundle(
        &self,
        user_id: i32,
        passphrase: &str,
    ) -> Result<PublicKeyBundle, ServiceError> {
        self.load_private_bundle(user_id, passphrase).await?;

        let fresh = self.generate()?;
        let sealed = self.seal(fresh, passphrase).await?;
        let public = sealed.public_bundle(user_id);

        self.store.replace_key_bundle(user_id, sealed).await?;

        info!(user_id, expires_at = %public.expires_at, "key bundle rotated");
        Ok(public)
    }

    /// Same Argon2id work as a failed unwrap, so a missing bundle costs
    /// as much as a wrong passphrase.
    async fn burn_passphrase(&self, passphrase: &str) -> Result<(), ServiceError> {
        let passphrase = passphrase.to_string();
        let config = self.argon2.clone();
        tokio::task::spawn_blocking(move || {
            let salt = random_bytes::<SALT_LEN>()?;
            derive_key_from_passphrase(&passphrase, &salt, &config).map(drop)
        })
        .await??;
        Ok(())
    }

    async fn seal(&self, bundle: KeyBundle, passphrase: &str) -> Result<SealedKeyBundle, ServiceError> {
        let passphrase = passphrase.to_string();
        let config = self.argon2.clone();
        let sealed =
            tokio::task::spawn_blocking(move || bundle.seal(&passphrase, &config)).await??;
        Ok(sealed)
    }
}
