//! Persistence boundary of the backend.
//!
//! Two tiers implement [`Store`]: [`PgStore`] for production and
//! [`MemoryStore`] for tests and local runs. The tier is picked once in
//! `main` and never mixed.

use async_trait::async_trait;
use encore_sdk::SealedKeyBundle;
use thiserror::Error;

use crate::models::messages::{NewEncryptedMessage, StoredEncryptedMessage, StoredState};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    /// An active key bundle already exists for this user.
    #[error("duplicate key bundle for user {0}")]
    Duplicate(i32),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Active bundle of `user_id`, if any.
    async fn get_key_bundle(&self, user_id: i32) -> Result<Option<SealedKeyBundle>, StoreError>;

    /// Fails with [`StoreError::Duplicate`] while another bundle is active.
    async fn put_key_bundle(&self, user_id: i32, bundle: SealedKeyBundle) -> Result<(), StoreError>;

    /// Retires the active bundle and activates `bundle` in one step.
    /// On failure the previous bundle stays active.
    async fn replace_key_bundle(&self, user_id: i32, bundle: SealedKeyBundle) -> Result<(), StoreError>;

    /// Retires the active bundle. Returns whether one was active.
    async fn deactivate_key_bundle(&self, user_id: i32) -> Result<bool, StoreError>;

    async fn get_ratchet_state(
        &self,
        conversation_id: i32,
        user_id: i32,
    ) -> Result<Option<StoredState>, StoreError>;

    /// Inserts or overwrites the state of `(conversation_id, user_id)`.
    async fn put_ratchet_state(&self, state: StoredState) -> Result<(), StoreError>;

    async fn get_message(&self, message_id: i64) -> Result<Option<StoredEncryptedMessage>, StoreError>;

    async fn put_message(&self, message: NewEncryptedMessage) -> Result<StoredEncryptedMessage, StoreError>;
}
