use async_trait::async_trait;
use encore_sdk::SealedKeyBundle;
use sqlx::types::Json;
use sqlx::{Executor, PgPool, Postgres, Transaction};

use super::{Store, StoreError};
use crate::models::keys::KeyBundleRow;
use crate::models::messages::{
    EncryptedMessageRow, NewEncryptedMessage, StoredEncryptedMessage, StoredState,
};

/// Postgres-backed store. Schema lives in `backend/migrations`.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Applies pending migrations from `./migrations`.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .map(|e| e.is_unique_violation())
        .unwrap_or(false)
}

async fn insert_key_bundle<'e, E>(
    executor: E,
    user_id: i32,
    bundle: &SealedKeyBundle,
) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r#"
        INSERT INTO key_bundles (
            user_id, identity_signing_key, identity_agreement_key,
            signed_pre_key, signed_pre_key_signature, ephemeral_key,
            wrapped_identity_signing_key, wrapped_identity_agreement_key,
            wrapped_signed_pre_key, wrapped_ephemeral_key,
            created_at, expires_at, is_active
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, TRUE)
        "#,
    )
    .bind(user_id)
    .bind(&bundle.identity_signing_key)
    .bind(&bundle.identity_agreement_key)
    .bind(&bundle.signed_pre_key)
    .bind(&bundle.signed_pre_key_signature)
    .bind(&bundle.ephemeral_key)
    .bind(&bundle.wrapped_identity_signing_key)
    .bind(&bundle.wrapped_identity_agreement_key)
    .bind(&bundle.wrapped_signed_pre_key)
    .bind(&bundle.wrapped_ephemeral_key)
    .bind(bundle.created_at)
    .bind(bundle.expires_at)
    .execute(executor)
    .await?;
    Ok(())
}

#[async_trait]
impl Store for PgStore {
    async fn get_key_bundle(&self, user_id: i32) -> Result<Option<SealedKeyBundle>, StoreError> {
        let row = sqlx::query_as::<_, KeyBundleRow>(
            r#"
            SELECT identity_signing_key, identity_agreement_key,
                   signed_pre_key, signed_pre_key_signature, ephemeral_key,
                   wrapped_identity_signing_key, wrapped_identity_agreement_key,
                   wrapped_signed_pre_key, wrapped_ephemeral_key,
                   created_at, expires_at
            FROM key_bundles
            WHERE user_id = $1 AND is_active = TRUE
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(SealedKeyBundle::from))
    }

    async fn put_key_bundle(&self, user_id: i32, bundle: SealedKeyBundle) -> Result<(), StoreError> {
        // the partial unique index on (user_id) WHERE is_active rejects a second active bundle
        insert_key_bundle(&self.pool, user_id, &bundle)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::Duplicate(user_id)
                } else {
                    StoreError::Database(e)
                }
            })
    }

    async fn replace_key_bundle(&self, user_id: i32, bundle: SealedKeyBundle) -> Result<(), StoreError> {
        let mut tx: Transaction<'_, Postgres> = self.pool.begin().await?;

        sqlx::query(
            "UPDATE key_bundles SET is_active = FALSE WHERE user_id = $1 AND is_active = TRUE",
        )
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
        insert_key_bundle(&mut *tx, user_id, &bundle).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn deactivate_key_bundle(&self, user_id: i32) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE key_bundles SET is_active = FALSE WHERE user_id = $1 AND is_active = TRUE",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_ratchet_state(
        &self,
        conversation_id: i32,
        user_id: i32,
    ) -> Result<Option<StoredState>, StoreError> {
        let state = sqlx::query_as::<_, StoredState>(
            r#"
            SELECT conversation_id, user_id, sealed_state, updated_at
            FROM ratchet_states
            WHERE conversation_id = $1 AND user_id = $2
            "#,
        )
        .bind(conversation_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(state)
    }

    async fn put_ratchet_state(&self, state: StoredState) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO ratchet_states (conversation_id, user_id, sealed_state, updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (conversation_id, user_id)
            DO UPDATE SET sealed_state = EXCLUDED.sealed_state, updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(state.conversation_id)
        .bind(state.user_id)
        .bind(&state.sealed_state)
        .bind(state.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_message(&self, message_id: i64) -> Result<Option<StoredEncryptedMessage>, StoreError> {
        let row = sqlx::query_as::<_, EncryptedMessageRow>(
            r#"
            SELECT id, conversation_id, sender_id, payload, created_at
            FROM encrypted_messages
            WHERE id = $1
            "#,
        )
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(StoredEncryptedMessage::from))
    }

    async fn put_message(&self, message: NewEncryptedMessage) -> Result<StoredEncryptedMessage, StoreError> {
        let row = sqlx::query_as::<_, EncryptedMessageRow>(
            r#"
            INSERT INTO encrypted_messages (conversation_id, sender_id, payload)
            VALUES ($1, $2, $3)
            RETURNING id, conversation_id, sender_id, payload, created_at
            "#,
        )
        .bind(message.conversation_id)
        .bind(message.sender_id)
        .bind(Json(&message.payload))
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }
}
