//! Session Service: conversations on top of the ratchet engine.
//!
//! Every load-mutate-persist sequence on a ratchet state runs under the
//! lock of its `(conversation_id, user_id)`. Bundle setup and rotation
//! run under a per-user lock. State is persisted only after the whole
//! operation succeeded.

use std::hash::Hash;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use encore_sdk::{
    deserialize_state, init_receiver_from_bundle, init_sender, serialize_state,
    unwrap_with_passphrase, wrap_with_passphrase, Argon2Config, PublicKeyBundle, RatchetState,
};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::error::ServiceError;
use crate::keys::KeyBundleManager;
use crate::models::messages::{NewEncryptedMessage, StoredEncryptedMessage, StoredState};
use crate::store::Store;

/// Async mutex per key, created on first use and dropped once nobody
/// holds or waits for it.
struct LockRegistry<K: Eq + Hash> {
    locks: DashMap<K, Arc<Mutex<()>>>,
}

struct KeyGuard<'a, K: Eq + Hash> {
    registry: &'a LockRegistry<K>,
    key: K,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<K: Eq + Hash + Clone> LockRegistry<K> {
    fn new() -> Self {
        Self { locks: DashMap::new() }
    }

    async fn lock(&self, key: K) -> KeyGuard<'_, K> {
        let mutex = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = mutex.lock_owned().await;
        KeyGuard { registry: self, key, guard: Some(guard) }
    }
}

impl<K: Eq + Hash> Drop for KeyGuard<'_, K> {
    fn drop(&mut self) {
        self.guard.take();
        // the map holds the only reference once every guard and waiter is gone
        self.registry
            .locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

pub struct SessionService {
    store: Arc<dyn Store>,
    keys: KeyBundleManager,
    session_locks: LockRegistry<(i32, i32)>,
    bundle_locks: LockRegistry<i32>,
}

impl SessionService {
    pub fn new(store: Arc<dyn Store>, argon2: Argon2Config, validity_days: i64) -> Self {
        Self {
            keys: KeyBundleManager::new(store.clone(), argon2, validity_days),
            store,
            session_locks: LockRegistry::new(),
            bundle_locks: LockRegistry::new(),
        }
    }

    /// Generates and stores the first bundle of `user_id`.
    pub async fn setup_user_keys(
        &self,
        user_id: i32,
        passphrase: &str,
    ) -> Result<PublicKeyBundle, ServiceError> {
        let _guard = self.bundle_locks.lock(user_id).await;

        let bundle = self.keys.generate()?;
        self.keys.store_bundle(user_id, &bundle, passphrase).await
    }

    pub async fn rotate_user_keys(
        &self,
        user_id: i32,
        passphrase: &str,
    ) -> Result<PublicKeyBundle, ServiceError> {
        let _guard = self.bundle_locks.lock(user_id).await;

        self.keys.rotate_bundle(user_id, passphrase).await
    }

    pub async fn get_public_bundle(&self, user_id: i32) -> Result<PublicKeyBundle, ServiceError> {
        self.keys.fetch_public_bundle(user_id).await
    }

    /// Sender side of a new conversation.
    ///
    /// # Errors
    /// * `Conflict` - the sender already has state for this conversation
    /// * `Expired` - the receiver's bundle is past its validity window
    /// * `SignatureVerification` - the receiver's pre-key signature is invalid
    pub async fn initialize_conversation(
        &self,
        sender_id: i32,
        receiver_id: i32,
        conversation_id: i32,
        passphrase: &str,
    ) -> Result<(), ServiceError> {
        if sender_id == receiver_id {
            return Err(ServiceError::InvalidState(
                "cannot start a conversation with yourself".into(),
            ));
        }

        let _guard = self.session_locks.lock((conversation_id, sender_id)).await;

        self.ensure_no_state(conversation_id, sender_id).await?;

        let own = self.keys.load_private_bundle(sender_id, passphrase).await?;
        let peer = self.keys.fetch_public_bundle(receiver_id).await?;
        if peer.is_expired(Utc::now()) {
            return Err(ServiceError::Expired(format!(
                "key bundle of user {receiver_id} has expired"
            )));
        }

        let state = init_sender(&own, &peer)?;
        self.persist_state(conversation_id, sender_id, &state, passphrase)
            .await?;

        info!(conversation_id, sender_id, receiver_id, "conversation initialized");
        Ok(())
    }

    /// Receiver side of a conversation started by `sender_id`.
    pub async fn accept_conversation(
        &self,
        conversation_id: i32,
        receiver_id: i32,
        sender_id: i32,
        passphrase: &str,
    ) -> Result<(), ServiceError> {
        let _guard = self.session_locks.lock((conversation_id, receiver_id)).await;

        self.ensure_no_state(conversation_id, receiver_id).await?;

        let state = self
            .receiver_state(receiver_id, sender_id, passphrase, None)
            .await?;
        self.persist_state(conversation_id, receiver_id, &state, passphrase)
            .await?;

        info!(conversation_id, receiver_id, sender_id, "conversation accepted");
        Ok(())
    }

    /// Encrypts `plaintext`, persists the advanced state and the message.
    pub async fn send_message(
        &self,
        conversation_id: i32,
        sender_id: i32,
        plaintext: &[u8],
        passphrase: &str,
    ) -> Result<StoredEncryptedMessage, ServiceError> {
        let _guard = self.session_locks.lock((conversation_id, sender_id)).await;

        let state = self
            .load_state(conversation_id, sender_id, passphrase)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "no session for user {sender_id} in conversation {conversation_id}"
                ))
            })?;

        let (next, payload) = state.encrypt(plaintext)?;
        self.persist_state(conversation_id, sender_id, &next, passphrase)
            .await?;

        let stored = self
            .store
            .put_message(NewEncryptedMessage { conversation_id, sender_id, payload })
            .await?;

        debug!(
            conversation_id,
            sender_id,
            message_id = stored.id,
            message_number = stored.payload.message_number,
            "message sent"
        );
        Ok(stored)
    }

    /// Decrypts a stored message for `receiver_id`.
    ///
    /// A receiver without state for the conversation accepts it first.
    /// Nothing is persisted unless decryption succeeds.
    pub async fn decrypt_message(
        &self,
        message_id: i64,
        receiver_id: i32,
        passphrase: &str,
    ) -> Result<Vec<u8>, ServiceError> {
        let message = self
            .store
            .get_message(message_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("message {message_id} not found")))?;

        if message.sender_id == receiver_id {
            return Err(ServiceError::InvalidState(
                "a message cannot be decrypted by its sender".into(),
            ));
        }
        let conversation_id = message.conversation_id;

        let _guard = self.session_locks.lock((conversation_id, receiver_id)).await;

        let state = match self.load_state(conversation_id, receiver_id, passphrase).await? {
            Some(state) => state,
            None => {
                debug!(conversation_id, receiver_id, "no session yet, accepting");
                let sent_at = Some(message.created_at);
                self.receiver_state(receiver_id, message.sender_id, passphrase, sent_at)
                    .await?
            }
        };

        let (next, plaintext) = state.decrypt(&message.payload).map_err(|e| {
            warn!(conversation_id, receiver_id, message_id, error = %e, "decryption failed");
            ServiceError::from(e)
        })?;
        self.persist_state(conversation_id, receiver_id, &next, passphrase)
            .await?;

        debug!(conversation_id, receiver_id, message_id, "message decrypted");
        Ok(plaintext)
    }

    async fn ensure_no_state(&self, conversation_id: i32, user_id: i32) -> Result<(), ServiceError> {
        if self
            .store
            .get_ratchet_state(conversation_id, user_id)
            .await?
            .is_some()
        {
            return Err(ServiceError::Conflict(format!(
                "user {user_id} already has a session in conversation {conversation_id}"
            )));
        }
        Ok(())
    }

    async fn receiver_state(
        &self,
        receiver_id: i32,
        sender_id: i32,
        passphrase: &str,
        sent_at: Option<DateTime<Utc>>,
    ) -> Result<RatchetState, ServiceError> {
        let own = self.keys.load_private_bundle(receiver_id, passphrase).await?;
        if sent_at.is_some_and(|sent_at| sent_at < own.created_at) {
            warn!(
                receiver_id,
                sender_id,
                bundle_created_at = %own.created_at,
                "message predates the receiver's key bundle, the handshake was made against a rotated bundle"
            );
        }
        let peer = self.keys.fetch_public_bundle(sender_id).await?;
        Ok(init_receiver_from_bundle(&own, &peer)?)
    }

    async fn load_state(
        &self,
        conversation_id: i32,
        user_id: i32,
        passphrase: &str,
    ) -> Result<Option<RatchetState>, ServiceError> {
        let Some(stored) = self.store.get_ratchet_state(conversation_id, user_id).await? else {
            return Ok(None);
        };

        let passphrase = passphrase.to_string();
        let config = self.keys.argon2().clone();
        let state = tokio::task::spawn_blocking(move || {
            let blob = Zeroizing::new(unwrap_with_passphrase(
                &stored.sealed_state,
                &passphrase,
                &config,
            )?);
            let json = std::str::from_utf8(&blob).map_err(|_| {
                encore_sdk::CryptoError::InvalidState("sealed state is not UTF-8".into())
            })?;
            deserialize_state(json)
        })
        .await??;

        Ok(Some(state))
    }

    async fn persist_state(
        &self,
        conversation_id: i32,
        user_id: i32,
        state: &RatchetState,
        passphrase: &str,
    ) -> Result<(), ServiceError> {
        let json = Zeroizing::new(serialize_state(state)?);
        let passphrase = passphrase.to_string();
        let config = self.keys.argon2().clone();
        let sealed_state =
            tokio::task::spawn_blocking(move || wrap_with_passphrase(json.as_bytes(), &passphrase, &config))
                .await??;

        self.store
            .put_ratchet_state(StoredState {
                conversation_id,
                user_id,
                sealed_state,
                updated_at: Utc::now(),
            })
            .await?;
        Ok(())
    }
}
