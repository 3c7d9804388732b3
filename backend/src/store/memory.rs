use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use encore_sdk::SealedKeyBundle;

use super::{Store, StoreError};
use crate::models::messages::{NewEncryptedMessage, StoredEncryptedMessage, StoredState};

/// In-process store. Contents are lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    key_bundles: DashMap<i32, SealedKeyBundle>,
    ratchet_states: DashMap<(i32, i32), StoredState>,
    messages: DashMap<i64, StoredEncryptedMessage>,
    next_message_id: AtomicI64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_key_bundle(&self, user_id: i32) -> Result<Option<SealedKeyBundle>, StoreError> {
        Ok(self.key_bundles.get(&user_id).map(|b| b.value().clone()))
    }

    async fn put_key_bundle(&self, user_id: i32, bundle: SealedKeyBundle) -> Result<(), StoreError> {
        match self.key_bundles.entry(user_id) {
            Entry::Occupied(_) => Err(StoreError::Duplicate(user_id)),
            Entry::Vacant(slot) => {
                slot.insert(bundle);
                Ok(())
            }
        }
    }

    async fn replace_key_bundle(&self, user_id: i32, bundle: SealedKeyBundle) -> Result<(), StoreError> {
        self.key_bundles.insert(user_id, bundle);
        Ok(())
    }

    async fn deactivate_key_bundle(&self, user_id: i32) -> Result<bool, StoreError> {
        Ok(self.key_bundles.remove(&user_id).is_some())
    }

    async fn get_ratchet_state(
        &self,
        conversation_id: i32,
        user_id: i32,
    ) -> Result<Option<StoredState>, StoreError> {
        Ok(self
            .ratchet_states
            .get(&(conversation_id, user_id))
            .map(|s| s.value().clone()))
    }

    async fn put_ratchet_state(&self, state: StoredState) -> Result<(), StoreError> {
        self.ratchet_states
            .insert((state.conversation_id, state.user_id), state);
        Ok(())
    }

    async fn get_message(&self, message_id: i64) -> Result<Option<StoredEncryptedMessage>, StoreError> {
        Ok(self.messages.get(&message_id).map(|m| m.value().clone()))
    }

    async fn put_message(&self, message: NewEncryptedMessage) -> Result<StoredEncryptedMessage, StoreError> {
        let id = self.next_message_id.fetch_add(1, Ordering::Relaxed) + 1;
        let stored = StoredEncryptedMessage {
            id,
            conversation_id: message.conversation_id,
            sender_id: message.sender_id,
            payload: message.payload,
            created_at: Utc::now(),
        };
        self.messages.insert(id, stored.clone());
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use encore_sdk::{generate_key_bundle, Argon2Config};

    fn sealed() -> SealedKeyBundle {
        let cfg = Argon2Config { memory_kib: 256, iterations: 1, parallelism: 1 };
        generate_key_bundle().unwrap().seal("pw", &cfg).unwrap()
    }

    fn state(conversation_id: i32, user_id: i32, blob: &str) -> StoredState {
        StoredState {
            conversation_id,
            user_id,
            sealed_state: blob.to_string(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_key_bundle_duplicate_and_rotation() {
        let store = MemoryStore::new();
        let first = sealed();
        store.put_key_bundle(1, first.clone()).await.unwrap();

        assert!(matches!(
            store.put_key_bundle(1, sealed()).await,
            Err(StoreError::Duplicate(1))
        ));
        assert_eq!(store.get_key_bundle(1).await.unwrap(), Some(first));

        assert!(store.deactivate_key_bundle(1).await.unwrap());
        assert!(!store.deactivate_key_bundle(1).await.unwrap());
        assert!(store.get_key_bundle(1).await.unwrap().is_none());
        store.put_key_bundle(1, sealed()).await.unwrap();
    }

    #[tokio::test]
    async fn test_replace_key_bundle() {
        let store = MemoryStore::new();
        store.put_key_bundle(1, sealed()).await.unwrap();

        let fresh = sealed();
        store.replace_key_bundle(1, fresh.clone()).await.unwrap();
        assert_eq!(store.get_key_bundle(1).await.unwrap(), Some(fresh));
    }

    #[tokio::test]
    async fn test_ratchet_state_upsert() {
        let store = MemoryStore::new();
        assert!(store.get_ratchet_state(7, 1).await.unwrap().is_none());

        store.put_ratchet_state(state(7, 1, "a")).await.unwrap();
        store.put_ratchet_state(state(7, 1, "b")).await.unwrap();
        store.put_ratchet_state(state(7, 2, "c")).await.unwrap();

        let loaded = store.get_ratchet_state(7, 1).await.unwrap().unwrap();
        assert_eq!(loaded.sealed_state, "b");
        assert_eq!(store.get_ratchet_state(7, 2).await.unwrap().unwrap().sealed_state, "c");
    }
}
