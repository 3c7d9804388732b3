use chrono::{DateTime, Utc};
use encore_sdk::EncryptedMessage;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;

/// Sealed ratchet state of one participant in one conversation
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct StoredState {
    pub conversation_id: i32,
    pub user_id: i32,
    /// `wrap_with_passphrase(serialize_state(state))`
    pub sealed_state: String,
    pub updated_at: DateTime<Utc>,
}

/// Message about to be persisted. The store assigns id and timestamp.
#[derive(Debug, Clone)]
pub struct NewEncryptedMessage {
    pub conversation_id: i32,
    pub sender_id: i32,
    pub payload: EncryptedMessage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEncryptedMessage {
    pub id: i64,
    pub conversation_id: i32,
    pub sender_id: i32,
    pub payload: EncryptedMessage,
    pub created_at: DateTime<Utc>,
}

/// Row of `encrypted_messages`, payload kept verbatim as JSONB
#[derive(Debug, Clone, FromRow)]
pub struct EncryptedMessageRow {
    pub id: i64,
    pub conversation_id: i32,
    pub sender_id: i32,
    pub payload: Json<EncryptedMessage>,
    pub created_at: DateTime<Utc>,
}

impl From<EncryptedMessageRow> for StoredEncryptedMessage {
    fn from(row: EncryptedMessageRow) -> Self {
        StoredEncryptedMessage {
            id: row.id,
            conversation_id: row.conversation_id,
            sender_id: row.sender_id,
            payload: row.payload.0,
            created_at: row.created_at,
        }
    }
}

/// POST /conversations/{conversation_id}/init
#[derive(Debug, Clone, Deserialize)]
pub struct InitConversationRequest {
    pub sender_id: i32,
    pub receiver_id: i32,
    pub passphrase: String,
}

/// POST /conversations/{conversation_id}/accept
#[derive(Debug, Clone, Deserialize)]
pub struct AcceptConversationRequest {
    pub receiver_id: i32,
    pub sender_id: i32,
    pub passphrase: String,
}

/// POST /conversations/{conversation_id}/messages
#[derive(Debug, Clone, Deserialize)]
pub struct SendMessageRequest {
    pub sender_id: i32,
    pub plaintext: String,
    pub passphrase: String,
}

/// POST /messages/{message_id}/decrypt
#[derive(Debug, Clone, Deserialize)]
pub struct DecryptMessageRequest {
    pub receiver_id: i32,
    pub passphrase: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecryptMessageResponse {
    pub message_id: i64,
    pub plaintext: String,
}
