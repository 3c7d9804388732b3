use axum::routing::post;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json, Router,
};

use crate::error::ServiceError;
use crate::models::messages::{
    AcceptConversationRequest, DecryptMessageRequest, DecryptMessageResponse,
    InitConversationRequest, SendMessageRequest, StoredEncryptedMessage,
};
use crate::AppState;

/// POST /conversations/{conversation_id}/init
pub async fn init_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<i32>,
    Json(payload): Json<InitConversationRequest>,
) -> Result<StatusCode, ServiceError> {
    state
        .service
        .initialize_conversation(
            payload.sender_id,
            payload.receiver_id,
            conversation_id,
            &payload.passphrase,
        )
        .await?;
    Ok(StatusCode::CREATED)
}

/// POST /conversations/{conversation_id}/accept
pub async fn accept_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<i32>,
    Json(payload): Json<AcceptConversationRequest>,
) -> Result<StatusCode, ServiceError> {
    state
        .service
        .accept_conversation(
            conversation_id,
            payload.receiver_id,
            payload.sender_id,
            &payload.passphrase,
        )
        .await?;
    Ok(StatusCode::CREATED)
}

/// POST /conversations/{conversation_id}/messages
/// Encrypt and store a message; the response carries only ciphertext
pub async fn send_message(
    State(state): State<AppState>,
    Path(conversation_id): Path<i32>,
    Json(payload): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<StoredEncryptedMessage>), ServiceError> {
    let message = state
        .service
        .send_message(
            conversation_id,
            payload.sender_id,
            payload.plaintext.as_bytes(),
            &payload.passphrase,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

/// POST /messages/{message_id}/decrypt
pub async fn decrypt_message(
    State(state): State<AppState>,
    Path(message_id): Path<i64>,
    Json(payload): Json<DecryptMessageRequest>,
) -> Result<Json<DecryptMessageResponse>, ServiceError> {
    let plaintext = state
        .service
        .decrypt_message(message_id, payload.receiver_id, &payload.passphrase)
        .await?;
    let plaintext = String::from_utf8(plaintext)
        .map_err(|_| ServiceError::Decryption("plaintext is not UTF-8".into()))?;

    Ok(Json(DecryptMessageResponse { message_id, plaintext }))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/conversations/:conversation_id/init", post(init_conversation))
        .route("/conversations/:conversation_id/accept", post(accept_conversation))
        .route("/conversations/:conversation_id/messages", post(send_message))
        .route("/messages/:message_id/decrypt", post(decrypt_message))
}
