use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use encore_sdk::CryptoError;
use thiserror::Error;
use tracing::error;

use crate::store::StoreError;

/// Errors surfaced by the key manager and the session service.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    NotFound(String),
    #[error("signature verification failed")]
    SignatureVerification,
    /// Wrong passphrase, undecryptable header or failed tag. Carries no key detail.
    #[error("decryption failed: {0}")]
    Decryption(String),
    #[error("{0}")]
    Expired(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("crypto error: {0}")]
    Crypto(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<CryptoError> for ServiceError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::IncorrectPassword => ServiceError::Decryption("incorrect password".into()),
            CryptoError::SignatureVerification => ServiceError::SignatureVerification,
            CryptoError::Random(_) | CryptoError::Argon2(_) | CryptoError::Kdf(_) => {
                ServiceError::Crypto(err.to_string())
            }
            CryptoError::InvalidState(reason) => ServiceError::InvalidState(reason),
            other => ServiceError::Decryption(other.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for ServiceError {
    fn from(err: tokio::task::JoinError) -> Self {
        ServiceError::Internal(err.to_string())
    }
}

impl ServiceError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServiceError::Conflict(_) => StatusCode::CONFLICT,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::SignatureVerification => StatusCode::UNPROCESSABLE_ENTITY,
            ServiceError::Decryption(_) => StatusCode::BAD_REQUEST,
            ServiceError::Expired(_) => StatusCode::GONE,
            ServiceError::InvalidState(_) => StatusCode::CONFLICT,
            ServiceError::Store(_) | ServiceError::Crypto(_) | ServiceError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status.is_server_error() {
            error!(error = %self, "request failed");
            "internal server error".to_string()
        } else {
            self.to_string()
        };
        (status, message).into_response()
    }
}
