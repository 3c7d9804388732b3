use axum::routing::{get, post};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json, Router,
};

use crate::error::ServiceError;
use crate::models::keys::{KeySetupRequest, PublicKeyBundleResponse};
use crate::AppState;

/// POST /keys/setup
/// Generate the first key bundle of a user
pub async fn setup_keys(
    State(state): State<AppState>,
    Json(payload): Json<KeySetupRequest>,
) -> Result<(StatusCode, Json<PublicKeyBundleResponse>), ServiceError> {
    let bundle = state
        .service
        .setup_user_keys(payload.user_id, &payload.passphrase)
        .await?;
    Ok((StatusCode::CREATED, Json(PublicKeyBundleResponse { bundle })))
}

/// POST /keys/rotate
/// Replace the active bundle; the passphrase must open the current one
pub async fn rotate_keys(
    State(state): State<AppState>,
    Json(payload): Json<KeySetupRequest>,
) -> Result<Json<PublicKeyBundleResponse>, ServiceError> {
    let bundle = state
        .service
        .rotate_user_keys(payload.user_id, &payload.passphrase)
        .await?;
    Ok(Json(PublicKeyBundleResponse { bundle }))
}

/// GET /keys/{user_id}/bundle
/// Public bundle for starting a conversation
pub async fn get_bundle(
    State(state): State<AppState>,
    Path(user_id): Path<i32>,
) -> Result<Json<PublicKeyBundleResponse>, ServiceError> {
    let bundle = state.service.get_public_bundle(user_id).await?;
    Ok(Json(PublicKeyBundleResponse { bundle }))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/keys/setup", post(setup_keys))
        .route("/keys/rotate", post(rotate_keys))
        .route("/keys/:user_id/bundle", get(get_bundle))
}
