pub mod keys;
pub mod messages;

use crate::AppState;
use axum::Router;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(keys::router())
        .merge(messages::router())
}
