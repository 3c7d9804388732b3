use axum::{
    http::{header, HeaderValue, Method},
    middleware::from_fn,
    routing::get,
    Router,
};
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
mod error;
mod keys;
pub mod middleware;
pub mod models;
mod route;
mod session;
mod store;

use crate::config::{Config, StoreBackend};
use crate::session::SessionService;
use crate::store::{MemoryStore, PgStore, Store};

/// Shared state of every handler.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<SessionService>,
}

async fn async_main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env().expect("invalid configuration");

    let store: Arc<dyn Store> = match config.store {
        StoreBackend::Postgres => {
            let database_url = config
                .database_url
                .as_deref()
                .expect("postgres backend without database url");
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(database_url)
                .await
                .expect("failed to connect to the database");
            let store = PgStore::new(pool);
            store.migrate().await.expect("failed to run database migrations");
            Arc::new(store)
        }
        StoreBackend::Memory => Arc::new(MemoryStore::new()),
    };
    info!(backend = ?config.store, "store ready");

    let cors_allow_origins = config
        .cors_allow_origins
        .iter()
        .map(|s| HeaderValue::from_str(s).expect("invalid CORS_ALLOW_ORIGINS value"))
        .collect::<Vec<HeaderValue>>();

    let state = AppState {
        service: Arc::new(SessionService::new(
            store,
            config.argon2.clone(),
            config.key_bundle_validity_days,
        )),
    };

    let app = Router::new()
        .route("/health", get(|| async { "OK" }))
        .merge(route::router())
        .layer(
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(cors_allow_origins))
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers([header::CONTENT_TYPE]),
        )
        .layer(from_fn(middleware::logging))
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Server running on http://{addr}");
    let listener = TcpListener::bind(addr)
        .await
        .expect("failed to bind listening port");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("server terminated with an error");
}

fn main() {
    tokio::runtime::Runtime::new()
        .expect("failed to create tokio runtime")
        .block_on(async_main());
}
