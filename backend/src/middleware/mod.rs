use axum::{
    extract::{ConnectInfo, MatchedPath, Request},
    middleware::Next,
    response::Response,
};
use std::net::SocketAddr;
use std::time::Instant;
use tracing::{info, warn};

/// Query keys whose values never reach the log.
const REDACTED_QUERY_KEYS: [&str; 4] = ["passphrase", "token", "access_token", "refresh_token"];

/// Request log line: client, method, matched path, latency and status.
///
/// Bodies are never read here; they carry passphrases and plaintext.
pub async fn logging(req: Request, next: Next) -> Response {
    let started = Instant::now();
    let method = req.method().clone();
    let query = sanitize_query(req.uri().query().unwrap_or(""));
    let path = match req.extensions().get::<MatchedPath>() {
        Some(matched) => matched.as_str().to_owned(),
        None => req.uri().path().to_owned(),
    };
    let from = client_addr(&req);

    let res = next.run(req).await;

    let status = res.status().as_u16();
    let elapsed_ms = started.elapsed().as_millis() as u64;
    if res.status().is_client_error() || res.status().is_server_error() {
        warn!(%from, %method, %path, %query, status, elapsed_ms, "request");
    } else {
        info!(%from, %method, %path, %query, status, elapsed_ms, "request");
    }
    res
}

/// First `X-Forwarded-For` hop, else the socket peer.
fn client_addr(req: &Request) -> String {
    let forwarded = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_owned();
    }
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "-".to_owned())
}

fn sanitize_query(raw: &str) -> String {
    if raw.is_empty() {
        return String::new();
    }

    raw.split('&')
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let secret = REDACTED_QUERY_KEYS
                .iter()
                .any(|name| key.eq_ignore_ascii_case(name));
            if secret {
                format!("{key}=<redacted>")
            } else {
                format!("{key}={value}")
            }
        })
        .collect::<Vec<_>>()
        .join("&")
}
