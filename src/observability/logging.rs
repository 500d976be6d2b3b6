//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber from configuration
//! - Emit one access-log event per proxied request
//!
//! # Design Decisions
//! - `RUST_LOG` wins over the configured level when set
//! - Client address prefers `X-Real-IP`, then `X-Forwarded-For`, then the peer

use std::net::SocketAddr;
use std::time::Instant;

use axum::{
    extract::{ConnectInfo, Request},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ObservabilityConfig;

/// Install the global subscriber. Safe to call more than once; later calls are ignored.
pub fn init_logging(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "caching_proxy={level},tower_http={level}",
            level = config.log_level
        )
        .into()
    });

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_ansi(config.color_logs))
        .try_init();
}

/// Resolve the client address for logging.
pub fn client_address(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    header("x-real-ip")
        .or_else(|| header("x-forwarded-for"))
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "-".to_string())
}

/// Access-log middleware.
pub async fn access_log(request: Request, next: Next) -> Response {
    let start = Instant::now();

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let remote = client_address(request.headers(), peer);
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let version = request
        .headers()
        .get("accept-version")
        .and_then(|v| v.to_str().ok())
        .map(|v| format!("/v{}", v))
        .unwrap_or_default();

    let response = next.run(request).await;

    tracing::info!(
        status = response.status().as_u16(),
        latency = ?start.elapsed(),
        remote = %remote,
        method = %method,
        path = %format!("{}{}", version, path),
        "[REQUEST]"
    );

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_client_address_precedence() {
        let peer: SocketAddr = "10.0.0.9:5555".parse().unwrap();
        let mut headers = HeaderMap::new();
        assert_eq!(client_address(&headers, Some(peer)), "10.0.0.9");
        assert_eq!(client_address(&headers, None), "-");

        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7"));
        assert_eq!(client_address(&headers, Some(peer)), "203.0.113.7");

        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.1"));
        assert_eq!(client_address(&headers, Some(peer)), "198.51.100.1");
    }
}
