//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the proxy handler
//! - Wire up middleware (tracing, request ID, access log, timeout, cache)
//! - Bind server to listener and shut down gracefully
//! - Dispatch requests to the routing engine

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    middleware::{from_fn, from_fn_with_state},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::cache::{build_request_cache, cache_middleware, CacheError, RequestCache};
use crate::config::ProxyConfig;
use crate::observability::{logging, metrics};
use crate::routing::upstream::append_forwarded_for;
use crate::routing::{OutboundRequest, Router as ProxyRouter, UpstreamClient, UpstreamError};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub router: Arc<ProxyRouter>,
    pub client: UpstreamClient,
    pub max_body_bytes: usize,
}

/// HTTP server for the caching proxy.
pub struct HttpServer {
    router: Router,
    config: ProxyConfig,
    cache: Option<Arc<RequestCache>>,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    ///
    /// Fails only if the configured cache backend cannot be prepared.
    pub fn new(config: ProxyConfig) -> Result<Self, CacheError> {
        let proxy_router = Arc::new(ProxyRouter::from_config(&config.routes));
        if proxy_router.is_empty() {
            tracing::warn!("No valid routes configured, every request will be answered with 404");
        }

        let state = AppState {
            router: proxy_router,
            client: UpstreamClient::new(Duration::from_secs(config.timeouts.upstream_secs)),
            max_body_bytes: config.limits.max_body_bytes,
        };

        let cache = if config.cache.enabled {
            Some(Arc::new(build_request_cache(&config.cache)?))
        } else {
            None
        };

        let router = Self::build_router(&config, state, cache.clone());
        Ok(Self {
            router,
            config,
            cache,
        })
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(
        config: &ProxyConfig,
        state: AppState,
        cache: Option<Arc<RequestCache>>,
    ) -> Router {
        let mut router = Router::new()
            .route("/{*path}", any(proxy_handler))
            .route("/", any(proxy_handler))
            .with_state(state);

        if let Some(cache) = cache {
            router = router.layer(from_fn_with_state(cache, cache_middleware));
        }

        router
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(from_fn(logging::access_log))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
            .layer(TraceLayer::new_for_http())
    }

    /// Run the server until `shutdown` fires, then drain in-flight requests.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received, draining connections");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// A clone of the fully layered application, for in-process use.
    pub fn app(&self) -> Router {
        self.router.clone()
    }

    /// The response cache, when enabled.
    pub fn cache(&self) -> Option<&Arc<RequestCache>> {
        self.cache.as_ref()
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }
}

/// Main proxy handler.
/// Looks up the route, buffers the body and forwards through the route's mapping.
async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let path = request.uri().path().to_string();

    let Some(route) = state.router.match_path(&path) else {
        tracing::debug!(path = %path, "No route matched");
        metrics::record_request(&method, 404, "none", start);
        return (StatusCode::NOT_FOUND, "No matching route found").into_response();
    };

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    let (mut parts, body) = request.into_parts();
    let body = match axum::body::to_bytes(body, state.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(route = %route.name, error = %e, "Rejecting request body");
            metrics::record_request(&method, 413, &route.name, start);
            return UpstreamError::BodyTooLarge {
                limit: state.max_body_bytes,
            }
            .into_response();
        }
    };
    if let Some(peer) = peer {
        append_forwarded_for(&mut parts.headers, peer.ip());
    }

    let outbound = OutboundRequest { parts, body };
    let response = match route.mapping.forward(&state.client, &route.prefix, &outbound).await {
        Ok(response) => response,
        Err(e) => {
            tracing::error!(route = %route.name, path = %path, error = %e, "Upstream error");
            e.into_response()
        }
    };

    metrics::record_request(&method, response.status().as_u16(), &route.name, start);
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RouteConfig;
    use tower::ServiceExt;

    fn config_with_route(backend: &str) -> ProxyConfig {
        let mut config = ProxyConfig::default();
        config.routes.push(RouteConfig {
            name: "api".into(),
            path_prefix: "/api/".into(),
            backend: Some(backend.into()),
            backends: Vec::new(),
            inactive_timeout_secs: 30,
        });
        config.timeouts.upstream_secs = 1;
        config
    }

    #[tokio::test]
    async fn test_unmatched_path_is_404() {
        let server = HttpServer::new(config_with_route("http://127.0.0.1:1/")).unwrap();
        let response = server
            .app()
            .oneshot(Request::get("/elsewhere").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn test_unreachable_backend_without_cache_is_502() {
        let mut config = config_with_route("http://127.0.0.1:1/");
        config.cache.enabled = false;
        let server = HttpServer::new(config).unwrap();
        assert!(server.cache().is_none());

        let response = server
            .app()
            .oneshot(Request::get("/api/x").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_unreachable_backend_with_empty_cache_is_500() {
        let server = HttpServer::new(config_with_route("http://127.0.0.1:1/")).unwrap();
        let response = server
            .app()
            .oneshot(Request::get("/api/x").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_oversized_body_rejected() {
        let mut config = config_with_route("http://127.0.0.1:1/");
        config.limits.max_body_bytes = 4;
        let server = HttpServer::new(config).unwrap();

        let response = server
            .app()
            .oneshot(
                Request::post("/api/upload")
                    .body(Body::from("far too long"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
