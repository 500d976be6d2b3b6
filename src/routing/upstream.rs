//! Outbound HTTP calls to backends.
//!
//! # Responsibilities
//! - Rewrite the inbound URI onto a backend base URL
//! - Strip hop-by-hop headers in both directions
//! - Bound every call by the upstream timeout
//! - Map failures to gateway status codes
//!
//! # Design Decisions
//! - The request body is buffered once so a balanced route can replay it
//!   against the next backend after a transport failure
//! - Only transport failures are errors; any HTTP status is a response

use std::time::Duration;

use axum::{
    body::Body,
    http::{header, request::Parts, HeaderMap, HeaderName, HeaderValue, Request, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use hyper::body::Incoming;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use thiserror::Error;
use url::Url;

use crate::load_balancer::LoadBalancerError;

/// Errors raised while forwarding a request.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("backend {backend} unavailable: {source}")]
    Unavailable {
        backend: String,
        #[source]
        source: hyper_util::client::legacy::Error,
    },

    #[error("backend {backend} did not answer within {after:?}")]
    Timeout { backend: String, after: Duration },

    #[error("could not build upstream URI: {0}")]
    InvalidUri(String),

    #[error("request body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },

    #[error(transparent)]
    Balancer(#[from] LoadBalancerError),
}

impl UpstreamError {
    /// True when the backend could not be reached or did not answer in time.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            UpstreamError::Unavailable { .. } | UpstreamError::Timeout { .. }
        )
    }

    pub fn status(&self) -> StatusCode {
        match self {
            UpstreamError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            UpstreamError::BodyTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            UpstreamError::Unavailable { .. }
            | UpstreamError::InvalidUri(_)
            | UpstreamError::Balancer(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for UpstreamError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match status {
            StatusCode::GATEWAY_TIMEOUT => "Upstream timed out",
            StatusCode::PAYLOAD_TOO_LARGE => "Request body too large",
            _ => "Upstream request failed",
        };
        (status, message).into_response()
    }
}

/// Buffered inbound request, ready to be replayed against any backend.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub parts: Parts,
    pub body: Bytes,
}

/// Shared HTTP client for backend calls.
#[derive(Clone)]
pub struct UpstreamClient {
    client: Client<HttpConnector, Body>,
    timeout: Duration,
}

impl UpstreamClient {
    pub fn new(timeout: Duration) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self { client, timeout }
    }

    /// Forward `request` to `target`, after removing `prefix` from its path.
    pub async fn send(
        &self,
        target: &Url,
        prefix: &str,
        request: &OutboundRequest,
    ) -> Result<Response, UpstreamError> {
        let uri = rewrite_uri(target, prefix, &request.parts.uri)?;

        let mut headers = request.parts.headers.clone();
        strip_hop_by_hop(&mut headers);
        headers.remove(header::HOST);

        let mut outbound = Request::builder()
            .method(request.parts.method.clone())
            .uri(uri)
            .body(Body::from(request.body.clone()))
            .map_err(|e| UpstreamError::InvalidUri(e.to_string()))?;
        *outbound.headers_mut() = headers;

        let backend = target.as_str().to_string();
        tracing::debug!(backend = %backend, uri = %outbound.uri(), "Forwarding request");

        let response: Response<Incoming> =
            match tokio::time::timeout(self.timeout, self.client.request(outbound)).await {
                Ok(Ok(response)) => response,
                Ok(Err(source)) => return Err(UpstreamError::Unavailable { backend, source }),
                Err(_) => {
                    return Err(UpstreamError::Timeout {
                        backend,
                        after: self.timeout,
                    })
                }
            };

        let (mut parts, body) = response.into_parts();
        strip_hop_by_hop(&mut parts.headers);
        Ok(Response::from_parts(parts, Body::new(body)))
    }
}

/// Map an inbound URI onto `target`: strip `prefix`, join paths with a single
/// slash, and merge the target's query with the request's.
pub fn rewrite_uri(target: &Url, prefix: &str, inbound: &Uri) -> Result<Uri, UpstreamError> {
    let path = inbound.path();
    let rest = path.strip_prefix(prefix).unwrap_or(path);
    let joined = single_joining_slash(target.path(), rest);

    let query = match (target.query().unwrap_or(""), inbound.query().unwrap_or("")) {
        ("", "") => String::new(),
        (t, "") => format!("?{}", t),
        ("", r) => format!("?{}", r),
        (t, r) => format!("?{}&{}", t, r),
    };

    let host = target
        .host_str()
        .ok_or_else(|| UpstreamError::InvalidUri(format!("{} has no host", target)))?;
    let authority = match target.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };

    format!("{}://{}{}{}", target.scheme(), authority, joined, query)
        .parse()
        .map_err(|e: axum::http::uri::InvalidUri| UpstreamError::InvalidUri(e.to_string()))
}

/// Concatenate two path segments with exactly one `/` between them.
pub fn single_joining_slash(a: &str, b: &str) -> String {
    match (a.ends_with('/'), b.starts_with('/')) {
        (true, true) => format!("{}{}", a, &b[1..]),
        (false, false) => format!("{}/{}", a, b),
        _ => format!("{}{}", a, b),
    }
}

const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Remove connection-scoped headers, including any the `Connection` header names.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in named.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
}

/// Append the client address to `X-Forwarded-For`.
pub fn append_forwarded_for(headers: &mut HeaderMap, client: std::net::IpAddr) {
    const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
    let value = match headers.get(&X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
        Some(prior) => format!("{}, {}", prior, client),
        None => client.to_string(),
    };
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(X_FORWARDED_FOR, value);
    }
}
