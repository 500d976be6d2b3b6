//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0 and ordered, addresses parse)
//! - Resolve route backends into URLs, reporting bad routes individually
//!
//! # Design Decisions
//! - Returns all global validation errors, not just the first
//! - A broken route never fails the whole config; callers skip it with a warning
//! - Validation is a pure function over `ProxyConfig`

use std::net::SocketAddr;

use thiserror::Error;
use url::Url;

use crate::config::schema::{CacheBackendKind, ProxyConfig, RouteConfig};

/// A problem with the configuration as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid bind address `{0}`")]
    InvalidBindAddress(String),

    #[error("invalid metrics address `{0}`")]
    InvalidMetricsAddress(String),

    #[error("timeout `{0}` must be greater than zero")]
    ZeroTimeout(&'static str),

    #[error("timeouts.request_secs ({request_secs}) must exceed timeouts.upstream_secs ({upstream_secs})")]
    RequestTimeoutTooShort { request_secs: u64, upstream_secs: u64 },

    #[error("limits.max_body_bytes must be greater than zero")]
    ZeroBodyLimit,

    #[error("disk cache requires a non-empty cache.directory")]
    MissingCacheDirectory,
}

/// A problem that disqualifies a single route.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    #[error("path prefix `{0}` must start with `/`")]
    InvalidPrefix(String),

    #[error("no backend configured")]
    NoBackend,

    #[error("both `backend` and `backends` are set")]
    AmbiguousBackend,

    #[error("invalid backend URL `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("backend URL `{0}` must use http")]
    UnsupportedScheme(String),

    #[error("inactive_timeout_secs must be greater than zero")]
    ZeroInactiveTimeout,
}

/// Backends a valid route resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteTargets {
    Single(Url),
    Balanced(Vec<Url>),
}

/// Validate global settings, collecting every problem.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidBindAddress(
            config.listener.bind_address.clone(),
        ));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidMetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::ZeroTimeout("request_secs"));
    }
    if config.timeouts.upstream_secs == 0 {
        errors.push(ValidationError::ZeroTimeout("upstream_secs"));
    }
    // The request timeout wraps the cache, which must outlive a slow backend
    // to fall back on its last good copy.
    let (request_secs, upstream_secs) = (config.timeouts.request_secs, config.timeouts.upstream_secs);
    if request_secs > 0 && upstream_secs > 0 && request_secs <= upstream_secs {
        errors.push(ValidationError::RequestTimeoutTooShort {
            request_secs,
            upstream_secs,
        });
    }

    if config.limits.max_body_bytes == 0 {
        errors.push(ValidationError::ZeroBodyLimit);
    }

    if config.cache.enabled
        && config.cache.backend == CacheBackendKind::Disk
        && config.cache.directory.trim().is_empty()
    {
        errors.push(ValidationError::MissingCacheDirectory);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate one route and resolve its backend URLs.
pub fn validate_route(route: &RouteConfig) -> Result<RouteTargets, RouteError> {
    if !route.path_prefix.starts_with('/') {
        return Err(RouteError::InvalidPrefix(route.path_prefix.clone()));
    }
    if route.inactive_timeout_secs == 0 {
        return Err(RouteError::ZeroInactiveTimeout);
    }

    match (&route.backend, route.backends.is_empty()) {
        (Some(_), false) => Err(RouteError::AmbiguousBackend),
        (Some(backend), true) => parse_backend(backend).map(RouteTargets::Single),
        (None, false) => route
            .backends
            .iter()
            .map(|b| parse_backend(b))
            .collect::<Result<Vec<_>, _>>()
            .map(RouteTargets::Balanced),
        (None, true) => Err(RouteError::NoBackend),
    }
}

fn parse_backend(raw: &str) -> Result<Url, RouteError> {
    let url = Url::parse(raw).map_err(|e| RouteError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    if url.scheme() != "http" {
        return Err(RouteError::UnsupportedScheme(raw.to_string()));
    }
    if url.host_str().is_none() {
        return Err(RouteError::InvalidUrl {
            url: raw.to_string(),
            reason: "missing host".to_string(),
        });
    }
    Ok(url)
}
