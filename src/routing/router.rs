//! Route lookup.
//!
//! # Responsibilities
//! - Build routes from configuration, skipping invalid ones
//! - Look up the route owning a request path
//! - Return matched route or explicit no-match
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - Longest prefix wins, regardless of config order
//! - O(n) path prefix scan (acceptable for typical route counts)

use std::sync::Arc;
use std::time::Duration;

use crate::config::validation::{validate_route, RouteTargets};
use crate::config::RouteConfig;
use crate::load_balancer::RoundRobinBalancer;
use crate::routing::mapping::Mapping;

/// A compiled route.
#[derive(Debug, Clone)]
pub struct Route {
    pub name: String,
    pub prefix: String,
    pub mapping: Mapping,
}

/// Path-prefix router.
#[derive(Debug, Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    /// Compile routes, logging and skipping any that fail validation.
    pub fn from_config(configs: &[RouteConfig]) -> Self {
        let mut routes = Vec::with_capacity(configs.len());

        for config in configs {
            let targets = match validate_route(config) {
                Ok(targets) => targets,
                Err(e) => {
                    tracing::warn!(route = %config.name, error = %e, "Skipping invalid route");
                    continue;
                }
            };

            if routes.iter().any(|r: &Route| r.prefix == config.path_prefix) {
                tracing::warn!(
                    route = %config.name,
                    prefix = %config.path_prefix,
                    "Skipping route with duplicate prefix"
                );
                continue;
            }

            let mapping = match targets {
                RouteTargets::Single(url) => Mapping::Single(url),
                RouteTargets::Balanced(urls) => Mapping::Balanced(Arc::new(
                    RoundRobinBalancer::with_timeout(
                        urls,
                        Duration::from_secs(config.inactive_timeout_secs),
                    ),
                )),
            };

            tracing::info!(route = %config.name, prefix = %config.path_prefix, "Route registered");
            routes.push(Route {
                name: config.name.clone(),
                prefix: config.path_prefix.clone(),
                mapping,
            });
        }

        routes.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
        Self { routes }
    }

    /// Find the route with the longest prefix of `path`.
    pub fn match_path(&self, path: &str) -> Option<&Route> {
        self.routes.iter().find(|r| path.starts_with(&r.prefix))
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single(name: &str, prefix: &str) -> RouteConfig {
        RouteConfig {
            name: name.into(),
            path_prefix: prefix.into(),
            backend: Some("http://localhost:3000/".into()),
            backends: Vec::new(),
            inactive_timeout_secs: 30,
        }
    }

    #[test]
    fn test_longest_prefix_wins() {
        let router = Router::from_config(&[
            single("root", "/"),
            single("api", "/api/"),
            single("api-v2", "/api/v2/"),
        ]);

        assert_eq!(router.match_path("/api/v2/users").unwrap().name, "api-v2");
        assert_eq!(router.match_path("/api/v1/users").unwrap().name, "api");
        assert_eq!(router.match_path("/index.html").unwrap().name, "root");
    }

    #[test]
    fn test_no_match() {
        let router = Router::from_config(&[single("api", "/api/")]);
        assert!(router.match_path("/other").is_none());
        assert!(router.match_path("/api").is_none());
    }

    #[test]
    fn test_invalid_routes_skipped() {
        let mut no_backend = single("broken", "/broken/");
        no_backend.backend = None;
        let mut bad_url = single("bad", "/bad/");
        bad_url.backend = Some("not a url".into());

        let router = Router::from_config(&[
            no_backend,
            bad_url,
            single("ok", "/ok/"),
            single("dup", "/ok/"),
        ]);
        assert_eq!(router.len(), 1);
        assert_eq!(router.routes()[0].name, "ok");
    }

    #[test]
    fn test_balanced_mapping() {
        let router = Router::from_config(&[RouteConfig {
            name: "lb".into(),
            path_prefix: "/lb/".into(),
            backend: None,
            backends: vec!["http://h1:1/".into(), "http://h2:2/".into()],
            inactive_timeout_secs: 5,
        }]);

        match &router.match_path("/lb/x").unwrap().mapping {
            Mapping::Balanced(lb) => {
                assert_eq!(lb.len(), 2);
                assert_eq!(lb.inactive_timeout(), Duration::from_secs(5));
            }
            other => panic!("unexpected mapping {:?}", other),
        }
    }
}
