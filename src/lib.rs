//! Caching, load-balancing HTTP reverse proxy.
//!
//! Requests are matched to a backend by path prefix. `GET` responses are
//! streamed into a pluggable cache while they are sent to the client, served
//! from it while fresh, revalidated with ETags once stale, and served as a
//! last good copy when the origin fails. Routes with several backends are
//! balanced round-robin with passive failover.

pub mod cache;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod load_balancer;
pub mod observability;
pub mod routing;

pub use config::schema::ProxyConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
