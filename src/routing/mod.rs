//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (path, query, body)
//!     → router.rs (longest prefix lookup)
//!     → mapping.rs (single backend or load balancer)
//!     → upstream.rs (URI rewrite, outbound call, timeout)
//!     → Response or UpstreamError
//!
//! Route Compilation (at startup):
//!     RouteConfig[]
//!     → validate each route, skip broken ones
//!     → build balancers for multi-backend routes
//!     → sort by prefix length, freeze as immutable Router
//! ```
//!
//! # Design Decisions
//! - Routes compiled at startup, immutable at runtime
//! - No regex in hot path (prefix matching only)
//! - Deterministic: same input always matches same route

pub mod mapping;
pub mod router;
pub mod upstream;

pub use mapping::Mapping;
pub use router::{Route, Router};
pub use upstream::{OutboundRequest, UpstreamClient, UpstreamError};
