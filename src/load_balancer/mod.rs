//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Balanced route matched
//!     → round_robin.rs (advance cursor, pick next eligible target)
//!     → target.rs (active? inactive past timeout → half-open probe)
//!     → caller's outbound call
//!         ok  → mark active, return
//!         err → mark inactive, try next target
//!     → AllBackendsDown after one full turn
//! ```
//!
//! # Design Decisions
//! - No background health checks; health is learned from real traffic
//! - Cursor and targets share one mutex, never held across a call

pub mod round_robin;
pub mod target;

pub use round_robin::{LoadBalancerError, RoundRobinBalancer};
pub use target::{Target, TargetState};
