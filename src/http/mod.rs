//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware stack)
//!     → request ID, access log, timeout
//!     → cache middleware (GET only)
//!     → proxy handler → routing → upstream
//!     → Send to client
//! ```

pub mod server;

pub use server::{AppState, HttpServer};
