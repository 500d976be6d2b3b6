//! Startup orchestration.
//!
//! # Responsibilities
//! - Resolve the effective configuration (file or defaults, env overrides)
//! - Bind the listener last, once everything else is ready
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - `PORT` only replaces the port of the bind address, never the host

use std::net::SocketAddr;
use std::num::ParseIntError;
use std::path::{Path, PathBuf};

use tokio::net::TcpListener;

use crate::config::{load_config, ConfigError, ProxyConfig};

/// What `PORT` did to the bind address.
#[derive(Debug)]
pub enum PortOverride {
    /// Not set, or blank.
    Unset,
    /// Applied; holds the resulting bind address.
    Applied(String),
    /// Not a port number; the configured address was kept.
    Invalid { raw: String, error: ParseIntError },
}

/// Effective configuration plus how it was obtained.
///
/// Resolution runs before the tracing subscriber exists, so it records its
/// outcome here and [`ResolvedConfig::log`] reports it once logging is up.
#[derive(Debug)]
pub struct ResolvedConfig {
    pub config: ProxyConfig,
    pub source: Option<PathBuf>,
    pub port_override: PortOverride,
}

impl ResolvedConfig {
    pub fn log(&self) {
        match &self.source {
            Some(path) => tracing::info!(
                path = %path.display(),
                routes = self.config.routes.len(),
                "Configuration loaded"
            ),
            None => tracing::info!("No config file given, using defaults"),
        }

        match &self.port_override {
            PortOverride::Unset => {}
            PortOverride::Applied(bind_address) => {
                tracing::info!(bind_address = %bind_address, "Bind port overridden by PORT")
            }
            PortOverride::Invalid { raw, error } => {
                tracing::warn!(port = %raw, error = %error, "Ignoring invalid PORT")
            }
        }
    }
}

/// Load the config file if one is given, otherwise use defaults, then apply
/// the `PORT` override.
pub fn resolve_config(path: Option<&Path>, port: Option<&str>) -> Result<ResolvedConfig, ConfigError> {
    let mut config = match path {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };
    let port_override = apply_port_override(&mut config, port);
    Ok(ResolvedConfig {
        config,
        source: path.map(Path::to_path_buf),
        port_override,
    })
}

/// Replace the bind port with `port` when it is a valid port number.
pub fn apply_port_override(config: &mut ProxyConfig, port: Option<&str>) -> PortOverride {
    let Some(raw) = port.map(str::trim).filter(|p| !p.is_empty()) else {
        return PortOverride::Unset;
    };

    let port = match raw.parse::<u16>() {
        Ok(port) => port,
        Err(error) => {
            return PortOverride::Invalid {
                raw: raw.to_string(),
                error,
            }
        }
    };

    match config.listener.bind_address.parse::<SocketAddr>() {
        Ok(mut addr) => {
            addr.set_port(port);
            config.listener.bind_address = addr.to_string();
        }
        Err(_) => {
            config.listener.bind_address = format!("0.0.0.0:{}", port);
        }
    }
    PortOverride::Applied(config.listener.bind_address.clone())
}

/// Bind the TCP listener for the configured address.
pub async fn bind_listener(config: &ProxyConfig) -> std::io::Result<TcpListener> {
    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");
    Ok(listener)
}
