//! # Server Configuration
//!
//! Runtime settings for `dap serve`, built from CLI flags and their
//! `DAP_*` environment fallbacks. Nothing here is global: `main` builds one
//! value and hands it to [`crate::api::serve`].

use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::path::PathBuf;

/// Default database file.
pub const DEFAULT_DB: &str = "dap.redb";
/// Default bind host.
pub const DEFAULT_HOST: &str = "127.0.0.1";
/// Default bind port.
pub const DEFAULT_PORT: u16 = 8080;
/// Default request budget per second.
pub const DEFAULT_RATE_LIMIT: u32 = 100;

/// Settings for the HTTP server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub db: PathBuf,
    pub host: String,
    pub port: u16,
    /// Requests per second across all clients. Zero disables limiting.
    pub rate_limit: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            db: PathBuf::from(DEFAULT_DB),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            rate_limit: DEFAULT_RATE_LIMIT,
        }
    }
}

impl ServerConfig {
    /// Resolve the bind address.
    pub fn socket_addr(&self) -> Result<SocketAddr, String> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| format!("invalid bind address {}:{}: {e}", self.host, self.port))
    }

    /// The rate as a quota value, or `None` when limiting is off.
    pub fn quota_per_second(&self) -> Option<NonZeroU32> {
        NonZeroU32::new(self.rate_limit)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_binds_loopback() {
        let config = ServerConfig::default();
        assert_eq!(config.socket_addr().unwrap().to_string(), "127.0.0.1:8080");
        assert_eq!(config.db, PathBuf::from("dap.redb"));
    }

    #[test]
    fn bad_host_is_reported() {
        let config = ServerConfig {
            host: "not a host".into(),
            ..ServerConfig::default()
        };
        assert!(config.socket_addr().is_err());
    }

    #[test]
    fn zero_rate_disables_limiting() {
        let config = ServerConfig {
            rate_limit: 0,
            ..ServerConfig::default()
        };
        assert!(config.quota_per_second().is_none());
    }
}
