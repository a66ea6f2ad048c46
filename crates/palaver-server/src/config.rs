//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use palaver_shared::constants::{DEFAULT_HTTP_PORT, MAX_UPLOAD_SIZE};
use palaver_shared::Handle;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) API server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// SQLite database file. `None` uses the platform data directory.
    /// Env: `DATABASE_PATH`
    pub database_path: Option<PathBuf>,

    /// Directory where uploaded images and files are kept.
    /// Env: `UPLOAD_PATH`
    /// Default: `./uploads`
    pub upload_path: PathBuf,

    /// Maximum upload size in bytes.
    /// Env: `MAX_UPLOAD_SIZE`
    /// Default: 10 MiB
    pub max_upload_size: usize,

    /// How long an upload may stay unattached to any message before the
    /// hourly purge removes it.
    /// Env: `UPLOAD_GRACE_SECS`
    /// Default: 3600
    pub upload_grace: Duration,

    /// Human-readable name for this instance, reported by `/info`.
    /// Env: `INSTANCE_NAME`
    pub instance_name: String,

    /// Whether the `register` action accepts new identities.
    /// Env: `REGISTRATION_OPEN` (true/false)
    /// Default: `true`
    pub registration_open: bool,

    /// Handle that receives the admin role when it registers.
    /// Env: `ADMIN_HANDLE`
    pub admin_handle: Option<Handle>,

    /// Period of the background presence sweep.
    /// Env: `SWEEP_INTERVAL_SECS`
    /// Default: 60
    pub sweep_interval: Duration,

    /// Sustained requests per second allowed per client IP.
    /// Env: `RATE_LIMIT_PER_SEC`
    pub rate_limit_per_sec: f64,

    /// Burst size per client IP.
    /// Env: `RATE_LIMIT_BURST`
    pub rate_limit_burst: f64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: None,
            upload_path: PathBuf::from("./uploads"),
            max_upload_size: MAX_UPLOAD_SIZE,
            upload_grace: Duration::from_secs(3600),
            instance_name: "Palaver".to_string(),
            registration_open: true,
            admin_handle: None,
            sweep_interval: Duration::from_secs(60),
            rate_limit_per_sec: 10.0,
            rate_limit_burst: 30.0,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup. `from_env` passes
    /// the process environment; tests pass a map.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = lookup("HTTP_ADDR") {
            match addr.parse::<SocketAddr>() {
                Ok(parsed) => config.http_addr = parsed,
                Err(_) => tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default"),
            }
        }

        if let Some(path) = lookup("DATABASE_PATH").filter(|p| !p.is_empty()) {
            config.database_path = Some(PathBuf::from(path));
        }

        if let Some(path) = lookup("UPLOAD_PATH").filter(|p| !p.is_empty()) {
            config.upload_path = PathBuf::from(path);
        }

        if let Some(val) = lookup("MAX_UPLOAD_SIZE") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.max_upload_size = n,
                _ => tracing::warn!(value = %val, "Invalid MAX_UPLOAD_SIZE, using default"),
            }
        }

        if let Some(val) = lookup("UPLOAD_GRACE_SECS") {
            match val.parse::<u64>() {
                Ok(n) => config.upload_grace = Duration::from_secs(n),
                _ => tracing::warn!(value = %val, "Invalid UPLOAD_GRACE_SECS, using default"),
            }
        }

        if let Some(name) = lookup("INSTANCE_NAME") {
            config.instance_name = name;
        }

        if let Some(val) = lookup("REGISTRATION_OPEN") {
            config.registration_open = val != "false" && val != "0";
        }

        if let Some(raw) = lookup("ADMIN_HANDLE").filter(|h| !h.is_empty()) {
            match Handle::parse(&raw) {
                Ok(handle) => config.admin_handle = Some(handle),
                Err(e) => tracing::warn!(value = %raw, error = %e, "Invalid ADMIN_HANDLE, ignoring"),
            }
        }

        if let Some(val) = lookup("SWEEP_INTERVAL_SECS") {
            match val.parse::<u64>() {
                Ok(n) if n > 0 => config.sweep_interval = Duration::from_secs(n),
                _ => tracing::warn!(value = %val, "Invalid SWEEP_INTERVAL_SECS, using default"),
            }
        }

        if let Some(val) = lookup("RATE_LIMIT_PER_SEC") {
            match val.parse::<f64>() {
                Ok(n) if n > 0.0 => config.rate_limit_per_sec = n,
                _ => tracing::warn!(value = %val, "Invalid RATE_LIMIT_PER_SEC, using default"),
            }
        }

        if let Some(val) = lookup("RATE_LIMIT_BURST") {
            match val.parse::<f64>() {
                Ok(n) if n >= 1.0 => config.rate_limit_burst = n,
                _ => tracing::warn!(value = %val, "Invalid RATE_LIMIT_BURST, using default"),
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_map(pairs: &[(&str, &str)]) -> ServerConfig {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8080).into());
        assert_eq!(config.max_upload_size, 10 * 1024 * 1024);
        assert!(config.registration_open);
        assert!(config.admin_handle.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = from_map(&[
            ("HTTP_ADDR", "127.0.0.1:9000"),
            ("DATABASE_PATH", "/tmp/chat.db"),
            ("REGISTRATION_OPEN", "false"),
            ("ADMIN_HANDLE", "root"),
            ("SWEEP_INTERVAL_SECS", "15"),
            ("UPLOAD_GRACE_SECS", "120"),
        ]);
        assert_eq!(config.http_addr, ([127, 0, 0, 1], 9000).into());
        assert_eq!(config.database_path, Some(PathBuf::from("/tmp/chat.db")));
        assert!(!config.registration_open);
        assert_eq!(config.admin_handle.map(|h| h.to_string()), Some("root".into()));
        assert_eq!(config.sweep_interval, Duration::from_secs(15));
        assert_eq!(config.upload_grace, Duration::from_secs(120));
    }

    #[test]
    fn test_bad_values_fall_back() {
        let config = from_map(&[
            ("HTTP_ADDR", "not-an-addr"),
            ("MAX_UPLOAD_SIZE", "-1"),
            ("ADMIN_HANDLE", "a b"),
            ("RATE_LIMIT_BURST", "0"),
        ]);
        let default = ServerConfig::default();
        assert_eq!(config.http_addr, default.http_addr);
        assert_eq!(config.max_upload_size, default.max_upload_size);
        assert!(config.admin_handle.is_none());
        assert_eq!(config.rate_limit_burst, default.rate_limit_burst);
    }
}
