//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the intake
//! server. All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the intake server.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "localhost:8200").
    pub host: String,

    /// Keep-alive idle timeout in seconds (0 = disabled).
    pub idle_timeout_secs: u64,

    /// Request header read timeout in seconds (0 = disabled).
    pub read_timeout_secs: u64,

    /// Deadline for producing a response in seconds (0 = disabled).
    pub write_timeout_secs: u64,

    /// Maximum size of request headers in bytes.
    pub max_header_size: usize,

    /// Maximum concurrent connections. Zero or negative means unlimited.
    pub max_connections: i64,

    /// Deadline for the graceful phase of shutdown in seconds (0 = unbounded).
    pub shutdown_timeout_secs: u64,

    /// Maximum accepted request body size for intake endpoints.
    pub max_event_size: usize,

    /// Shared secret agents must present as a bearer token.
    pub secret_token: Option<String>,

    /// Transport security.
    pub tls: TlsConfig,

    /// Real User Monitoring endpoints.
    pub rum: RumConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "localhost:8200".to_string(),
            idle_timeout_secs: 45,
            read_timeout_secs: 30,
            write_timeout_secs: 30,
            max_header_size: 1024 * 1024,
            max_connections: 0,
            shutdown_timeout_secs: 5,
            max_event_size: 1024 * 1024,
            secret_token: None,
            tls: TlsConfig::default(),
            rum: RumConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

fn non_zero_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

impl ServerConfig {
    pub fn idle_timeout(&self) -> Option<Duration> {
        non_zero_secs(self.idle_timeout_secs)
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        non_zero_secs(self.read_timeout_secs)
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        non_zero_secs(self.write_timeout_secs)
    }

    /// `None` means graceful shutdown waits indefinitely.
    pub fn shutdown_timeout(&self) -> Option<Duration> {
        non_zero_secs(self.shutdown_timeout_secs)
    }

    /// The positive connection limit, if one is configured.
    pub fn connection_limit(&self) -> Option<usize> {
        usize::try_from(self.max_connections).ok().filter(|n| *n > 0)
    }

    /// Whether a non-empty secret token is configured.
    pub fn has_secret_token(&self) -> bool {
        self.secret_token.as_deref().is_some_and(|t| !t.is_empty())
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Serve HTTPS instead of plaintext HTTP.
    pub enabled: bool,

    /// Path to certificate chain file (PEM).
    pub certificate: String,

    /// Path to private key file (PEM).
    pub key: String,
}

/// RUM (browser agent) endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RumConfig {
    /// Expose the RUM intake endpoint.
    pub enabled: bool,

    /// Origins allowed to send cross-origin requests. `*` allows any.
    pub allow_origins: Vec<String>,
}

impl Default for RumConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            allow_origins: vec!["*".to_string()],
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level filter (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
