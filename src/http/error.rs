//! Errors surfaced by the HTTP server.

use crate::net::TlsError;

/// The server cannot be built from its configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    /// The handler factory rejected the configuration.
    #[error("invalid handler configuration: {0}")]
    Handler(String),
    /// The transport-security material could not be loaded.
    #[error("invalid TLS configuration: {0}")]
    Tls(#[from] TlsError),
}

/// The serving loop ended for a reason other than `stop()`.
#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error("server is already serving")]
    AlreadyStarted,
    #[error("listener has no local address: {0}")]
    LocalAddr(#[source] std::io::Error),
    #[error("failed to accept connection: {0}")]
    Accept(#[source] std::io::Error),
}
