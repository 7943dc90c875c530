//! Startup diagnostics.
//!
//! Reports what the listener is about to serve: address, RUM endpoints,
//! connection limit and transport security. Findings come from
//! [`advisories`](crate::config::advisories); this module only logs them.

use std::net::SocketAddr;

use crate::config::{advisories, Advisory, ServerConfig};

/// Log the startup banner for a listener bound to `addr`.
pub fn announce(config: &ServerConfig, addr: SocketAddr, tls_enabled: bool) {
    let findings = advisories(config);

    tracing::info!(address = %addr, "Listening on: {}", addr);

    if config.rum.enabled {
        tracing::info!("RUM endpoints enabled!");
        if findings.contains(&Advisory::WildcardOrigin) {
            tracing::warn!("{}", Advisory::WildcardOrigin);
        }
    } else {
        tracing::info!("RUM endpoints disabled.");
    }

    if let Some(limit) = config.connection_limit() {
        tracing::info!(max_connections = limit, "Connection limit set to: {}", limit);
    }

    if tls_enabled {
        tracing::info!("SSL enabled.");
    } else {
        if findings.contains(&Advisory::SecretTokenWithoutTls) {
            tracing::warn!("{}", Advisory::SecretTokenWithoutTls);
        }
        tracing::info!("SSL disabled.");
    }
}
