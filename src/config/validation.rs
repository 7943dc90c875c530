//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (ports valid, sizes > 0)
//! - Derive advisory findings for settings that are legal but risky
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServerConfig → Result<(), Vec<ValidationError>>
//! - Advisories are data, logging them is the caller's business

use std::fmt;

use crate::config::schema::ServerConfig;

/// Origin entry that allows every origin.
pub const WILDCARD_ORIGIN: &str = "*";

/// A semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("host `{0}` is not of the form <host>:<port>")]
    InvalidHost(String),
    #[error("max_header_size must be greater than zero")]
    ZeroHeaderSize,
    #[error("max_event_size must be greater than zero")]
    ZeroEventSize,
    #[error("tls is enabled but `tls.{0}` is empty")]
    MissingTlsMaterial(&'static str),
    #[error("rum is enabled but rum.allow_origins is empty")]
    NoRumOrigins,
}

/// A legal setting that weakens security.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advisory {
    /// RUM allowed origins contain `*`.
    WildcardOrigin,
    /// A secret token travels over plaintext HTTP.
    SecretTokenWithoutTls,
}

impl fmt::Display for Advisory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Advisory::WildcardOrigin => f.write_str(
                "CORS related setting `rum.allow_origins` allows all origins. \
                 Consider more restrictive setting for production use.",
            ),
            Advisory::SecretTokenWithoutTls => {
                f.write_str("Secret token is set, but SSL is not enabled.")
            }
        }
    }
}

/// Validate a configuration, collecting every error.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if !is_host_port(&config.host) {
        errors.push(ValidationError::InvalidHost(config.host.clone()));
    }
    if config.max_header_size == 0 {
        errors.push(ValidationError::ZeroHeaderSize);
    }
    if config.max_event_size == 0 {
        errors.push(ValidationError::ZeroEventSize);
    }
    if config.tls.enabled {
        if config.tls.certificate.is_empty() {
            errors.push(ValidationError::MissingTlsMaterial("certificate"));
        }
        if config.tls.key.is_empty() {
            errors.push(ValidationError::MissingTlsMaterial("key"));
        }
    }
    if config.rum.enabled && config.rum.allow_origins.is_empty() {
        errors.push(ValidationError::NoRumOrigins);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn is_host_port(host: &str) -> bool {
    match host.rsplit_once(':') {
        Some((_, port)) => port.parse::<u16>().is_ok(),
        None => false,
    }
}

/// Advisory findings for the allowed-origins list. At most one wildcard finding.
pub fn origin_advisories(allow_origins: &[String]) -> Vec<Advisory> {
    if allow_origins.iter().any(|o| o == WILDCARD_ORIGIN) {
        vec![Advisory::WildcardOrigin]
    } else {
        Vec::new()
    }
}

/// Every advisory that applies to a configuration, in startup log order.
pub fn advisories(config: &ServerConfig) -> Vec<Advisory> {
    let mut findings = Vec::new();
    if config.rum.enabled {
        findings.extend(origin_advisories(&config.rum.allow_origins));
    }
    if config.has_secret_token() && !config.tls.enabled {
        findings.push(Advisory::SecretTokenWithoutTls);
    }
    findings
}
