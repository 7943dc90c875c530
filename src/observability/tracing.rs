//! Request span creation.
//!
//! A [`Tracer`] names the service and opens one `transaction` span per traced
//! request. Which requests are traced is decided by `http::trace`.

use std::sync::Arc;

use axum::http::Method;
use tracing::{field, Span};
use uuid::Uuid;

use crate::net::RemoteAddr;

/// Opens request spans on behalf of the instrumented service.
#[derive(Debug, Clone)]
pub struct Tracer {
    service_name: Arc<str>,
    enabled: bool,
}

impl Tracer {
    pub fn new(service_name: impl Into<Arc<str>>) -> Self {
        Self {
            service_name: service_name.into(),
            enabled: true,
        }
    }

    /// A tracer that never opens spans.
    pub fn disabled() -> Self {
        Self {
            service_name: Arc::from(""),
            enabled: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Open a transaction span for one request.
    ///
    /// `http.status_code` and `duration_ms` are left empty for the caller to record.
    pub fn transaction(&self, method: &Method, path: &str, remote: Option<RemoteAddr>) -> Span {
        if !self.enabled {
            return Span::none();
        }
        tracing::info_span!(
            "transaction",
            service = %self.service_name,
            transaction.id = %Uuid::new_v4(),
            http.method = %method,
            url.path = %path,
            client.address = remote.map(field::display),
            http.status_code = field::Empty,
            duration_ms = field::Empty,
        )
    }
}

impl Default for Tracer {
    fn default() -> Self {
        Self::new(env!("CARGO_PKG_NAME"))
    }
}
