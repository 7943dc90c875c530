//! Request routing for the intake endpoints.
//!
//! # Routes
//! - `GET /`: healthcheck, returns build information to authorized callers
//! - `POST /intake/v2/events`: backend agent intake, secret token enforced
//! - `POST /intake/v2/rum/events`: browser agent intake, only when RUM is
//!   enabled, CORS restricted to `rum.allow_origins`
//!
//! Bodies are passed to the [`Reporter`] untouched.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use axum::{
    extract::{DefaultBodyLimit, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use serde_json::json;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    limit::RequestBodyLimitLayer,
};

use crate::config::validation::WILDCARD_ORIGIN;
use crate::config::ServerConfig;
use crate::http::ConfigurationError;
use crate::observability::metrics;
use crate::publish::{Batch, IntakeKind, PublishError, Reporter};

/// Healthcheck path. Requests to it are never traced.
pub const ROOT_PATH: &str = "/";
pub const BACKEND_PATH: &str = "/intake/v2/events";
pub const RUM_PATH: &str = "/intake/v2/rum/events";

/// Builds the request handler for a server.
///
/// Must not bind sockets and must be deterministic for a given configuration.
pub trait HandlerFactory {
    fn build(
        &self,
        config: &ServerConfig,
        reporter: Arc<dyn Reporter>,
    ) -> Result<Router, ConfigurationError>;
}

impl<F> HandlerFactory for F
where
    F: Fn(&ServerConfig, Arc<dyn Reporter>) -> Result<Router, ConfigurationError>,
{
    fn build(
        &self,
        config: &ServerConfig,
        reporter: Arc<dyn Reporter>,
    ) -> Result<Router, ConfigurationError> {
        self(config, reporter)
    }
}

/// The default intake router.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntakeMux;

impl HandlerFactory for IntakeMux {
    fn build(
        &self,
        config: &ServerConfig,
        reporter: Arc<dyn Reporter>,
    ) -> Result<Router, ConfigurationError> {
        new_mux(config, reporter)
    }
}

#[derive(Clone)]
struct IntakeState {
    reporter: Arc<dyn Reporter>,
    secret_token: Option<Arc<str>>,
}

impl IntakeState {
    fn authorized(&self, headers: &HeaderMap) -> bool {
        let Some(expected) = self.secret_token.as_deref() else {
            return true;
        };
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .is_some_and(|token| token == expected)
    }
}

/// Build the intake router for `config`.
pub fn new_mux(
    config: &ServerConfig,
    reporter: Arc<dyn Reporter>,
) -> Result<Router, ConfigurationError> {
    let state = IntakeState {
        reporter,
        secret_token: config
            .secret_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .map(Arc::from),
    };

    let mut router = Router::new()
        .route(ROOT_PATH, get(root_handler))
        .route(BACKEND_PATH, post(backend_handler));

    if config.rum.enabled {
        let cors = rum_cors(&config.rum.allow_origins)?;
        router = router.route(RUM_PATH, post(rum_handler).layer(cors));
    }

    Ok(router
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(config.max_event_size))
        .with_state(state))
}

fn rum_cors(allow_origins: &[String]) -> Result<CorsLayer, ConfigurationError> {
    if allow_origins.is_empty() {
        return Err(ConfigurationError::Handler(
            "rum.allow_origins must not be empty".to_string(),
        ));
    }

    let allow_origin = if allow_origins.iter().any(|o| o == WILDCARD_ORIGIN) {
        AllowOrigin::from(Any)
    } else {
        let origins = allow_origins
            .iter()
            .map(|origin| {
                HeaderValue::from_str(origin).map_err(|_| {
                    ConfigurationError::Handler(format!("invalid rum origin {origin:?}"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        AllowOrigin::list(origins)
    };

    Ok(CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::CONTENT_ENCODING, header::ACCEPT])
        .max_age(Duration::from_secs(3600)))
}

async fn root_handler(State(state): State<IntakeState>, headers: HeaderMap) -> Response {
    if !state.authorized(&headers) {
        // Liveness only, no build details for anonymous callers.
        return StatusCode::OK.into_response();
    }
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
    .into_response()
}

async fn backend_handler(
    State(state): State<IntakeState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !state.authorized(&headers) {
        return error_response(StatusCode::UNAUTHORIZED, "invalid token");
    }
    forward(&state, IntakeKind::Backend, &headers, body)
}

async fn rum_handler(
    State(state): State<IntakeState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    forward(&state, IntakeKind::Rum, &headers, body)
}

fn forward(state: &IntakeState, kind: IntakeKind, headers: &HeaderMap, body: Bytes) -> Response {
    if body.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "request body is empty");
    }

    let batch = Batch {
        kind,
        content_type: headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned),
        body,
        received_at: SystemTime::now(),
    };

    match state.reporter.report(batch) {
        Ok(()) => {
            metrics::record_reported("accepted");
            StatusCode::ACCEPTED.into_response()
        }
        Err(e) => {
            let outcome = match e {
                PublishError::Full => "queue_full",
                PublishError::Closed => "closed",
            };
            metrics::record_reported(outcome);
            tracing::warn!(intake = kind.as_str(), error = %e, "Batch rejected");
            error_response(StatusCode::SERVICE_UNAVAILABLE, &e.to_string())
        }
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}
