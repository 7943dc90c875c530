//! Request tracing middleware.
//!
//! The exclusion check runs here, before a span exists, so the server never
//! traces its own healthchecks or the requests it sends itself over the pipe.

use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};
use tracing::Instrument;

use crate::api::ROOT_PATH;
use crate::net::RemoteAddr;
use crate::observability::{metrics, Tracer};

/// What the trace filter looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestMeta<'a> {
    pub remote: Option<RemoteAddr>,
    pub path: &'a str,
}

impl<'a> RequestMeta<'a> {
    pub fn from_request<B>(request: &'a Request<B>) -> Self {
        Self {
            remote: request.extensions().get::<RemoteAddr>().copied(),
            path: request.uri().path(),
        }
    }
}

/// Whether a request must not be traced.
pub fn should_exclude(meta: &RequestMeta<'_>) -> bool {
    // Self-originated requests would trace themselves forever.
    meta.remote == Some(RemoteAddr::Pipe) || meta.path == ROOT_PATH
}

/// Middleware opening a transaction span around every traced request.
pub async fn trace_requests(
    State(tracer): State<Tracer>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let meta = RequestMeta::from_request(&request);

    if should_exclude(&meta) {
        let response = next.run(request).await;
        metrics::record_request(method.as_str(), response.status().as_u16(), start);
        return response;
    }

    let span = tracer.transaction(&method, meta.path, meta.remote);
    let response = next.run(request).instrument(span.clone()).await;

    let status = response.status().as_u16();
    let elapsed = start.elapsed();
    span.record("http.status_code", status);
    span.record("duration_ms", duration_millis(elapsed));
    tracing::debug!(parent: &span, status, "Request completed");
    metrics::record_request(method.as_str(), status, start);

    response
}

fn duration_millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}
