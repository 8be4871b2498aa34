use std::time::Instant;

use axum::{
    extract::{MatchedPath, Request, State},
    middleware::Next,
    response::Response,
};

use crate::Deployment;

const UNMATCHED_ENDPOINT: &str = "unmatched";

/// Records one request count and one latency observation per request,
/// whatever status the inner service answers with. The endpoint label is the
/// route template so path parameters do not fan out label values.
pub async fn track_metrics(
    State(deployment): State<Deployment>,
    req: Request,
    next: Next,
) -> Response {
    let started = Instant::now();
    let method = req.method().as_str().to_string();
    let endpoint = req
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| UNMATCHED_ENDPOINT.to_string());

    let response = next.run(req).await;

    let elapsed = started.elapsed();
    let status = response.status().as_u16();
    let metrics = deployment.metrics();
    metrics.increment_counter(&method, &endpoint, status);
    metrics.observe_duration(&method, &endpoint, elapsed);

    tracing::debug!(
        method = %method,
        endpoint = %endpoint,
        status,
        elapsed_ms = elapsed.as_millis() as u64,
        "Request recorded"
    );
    response
}
