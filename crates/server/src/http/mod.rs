use axum::{Router, middleware::from_fn_with_state, routing::get};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{Deployment, middleware::track_metrics, routes};

mod auth;

pub fn router(deployment: Deployment) -> Router {
    let protected_routes = routes::tasks::router().route_layer(from_fn_with_state(
        deployment.clone(),
        auth::require_auth,
    ));

    // Metrics wrap auth so rejected requests are counted too.
    let instrumented_routes = Router::new()
        .route("/health", get(routes::health::health_check))
        .merge(protected_routes)
        .route_layer(from_fn_with_state(deployment.clone(), track_metrics));

    Router::new()
        .merge(instrumented_routes)
        .route("/metrics", get(routes::metrics::render_metrics))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(deployment)
}
