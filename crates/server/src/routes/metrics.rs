use axum::{
    extract::State,
    http::header,
    response::IntoResponse,
};

use crate::Deployment;

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

pub async fn render_metrics(State(deployment): State<Deployment>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
        deployment.metrics().render(),
    )
}
