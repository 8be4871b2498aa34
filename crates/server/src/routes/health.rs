use axum::{extract::State, response::Json as ResponseJson};
use serde::{Deserialize, Serialize};

use crate::{Deployment, error::ApiError};

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

/// Unauthenticated liveness check that also confirms the store is reachable.
pub async fn health_check(
    State(deployment): State<Deployment>,
) -> Result<ResponseJson<HealthResponse>, ApiError> {
    deployment.storage(deployment.db().ping()).await?;
    tracing::info!("Health check passed");
    Ok(ResponseJson(HealthResponse {
        status: "ok".to_string(),
    }))
}
