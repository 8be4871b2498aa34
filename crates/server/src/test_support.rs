use std::sync::Arc;

use chrono::Utc;
use db::{DBService, DbPoolOptions};
use jsonwebtoken::{EncodingKey, Header, encode};
use serde_json::json;
use services::services::{
    cache::{MemoryTaskCache, TaskCache},
    config::Config,
};
use utils_jwt::{TokenVerifier, VerifierOptions};

use crate::Deployment;

pub const TEST_SECRET: &str = "test-signing-secret";

pub fn test_config() -> Config {
    Config::from_env_with(|name| match name {
        "AUTH_JWT_SECRET" => Some(TEST_SECRET.to_string()),
        "DATABASE_URL" => Some("sqlite::memory:".to_string()),
        "CACHE_TIMEOUT_MS" => Some("100".to_string()),
        _ => None,
    })
    .unwrap()
}

pub async fn deployment_with_cache(cache: Arc<dyn TaskCache>) -> Deployment {
    let config = test_config();
    let db = DBService::new(&config.database.url, &DbPoolOptions::default())
        .await
        .unwrap();
    let verifier = TokenVerifier::from_secret(TEST_SECRET.as_bytes(), &VerifierOptions::default());
    Deployment::from_parts(config, db, cache, verifier)
}

pub async fn test_deployment() -> (Deployment, Arc<MemoryTaskCache>) {
    let cache = Arc::new(MemoryTaskCache::new());
    let deployment = deployment_with_cache(cache.clone()).await;
    (deployment, cache)
}

pub fn token_for(subject: &str) -> String {
    sign(json!({
        "sub": subject,
        "preferred_username": subject,
        "exp": Utc::now().timestamp() + 3600,
    }))
}

pub fn expired_token(subject: &str) -> String {
    sign(json!({
        "sub": subject,
        "exp": Utc::now().timestamp() - 3600,
    }))
}

fn sign(claims: serde_json::Value) -> String {
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(TEST_SECRET.as_bytes()),
    )
    .unwrap()
}

pub fn bearer(token: &str) -> String {
    format!("Bearer {token}")
}
