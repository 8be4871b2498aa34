use std::{future::Future, sync::Arc};

use db::{DBService, DbErr, DbPool, DbPoolOptions, models::task::TaskError};
use services::services::{
    cache::{BestEffortCache, CacheError, MemoryTaskCache, RedisTaskCache, TaskCache},
    config::{AuthConfig, AuthKeySource, CacheConfig, Config},
    metrics::Metrics,
};
use thiserror::Error;
use utils_jwt::{AuthError, TokenVerifier, VerifierOptions, jwk::JwkSet};

use crate::error::ApiError;

#[derive(Debug, Error)]
pub enum DeploymentError {
    #[error(transparent)]
    Database(#[from] DbErr),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("failed to fetch signing keys: {0}")]
    Jwks(#[from] reqwest::Error),
}

/// Everything a request handler needs, shared across the router.
#[derive(Clone)]
pub struct Deployment {
    config: Arc<Config>,
    db: DBService,
    cache: BestEffortCache,
    verifier: Arc<TokenVerifier>,
    metrics: Arc<Metrics>,
}

impl Deployment {
    pub async fn new(config: Config) -> Result<Self, DeploymentError> {
        let db = DBService::new(
            &config.database.url,
            &DbPoolOptions {
                max_connections: config.database.max_connections,
                connect_timeout: config.database.connect_timeout,
            },
        )
        .await?;
        let verifier = load_verifier(&config.auth).await?;
        let cache = build_cache(&config.cache)?;
        Ok(Self::from_parts(config, db, cache, verifier))
    }

    pub fn from_parts(
        config: Config,
        db: DBService,
        cache: Arc<dyn TaskCache>,
        verifier: TokenVerifier,
    ) -> Self {
        let cache = BestEffortCache::new(cache, config.cache.timeout);
        Self {
            config: Arc::new(config),
            db,
            cache,
            verifier: Arc::new(verifier),
            metrics: Arc::new(Metrics::new()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn db(&self) -> &DBService {
        &self.db
    }

    pub fn cache(&self) -> &BestEffortCache {
        &self.cache
    }

    pub fn verifier(&self) -> &TokenVerifier {
        &self.verifier
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Awaits a storage call under the configured operation timeout.
    pub async fn storage<T, E, Fut>(&self, op: Fut) -> Result<T, ApiError>
    where
        Fut: Future<Output = Result<T, E>>,
        ApiError: From<E>,
    {
        let limit = self.config.database.operation_timeout;
        match tokio::time::timeout(limit, op).await {
            Ok(result) => result.map_err(ApiError::from),
            Err(_) => Err(ApiError::StorageTimeout(limit)),
        }
    }

    /// Runs a mutation on its own task so a dropped client connection cannot
    /// abandon it between statements. On timeout the operation is dropped
    /// inside that task. A timeout before the commit rolls the transaction
    /// back; one that lands while the commit is in flight may still leave it
    /// committed, so a 500 here does not prove nothing was written.
    pub async fn spawn_storage<T, F, Fut>(&self, op: F) -> Result<T, ApiError>
    where
        F: FnOnce(DbPool) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, TaskError>> + Send + 'static,
        T: Send + 'static,
    {
        self.spawn_storage_then(op, |_, value| async move { value })
            .await
    }

    /// Like [`Self::spawn_storage`], then runs `on_commit` on the same task
    /// once the mutation succeeds. The follow-up completes even if the caller
    /// stops waiting, and it is not bound by the storage timeout.
    pub async fn spawn_storage_then<T, F, Fut, H, HFut>(
        &self,
        op: F,
        on_commit: H,
    ) -> Result<T, ApiError>
    where
        F: FnOnce(DbPool) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, TaskError>> + Send + 'static,
        H: FnOnce(BestEffortCache, T) -> HFut + Send + 'static,
        HFut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.db.pool.clone();
        let cache = self.cache.clone();
        let limit = self.config.database.operation_timeout;
        let handle = tokio::spawn(async move {
            match tokio::time::timeout(limit, op(pool)).await {
                Ok(Ok(value)) => Ok(Ok(on_commit(cache, value).await)),
                Ok(Err(err)) => Ok(Err(err)),
                Err(elapsed) => Err(elapsed),
            }
        });
        match handle.await {
            Ok(Ok(result)) => result.map_err(ApiError::from),
            Ok(Err(_)) => Err(ApiError::StorageTimeout(limit)),
            Err(err) => Err(ApiError::Internal(format!("storage task failed: {err}"))),
        }
    }

    /// Closes the connection pool. Clones of this deployment share it.
    pub async fn shutdown(self) -> Result<(), DbErr> {
        self.db.close().await
    }
}

fn build_cache(config: &CacheConfig) -> Result<Arc<dyn TaskCache>, CacheError> {
    match &config.url {
        Some(url) => {
            let cache = RedisTaskCache::new(url, config.key_prefix.clone(), config.ttl)?;
            tracing::info!(key_prefix = %config.key_prefix, ttl = ?config.ttl, "Using Redis task cache");
            Ok(Arc::new(cache))
        }
        None => {
            tracing::info!("No cache URL configured, using in-process task cache");
            Ok(Arc::new(MemoryTaskCache::new()))
        }
    }
}

async fn load_verifier(config: &AuthConfig) -> Result<TokenVerifier, DeploymentError> {
    let options = VerifierOptions {
        audience: config.audience.clone(),
        issuer: config.issuer.clone(),
        leeway: config.leeway,
    };

    let verifier = match &config.key_source {
        AuthKeySource::Secret(secret) => TokenVerifier::from_secret(secret.as_bytes(), &options),
        AuthKeySource::PublicKeyPem(pem) => TokenVerifier::from_rsa_pem(pem.as_bytes(), &options)?,
        AuthKeySource::Jwks { url } => {
            let client = reqwest::Client::builder()
                .timeout(config.jwks_timeout)
                .build()?;
            let set: JwkSet = client
                .get(url)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            tracing::info!(url = %url, keys = set.keys.len(), "Loaded signing keys");
            TokenVerifier::from_jwks(&set, &options)?
        }
    };
    Ok(verifier)
}
