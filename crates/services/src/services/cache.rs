//! Write-side task cache.
//!
//! Entries mirror individual tasks by id and are refreshed on update and
//! dropped on delete. Nothing reads from the cache on the request path; the
//! database stays the source of truth.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use dashmap::DashMap;
use db::models::task::Task;
use redis::{AsyncCommands, aio::ConnectionManager};
use thiserror::Error;
use tokio::sync::OnceCell;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Redis(#[from] redis::RedisError),
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
    #[error("cache operation timed out after {0:?}")]
    Timeout(Duration),
}

#[async_trait]
pub trait TaskCache: Send + Sync {
    async fn set(&self, task: &Task) -> Result<(), CacheError>;
    async fn delete(&self, id: Uuid) -> Result<(), CacheError>;
}

pub fn task_key(prefix: &str, id: Uuid) -> String {
    format!("{prefix}task_{id}")
}

pub struct RedisTaskCache {
    client: redis::Client,
    connection: OnceCell<ConnectionManager>,
    key_prefix: String,
    ttl: Option<Duration>,
}

impl RedisTaskCache {
    /// Parses the URL only; the connection is opened on first use so an
    /// unavailable Redis never blocks startup.
    pub fn new(url: &str, key_prefix: String, ttl: Option<Duration>) -> Result<Self, CacheError> {
        Ok(Self {
            client: redis::Client::open(url)?,
            connection: OnceCell::new(),
            key_prefix,
            ttl,
        })
    }

    async fn connection(&self) -> Result<ConnectionManager, CacheError> {
        let manager = self
            .connection
            .get_or_try_init(|| ConnectionManager::new(self.client.clone()))
            .await?;
        Ok(manager.clone())
    }
}

impl std::fmt::Debug for RedisTaskCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisTaskCache")
            .field("key_prefix", &self.key_prefix)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl TaskCache for RedisTaskCache {
    async fn set(&self, task: &Task) -> Result<(), CacheError> {
        let key = task_key(&self.key_prefix, task.id);
        let json = serde_json::to_string(task)?;
        let mut connection = self.connection().await?;
        match self.ttl {
            Some(ttl) => {
                connection
                    .set_ex::<_, _, ()>(&key, json, ttl.as_secs().max(1))
                    .await?
            }
            None => connection.set::<_, _, ()>(&key, json).await?,
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<(), CacheError> {
        let key = task_key(&self.key_prefix, id);
        let mut connection = self.connection().await?;
        connection.del::<_, ()>(&key).await?;
        Ok(())
    }
}

/// Process-local cache, used when no Redis URL is configured.
#[derive(Debug, Default)]
pub struct MemoryTaskCache {
    entries: DashMap<Uuid, Task>,
}

impl MemoryTaskCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: Uuid) -> Option<Task> {
        self.entries.get(&id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl TaskCache for MemoryTaskCache {
    async fn set(&self, task: &Task) -> Result<(), CacheError> {
        self.entries.insert(task.id, task.clone());
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<(), CacheError> {
        self.entries.remove(&id);
        Ok(())
    }
}

/// Bounds every cache call with a timeout and swallows failures, so the
/// cache can never fail a request.
#[derive(Clone)]
pub struct BestEffortCache {
    inner: Arc<dyn TaskCache>,
    timeout: Duration,
}

impl BestEffortCache {
    pub fn new(inner: Arc<dyn TaskCache>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub async fn set(&self, task: &Task) {
        let result = self.bounded(self.inner.set(task)).await;
        if let Err(err) = result {
            tracing::warn!(task_id = %task.id, error = %err, "Failed to refresh cached task");
        }
    }

    pub async fn delete(&self, id: Uuid) {
        let result = self.bounded(self.inner.delete(id)).await;
        if let Err(err) = result {
            tracing::warn!(task_id = %id, error = %err, "Failed to evict cached task");
        }
    }

    async fn bounded<F>(&self, op: F) -> Result<(), CacheError>
    where
        F: std::future::Future<Output = Result<(), CacheError>>,
    {
        match tokio::time::timeout(self.timeout, op).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Timeout(self.timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use db::models::task::TaskStatus;

    use super::*;

    fn sample_task() -> Task {
        let now = Utc::now();
        Task {
            id: Uuid::new_v4(),
            title: "write spec".to_string(),
            description: None,
            status: TaskStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    struct FailingCache;

    #[async_trait]
    impl TaskCache for FailingCache {
        async fn set(&self, _task: &Task) -> Result<(), CacheError> {
            Err(CacheError::Timeout(Duration::from_millis(1)))
        }

        async fn delete(&self, _id: Uuid) -> Result<(), CacheError> {
            Err(CacheError::Timeout(Duration::from_millis(1)))
        }
    }

    struct HangingCache;

    #[async_trait]
    impl TaskCache for HangingCache {
        async fn set(&self, _task: &Task) -> Result<(), CacheError> {
            std::future::pending().await
        }

        async fn delete(&self, _id: Uuid) -> Result<(), CacheError> {
            std::future::pending().await
        }
    }

    #[test]
    fn keys_follow_the_task_prefix_convention() {
        let id = Uuid::new_v4();
        assert_eq!(task_key("", id), format!("task_{id}"));
        assert_eq!(task_key("app:", id), format!("app:task_{id}"));
    }

    #[tokio::test]
    async fn memory_cache_sets_and_evicts() {
        let cache = MemoryTaskCache::new();
        let mut task = sample_task();

        cache.set(&task).await.unwrap();
        task.status = TaskStatus::Completed;
        cache.set(&task).await.unwrap();
        assert_eq!(cache.get(task.id).unwrap().status, TaskStatus::Completed);
        assert_eq!(cache.len(), 1);

        cache.delete(task.id).await.unwrap();
        assert!(cache.get(task.id).is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn best_effort_cache_swallows_errors() {
        let cache = BestEffortCache::new(Arc::new(FailingCache), Duration::from_millis(50));
        let task = sample_task();

        cache.set(&task).await;
        cache.delete(task.id).await;
    }

    #[tokio::test]
    async fn best_effort_cache_times_out_hung_calls() {
        let cache = BestEffortCache::new(Arc::new(HangingCache), Duration::from_millis(20));
        let task = sample_task();

        let started = std::time::Instant::now();
        cache.set(&task).await;
        cache.delete(task.id).await;
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn redis_cache_rejects_invalid_url() {
        assert!(RedisTaskCache::new("not a url", String::new(), None).is_err());
        assert!(RedisTaskCache::new("redis://localhost:6379", String::new(), None).is_ok());
    }
}
