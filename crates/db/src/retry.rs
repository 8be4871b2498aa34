use std::{future::Future, time::Duration};

use sea_orm::DbErr;

const MAX_RETRIES: usize = 3;
const INITIAL_BACKOFF_MS: u64 = 50;
const MAX_BACKOFF_MS: u64 = 1_000;

/// Errors that may carry a transient "database is locked" condition.
pub(crate) trait BusyError {
    fn is_busy(&self) -> bool;
}

impl BusyError for DbErr {
    fn is_busy(&self) -> bool {
        is_database_busy(self)
    }
}

pub(crate) async fn retry_on_busy<T, E, F, Fut>(mut op: F) -> Result<T, E>
where
    E: BusyError,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut backoff = Duration::from_millis(INITIAL_BACKOFF_MS);
    for attempt in 0..=MAX_RETRIES {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_busy() && attempt < MAX_RETRIES => {
                tracing::debug!(attempt, "database busy, retrying in {:?}", backoff);
                tokio::time::sleep(backoff).await;
                let next_ms = (backoff.as_millis() as u64)
                    .saturating_mul(2)
                    .min(MAX_BACKOFF_MS);
                backoff = Duration::from_millis(next_ms);
            }
            Err(err) => return Err(err),
        }
    }

    unreachable!("retry loop returns on success or error")
}

fn is_database_busy(err: &DbErr) -> bool {
    let message = err.to_string();
    message.contains("database is locked") || message.contains("database is busy")
}
