//! Exponential backoff for persistence calls.

use std::future::Future;

use log::warn;

use crate::types::errors::PersistenceError;
use crate::types::settings::RetrySettings;

/// Runs `op` until it succeeds, fails with a non-retryable error, or
/// `max_attempts` is used up. Returns the last error in the latter cases.
pub async fn with_backoff<T, F, Fut>(policy: &RetrySettings, label: &str, mut op: F) -> Result<T, PersistenceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, PersistenceError>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut retry = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && retry + 1 < attempts => {
                let delay = policy.delay_for(retry);
                warn!(
                    "{} failed (attempt {}/{}): {}; retrying in {:?}",
                    label,
                    retry + 1,
                    attempts,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
                retry += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
