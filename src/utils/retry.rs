use std::future::Future;
use std::time::Duration;
use log::warn;

use crate::error::Result;

/// Runs `op` up to `max_attempts` times, sleeping `base_delay × attempt`
/// between failures (linear backoff). Returns the first success, or
/// `None` once the attempt budget is spent. `None` is the only failure
/// signal that crosses this boundary; errors never propagate past it.
pub async fn retry_with_backoff<T, F, Fut>(
    max_attempts: u32,
    base_delay: Duration,
    mut op: F,
) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    for attempt in 1..=max_attempts {
        match op().await {
            Ok(value) => return Some(value),
            Err(e) => {
                warn!("Attempt {}/{} failed: {}", attempt, max_attempts, e);
                if attempt < max_attempts {
                    tokio::time::sleep(base_delay * attempt).await;
                }
            }
        }
    }
    None
}
