//! Retry of SQLite writes that hit lock contention
//!
//! Only "database is locked" errors are retried. Delays start at 10 ms and
//! double up to 1 s until `max_wait_ms` has elapsed.

use rivalscan_common::{Error, Result};
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

pub const DEFAULT_MAX_LOCK_WAIT_MS: u64 = 5_000;

const INITIAL_BACKOFF_MS: u64 = 10;
const MAX_BACKOFF_MS: u64 = 1_000;

pub async fn retry_on_lock<F, Fut, T>(operation_name: &str, max_wait_ms: u64, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let started = Instant::now();
    let max_wait = Duration::from_millis(max_wait_ms);
    let mut backoff_ms = INITIAL_BACKOFF_MS;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let err = match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Database write succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Err(err) if err.is_database_locked() => err,
            Err(err) => return Err(err),
        };

        let elapsed = started.elapsed();
        if elapsed >= max_wait {
            error!(
                operation = operation_name,
                attempt,
                elapsed_ms = elapsed.as_millis() as u64,
                "Giving up on locked database"
            );
            return Err(Error::Internal(format!(
                "{}: database locked after {} attempts ({} ms): {}",
                operation_name,
                attempt,
                elapsed.as_millis(),
                err
            )));
        }

        let remaining = max_wait.saturating_sub(elapsed);
        let delay = Duration::from_millis(backoff_ms).min(remaining);
        warn!(
            operation = operation_name,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Database locked, backing off"
        );
        tokio::time::sleep(delay).await;
        backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
    }
}
