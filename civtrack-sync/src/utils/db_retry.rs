//! Database Retry Logic
//!
//! Exponential backoff for transient SQLite lock errors. Sync runs of different
//! kinds may write concurrently; the pool is small, so a writer can briefly
//! see "database is locked".

use civtrack_common::{Error, Result};
use std::time::{Duration, Instant};

const INITIAL_BACKOFF_MS: u64 = 10;
const MAX_BACKOFF_MS: u64 = 1000;

/// Retry a database operation with exponential backoff until `max_wait_ms` elapses.
///
/// Only lock errors are retried; any other error is returned at once.
/// Backoff starts at 10ms and doubles up to 1000ms.
pub async fn retry_on_lock<F, Fut, T>(
    operation_name: &str,
    max_wait_ms: u64,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let start_time = Instant::now();
    let max_duration = Duration::from_millis(max_wait_ms);
    let mut attempt = 0u32;
    let mut backoff_ms = INITIAL_BACKOFF_MS;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    let elapsed_ms = start_time.elapsed().as_millis() as u64;
                    if elapsed_ms > 2000 {
                        tracing::warn!(
                            operation = operation_name,
                            attempt,
                            elapsed_ms,
                            "Database operation succeeded after significant retry period (>2s)"
                        );
                    } else {
                        tracing::debug!(
                            operation = operation_name,
                            attempt,
                            elapsed_ms,
                            "Database operation succeeded after retry"
                        );
                    }
                }
                return Ok(result);
            }
            Err(err) if !err.is_database_locked() => return Err(err),
            Err(_) => {
                let elapsed = start_time.elapsed();

                if elapsed >= max_duration {
                    tracing::error!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = elapsed.as_millis() as u64,
                        max_wait_ms,
                        "Database operation failed: max retry time exceeded"
                    );
                    return Err(Error::Internal(format!(
                        "Database locked after {} attempts ({} ms elapsed, max {} ms)",
                        attempt,
                        elapsed.as_millis(),
                        max_wait_ms
                    )));
                }

                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    elapsed_ms = elapsed.as_millis() as u64,
                    backoff_ms,
                    "Database locked, will retry after backoff"
                );

                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
            }
        }
    }
}
