//! Exponential-backoff retry for provider calls.

use std::future::Future;
use std::time::Duration;

use engram_core::{Error, Result};

/// Run `operation` up to `max_attempts` times, sleeping `base_delay * 2^n`
/// between attempts. Returns the last error when every attempt fails.
/// Cancellation passes through immediately without further attempts.
pub async fn retry_with_backoff<T, F, Fut>(
    mut operation: F,
    max_attempts: u32,
    base_delay: Duration,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    if max_attempts == 0 {
        return Err(Error::validation("max attempts must be greater than zero"));
    }

    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!(attempt, "operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(Error::Canceled) => return Err(Error::Canceled),
            Err(err) => {
                tracing::debug!(
                    attempt,
                    max_attempts,
                    error = %err,
                    "operation failed, will retry"
                );
                if attempt == max_attempts {
                    return Err(err);
                }
            }
        }

        let exponent = attempt - 1;
        let delay = base_delay.saturating_mul(2u32.saturating_pow(exponent));
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
