//! Small retry helpers shared between the coordinator and the agent (§4.2.1, §4.3.3).
//!
//! Two distinct back-off shapes show up in the spec: a fixed delay between attempts
//! (search/download/install retries, the agent's transient-failure wait) and a
//! linearly-increasing delay bounded by an overall deadline (waiting for a health-bus
//! target service to exist). Both are expressed here so neither the coordinator nor the
//! agent has to re-derive the loop.

use crate::error::{CoordError, Result};
use crate::platform::Clock;
use std::future::Future;
use std::time::Duration;

/// Retry `f` up to `attempts` times (the first call counts as attempt 1) with a fixed
/// `delay` between attempts, returning the first success or the last error.
pub async fn fixed_delay<F, Fut, T>(attempts: u32, delay: Duration, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = attempts.max(1);
    let mut last_err = None;
    for attempt in 1..=attempts {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                last_err = Some(err);
                if attempt < attempts {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
    Err(last_err.unwrap_or_else(|| CoordError::Other("retry loop ran zero attempts".into())))
}

/// Poll `ready` until it reports `true`, with a linearly-increasing delay between checks
/// (§4.3.3: "retrying with linearly-increasing back-off up to a user-specified deadline").
/// Returns `CoordError::Timeout` if `deadline` elapses first.
pub async fn wait_linear_backoff<F, Fut>(
    clock: &dyn Clock,
    deadline: Duration,
    step: Duration,
    mut ready: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let start = clock.now();
    let mut delay = step;
    loop {
        if ready().await? {
            return Ok(());
        }
        let elapsed = clock.now().duration_since(start).unwrap_or_default();
        if elapsed >= deadline {
            return Err(CoordError::Timeout(deadline));
        }
        let remaining = deadline - elapsed;
        tokio::time::sleep(delay.min(remaining)).await;
        delay += step;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn fixed_delay_returns_first_success() {
        let calls = AtomicU32::new(0);
        let result: Result<u32> = fixed_delay(5, Duration::from_millis(1), || async {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 {
                Err(CoordError::Retryable("not yet".into()))
            } else {
                Ok(n)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fixed_delay_exhausts_attempts() {
        let result: Result<u32> = fixed_delay(2, Duration::from_millis(1), || async {
            Err(CoordError::Retryable("always".into()))
        })
        .await;
        assert!(result.is_err());
    }
}
