//! Retry utilities: backoff builders for broker connection attempts.
//!
//! Uses `backon`. Consumer startup retries with a fixed delay rather than an
//! exponential one so the worst-case wait is predictable.

use std::time::Duration;

use backon::ConstantBuilder;

/// Fixed-delay backoff for broker connection retries at startup.
///
/// `attempts` is the total number of tries, so the operation is retried
/// `attempts - 1` times with `delay` between consecutive tries. There is no
/// delay after the last try: five attempts five seconds apart give up after
/// 20 s of waiting, not 25 s.
pub fn connect_backoff(attempts: u32, delay: Duration) -> ConstantBuilder {
    ConstantBuilder::default()
        .with_delay(delay)
        .with_max_times(attempts.saturating_sub(1) as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use backon::Retryable;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_connect_backoff_makes_exact_attempts() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let start = Instant::now();

        let result = (|| async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>("broker unreachable")
        })
        .retry(connect_backoff(5, Duration::from_secs(5)))
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        // Four fixed gaps between five attempts
        assert_eq!(start.elapsed(), Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_backoff_stops_on_success() {
        let calls = AtomicU32::new(0);
        let calls = &calls;

        let result = (|| async move {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 {
                Err("not yet")
            } else {
                Ok(n)
            }
        })
        .retry(connect_backoff(5, Duration::from_secs(5)))
        .await;

        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_attempt_never_sleeps() {
        let start = Instant::now();
        let result = (|| async { Err::<(), _>("down") })
            .retry(connect_backoff(1, Duration::from_secs(5)))
            .await;

        assert!(result.is_err());
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
