use crate::error::AppError;
use std::future::Future;
use tokio::time::{Duration, sleep};

/// Retry budget for idempotent reads hit by transient connection loss:
/// exponential backoff starting at 100 ms, capped at 2 s, 3 attempts total.
pub const READ_RETRY_ATTEMPTS: usize = 3;
pub const READ_RETRY_BASE_MS: u64 = 100;
pub const READ_RETRY_CAP_MS: u64 = 2000;

/// Runs an idempotent read, retrying transient connection errors within the
/// budget above. Non-retryable errors are returned immediately.
pub async fn read_with_retry<T, F, Fut>(op_name: &str, mut op: F) -> Result<T, AppError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    let mut tries = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                let transient = matches!(e, AppError::DatabaseConnection(_));
                if transient && tries + 1 < READ_RETRY_ATTEMPTS {
                    let backoff =
                        (READ_RETRY_BASE_MS.saturating_mul(1 << tries)).min(READ_RETRY_CAP_MS);
                    log::warn!(
                        "{} hit transient database error; retrying (attempt={}, backoff_ms={})",
                        op_name,
                        tries + 1,
                        backoff
                    );
                    sleep(Duration::from_millis(backoff)).await;
                    tries += 1;
                    continue;
                }
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_read_retry_recovers_after_transient_failures() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let result = read_with_retry("test_read", move || {
            let calls = calls_clone.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(AppError::DatabaseConnection("reset".to_string()))
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_read_retry_gives_up_after_budget() {
        let result: Result<(), _> = read_with_retry("test_read", || async {
            Err(AppError::DatabaseConnection("down".to_string()))
        })
        .await;
        assert!(matches!(result, Err(AppError::DatabaseConnection(_))));
    }

    #[tokio::test]
    async fn test_read_retry_does_not_retry_permanent_errors() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let result: Result<(), _> = read_with_retry("test_read", move || {
            let calls = calls_clone.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AppError::NotFound("gone".to_string()))
            }
        })
        .await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
