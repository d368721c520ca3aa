use crate::error::ServiceError;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct RecoveryManager {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl RecoveryManager {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    /// Delay slept after the given failed attempt (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        std::cmp::min(self.base_delay.saturating_mul(factor), self.max_delay)
    }

    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T, ServiceError>
    where
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, ServiceError>> + Send,
    {
        let mut attempts = 0;

        loop {
            attempts += 1;

            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    if attempts >= self.max_attempts {
                        return Err(ServiceError::RecoveryFailed {
                            attempts,
                            message: e.to_string(),
                        });
                    }

                    let delay = self.delay_after(attempts);
                    warn!(
                        "Operation failed (attempt {}/{}): {}. Retrying in {:?}",
                        attempts, self.max_attempts, e, delay
                    );

                    sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_successful_operation() {
        let recovery =
            RecoveryManager::new(3, Duration::from_millis(10), Duration::from_millis(100));
        let result = recovery
            .execute(|| async { Ok::<_, ServiceError>(42) })
            .await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let attempts = Arc::new(AtomicU32::new(0));
        let recovery =
            RecoveryManager::new(3, Duration::from_millis(10), Duration::from_millis(100));

        let attempts_clone = attempts.clone();
        let operation = move || {
            let attempts = attempts_clone.clone();
            async move {
                let current = attempts.fetch_add(1, Ordering::SeqCst);
                if current == 0 {
                    Err(ServiceError::Connection("First attempt fails".into()))
                } else {
                    Ok(42)
                }
            }
        };

        let result = recovery.execute(operation).await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_max_attempts_reached() {
        let recovery =
            RecoveryManager::new(4, Duration::from_millis(1), Duration::from_millis(10));

        let result = recovery
            .execute(|| async {
                Err::<(), ServiceError>(ServiceError::Connection("Always fails".into()))
            })
            .await;

        assert!(matches!(
            result,
            Err(ServiceError::RecoveryFailed { attempts: 4, .. })
        ));
    }

    #[test]
    fn test_delay_schedule_doubles_and_caps() {
        let recovery = RecoveryManager::new(5, Duration::from_secs(2), Duration::from_secs(10));
        assert_eq!(recovery.delay_after(1), Duration::from_secs(2));
        assert_eq!(recovery.delay_after(2), Duration::from_secs(4));
        assert_eq!(recovery.delay_after(3), Duration::from_secs(8));
        assert_eq!(recovery.delay_after(4), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_exponential_backoff() {
        let recovery =
            RecoveryManager::new(3, Duration::from_millis(10), Duration::from_millis(30));
        let timestamps = Arc::new(std::sync::Mutex::new(vec![]));

        let timestamps_clone = timestamps.clone();
        let operation = move || {
            let timestamps = timestamps_clone.clone();
            async move {
                timestamps.lock().unwrap().push(std::time::Instant::now());
                Err::<(), ServiceError>(ServiceError::Connection("Always fails".into()))
            }
        };

        let _: Result<(), ServiceError> = recovery.execute(operation).await;

        let timestamps = timestamps.lock().unwrap();
        assert_eq!(timestamps.len(), 3);

        let delay1 = timestamps[1].duration_since(timestamps[0]);
        let delay2 = timestamps[2].duration_since(timestamps[1]);

        assert!(delay1 >= Duration::from_millis(10));
        assert!(delay2 >= Duration::from_millis(20));
    }
}
