//! Deadline racing for timeout-bounded operations
//!
//! Timeouts in this layer are advisory to the caller: they fail the caller's
//! await early but never cancel the underlying work. Callers that must let
//! the loser run to completion spawn the real work as a task and race the
//! handle here, so a timeout discards the await, not the work.

use std::future::Future;
use std::time::Duration;

/// Race `op` against an optional deadline.
///
/// Returns `op`'s result if it finishes in time, otherwise the error produced
/// by `on_timeout`. With `limit == None` the deadline is disabled and `op` is
/// awaited to completion.
pub async fn race_deadline<T, E>(
    op: impl Future<Output = std::result::Result<T, E>>,
    limit: Option<Duration>,
    on_timeout: impl FnOnce() -> E,
) -> std::result::Result<T, E> {
    match limit {
        Some(deadline) => match tokio::time::timeout(deadline, op).await {
            Ok(result) => result,
            Err(_) => Err(on_timeout()),
        },
        None => op.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_completes_before_deadline() {
        let result: Result<u32, CoreError> = race_deadline(
            async {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok(42)
            },
            Some(Duration::from_millis(100)),
            || CoreError::BuildTimeout(100),
        )
        .await;

        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_fires() {
        let result: Result<u32, CoreError> = race_deadline(
            async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Ok(42)
            },
            Some(Duration::from_millis(10)),
            || CoreError::BuildTimeout(10),
        )
        .await;

        assert!(matches!(result, Err(CoreError::BuildTimeout(10))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_none_disables_deadline() {
        let result: Result<u32, CoreError> = race_deadline(
            async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(7)
            },
            None,
            || CoreError::BuildTimeout(0),
        )
        .await;

        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_work_survives_timeout() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            flag.store(true, Ordering::SeqCst);
        });

        let result: Result<(), CoreError> = race_deadline(
            async move { handle.await.map_err(|e| CoreError::Task(e.to_string())) },
            Some(Duration::from_millis(10)),
            || CoreError::CloseTimeout(10),
        )
        .await;

        assert!(matches!(result, Err(CoreError::CloseTimeout(10))));
        assert!(!finished.load(Ordering::SeqCst));

        // The spawned task keeps running after the deadline fired
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_propagates_before_deadline() {
        let result: Result<u32, CoreError> = race_deadline(
            async { Err(CoreError::Build("boom".to_string())) },
            Some(Duration::from_millis(100)),
            || CoreError::BuildTimeout(100),
        )
        .await;

        assert!(matches!(result, Err(CoreError::Build(_))));
    }
}
