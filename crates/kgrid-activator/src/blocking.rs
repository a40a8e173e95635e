//! Offloading synchronous filesystem work from async callers.

use crate::error::{ActivatorError, ActivatorResult};

/// Run `work` on the blocking pool and flatten the join error into
/// [`ActivatorError::Task`].
pub(crate) async fn run_blocking<T, F>(work: F) -> ActivatorResult<T>
where
    F: FnOnce() -> ActivatorResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ActivatorError::Task(format!("spawn_blocking failed: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn result_passes_through() {
        assert_eq!(run_blocking(|| Ok(7)).await.unwrap(), 7);
        let err = run_blocking::<(), _>(|| Err(ActivatorError::Task("inner".into())))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "background task failed: inner");
    }

    #[tokio::test]
    async fn panic_becomes_task_error() {
        let err = run_blocking::<(), _>(|| panic!("boom")).await.unwrap_err();
        assert!(matches!(err, ActivatorError::Task(ref m) if m.contains("spawn_blocking failed")));
    }
}
