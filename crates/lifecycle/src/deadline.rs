use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use worktrack_core::store::{StoreError, StoreResult};

/// Run one storage step under `limit`.
///
/// An elapsed deadline drops the in-flight future and reports the store as
/// unavailable. Only use this for reads and for steps inside a transaction
/// that has not committed: a dropped transaction rolls back.
pub(crate) async fn bounded<T, F>(limit: Duration, op: &'static str, fut: F) -> StoreResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(elapsed(limit, op)),
    }
}

/// A durable write raced against its deadline.
#[derive(Debug)]
pub(crate) enum Settled<T> {
    Done(StoreResult<T>),
    /// The deadline elapsed while the write was in flight. It keeps running
    /// on this handle and may still apply.
    Pending(JoinHandle<StoreResult<T>>),
}

/// Run a write that is visible once it reaches the store (an autocommit
/// update or a `COMMIT`) under `limit`.
///
/// The write runs on its own task so an elapsed deadline never abandons it
/// halfway; the caller gets [`Settled::Pending`] and must hand the handle to
/// [`settle_later`] so the side effects of a late success still happen.
pub(crate) async fn detached<T, F>(limit: Duration, op: &'static str, fut: F) -> Settled<T>
where
    F: Future<Output = StoreResult<T>> + Send + 'static,
    T: Send + 'static,
{
    let mut handle = tokio::spawn(fut);
    match tokio::time::timeout(limit, &mut handle).await {
        Ok(Ok(result)) => Settled::Done(result),
        Ok(Err(join_err)) => Settled::Done(Err(StoreError::Unavailable(format!(
            "{op} aborted: {join_err}"
        )))),
        Err(_) => Settled::Pending(handle),
    }
}

/// Wait for a pending write in the background and run `on_success` with its
/// result if it eventually lands.
pub(crate) fn settle_later<T, F>(
    op: &'static str,
    handle: JoinHandle<StoreResult<T>>,
    on_success: F,
)
where
    T: Send + 'static,
    F: FnOnce(T) + Send + 'static,
{
    tokio::spawn(async move {
        match handle.await {
            Ok(Ok(value)) => {
                tracing::info!(op, "Late storage write settled");
                on_success(value);
            }
            Ok(Err(e)) => tracing::warn!(op, error = %e, "Late storage write failed"),
            Err(e) => tracing::warn!(op, error = %e, "Late storage write aborted"),
        }
    });
}

/// The error reported to a caller whose storage step ran out of time.
pub(crate) fn elapsed(limit: Duration, op: &'static str) -> StoreError {
    tracing::warn!(op, timeout_ms = limit.as_millis() as u64, "Storage deadline elapsed");
    StoreError::Unavailable(format!("{op} exceeded {}ms deadline", limit.as_millis()))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn elapsed_deadline_is_unavailable() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<_, StoreError>(1)
        };
        let result = bounded(Duration::from_secs(1), "slow_op", slow).await;
        assert_matches!(result, Err(StoreError::Unavailable(msg)) if msg.contains("slow_op"));
    }

    #[tokio::test]
    async fn fast_step_passes_through() {
        let result = bounded(Duration::from_secs(1), "fast_op", async { Ok::<_, StoreError>(7) }).await;
        assert_eq!(result, Ok(7));
    }

    #[tokio::test(start_paused = true)]
    async fn late_write_still_runs_its_follow_up() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(3)).await;
            Ok::<_, StoreError>(1_u64)
        };
        let handle = match detached(Duration::from_secs(1), "slow_write", slow).await {
            Settled::Pending(handle) => handle,
            Settled::Done(result) => panic!("expected pending write, got {result:?}"),
        };

        let (tx, rx) = tokio::sync::oneshot::channel();
        settle_later("slow_write", handle, move |rows| {
            let _ = tx.send(rows);
        });
        assert_eq!(rx.await.unwrap(), 1);
    }

    #[tokio::test]
    async fn fast_write_is_done() {
        let settled = detached(Duration::from_secs(1), "fast_write", async { Ok::<_, StoreError>(2) }).await;
        assert_matches!(settled, Settled::Done(Ok(2)));
    }
}
