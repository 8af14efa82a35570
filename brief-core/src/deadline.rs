use std::future::Future;
use std::time::Duration;

use crate::error::DeadlineExceeded;

/// Races `op` against a timer. The losing branch is dropped, which cancels `op`
/// at its next suspension point.
pub async fn with_timeout<F, T>(duration: Duration, op: F) -> Result<T, DeadlineExceeded>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, op)
        .await
        .map_err(|_| DeadlineExceeded(duration))
}

/// Like [`with_timeout`] for fallible operations, folding the timeout into `E`.
pub async fn with_deadline<F, T, E>(duration: Duration, op: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: From<DeadlineExceeded>,
{
    with_timeout(duration, op).await?
}
