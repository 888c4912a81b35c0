/// Deadlines for stages that shell out or talk to remote services
use std::future::Future;
use std::time::Duration;

/// Either the deadline passed or the stage failed on its own.
#[derive(Debug, thiserror::Error)]
pub enum TimeoutError<E> {
    #[error("deadline of {0:?} exceeded")]
    Elapsed(Duration),
    #[error("{0}")]
    Inner(E),
}

impl<E> TimeoutError<E> {
    pub fn is_elapsed(&self) -> bool {
        matches!(self, TimeoutError::Elapsed(_))
    }

    pub fn is_inner(&self) -> bool {
        matches!(self, TimeoutError::Inner(_))
    }

    /// Collapse into the stage's own error type; `on_elapsed` builds the timeout variant.
    pub fn into_inner_or(self, on_elapsed: impl FnOnce(Duration) -> E) -> E {
        match self {
            TimeoutError::Inner(e) => e,
            TimeoutError::Elapsed(limit) => on_elapsed(limit),
        }
    }
}

/// Bound a fallible stage by `limit`. The stage is dropped when the deadline
/// passes, which kills child processes spawned with `kill_on_drop`.
pub async fn with_deadline<F, T, E>(limit: Duration, stage: F) -> Result<T, TimeoutError<E>>
where
    F: Future<Output = Result<T, E>>,
{
    tokio::time::timeout(limit, stage)
        .await
        .map_err(|_| TimeoutError::Elapsed(limit))?
        .map_err(TimeoutError::Inner)
}
