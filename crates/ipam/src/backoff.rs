//! # Conflict Backoff
//!
//! Bounded exponential backoff for optimistic-concurrency conflicts (HTTP 409).
//! Sequence with the defaults: 10ms, 20ms, 40ms, 80ms, then the caller gives up
//! after the fifth attempt.

use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Exponential backoff calculator
///
/// Each delay doubles the previous one. The number of attempts is bounded;
/// once spent, [`next_backoff`](Self::next_backoff) returns `None`.
#[derive(Debug, Clone)]
pub struct ConflictBackoff {
    /// Next delay
    current: Duration,
    /// Attempts allowed in total
    attempts: u32,
    /// Attempts made so far
    made: u32,
}

impl ConflictBackoff {
    /// Create a backoff of `attempts` tries starting at `base`
    #[must_use]
    pub fn new(base: Duration, attempts: u32) -> Self {
        Self {
            current: base,
            attempts,
            made: 0,
        }
    }

    /// Record an attempt and get the delay before the next one
    ///
    /// Returns `None` when no attempt is left.
    pub fn next_backoff(&mut self) -> Option<Duration> {
        self.made += 1;
        if self.made >= self.attempts {
            return None;
        }
        let delay = self.current;
        self.current = self.current.saturating_mul(2);
        Some(delay)
    }
}

impl Default for ConflictBackoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(10), 5)
    }
}

/// Whether a Kubernetes error is a write conflict.
#[must_use]
pub fn is_kube_conflict(error: &kube::Error) -> bool {
    matches!(error, kube::Error::Api(resp) if resp.code == 409)
}

/// Runs `op` until it succeeds, fails with a non-conflict error, or the
/// backoff is spent. The last error is returned on failure.
pub async fn retry_on_conflict<T, E, F, Fut>(
    mut backoff: ConflictBackoff,
    is_conflict: impl Fn(&E) -> bool,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if is_conflict(&e) => match backoff.next_backoff() {
                Some(delay) => {
                    debug!("Write conflict, retrying in {:?}", delay);
                    tokio::time::sleep(delay).await;
                }
                None => return Err(e),
            },
            Err(e) => return Err(e),
        }
    }
}
