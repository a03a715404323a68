//! Bounded, cancellable polling

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::controller::error::{Error, Result};

/// Poll `probe` every `interval` until it yields `Some`, `timeout` elapses or
/// `cancel` fires.
///
/// Probe errors abort the wait. The first probe runs immediately.
pub async fn poll_until<T, F, Fut>(
    what: &str,
    timeout: Duration,
    interval: Duration,
    cancel: &CancellationToken,
    mut probe: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let started = Instant::now();
    let deadline = started + timeout;

    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled(what.to_string()));
        }

        if let Some(value) = probe().await? {
            return Ok(value);
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(Error::TimeoutError {
                what: what.to_string(),
                elapsed: now - started,
            });
        }

        let sleep_for = interval.min(deadline - now);
        debug!(what, remaining_secs = (deadline - now).as_secs(), "Waiting");

        tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled(what.to_string())),
            _ = tokio::time::sleep(sleep_for) => {}
        }
    }
}
