//! Periodic caller: runs a callable on a fixed interval on the tokio runtime.
//!
//! Fire times follow the grid `start + k * period`. A call that overruns
//! skips the grid points it missed, and two calls are never closer than
//! `period`. A zero period fires exactly once. Errors returned by the
//! callable go to the error callback; the caller keeps its schedule and only
//! its owner cancels it.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, trace};

pub struct PeriodicCaller {
    name: String,
    period: Duration,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl PeriodicCaller {
    /// Spawn the caller on the current runtime.
    ///
    /// The first call happens at `start_at` (immediately when `None` or in
    /// the past). Must be called from within a tokio runtime.
    pub fn start<F, E, H>(
        name: impl Into<String>,
        mut callable: F,
        period: Duration,
        start_at: Option<DateTime<Utc>>,
        on_error: H,
    ) -> Self
    where
        F: FnMut() -> Result<(), E> + Send + 'static,
        E: Send + 'static,
        H: Fn(E) + Send + 'static,
    {
        let name = name.into();
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let delay = start_delay(start_at);
        let span = tracing::debug_span!("periodic", component = %name);

        let handle = tokio::spawn(
            async move {
                let start = Instant::now() + delay;
                let mut next = start;
                let mut fired: u64 = 0;
                loop {
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => break,
                        _ = tokio::time::sleep_until(next) => {}
                    }

                    let fired_at = Instant::now();
                    fired += 1;
                    trace!(fired, "periodic call");
                    if let Err(e) = callable() {
                        on_error(e);
                    }

                    if period.is_zero() {
                        break;
                    }
                    next = next_fire(start, period, fired_at, Instant::now());
                }
                debug!(fired, "periodic caller finished");
            }
            .instrument(span),
        );

        Self {
            name,
            period,
            cancel,
            handle: Some(handle),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Request cancellation. A call in progress completes first.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Cancel and wait until the task is gone. No call happens after this returns.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        let Some(handle) = self.handle.take() else {
            return;
        };
        if let Err(e) = handle.await {
            debug!(component = %self.name, error = %e, "periodic caller task ended abnormally");
        }
    }
}

impl Drop for PeriodicCaller {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for PeriodicCaller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeriodicCaller")
            .field("name", &self.name)
            .field("period", &self.period)
            .field("finished", &self.is_finished())
            .finish()
    }
}

fn start_delay(start_at: Option<DateTime<Utc>>) -> Duration {
    start_at
        .and_then(|at| (at - Utc::now()).to_std().ok())
        .unwrap_or(Duration::ZERO)
}

/// First grid point after `now` that is also at least `period` after `fired_at`.
///
/// Saturates instead of failing when the grid offset outgrows what an
/// `Instant` can express.
fn next_fire(start: Instant, period: Duration, fired_at: Instant, now: Instant) -> Instant {
    let period_nanos = period.as_nanos().max(1);
    let elapsed_nanos = now.saturating_duration_since(start).as_nanos();
    let offset_nanos = (elapsed_nanos / period_nanos + 1) * period_nanos;
    let offset = Duration::from_nanos(u64::try_from(offset_nanos).unwrap_or(u64::MAX));
    let earliest = fired_at.checked_add(period).unwrap_or(fired_at);
    start
        .checked_add(offset)
        .map_or(earliest, |grid| grid.max(earliest))
}
