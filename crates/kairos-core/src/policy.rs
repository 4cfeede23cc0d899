//! Execution control: the single choke point for skill code.
//!
//! Every call into a behaviour or handler goes through
//! [`ExecutionControl::execute`]. It serialises skill code (no two skill
//! calls of one agent ever overlap, whatever runtime flavour drives the
//! loop), reports slow calls, and applies the configured
//! [`ExceptionPolicy`] to any error the call returns.

use std::time::{Duration, Instant};

use kairos_types::ExceptionPolicy;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, error, warn};

/// Fatal outcome of a skill call, as decided by the exception policy.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// Policy `propagate`: the original error, re-raised.
    #[error("`{origin}` failed: {source}")]
    Propagated {
        origin: String,
        #[source]
        source: anyhow::Error,
    },

    /// Policy `stop_and_exit`: the stop-runtime signal. Callers begin a
    /// graceful shutdown when they see it.
    #[error("agent was terminated because `{origin}` raised `{source}`; please check logs")]
    StopRuntime {
        origin: String,
        #[source]
        source: anyhow::Error,
    },
}

impl ExecutionError {
    /// The error the skill code originally returned.
    pub fn original(&self) -> &anyhow::Error {
        match self {
            Self::Propagated { source, .. } | Self::StopRuntime { source, .. } => source,
        }
    }

    /// Name of the component whose call failed.
    pub fn origin(&self) -> &str {
        match self {
            Self::Propagated { origin, .. } | Self::StopRuntime { origin, .. } => origin,
        }
    }

    pub fn is_stop_runtime(&self) -> bool {
        matches!(self, Self::StopRuntime { .. })
    }
}

/// Runs skill code under the exception policy.
pub struct ExecutionControl {
    policy: ExceptionPolicy,
    execution_timeout: Option<Duration>,
    /// Held for the duration of every skill call.
    skill_lock: Mutex<()>,
}

impl ExecutionControl {
    pub fn new(policy: ExceptionPolicy, execution_timeout: Option<Duration>) -> Self {
        Self {
            policy,
            execution_timeout,
            skill_lock: Mutex::new(()),
        }
    }

    pub fn policy(&self) -> ExceptionPolicy {
        self.policy
    }

    /// Call `f` on behalf of `origin`.
    ///
    /// Returns `Ok(Some(value))` on success, `Ok(None)` when the error was
    /// swallowed by `just_log`, and `Err` when the policy makes it fatal.
    pub fn execute<T, F>(&self, origin: &str, f: F) -> Result<Option<T>, ExecutionError>
    where
        F: FnOnce() -> anyhow::Result<T>,
    {
        let result = {
            let _guard = self.skill_lock.lock();
            let started = Instant::now();
            let result = f();
            if let Some(timeout) = self.execution_timeout {
                let elapsed = started.elapsed();
                if elapsed > timeout {
                    warn!(
                        component = origin,
                        ?elapsed,
                        ?timeout,
                        "skill call exceeded the execution timeout; please refactor it"
                    );
                }
            }
            result
        };

        match result {
            Ok(value) => Ok(Some(value)),
            Err(err) => self.handle_error(origin, err).map(|()| None),
        }
    }

    /// Run `f` under the skill lock without applying the policy.
    ///
    /// For lifecycle calls (`setup`, `teardown`) whose failures the caller
    /// handles itself.
    pub fn run_exclusive<T>(&self, f: impl FnOnce() -> T) -> T {
        let _guard = self.skill_lock.lock();
        f()
    }

    /// Apply the policy to an error raised by `origin`.
    pub fn handle_error(&self, origin: &str, err: anyhow::Error) -> Result<(), ExecutionError> {
        match self.policy {
            ExceptionPolicy::Propagate => {
                debug!(component = origin, policy = %self.policy, error = %err, "propagating skill error");
                Err(ExecutionError::Propagated {
                    origin: origin.to_string(),
                    source: err,
                })
            }
            ExceptionPolicy::StopAndExit => {
                error!(component = origin, policy = %self.policy, error = ?err, "skill error, stopping agent");
                Err(ExecutionError::StopRuntime {
                    origin: origin.to_string(),
                    source: err,
                })
            }
            ExceptionPolicy::JustLog => {
                error!(component = origin, policy = %self.policy, error = ?err, "skill error ignored");
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for ExecutionControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionControl")
            .field("policy", &self.policy)
            .field("execution_timeout", &self.execution_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn failing() -> anyhow::Result<()> {
        Err(anyhow!("boom"))
    }

    #[test]
    fn success_returns_value() {
        let control = ExecutionControl::new(ExceptionPolicy::Propagate, None);
        let value = control.execute("acme/echo:b", || Ok(3)).unwrap();
        assert_eq!(value, Some(3));
    }

    #[test]
    fn propagate_reraises_original() {
        let control = ExecutionControl::new(ExceptionPolicy::Propagate, None);
        let err = control.execute("acme/echo:b", failing).unwrap_err();
        assert!(matches!(err, ExecutionError::Propagated { .. }));
        assert_eq!(err.original().to_string(), "boom");
        assert_eq!(err.origin(), "acme/echo:b");
    }

    #[test]
    fn just_log_swallows() {
        let control = ExecutionControl::new(ExceptionPolicy::JustLog, None);
        let outcome = control.execute("acme/echo:b", failing).unwrap();
        assert!(outcome.is_none());
    }

    #[test]
    fn stop_and_exit_wraps_original() {
        let control = ExecutionControl::new(ExceptionPolicy::StopAndExit, None);
        let err = control.execute("acme/echo:h", failing).unwrap_err();
        assert!(err.is_stop_runtime());
        assert_eq!(err.original().to_string(), "boom");
        let text = err.to_string();
        assert!(text.contains("acme/echo:h"));
        assert!(text.contains("boom"));
    }

    #[test]
    fn slow_call_still_returns_value() {
        let control = ExecutionControl::new(ExceptionPolicy::Propagate, Some(Duration::from_millis(1)));
        let value = control
            .execute("acme/slow:b", || {
                std::thread::sleep(Duration::from_millis(5));
                Ok("done")
            })
            .unwrap();
        assert_eq!(value, Some("done"));
    }

    #[test]
    fn calls_never_overlap() {
        let control = Arc::new(ExecutionControl::new(ExceptionPolicy::Propagate, None));
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let control = Arc::clone(&control);
                let inside = Arc::clone(&inside);
                let max_seen = Arc::clone(&max_seen);
                std::thread::spawn(move || {
                    for _ in 0..20 {
                        control
                            .execute("x/y:z", || {
                                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                                max_seen.fetch_max(now, Ordering::SeqCst);
                                std::thread::yield_now();
                                inside.fetch_sub(1, Ordering::SeqCst);
                                Ok(())
                            })
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }
}
