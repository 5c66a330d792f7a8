use std::any::Any;
use std::fmt::Display;
use std::panic::{self, AssertUnwindSafe};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::AppConfig;
use crate::error::ConfigError;

/// How many times a test body may run, including the first attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Result<Self, ConfigError> {
        if max_attempts == 0 {
            return Err(ConfigError::ZeroAttempts);
        }
        Ok(Self { max_attempts })
    }

    pub fn no_retry() -> Self {
        Self { max_attempts: 1 }
    }

    /// A per-test override wins over the configured default.
    pub fn resolve(config: &AppConfig, override_attempts: Option<u32>) -> Result<Self, ConfigError> {
        Self::new(override_attempts.unwrap_or(config.max_attempts))
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::no_retry()
    }
}

/// Per-attempt setup and teardown.
pub trait AttemptHooks {
    fn before_attempt(&mut self, _attempt: u32) {}

    /// Runs after every attempt, including failed ones.
    fn after_attempt(&mut self, _attempt: u32, _succeeded: bool) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl AttemptHooks for NoHooks {}

enum State<T, E> {
    Attempting(u32),
    Done(Result<T, E>),
}

/// Runs a fallible body until it succeeds or the attempts run out.
///
/// Only the last failure is returned; earlier ones are logged.
#[derive(Debug, Clone, Default)]
pub struct RetryOrchestrator {
    policy: RetryPolicy,
    delay: Duration,
}

impl RetryOrchestrator {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            delay: Duration::ZERO,
        }
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(RetryPolicy::resolve(config, None)?))
    }

    /// Pause between a failed attempt and the next one.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn run<T, E, F>(&self, body: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Result<T, E>,
        E: Display,
    {
        self.drive(&mut NoHooks, body, |_| true)
    }

    pub fn run_with_hooks<T, E, H, F>(&self, hooks: &mut H, body: F) -> Result<T, E>
    where
        H: AttemptHooks + ?Sized,
        F: FnMut(u32) -> Result<T, E>,
        E: Display,
    {
        self.drive(hooks, body, |_| true)
    }

    /// Like [`run`](Self::run), but a failure rejected by `should_retry` ends
    /// the loop immediately.
    pub fn run_while<T, E, F, P>(&self, body: F, should_retry: P) -> Result<T, E>
    where
        F: FnMut(u32) -> Result<T, E>,
        P: Fn(&E) -> bool,
        E: Display,
    {
        self.drive(&mut NoHooks, body, should_retry)
    }

    /// Retry a body that signals failure by panicking, as test assertions
    /// do. The last panic is resumed unchanged.
    pub fn run_unwinding<T, F>(&self, mut body: F) -> T
    where
        F: FnMut(u32) -> T,
    {
        let outcome = self.drive(
            &mut NoHooks,
            |attempt| {
                panic::catch_unwind(AssertUnwindSafe(|| body(attempt))).map_err(PanicPayload)
            },
            |_| true,
        );
        match outcome {
            Ok(value) => value,
            Err(PanicPayload(payload)) => panic::resume_unwind(payload),
        }
    }

    fn drive<T, E, H, F, P>(&self, hooks: &mut H, mut body: F, should_retry: P) -> Result<T, E>
    where
        H: AttemptHooks + ?Sized,
        F: FnMut(u32) -> Result<T, E>,
        P: Fn(&E) -> bool,
        E: Display,
    {
        let max_attempts = self.policy.max_attempts;
        let mut state = State::Attempting(1);

        loop {
            state = match state {
                State::Done(result) => return result,
                State::Attempting(attempt) => {
                    hooks.before_attempt(attempt);
                    let result = body(attempt);
                    hooks.after_attempt(attempt, result.is_ok());

                    match result {
                        Ok(value) => {
                            if attempt > 1 {
                                debug!(attempt, "succeeded after retry");
                            }
                            State::Done(Ok(value))
                        }
                        Err(e) if attempt < max_attempts && should_retry(&e) => {
                            warn!(attempt, max_attempts, error = %e, "attempt failed, retrying");
                            if !self.delay.is_zero() {
                                thread::sleep(self.delay);
                            }
                            State::Attempting(attempt + 1)
                        }
                        Err(e) => State::Done(Err(e)),
                    }
                }
            };
        }
    }
}

struct PanicPayload(Box<dyn Any + Send>);

impl Display for PanicPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(msg) = self.0.downcast_ref::<&str>() {
            f.write_str(msg)
        } else if let Some(msg) = self.0.downcast_ref::<String>() {
            f.write_str(msg)
        } else {
            f.write_str("test body panicked")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct CountingHooks {
        before: Vec<u32>,
        after: Vec<(u32, bool)>,
    }

    impl AttemptHooks for CountingHooks {
        fn before_attempt(&mut self, attempt: u32) {
            self.before.push(attempt);
        }

        fn after_attempt(&mut self, attempt: u32, succeeded: bool) {
            self.after.push((attempt, succeeded));
        }
    }

    fn orchestrator(max_attempts: u32) -> RetryOrchestrator {
        RetryOrchestrator::new(RetryPolicy::new(max_attempts).unwrap())
    }

    #[test]
    fn test_succeeds_on_third_attempt() {
        let mut hooks = CountingHooks::default();
        let result: Result<u32, String> = orchestrator(3).run_with_hooks(&mut hooks, |attempt| {
            if attempt < 3 {
                Err(format!("failed {attempt}"))
            } else {
                Ok(attempt)
            }
        });

        assert_eq!(result, Ok(3));
        assert_eq!(hooks.before, vec![1, 2, 3]);
        assert_eq!(hooks.after, vec![(1, false), (2, false), (3, true)]);
    }

    #[test]
    fn test_exhaustion_returns_last_error() {
        let mut hooks = CountingHooks::default();
        let result: Result<(), String> =
            orchestrator(3).run_with_hooks(&mut hooks, |attempt| Err(format!("failed {attempt}")));

        assert_eq!(result, Err("failed 3".to_string()));
        assert_eq!(hooks.before.len(), 3);
        assert_eq!(hooks.after.len(), 3);
    }

    #[test]
    fn test_single_attempt_runs_once() {
        let mut calls = 0;
        let result: Result<(), &str> = RetryOrchestrator::default().run(|_| {
            calls += 1;
            Err("nope")
        });
        assert_eq!(result, Err("nope"));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_run_while_stops_on_permanent_failure() {
        let mut calls = 0;
        let result: Result<(), String> = orchestrator(5).run_while(
            |attempt| {
                calls += 1;
                Err(if attempt == 2 { "permanent" } else { "flaky" }.to_string())
            },
            |e| e != "permanent",
        );
        assert_eq!(result, Err("permanent".to_string()));
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_run_unwinding_swallows_earlier_panics() {
        let value = orchestrator(3).run_unwinding(|attempt| {
            assert!(attempt >= 2, "flaky assertion");
            attempt * 10
        });
        assert_eq!(value, 20);
    }

    #[test]
    fn test_run_unwinding_resumes_last_panic() {
        let outcome = panic::catch_unwind(|| {
            orchestrator(2).run_unwinding(|attempt| -> () { panic!("attempt {attempt} failed") })
        });
        let payload = outcome.unwrap_err();
        assert_eq!(
            payload.downcast_ref::<String>().map(String::as_str),
            Some("attempt 2 failed")
        );
    }

    #[test]
    fn test_policy_resolution() {
        let config = AppConfig {
            max_attempts: 4,
            ..AppConfig::default()
        };
        assert_eq!(RetryPolicy::resolve(&config, None).unwrap().max_attempts(), 4);
        assert_eq!(RetryPolicy::resolve(&config, Some(2)).unwrap().max_attempts(), 2);
        assert_eq!(RetryPolicy::resolve(&config, Some(0)), Err(ConfigError::ZeroAttempts));
    }
}
