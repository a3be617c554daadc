//! Fixed-delay retry around remote calls.

use std::fmt::Display;
use std::thread;
use std::time::Duration;

use tracing::warn;

use crate::error::{ScimError, SyncError};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 100;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

/// Why [`RetryPolicy::run`] gave up.
#[derive(Debug, PartialEq, Eq)]
pub enum RetryError<E> {
    /// The error was not retryable.
    Permanent(E),
    /// Every attempt failed with a retryable error; the last one is kept.
    Exhausted { attempts: u32, last: E },
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Call `f` until it succeeds, fails permanently or attempts run out.
    pub fn run<T, E, F, R>(&self, operation: &str, is_retryable: R, mut f: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Result<T, E>,
        R: Fn(&E) -> bool,
        E: Display,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match f() {
                Ok(value) => return Ok(value),
                Err(e) if !is_retryable(&e) => return Err(RetryError::Permanent(e)),
                Err(e) if attempt >= self.max_attempts => {
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last: e,
                    })
                }
                Err(e) => {
                    warn!(
                        "{operation} failed (attempt {attempt}/{}): {e}; retrying in {:?}",
                        self.max_attempts, self.delay
                    );
                    thread::sleep(self.delay);
                }
            }
        }
    }

    /// [`RetryPolicy::run`] specialised to SCIM calls.
    pub fn scim<T, F>(&self, operation: &str, f: F) -> Result<T, SyncError>
    where
        F: FnMut() -> Result<T, ScimError>,
    {
        self.run(operation, ScimError::is_retryable, f)
            .map_err(|e| match e {
                RetryError::Permanent(source) => SyncError::Scim(source),
                RetryError::Exhausted { attempts, last } => SyncError::RetriesExhausted {
                    operation: operation.to_string(),
                    attempts,
                    source: last,
                },
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn throttled() -> ScimError {
        ScimError::Throttled {
            method: "GET".into(),
            url: "/Users".into(),
            status: 429,
            body: "Too Many Requests".into(),
        }
    }

    fn rejected() -> ScimError {
        ScimError::Api {
            method: "POST".into(),
            url: "/Users".into(),
            status: 400,
            body: "bad".into(),
        }
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::ZERO)
    }

    #[test]
    fn succeeds_after_transient_failures() {
        let calls = Cell::new(0);
        let result = policy(5).scim("list users", || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(throttled())
            } else {
                Ok("ok")
            }
        });
        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn permanent_error_is_not_retried() {
        let calls = Cell::new(0);
        let result: Result<(), _> = policy(5).scim("create user", || {
            calls.set(calls.get() + 1);
            Err(rejected())
        });
        assert!(matches!(result, Err(SyncError::Scim(ScimError::Api { status: 400, .. }))));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let calls = Cell::new(0);
        let result: Result<(), _> = policy(4).scim("patch group", || {
            calls.set(calls.get() + 1);
            Err(throttled())
        });
        assert!(matches!(
            result,
            Err(SyncError::RetriesExhausted { attempts: 4, .. })
        ));
        assert_eq!(calls.get(), 4);
    }

    #[test]
    fn generic_run_uses_supplied_predicate() {
        let result: Result<u8, RetryError<String>> =
            policy(3).run("parse", |e: &String| e == "again", || Err("stop".to_string()));
        assert_eq!(result, Err(RetryError::Permanent("stop".to_string())));
    }

    #[test]
    fn server_errors_are_retryable_client_errors_are_not() {
        assert!(throttled().is_retryable());
        assert!(!rejected().is_retryable());
    }
}
