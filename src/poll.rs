//! Bounded retry loops.
//!
//! Attempts are counted from 1. A loop never errors on exhaustion, it just reports `false`.

use std::path::Path;
use std::thread;
use std::time::Duration;

use tracing::debug;

use crate::util::fs::is_non_empty_file;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed(Duration),
    /// Sleeps `attempt * step`.
    Linear(Duration),
}

impl Backoff {
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Fixed(d) => d,
            Backoff::Linear(step) => step.saturating_mul(attempt),
        }
    }
}

/// Call `check` up to `max_attempts` times, sleeping between failed attempts.
///
/// No sleep follows the final attempt.
pub fn poll_until<F>(max_attempts: u32, backoff: Backoff, mut check: F) -> bool
where
    F: FnMut(u32) -> bool,
{
    for attempt in 1..=max_attempts {
        if check(attempt) {
            return true;
        }
        if attempt < max_attempts {
            let delay = backoff.delay(attempt);
            if !delay.is_zero() {
                thread::sleep(delay);
            }
        }
    }
    false
}

/// Like `poll_until`, but the closure yields a value once ready.
pub fn poll_for<T, F>(max_attempts: u32, backoff: Backoff, mut check: F) -> Option<T>
where
    F: FnMut(u32) -> Option<T>,
{
    let mut found = None;
    poll_until(max_attempts, backoff, |attempt| {
        found = check(attempt);
        found.is_some()
    });
    found
}

/// True once `path` exists and is non-empty.
pub fn wait_for_file(path: &Path, max_attempts: u32, sleep: Duration) -> bool {
    poll_until(max_attempts, Backoff::Fixed(sleep), |attempt| {
        debug!("waiting for {} (attempt {attempt})", path.display());
        is_non_empty_file(path)
    })
}
