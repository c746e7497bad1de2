//! Bounded retry with fixed backoff.
//!
//! Transient-recoverable failures (frame reads, local writes, remote calls)
//! are retried a bounded number of times at the component responsible and
//! then abandoned; this combinator is that single policy, applied uniformly.

use std::time::Duration;

use anyhow::{anyhow, Result};

/// Run `op` up to `attempts` times, sleeping `delay` between attempts.
///
/// Returns the first success, or the last error annotated with the attempt
/// budget. Never sleeps after the final attempt. `op` receives the 1-based
/// attempt number, mostly for logging.
pub fn retry_with_backoff<T>(
    attempts: u32,
    delay: Duration,
    mut op: impl FnMut(u32) -> Result<T>,
) -> Result<T> {
    let attempts = attempts.max(1);
    let mut last_err = None;
    for attempt in 1..=attempts {
        match op(attempt) {
            Ok(value) => return Ok(value),
            Err(err) => {
                log::debug!("attempt {}/{} failed: {}", attempt, attempts, err);
                last_err = Some(err);
            }
        }
        if attempt < attempts {
            std::thread::sleep(delay);
        }
    }
    // attempts >= 1, so last_err is always set here.
    Err(anyhow!(
        "gave up after {} attempts: {}",
        attempts,
        last_err.unwrap_or_else(|| anyhow!("no attempts made"))
    ))
}
