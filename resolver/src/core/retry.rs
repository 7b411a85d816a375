//! Bounded retry with an explicit attempt budget.

use anyhow::{Result, anyhow};

/// Run `op` up to `max_attempts` times.
///
/// `op` receives the 1-indexed attempt number. The first `Ok` is returned
/// immediately. An error stops the loop early when `is_retryable` says so,
/// otherwise the last error is returned once the budget is spent.
pub fn retry_with_budget<T, F, R>(max_attempts: u32, is_retryable: R, mut op: F) -> Result<T>
where
    F: FnMut(u32) -> Result<T>,
    R: Fn(&anyhow::Error) -> bool,
{
    if max_attempts == 0 {
        return Err(anyhow!("attempt budget must be > 0"));
    }
    let mut attempt = 1;
    loop {
        match op(attempt) {
            Ok(value) => return Ok(value),
            Err(err) if attempt < max_attempts && is_retryable(&err) => attempt += 1,
            Err(err) => return Err(err),
        }
    }
}
