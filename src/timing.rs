//! Thin bounded-wait helpers, standing in for the source's
//! `execute_as_thread`/`interruptible_join` threading utilities.
//!
//! Out of scope for this crate to reimplement wholesale (the spec treats
//! general-purpose threading helpers as a collaborator interface), but the
//! worker state machine and the pool both need to wait on a condition with
//! a deadline, so the minimal pieces live here.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

/// Joins `handle` but gives up after `timeout`, returning
/// [`Error::TimeoutExpired`] rather than blocking forever. `handle` is
/// consumed either way; on timeout the thread is left running detached,
/// since `std::thread` has no way to cancel it.
pub fn join_with_timeout<T: Send + 'static>(
    handle: JoinHandle<T>,
    timeout: Duration,
    what: &str,
) -> Result<T> {
    let done = Arc::new(AtomicBool::new(false));
    let done_clone = done.clone();
    let (tx, rx) = std::sync::mpsc::channel();

    std::thread::spawn(move || {
        let result = handle.join();
        done_clone.store(true, Ordering::SeqCst);
        let _ = tx.send(result);
    });

    match rx.recv_timeout(timeout) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(_)) => Err(Error::InvalidConfig { reason: format!("{what} thread panicked") }),
        Err(_) => Err(Error::TimeoutExpired { what: what.to_string() }),
    }
}

/// Polls `condition` until it returns `true` or `timeout` elapses, sleeping
/// `poll_interval` between checks. Used for waiting on a worker's control
/// plane to come up after launch.
pub fn wait_until<F: FnMut() -> bool>(
    mut condition: F,
    timeout: Duration,
    poll_interval: Duration,
    what: &str,
) -> Result<()> {
    let start = Instant::now();
    loop {
        if condition() {
            return Ok(());
        }
        if start.elapsed() >= timeout {
            return Err(Error::TimeoutExpired { what: what.to_string() });
        }
        std::thread::sleep(poll_interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_with_timeout_returns_the_threads_value() {
        let handle = std::thread::spawn(|| 42);
        let value = join_with_timeout(handle, Duration::from_secs(1), "test thread").unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn join_with_timeout_expires_on_a_slow_thread() {
        let handle = std::thread::spawn(|| {
            std::thread::sleep(Duration::from_secs(5));
        });
        let err = join_with_timeout(handle, Duration::from_millis(50), "slow thread").unwrap_err();
        assert!(matches!(err, Error::TimeoutExpired { .. }));
    }

    #[test]
    fn wait_until_succeeds_once_condition_flips() {
        let mut count = 0;
        wait_until(
            || {
                count += 1;
                count >= 3
            },
            Duration::from_secs(1),
            Duration::from_millis(1),
            "counter",
        )
        .unwrap();
        assert_eq!(count, 3);
    }

    #[test]
    fn wait_until_times_out_on_a_condition_that_never_flips() {
        let err = wait_until(|| false, Duration::from_millis(30), Duration::from_millis(5), "never").unwrap_err();
        assert!(matches!(err, Error::TimeoutExpired { .. }));
    }
}
