//! Blocking waits on a [`Future`].
//!
//! These park the calling thread until the future resolves. Never call them
//! from a waiter that runs on the thread expected to resolve the same future:
//! the resolution can then never happen and the wait deadlocks (or, with a
//! deadline, always times out).

use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};

use ebb_core::AwaitConfig;
use tracing::debug;

use crate::error::{Error, FutureResult};
use crate::future::Future;

impl<T: Clone + Send + 'static> Future<T> {
    /// Block until the future resolves.
    pub fn blocking_await(&self) -> FutureResult<T> {
        self.signal().recv().unwrap_or(Err(Error::BrokenPromise))
    }

    /// Block until the future resolves or `timeout` elapses.
    pub fn blocking_await_timeout(&self, timeout: Duration) -> FutureResult<T> {
        match self.signal().recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                debug!(
                    expected = std::any::type_name::<T>(),
                    ?timeout,
                    "blocking wait timed out"
                );
                Err(Error::Timeout {
                    expected: std::any::type_name::<T>(),
                    waited: timeout,
                })
            }
            Err(RecvTimeoutError::Disconnected) => Err(Error::BrokenPromise),
        }
    }

    /// Block for at most the configured `[await] default_timeout`.
    pub fn blocking_await_with(&self, config: &AwaitConfig) -> FutureResult<T> {
        self.blocking_await_timeout(config.default_timeout())
    }

    /// Block until the future resolves or `deadline` passes.
    pub fn blocking_await_deadline(&self, deadline: Instant) -> FutureResult<T> {
        self.blocking_await_timeout(deadline.saturating_duration_since(Instant::now()))
    }

    // One-slot channel released by a waiter; the receiver may already be
    // gone after a timeout, so the send result is irrelevant.
    fn signal(&self) -> mpsc::Receiver<FutureResult<T>> {
        let (tx, rx) = mpsc::sync_channel(1);
        self.add_waiter(move |result| {
            let _ = tx.send(result);
        });
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Promise;

    #[test]
    fn map_then_block() {
        assert_eq!(Future::succeeded(5).map(|v| v * 2).blocking_await().unwrap(), 10);
    }

    #[test]
    fn unresolved_future_times_out() {
        let promise = Promise::<i32>::new();
        let started = Instant::now();
        let err = promise
            .future()
            .blocking_await_timeout(Duration::from_millis(50))
            .unwrap_err();
        assert!(started.elapsed() >= Duration::from_millis(50));
        match err {
            Error::Timeout { expected, waited } => {
                assert_eq!(expected, "i32");
                assert_eq!(waited, Duration::from_millis(50));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert!(!promise.is_completed());
    }

    #[test]
    fn resolution_from_another_thread_wakes_waiter() {
        let promise = Promise::new();
        let future = promise.future();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            promise.complete("ready");
        });
        assert_eq!(
            future.blocking_await_timeout(Duration::from_secs(5)).unwrap(),
            "ready"
        );
        handle.join().unwrap();
    }

    #[test]
    fn past_deadline_still_returns_resolved_value() {
        let future = Future::succeeded(1u8);
        let deadline = Instant::now() - Duration::from_millis(1);
        assert_eq!(future.blocking_await_deadline(deadline).unwrap(), 1);
    }

    #[test]
    fn dropped_promise_unblocks_with_broken_promise() {
        let promise = Promise::<u8>::new();
        let future = promise.future();
        let handle = std::thread::spawn(move || drop(promise));
        let err = future.blocking_await().unwrap_err();
        assert!(err.is_broken_promise());
        handle.join().unwrap();
    }

    #[test]
    fn configured_timeout_bounds_the_wait() {
        let config = AwaitConfig {
            default_timeout: "20ms".to_string(),
        };
        let promise = Promise::<u8>::new();
        let err = promise.future().blocking_await_with(&config).unwrap_err();
        assert!(matches!(
            err,
            Error::Timeout { waited, .. } if waited == Duration::from_millis(20)
        ));
        assert_eq!(Future::succeeded(3u8).blocking_await_with(&config).unwrap(), 3);
    }
}
