//! Single-assignment future with registrable waiters.
//!
//! A [`Future`] starts pending and is resolved exactly once, either by its
//! [`Promise`] or at construction time. Every waiter registered while the
//! future is pending runs once, in registration order, on the thread that
//! resolves it. Waiters registered after resolution run immediately on the
//! registering thread.
//!
//! All combinators (`then`, `map`, `flat_map`, ...) are built on
//! [`Future::add_waiter`]; none of them spawn tasks or hop threads.

use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};

use crate::error::{Error, FutureResult};
use crate::promise::Promise;

type Waiter<T> = Box<dyn FnOnce(FutureResult<T>) + Send + 'static>;

enum State<T> {
    Pending(Vec<Waiter<T>>),
    Resolved(FutureResult<T>),
}

struct Shared<T> {
    state: Mutex<State<T>>,
}

impl<T> Shared<T> {
    // Waiters never run under the lock, so a poisoned lock still holds a
    // consistent state.
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Read handle to a value or error produced exactly once.
///
/// Cloning is cheap; all clones observe the same resolution.
pub struct Future<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Future<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> fmt::Debug for Future<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.shared.lock() {
            State::Pending(waiters) => format!("pending ({} waiters)", waiters.len()),
            State::Resolved(Ok(_)) => "succeeded".to_string(),
            State::Resolved(Err(e)) => format!("failed: {e}"),
        };
        f.debug_struct("Future").field("state", &state).finish()
    }
}

impl<T: Clone + Send + 'static> Future<T> {
    pub(crate) fn pending() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::Pending(Vec::new())),
            }),
        }
    }

    /// A future that is already resolved with `result`.
    pub fn resolved(result: FutureResult<T>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::Resolved(result)),
            }),
        }
    }

    pub fn succeeded(value: T) -> Self {
        Self::resolved(Ok(value))
    }

    pub fn failed(error: impl Into<Error>) -> Self {
        Self::resolved(Err(error.into()))
    }

    pub fn is_completed(&self) -> bool {
        matches!(&*self.shared.lock(), State::Resolved(_))
    }

    /// A copy of the outcome if the future has resolved.
    pub fn peek(&self) -> Option<FutureResult<T>> {
        match &*self.shared.lock() {
            State::Resolved(result) => Some(result.clone()),
            State::Pending(_) => None,
        }
    }

    /// Register `waiter` to run with the outcome.
    ///
    /// Runs immediately on the calling thread if the future has already
    /// resolved, otherwise on the thread that resolves it.
    pub fn add_waiter<F>(&self, waiter: F)
    where
        F: FnOnce(FutureResult<T>) + Send + 'static,
    {
        let result = {
            let mut state = self.shared.lock();
            match &mut *state {
                State::Pending(waiters) => {
                    waiters.push(Box::new(waiter));
                    return;
                }
                State::Resolved(result) => result.clone(),
            }
        };
        waiter(result);
    }

    /// Honors the first resolution only. Returns whether this call won.
    pub(crate) fn resolve(&self, result: FutureResult<T>) -> bool {
        let waiters = {
            let mut state = self.shared.lock();
            let State::Pending(pending) = &mut *state else {
                return false;
            };
            let waiters = std::mem::take(pending);
            *state = State::Resolved(result.clone());
            waiters
        };
        for waiter in waiters {
            waiter(result.clone());
        }
        true
    }

    /// Run `callback` with the value on success.
    pub fn then<F>(&self, callback: F) -> &Self
    where
        F: FnOnce(T) + Send + 'static,
    {
        self.add_waiter(move |result| {
            if let Ok(value) = result {
                callback(value);
            }
        });
        self
    }

    /// Run `callback` with the error on failure.
    pub fn catch<F>(&self, callback: F) -> &Self
    where
        F: FnOnce(Error) + Send + 'static,
    {
        self.add_waiter(move |result| {
            if let Err(error) = result {
                callback(error);
            }
        });
        self
    }

    /// Run `callback` once the future resolves, whatever the outcome.
    pub fn always<F>(&self, callback: F) -> &Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.add_waiter(move |_| callback());
        self
    }

    /// Transform the value; errors pass through untouched.
    pub fn map<U, F>(&self, f: F) -> Future<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        let promise = Promise::new();
        let mapped = promise.future();
        self.add_waiter(move |result| {
            promise.resolve(result.map(f));
        });
        mapped
    }

    /// Transform the value with a fallible function. If `f` fails, the
    /// returned future fails with its error.
    pub fn try_map<U, E, F>(&self, f: F) -> Future<U>
    where
        U: Clone + Send + 'static,
        E: Into<Error>,
        F: FnOnce(T) -> Result<U, E> + Send + 'static,
    {
        let promise = Promise::new();
        let mapped = promise.future();
        self.add_waiter(move |result| {
            promise.resolve(result.and_then(|value| f(value).map_err(Into::into)));
        });
        mapped
    }

    /// Turn a failure into a value.
    pub fn catch_map<F>(&self, f: F) -> Future<T>
    where
        F: FnOnce(Error) -> T + Send + 'static,
    {
        let promise = Promise::new();
        let recovered = promise.future();
        self.add_waiter(move |result| {
            promise.complete(result.unwrap_or_else(f));
        });
        recovered
    }

    /// Continue with another asynchronous step once the value is available.
    pub fn flat_map<U, F>(&self, f: F) -> Future<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Future<U> + Send + 'static,
    {
        let promise = Promise::new();
        let next = promise.future();
        self.add_waiter(move |result| match result {
            Ok(value) => f(value).chain(promise),
            Err(error) => {
                promise.fail(error);
            }
        });
        next
    }

    /// Forward this future's outcome into `promise`.
    pub fn chain(&self, promise: Promise<T>) {
        self.add_waiter(move |result| {
            promise.resolve(result);
        });
    }

    /// Replace the value with `value` once this future succeeds.
    pub fn transform<U>(&self, value: U) -> Future<U>
    where
        U: Clone + Send + 'static,
    {
        self.map(move |_| value)
    }
}

impl<T: Clone + Send + 'static> Future<Future<T>> {
    /// Collapse a future of a future into one future.
    pub fn flatten(&self) -> Future<T> {
        self.flat_map(|inner| inner)
    }
}

impl<T: Clone + Send + 'static> std::future::IntoFuture for Future<T> {
    type Output = FutureResult<T>;
    type IntoFuture = FutureAwait<T>;

    fn into_future(self) -> Self::IntoFuture {
        FutureAwait {
            future: self,
            waker: Arc::new(Mutex::new(None)),
            registered: false,
        }
    }
}

/// Adapter that lets async code `.await` a [`Future`].
pub struct FutureAwait<T> {
    future: Future<T>,
    waker: Arc<Mutex<Option<Waker>>>,
    registered: bool,
}

impl<T: Clone + Send + 'static> std::future::Future for FutureAwait<T> {
    type Output = FutureResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if let Some(result) = this.future.peek() {
            return Poll::Ready(result);
        }

        *this.waker.lock().unwrap_or_else(PoisonError::into_inner) = Some(cx.waker().clone());
        if !this.registered {
            this.registered = true;
            let slot = Arc::clone(&this.waker);
            this.future.add_waiter(move |_| {
                let waker = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
                if let Some(waker) = waker {
                    waker.wake();
                }
            });
        }

        // Resolution may have raced the waker registration above.
        match this.future.peek() {
            Some(result) => Poll::Ready(result),
            None => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn fresh_future_is_pending() {
        let promise = Promise::<u32>::new();
        let future = promise.future();
        assert!(!future.is_completed());
        assert!(future.peek().is_none());
        promise.complete(1);
    }

    #[test]
    fn waiters_before_and_after_resolution_each_run_once() {
        let promise = Promise::new();
        let future = promise.future();
        let calls = Arc::new(AtomicUsize::new(0));

        let before = calls.clone();
        future.add_waiter(move |r| {
            assert_eq!(r.unwrap(), 7);
            before.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        assert!(promise.complete(7));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let after = calls.clone();
        future.add_waiter(move |r| {
            assert_eq!(r.unwrap(), 7);
            after.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn waiters_run_in_registration_order() {
        let promise = Promise::new();
        let future = promise.future();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            let order = order.clone();
            future.add_waiter(move |_| order.lock().unwrap().push(i));
        }
        promise.complete(());
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn then_and_catch_pick_their_outcome() {
        let hits = Arc::new(Mutex::new(Vec::new()));
        let ok = Future::succeeded(1);
        let h = hits.clone();
        let h2 = hits.clone();
        ok.then(move |v| h.lock().unwrap().push(format!("then {v}")))
            .catch(move |e| h2.lock().unwrap().push(format!("catch {e}")));

        let failed = Future::<u32>::failed("boom");
        let h = hits.clone();
        let h2 = hits.clone();
        failed
            .then(move |v| h.lock().unwrap().push(format!("then {v}")))
            .catch(move |e| h2.lock().unwrap().push(format!("catch {e}")));

        assert_eq!(*hits.lock().unwrap(), vec!["then 1", "catch boom"]);
    }

    #[test]
    fn always_runs_for_both_outcomes() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        Future::succeeded(1).always(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        let c = count.clone();
        Future::<u8>::failed("x").always(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn map_composes() {
        let f = |v: i64| v + 3;
        let g = |v: i64| v * 4;
        let chained = Future::succeeded(2).map(f).map(g);
        let fused = Future::succeeded(2).map(move |v| g(f(v)));
        assert_eq!(chained.peek().unwrap().unwrap(), fused.peek().unwrap().unwrap());
    }

    #[test]
    fn failing_try_map_skips_the_next_map() {
        let ran = Arc::new(AtomicUsize::new(0));
        let r = ran.clone();
        let mapped = Future::succeeded(1)
            .try_map(|_| Err::<u32, _>(Error::msg("parse failed")))
            .map(move |v| {
                r.fetch_add(1, Ordering::SeqCst);
                v + 1
            });
        let err = mapped.peek().unwrap().unwrap_err();
        assert_eq!(err.to_string(), "parse failed");
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn map_propagates_upstream_error() {
        let mapped = Future::<u32>::failed("upstream").map(|v| v * 2);
        assert_eq!(mapped.peek().unwrap().unwrap_err().to_string(), "upstream");
    }

    #[test]
    fn catch_map_recovers() {
        let recovered = Future::<u32>::failed("nope").catch_map(|_| 42);
        assert_eq!(recovered.peek().unwrap().unwrap(), 42);
    }

    #[test]
    fn chain_forwards_into_another_promise() {
        let source = Promise::new();
        let target = Promise::new();
        let observed = target.future();
        source.future().chain(target);
        assert!(!observed.is_completed());
        source.complete("done".to_string());
        assert_eq!(observed.peek().unwrap().unwrap(), "done");
    }

    #[test]
    fn flat_map_waits_for_inner_future() {
        let inner = Promise::new();
        let inner_future = inner.future();
        let outer = Future::succeeded(10).flat_map(move |v| inner_future.map(move |w: i32| v + w));
        assert!(!outer.is_completed());
        inner.complete(5);
        assert_eq!(outer.peek().unwrap().unwrap(), 15);
    }

    #[test]
    fn nested_future_flattens() {
        let nested = Future::succeeded(Future::succeeded("inner"));
        assert_eq!(nested.flatten().peek().unwrap().unwrap(), "inner");

        let nested_err: Future<Future<u8>> = Future::failed("outer");
        assert_eq!(
            nested_err.flatten().peek().unwrap().unwrap_err().to_string(),
            "outer"
        );
    }

    #[test]
    fn transform_replaces_value() {
        assert_eq!(Future::succeeded(()).transform(9).peek().unwrap().unwrap(), 9);
    }

    #[test]
    fn debug_reports_state() {
        let promise = Promise::<u8>::new();
        let future = promise.future();
        future.add_waiter(|_| {});
        assert!(format!("{future:?}").contains("pending (1 waiters)"));
        promise.fail("bad");
        assert!(format!("{future:?}").contains("failed: bad"));
    }
}
