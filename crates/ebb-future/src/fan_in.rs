//! Fan-in: joining several futures into one.
//!
//! Two families with deliberately different ordering guarantees:
//!
//! - [`flatten`] waits on futures that are already running and collects
//!   their values in **completion order**.
//! - [`ordered_flatten`] and [`sync_flatten`] take [`LazyFuture`] thunks and
//!   start input `i + 1` only after input `i` resolved, so results come back
//!   in **input order** at the cost of concurrency.
//!
//! Every joiner reports only the first failure it observes; later errors are
//! dropped.

use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use crate::error::{Error, FutureResult};
use crate::future::Future;
use crate::promise::Promise;

/// A future that has not been started yet.
pub type LazyFuture<T> = Box<dyn FnOnce() -> Future<T> + Send + 'static>;

/// Wrap a closure as a [`LazyFuture`].
pub fn lazy<T, F>(start: F) -> LazyFuture<T>
where
    F: FnOnce() -> Future<T> + Send + 'static,
{
    Box::new(start)
}

/// Accumulator shared by every input of a [`flatten`].
struct ManyFutures<T: Clone + Send + 'static> {
    expected: usize,
    results: Vec<T>,
    errors: Vec<Error>,
    promise: Option<Promise<Vec<T>>>,
}

impl<T: Clone + Send + 'static> ManyFutures<T> {
    /// Record one outcome. Once every input has reported, hands back the
    /// output promise together with the joined outcome.
    fn record(&mut self, result: FutureResult<T>) -> Option<(Promise<Vec<T>>, FutureResult<Vec<T>>)> {
        match result {
            Ok(value) => self.results.push(value),
            Err(error) => self.errors.push(error),
        }
        if self.results.len() + self.errors.len() < self.expected {
            return None;
        }

        let promise = self.promise.take()?;
        let mut errors = std::mem::take(&mut self.errors).into_iter();
        let outcome = match errors.next() {
            None => Ok(std::mem::take(&mut self.results)),
            Some(first) => {
                let discarded = errors.len();
                if discarded > 0 {
                    debug!(
                        discarded,
                        inputs = self.expected,
                        "fan-in failed; reporting the first error only"
                    );
                }
                Err(first)
            }
        };
        Some((promise, outcome))
    }
}

/// Wait for every future. Values are returned in completion order.
///
/// Fails with the first error observed once all inputs have resolved.
pub fn flatten<T>(futures: Vec<Future<T>>) -> Future<Vec<T>>
where
    T: Clone + Send + 'static,
{
    if futures.is_empty() {
        return Future::succeeded(Vec::new());
    }

    let promise = Promise::new();
    let joined = promise.future();
    let many = Arc::new(Mutex::new(ManyFutures {
        expected: futures.len(),
        results: Vec::with_capacity(futures.len()),
        errors: Vec::new(),
        promise: Some(promise),
    }));

    for future in futures {
        let many = Arc::clone(&many);
        future.add_waiter(move |result| {
            let finished = many
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .record(result);
            if let Some((promise, outcome)) = finished {
                promise.resolve(outcome);
            }
        });
    }
    joined
}

/// Start each future only after the previous one succeeded and return the
/// values in input order. Stops at the first failure.
pub fn ordered_flatten<T>(futures: Vec<LazyFuture<T>>) -> Future<Vec<T>>
where
    T: Clone + Send + 'static,
{
    let promise = Promise::new();
    let joined = promise.future();
    let results = Vec::with_capacity(futures.len());
    run_in_order(futures.into_iter(), results, promise);
    joined
}

/// [`ordered_flatten`] for side-effect-only futures.
pub fn sync_flatten(futures: Vec<LazyFuture<()>>) -> Future<()> {
    ordered_flatten(futures).transform(())
}

fn run_in_order<T>(
    mut remaining: std::vec::IntoIter<LazyFuture<T>>,
    mut results: Vec<T>,
    promise: Promise<Vec<T>>,
) where
    T: Clone + Send + 'static,
{
    // Already-resolved futures are consumed in this loop instead of
    // recursing through waiters, which keeps the stack flat.
    loop {
        let Some(start) = remaining.next() else {
            promise.complete(results);
            return;
        };
        let future = start();
        match future.peek() {
            Some(Ok(value)) => results.push(value),
            Some(Err(error)) => {
                promise.fail(error);
                return;
            }
            None => {
                future.add_waiter(move |result| match result {
                    Ok(value) => {
                        results.push(value);
                        run_in_order(remaining, results, promise);
                    }
                    Err(error) => {
                        promise.fail(error);
                    }
                });
                return;
            }
        }
    }
}

/// Fold the values of `futures` into one, in input order.
///
/// `combine` sees values in the order the futures were given, whatever order
/// they resolve in. Fails with the first failing input (in input order).
pub fn reduce<T, U, F>(initial: U, futures: Vec<Future<T>>, combine: F) -> Future<U>
where
    T: Clone + Send + 'static,
    U: Clone + Send + 'static,
    F: FnMut(U, T) -> U + Send + 'static,
{
    let promise = Promise::new();
    let reduced = promise.future();
    fold_in_order(futures.into_iter(), initial, combine, promise);
    reduced
}

fn fold_in_order<T, U, F>(
    mut remaining: std::vec::IntoIter<Future<T>>,
    mut acc: U,
    mut combine: F,
    promise: Promise<U>,
) where
    T: Clone + Send + 'static,
    U: Clone + Send + 'static,
    F: FnMut(U, T) -> U + Send + 'static,
{
    loop {
        let Some(future) = remaining.next() else {
            promise.complete(acc);
            return;
        };
        match future.peek() {
            Some(Ok(value)) => acc = combine(acc, value),
            Some(Err(error)) => {
                promise.fail(error);
                return;
            }
            None => {
                future.add_waiter(move |result| match result {
                    Ok(value) => {
                        let acc = combine(acc, value);
                        fold_in_order(remaining, acc, combine, promise);
                    }
                    Err(error) => {
                        promise.fail(error);
                    }
                });
                return;
            }
        }
    }
}
