//! Promise: the write side of a [`Future`].
//!
//! A promise is resolved at most once. Later `complete`/`fail` calls are
//! ignored rather than treated as errors, so racing producers can all try
//! to resolve without coordinating. If the promise is dropped while its
//! future is still pending, the future fails with
//! [`Error::BrokenPromise`] so that waiters are never stranded.

use tracing::trace;

use crate::error::{Error, FutureResult};
use crate::future::Future;

/// Write-once handle that resolves its paired [`Future`].
pub struct Promise<T: Clone + Send + 'static> {
    future: Future<T>,
}

impl<T: Clone + Send + 'static> Promise<T> {
    pub fn new() -> Self {
        Self {
            future: Future::pending(),
        }
    }

    /// A read handle to the future this promise resolves.
    pub fn future(&self) -> Future<T> {
        self.future.clone()
    }

    /// Resolve with a value. Returns `false` if already resolved.
    pub fn complete(&self, value: T) -> bool {
        self.resolve(Ok(value))
    }

    /// Resolve with an error. Returns `false` if already resolved.
    pub fn fail(&self, error: impl Into<Error>) -> bool {
        self.resolve(Err(error.into()))
    }

    /// Resolve with a ready-made outcome. Returns `false` if already resolved.
    pub fn resolve(&self, result: FutureResult<T>) -> bool {
        let won = self.future.resolve(result);
        if !won {
            trace!("ignoring second resolution of promise");
        }
        won
    }

    pub fn is_completed(&self) -> bool {
        self.future.is_completed()
    }
}

impl<T: Clone + Send + 'static> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> Drop for Promise<T> {
    fn drop(&mut self) {
        if self.future.resolve(Err(Error::BrokenPromise)) {
            trace!(
                value_type = std::any::type_name::<T>(),
                "promise dropped before completion"
            );
        }
    }
}

impl<T: Clone + Send + 'static> std::fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Promise")
            .field("future", &self.future)
            .finish()
    }
}
