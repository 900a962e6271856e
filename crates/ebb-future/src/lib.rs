//! ebb-future — single-assignment futures and promises.
//!
//! A [`Promise`] is the producer-only write side; its [`Future`] is the
//! read side that callers attach waiters and combinators to. Resolution
//! happens once; later attempts are ignored.
//!
//! # Threading
//!
//! A promise may be completed from any thread. Waiters run synchronously
//! on the completing thread, in the order they were registered. Code that
//! must run on a particular event loop has to hop there explicitly.
//!
//! The only blocking entry points are the `blocking_await*` methods. They
//! must not be called from a waiter running on the thread that is expected
//! to resolve the awaited future.
//!
//! # Fan-in
//!
//! [`flatten`] joins running futures in completion order;
//! [`ordered_flatten`] and [`sync_flatten`] run lazily started futures one
//! after another and keep input order. All of them report only the first
//! error.

mod blocking;
mod error;
pub mod fan_in;
mod future;
mod promise;

pub use error::{Error, FutureResult};
pub use fan_in::{flatten, lazy, ordered_flatten, reduce, sync_flatten, LazyFuture};
pub use future::{Future, FutureAwait};
pub use promise::Promise;
