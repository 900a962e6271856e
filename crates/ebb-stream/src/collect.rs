//! A consumer that gathers a whole stream into a future.

use ebb_future::{Future, Promise};
use tracing::debug;

use crate::credit::Credit;
use crate::error::StreamError;
use crate::protocol::{InputStream, OutputRequest};

/// Collects every item and resolves with them when the producer closes.
///
/// Requests `batch` items on connect and another `batch` each time the
/// previous one has been fully delivered, so at most `batch` items are ever
/// outstanding.
pub struct CollectStream<T: Clone + Send + 'static> {
    batch: Credit,
    remaining: Credit,
    items: Vec<T>,
    request: Option<OutputRequest>,
    promise: Promise<Vec<T>>,
}

impl<T: Clone + Send + 'static> CollectStream<T> {
    /// A collector and the future of its items. A zero batch is treated as
    /// one.
    pub fn new(batch: Credit) -> (Self, Future<Vec<T>>) {
        let batch = if batch.is_zero() { Credit::new(1) } else { batch };
        let promise = Promise::new();
        let future = promise.future();
        let collector = Self {
            batch,
            remaining: Credit::ZERO,
            items: Vec::new(),
            request: None,
            promise,
        };
        (collector, future)
    }

    fn request_batch(&mut self) {
        if let Some(request) = self.request.as_ref() {
            self.remaining = self.batch;
            request.request_output(self.batch.get());
        }
    }
}

impl<T: Clone + Send + 'static> InputStream<T> for CollectStream<T> {
    fn on_output(&mut self, request: OutputRequest) {
        self.request = Some(request);
        self.request_batch();
    }

    fn on_input(&mut self, input: T) {
        self.items.push(input);
        self.remaining.consume();
        if self.remaining.is_zero() {
            self.request_batch();
        }
    }

    fn on_error(&mut self, error: StreamError) {
        debug!(%error, collected = self.items.len(), "collected stream failed");
        self.promise.fail(error);
    }

    fn on_close(&mut self) {
        self.promise.complete(std::mem::take(&mut self.items));
    }
}
