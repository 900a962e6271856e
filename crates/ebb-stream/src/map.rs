//! A stream stage applying a function to every item.
//!
//! [`MapStream`] is both a consumer (of its upstream) and a producer (for
//! its downstream). Credit granted downstream is forwarded upstream one to
//! one, so the stage never buffers.

use std::sync::{Arc, Mutex};

use ebb_future::FutureResult;
use tracing::{trace, warn};

use crate::error::StreamError;
use crate::event_loop::EventLoop;
use crate::protocol::{
    attach, lock, Downstream, InputStream, OutputRequest, OutputStream, Producer,
};

type Transform<I, O> = Box<dyn FnMut(I) -> FutureResult<O> + Send + 'static>;

struct MapState<I, O> {
    downstream: Downstream<O>,
    upstream: Option<OutputRequest>,
    /// Credit granted before the upstream connected.
    owed: usize,
    transform: Transform<I, O>,
}

impl<I: Send + 'static, O: Send + 'static> MapState<I, O> {
    fn cancel_upstream(&mut self) {
        if let Some(upstream) = self.upstream.as_ref() {
            upstream.cancel_output();
        }
    }
}

impl<I: Send + 'static, O: Send + 'static> Producer for MapState<I, O> {
    type Output = O;

    fn downstream(&mut self) -> &mut Downstream<O> {
        &mut self.downstream
    }

    fn on_request(&mut self, count: usize) {
        if !self.downstream.is_open() {
            return;
        }
        self.downstream.grant(count);
        match self.upstream.as_ref() {
            Some(upstream) => upstream.request_output(count),
            None => self.owed = self.owed.saturating_add(count),
        }
    }

    fn on_cancel(&mut self) {
        self.downstream.cancel();
        self.cancel_upstream();
    }
}

/// Maps items of type `I` to `O`.
pub struct MapStream<I, O> {
    state: Arc<Mutex<MapState<I, O>>>,
    event_loop: EventLoop,
}

impl<I: Send + 'static, O: Send + 'static> MapStream<I, O> {
    pub fn new<F>(event_loop: &EventLoop, mut f: F) -> Self
    where
        F: FnMut(I) -> O + Send + 'static,
    {
        Self::try_new(event_loop, move |input| Ok(f(input)))
    }

    /// A stage whose function may fail. A failure is delivered downstream
    /// as a fault and cancels the upstream.
    pub fn try_new<F>(event_loop: &EventLoop, f: F) -> Self
    where
        F: FnMut(I) -> FutureResult<O> + Send + 'static,
    {
        Self {
            state: Arc::new(Mutex::new(MapState {
                downstream: Downstream::new(),
                upstream: None,
                owed: 0,
                transform: Box::new(f),
            })),
            event_loop: event_loop.clone(),
        }
    }

    /// The consumer half, to be handed to the upstream producer.
    pub fn as_input(&self) -> Box<dyn InputStream<I>> {
        Box::new(MapInput {
            state: Arc::clone(&self.state),
            event_loop: self.event_loop.clone(),
        })
    }
}

impl<I: Send + 'static, O: Send + 'static> OutputStream<O> for MapStream<I, O> {
    fn output(&self, consumer: Box<dyn InputStream<O>>) {
        attach(&self.state, &self.event_loop, consumer);
    }
}

/// Upstream-facing half. Upstream callbacks arrive on the upstream's loop
/// and are re-queued onto the stage's loop before touching its state.
struct MapInput<I, O> {
    state: Arc<Mutex<MapState<I, O>>>,
    event_loop: EventLoop,
}

impl<I: Send + 'static, O: Send + 'static> MapInput<I, O> {
    fn on_loop<F>(&self, f: F)
    where
        F: FnOnce(&mut MapState<I, O>) + Send + 'static,
    {
        let state = Arc::clone(&self.state);
        self.event_loop.execute(move || f(&mut lock(&state)));
    }
}

impl<I: Send + 'static, O: Send + 'static> InputStream<I> for MapInput<I, O> {
    fn on_output(&mut self, request: OutputRequest) {
        self.on_loop(move |state| {
            if state.downstream.is_cancelled() {
                request.cancel_output();
            } else {
                request.request_output(std::mem::take(&mut state.owed));
            }
            state.upstream = Some(request);
        });
    }

    fn on_input(&mut self, input: I) {
        self.on_loop(move |state| match (state.transform)(input) {
            Ok(output) => {
                if state.downstream.push(output).is_err() {
                    trace!("map stage dropped an item without downstream credit");
                }
            }
            Err(error) => {
                warn!(%error, "map stage failed; cancelling upstream");
                state.downstream.error(StreamError::Fault(error));
                state.cancel_upstream();
            }
        });
    }

    fn on_error(&mut self, error: StreamError) {
        self.on_loop(move |state| state.downstream.error(error));
    }

    fn on_close(&mut self) {
        self.on_loop(|state| state.downstream.close());
    }
}
