//! A producer fed by hand from any thread.
//!
//! [`PushStream`] buffers values until its consumer grants credit and
//! reports credit transitions through an optional demand hook, so an
//! upstream source (a socket reader, a row cursor) can pause while the
//! consumer is saturated and resume when it asks for more.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tracing::trace;

use crate::error::StreamError;
use crate::event_loop::EventLoop;
use crate::protocol::{attach, lock, Demand, Downstream, InputStream, OutputStream, Producer};

type DemandHook = Box<dyn FnMut(Demand) + Send + 'static>;

enum Ending {
    Close,
    Error(StreamError),
}

struct PushState<O> {
    downstream: Downstream<O>,
    buffer: VecDeque<O>,
    ending: Option<Ending>,
    demand: Option<DemandHook>,
    suspended: bool,
}

impl<O: Send + 'static> PushState<O> {
    fn enqueue(&mut self, value: O) {
        if self.ending.is_some() || self.downstream.is_cancelled() {
            trace!("stream already ending; dropping pushed value");
            return;
        }
        self.buffer.push_back(value);
        self.drain();
    }

    fn end(&mut self, ending: Ending) {
        if self.ending.is_some() {
            return;
        }
        if let Ending::Error(_) = ending {
            // Faults are unrecoverable: anything still buffered is dropped.
            self.buffer.clear();
        }
        self.ending = Some(ending);
        self.drain();
    }

    fn drain(&mut self) {
        if !self.downstream.is_open() {
            return;
        }
        while !self.downstream.credit().is_zero() {
            let Some(value) = self.buffer.pop_front() else {
                break;
            };
            if let Err(value) = self.downstream.push(value) {
                self.buffer.push_front(value);
                break;
            }
        }

        if self.buffer.is_empty() {
            match self.ending.take() {
                Some(Ending::Close) => self.downstream.close(),
                Some(Ending::Error(error)) => self.downstream.error(error),
                None => {}
            }
        }

        if self.downstream.is_open() && self.downstream.credit().is_zero() && !self.suspended {
            self.suspended = true;
            self.notify(Demand::Suspend);
        }
    }

    fn notify(&mut self, demand: Demand) {
        if let Some(hook) = self.demand.as_mut() {
            hook(demand);
        }
    }
}

impl<O: Send + 'static> Producer for PushState<O> {
    type Output = O;

    fn downstream(&mut self) -> &mut Downstream<O> {
        &mut self.downstream
    }

    fn on_request(&mut self, count: usize) {
        self.downstream.grant(count);
        if self.suspended && !self.downstream.credit().is_zero() {
            self.suspended = false;
            self.notify(Demand::Resume);
        }
        self.drain();
    }

    fn on_cancel(&mut self) {
        self.downstream.cancel();
        self.buffer.clear();
        self.ending = None;
        if !self.suspended {
            self.suspended = true;
            self.notify(Demand::Suspend);
        }
    }

    fn on_attach(&mut self) {
        self.drain();
    }
}

/// Producer whose values are pushed in by its owner.
///
/// All operations are marshaled onto the stream's event loop, so `push`,
/// `close` and `fail` may be called from any thread and keep their order.
pub struct PushStream<O> {
    state: Arc<Mutex<PushState<O>>>,
    event_loop: EventLoop,
}

impl<O> Clone for PushStream<O> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            event_loop: self.event_loop.clone(),
        }
    }
}

impl<O: Send + 'static> PushStream<O> {
    pub fn new(event_loop: &EventLoop) -> Self {
        Self {
            state: Arc::new(Mutex::new(PushState {
                downstream: Downstream::new(),
                buffer: VecDeque::new(),
                ending: None,
                demand: None,
                suspended: true,
            })),
            event_loop: event_loop.clone(),
        }
    }

    /// Install a hook told when production should resume or suspend.
    ///
    /// The hook runs on the event loop. The stream starts suspended, so
    /// the first grant of credit produces [`Demand::Resume`].
    pub fn on_demand<F>(self, hook: F) -> Self
    where
        F: FnMut(Demand) + Send + 'static,
    {
        lock(&self.state).demand = Some(Box::new(hook));
        self
    }

    pub fn event_loop(&self) -> &EventLoop {
        &self.event_loop
    }

    /// Queue a value; it is delivered once credit allows.
    pub fn push(&self, value: O) {
        let state = Arc::clone(&self.state);
        self.event_loop.execute(move || lock(&state).enqueue(value));
    }

    /// End gracefully after everything already pushed is delivered.
    pub fn close(&self) {
        let state = Arc::clone(&self.state);
        self.event_loop.execute(move || lock(&state).end(Ending::Close));
    }

    /// End with a fault, discarding undelivered values.
    pub fn fail(&self, error: StreamError) {
        let state = Arc::clone(&self.state);
        self.event_loop
            .execute(move || lock(&state).end(Ending::Error(error)));
    }
}

impl<O: Send + 'static> OutputStream<O> for PushStream<O> {
    fn output(&self, consumer: Box<dyn InputStream<O>>) {
        attach(&self.state, &self.event_loop, consumer);
    }
}
