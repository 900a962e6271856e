//! The credit-based producer/consumer handshake.
//!
//! ```text
//!   producer (OutputStream)                    consumer (InputStream)
//!        │── output(consumer) ──────────────────────▶│
//!        │── on_output(OutputRequest) ─────────────▶│
//!        │◀──────────── request_output(n) ──────────│   (marshaled onto
//!        │── on_input(v)  × at most n ─────────────▶│    the bound loop)
//!        │── on_close() | on_error(e) ─────────────▶│
//!        │◀──────────── cancel_output() ────────────│
//! ```
//!
//! The producer owns its consumer (the data path). The consumer only holds
//! an [`OutputRequest`], a weak control-path handle back to the producer.
//! Every control event travels through the connection's [`EventLoop`], so
//! credit is only ever touched on that loop and a consumer can request more
//! from inside `on_input` without re-entering the producer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::{trace, warn};

use crate::credit::Credit;
use crate::error::StreamError;
use crate::event_loop::EventLoop;

/// Receiving end of a stream.
pub trait InputStream<I>: Send + 'static {
    /// The connection is established; `request` lets the consumer ask for
    /// input or cancel.
    fn on_output(&mut self, request: OutputRequest);

    /// One item, delivered only against previously requested credit.
    fn on_input(&mut self, input: I);

    /// Unrecoverable fault; nothing follows.
    fn on_error(&mut self, error: StreamError);

    /// Graceful end; nothing follows.
    fn on_close(&mut self);
}

/// Sending end of a stream.
pub trait OutputStream<O>: Send + Sync {
    /// Bind `consumer` to this producer. A producer accepts one consumer;
    /// later ones receive [`StreamError::AlreadyConnected`].
    fn output(&self, consumer: Box<dyn InputStream<O>>);
}

/// Control events sent from consumer to producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    Request(usize),
    Cancel,
}

/// Producer-side target of [`ConnectionEvent`]s.
pub trait ConnectionContext: Send + Sync + 'static {
    fn connection(&self, event: ConnectionEvent);
}

/// Production-source notifications emitted on credit transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Demand {
    /// Credit went from zero to positive.
    Resume,
    /// Credit ran out.
    Suspend,
}

/// Consumer's handle for requesting more input or cancelling.
///
/// Holds only a weak reference to the producer. Both operations are
/// marshaled onto the producer's event loop, whatever thread calls them.
#[derive(Clone)]
pub struct OutputRequest {
    target: Weak<dyn ConnectionContext>,
    event_loop: EventLoop,
    cancelled: Arc<AtomicBool>,
}

impl OutputRequest {
    pub fn new<C: ConnectionContext>(target: &Arc<C>, event_loop: &EventLoop) -> Self {
        let target = Arc::downgrade(target);
        let target: Weak<dyn ConnectionContext> = target;
        Self {
            target,
            event_loop: event_loop.clone(),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Grant `count` more items. Additive; zero is a no-op.
    pub fn request_output(&self, count: usize) {
        if count == 0 || self.is_cancelled() {
            return;
        }
        self.dispatch(ConnectionEvent::Request(count));
    }

    /// End the relationship. Idempotent; best-effort for items already in
    /// flight.
    pub fn cancel_output(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        self.dispatch(ConnectionEvent::Cancel);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn event_loop(&self) -> &EventLoop {
        &self.event_loop
    }

    fn dispatch(&self, event: ConnectionEvent) {
        let target = self.target.clone();
        self.event_loop.execute(move || match target.upgrade() {
            Some(producer) => producer.connection(event),
            None => trace!(?event, "producer gone; dropping connection event"),
        });
    }
}

impl std::fmt::Debug for OutputRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputRequest")
            .field("event_loop", &self.event_loop.name())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Producer state driven by connection events. Kept behind a `Mutex`
/// that is only locked on the producer's event loop.
pub trait Producer: Send + 'static {
    type Output: Send + 'static;

    fn downstream(&mut self) -> &mut Downstream<Self::Output>;

    /// More credit was granted.
    fn on_request(&mut self, count: usize);

    /// The consumer cancelled.
    fn on_cancel(&mut self) {
        self.downstream().cancel();
    }

    /// A consumer was just attached.
    fn on_attach(&mut self) {}
}

impl<P: Producer> ConnectionContext for Mutex<P> {
    fn connection(&self, event: ConnectionEvent) {
        let mut producer = lock(self);
        match event {
            ConnectionEvent::Request(count) => producer.on_request(count),
            ConnectionEvent::Cancel => producer.on_cancel(),
        }
    }
}

/// Bind `consumer` to the producer in `state` on `event_loop`.
pub fn attach<P: Producer>(
    state: &Arc<Mutex<P>>,
    event_loop: &EventLoop,
    consumer: Box<dyn InputStream<P::Output>>,
) {
    let request = OutputRequest::new(state, event_loop);
    let state = Arc::clone(state);
    event_loop.execute(move || {
        let mut producer = lock(&state);
        match producer.downstream().attach(consumer, request) {
            Ok(()) => producer.on_attach(),
            Err(mut rejected) => {
                warn!("rejecting second consumer for producer");
                rejected.on_error(StreamError::AlreadyConnected);
            }
        }
    });
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Unbound,
    Open,
    Closed,
    Cancelled,
}

/// The producer's side of one connection: the bound consumer plus the
/// credit it has granted.
///
/// Every push checks and consumes credit; pushes without credit, or after
/// the connection ended, are refused and handed back.
pub struct Downstream<O> {
    consumer: Option<Box<dyn InputStream<O>>>,
    credit: Credit,
    lent: Credit,
    phase: Phase,
}

impl<O: Send + 'static> Downstream<O> {
    pub fn new() -> Self {
        Self {
            consumer: None,
            credit: Credit::ZERO,
            lent: Credit::ZERO,
            phase: Phase::Unbound,
        }
    }

    /// Bind `consumer` and hand it `request`. Gives the consumer back if one
    /// is already bound or the connection already ended.
    pub fn attach(
        &mut self,
        mut consumer: Box<dyn InputStream<O>>,
        request: OutputRequest,
    ) -> Result<(), Box<dyn InputStream<O>>> {
        if self.phase != Phase::Unbound {
            return Err(consumer);
        }
        consumer.on_output(request);
        self.consumer = Some(consumer);
        self.phase = Phase::Open;
        Ok(())
    }

    pub fn is_attached(&self) -> bool {
        self.phase != Phase::Unbound
    }

    /// Attached and neither closed nor cancelled.
    pub fn is_open(&self) -> bool {
        self.phase == Phase::Open
    }

    pub fn is_cancelled(&self) -> bool {
        self.phase == Phase::Cancelled
    }

    pub fn credit(&self) -> Credit {
        self.credit
    }

    /// Add credit. Returns `true` on a zero→positive transition.
    pub fn grant(&mut self, count: usize) -> bool {
        if !self.is_open() {
            return false;
        }
        self.credit.grant(count)
    }

    /// Deliver one item against outstanding credit.
    pub fn push(&mut self, value: O) -> Result<(), O> {
        if !self.is_open() || !self.credit.consume() {
            trace!(phase = ?self.phase, credit = %self.credit, "refusing push");
            return Err(value);
        }
        self.deliver(value)
    }

    /// Move all outstanding credit to a nested producer. Local credit drops
    /// to zero; the returned amount should be requested from the nested
    /// stream, whose items then go out through [`push_lent`](Self::push_lent).
    pub fn lend(&mut self) -> usize {
        let credit = self.credit.take();
        self.lent.grant(credit.get());
        credit.get()
    }

    /// Deliver one item against lent credit.
    pub fn push_lent(&mut self, value: O) -> Result<(), O> {
        if !self.is_open() || !self.lent.consume() {
            trace!(phase = ?self.phase, lent = %self.lent, "refusing lent push");
            return Err(value);
        }
        self.deliver(value)
    }

    /// Return unused lent credit to the local balance.
    pub fn reclaim(&mut self) {
        let lent = self.lent.take();
        self.credit.grant(lent.get());
    }

    fn deliver(&mut self, value: O) -> Result<(), O> {
        match self.consumer.as_mut() {
            Some(consumer) => {
                consumer.on_input(value);
                Ok(())
            }
            None => Err(value),
        }
    }

    /// End gracefully.
    pub fn close(&mut self) {
        if !self.is_open() {
            return;
        }
        self.phase = Phase::Closed;
        self.credit = Credit::ZERO;
        if let Some(mut consumer) = self.consumer.take() {
            consumer.on_close();
        }
    }

    /// End with a fault.
    pub fn error(&mut self, error: StreamError) {
        if !self.is_open() {
            trace!(%error, "stream already ended; dropping error");
            return;
        }
        self.phase = Phase::Closed;
        self.credit = Credit::ZERO;
        if let Some(mut consumer) = self.consumer.take() {
            consumer.on_error(error);
        }
    }

    /// The consumer cancelled: forget it and all credit.
    pub fn cancel(&mut self) {
        if matches!(self.phase, Phase::Closed | Phase::Cancelled) {
            return;
        }
        self.phase = Phase::Cancelled;
        self.credit = Credit::ZERO;
        self.lent = Credit::ZERO;
        self.consumer = None;
    }
}

impl<O: Send + 'static> Default for Downstream<O> {
    fn default() -> Self {
        Self::new()
    }
}
