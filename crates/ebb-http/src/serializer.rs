//! Credit-driven message serializer.
//!
//! [`ChunkedSerializer`] consumes [`Message`]s from an upstream stream and
//! produces wire bytes for a downstream consumer, one message at a time and
//! never more buffers than the consumer asked for:
//!
//! ```text
//!            credit > 0                 message arrives
//!   Ready ─────────────▶ (request 1) ───────────────▶ MessageReady
//!     ▲                                                    │ render head
//!     │                                                    ▼
//!     │        fixed body: push once            MessageStreaming
//!     ├─────────────────────────────── BodyReady ◀────────┘ scratch-sized
//!     │                                   │                  head pieces
//!     │                      stream body  ▼
//!     │                             BodyStreaming ── body closes ──▶ ChunkTrailer
//!     └──────────────────────────────────────── push 0\r\n\r\n ─────────┘
//! ```
//!
//! While a stream body is being written, the downstream credit is lent to
//! the body producer: every body buffer becomes exactly one chunk frame, so
//! the body can never outrun the consumer. All state changes happen on the
//! serializer's event loop.

use std::sync::{Arc, Mutex, Weak};

use bytes::Bytes;
use ebb_core::SerializerConfig;
use ebb_future::{Future, Promise};
use ebb_stream::protocol::{attach, Downstream, Producer};
use ebb_stream::{EventLoop, InputStream, OutputRequest, OutputStream, StreamError};
use tracing::{debug, trace, warn};

use crate::body::Payload;
use crate::chunk::{encode_chunk, LAST_CHUNK};
use crate::message::Message;
use crate::scratch::{HeadWriter, ScratchBuffer};

enum Phase {
    Ready,
    MessageReady(Message),
    MessageStreaming { head: HeadWriter, payload: Payload },
    BodyReady(Payload),
    /// The body stream is owned here until it ends; the request handle
    /// arrives once the body producer accepted us.
    BodyStreaming {
        body: Box<dyn OutputStream<Bytes>>,
        request: Option<OutputRequest>,
    },
    ChunkTrailer,
    Done,
}

impl Phase {
    fn name(&self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::MessageReady(_) => "message-ready",
            Self::MessageStreaming { .. } => "message-streaming",
            Self::BodyReady(_) => "body-ready",
            Self::BodyStreaming { .. } => "body-streaming",
            Self::ChunkTrailer => "chunk-trailer",
            Self::Done => "done",
        }
    }
}

struct SerializerState {
    downstream: Downstream<Bytes>,
    phase: Phase,
    upstream: Option<OutputRequest>,
    awaiting_message: bool,
    upstream_closed: bool,
    /// A failure seen before any consumer was attached.
    pending_error: Option<StreamError>,
    scratch: ScratchBuffer,
    written: usize,
    completed: Promise<usize>,
    this: Weak<Mutex<SerializerState>>,
    event_loop: EventLoop,
}

impl SerializerState {
    /// Run the state machine until it needs credit or input.
    fn advance(&mut self) {
        loop {
            if !self.downstream.is_open() {
                return;
            }
            let phase = std::mem::replace(&mut self.phase, Phase::Done);
            self.phase = match phase {
                Phase::Ready => {
                    if self.upstream_closed {
                        self.finish();
                        return;
                    }
                    if !self.downstream.credit().is_zero()
                        && !self.awaiting_message
                        && let Some(upstream) = self.upstream.as_ref()
                    {
                        self.awaiting_message = true;
                        upstream.request_output(1);
                    }
                    self.phase = Phase::Ready;
                    return;
                }
                Phase::MessageReady(message) => match message.into_parts() {
                    Ok((head, body)) => Phase::MessageStreaming {
                        head: HeadWriter::new(head),
                        payload: body.into_payload(),
                    },
                    Err(error) => {
                        warn!(%error, "cannot serialize message head");
                        self.fail(error.into());
                        return;
                    }
                },
                Phase::MessageStreaming { mut head, payload } => {
                    if self.downstream.credit().is_zero() {
                        self.phase = Phase::MessageStreaming { head, payload };
                        return;
                    }
                    if head.write_into(&mut self.scratch) == 0 {
                        Phase::BodyReady(payload)
                    } else {
                        let piece = self.scratch.take();
                        if self.downstream.push(piece).is_err() {
                            trace!("head piece refused");
                        }
                        Phase::MessageStreaming { head, payload }
                    }
                }
                Phase::BodyReady(Payload::Fixed(bytes)) => {
                    if bytes.is_empty() {
                        self.message_done();
                        continue;
                    }
                    if self.downstream.credit().is_zero() {
                        self.phase = Phase::BodyReady(Payload::Fixed(bytes));
                        return;
                    }
                    if self.downstream.push(bytes).is_err() {
                        trace!("fixed body refused");
                    }
                    self.message_done();
                    continue;
                }
                Phase::BodyReady(Payload::Stream(body)) => {
                    body.output(Box::new(ChunkEncoder {
                        state: self.this.clone(),
                        event_loop: self.event_loop.clone(),
                    }));
                    self.phase = Phase::BodyStreaming {
                        body,
                        request: None,
                    };
                    return;
                }
                Phase::BodyStreaming { body, request } => {
                    if let Some(request) = request.as_ref() {
                        request.request_output(self.downstream.lend());
                    }
                    self.phase = Phase::BodyStreaming { body, request };
                    return;
                }
                Phase::ChunkTrailer => {
                    if self.downstream.credit().is_zero() {
                        self.phase = Phase::ChunkTrailer;
                        return;
                    }
                    if self.downstream.push(Bytes::from_static(LAST_CHUNK)).is_err() {
                        trace!("chunk trailer refused");
                    }
                    self.message_done();
                    continue;
                }
                Phase::Done => {
                    self.phase = Phase::Done;
                    return;
                }
            };
        }
    }

    fn message_done(&mut self) {
        self.written += 1;
        trace!(written = self.written, "message serialized");
        self.phase = Phase::Ready;
    }

    fn finish(&mut self) {
        debug!(messages = self.written, "serializer finished");
        self.phase = Phase::Done;
        self.downstream.close();
        self.completed.complete(self.written);
    }

    fn fail(&mut self, error: StreamError) {
        debug!(%error, phase = self.phase.name(), "serializer failed");
        if let Some(upstream) = self.upstream.as_ref() {
            upstream.cancel_output();
        }
        if let Phase::BodyStreaming {
            request: Some(body),
            ..
        } = &self.phase
        {
            body.cancel_output();
        }
        self.phase = Phase::Done;
        self.completed.fail(error.clone());
        if self.downstream.is_attached() {
            self.downstream.error(error);
        } else {
            self.pending_error = Some(error);
        }
    }

    fn on_message(&mut self, message: Message) {
        self.awaiting_message = false;
        match self.phase {
            Phase::Ready => {
                self.phase = Phase::MessageReady(message);
                self.advance();
            }
            Phase::Done => trace!("serializer done; dropping message"),
            _ => {
                let phase = self.phase.name();
                warn!(phase, "message arrived without being requested");
                self.fail(StreamError::fault(format!(
                    "unrequested message while {phase}"
                )));
            }
        }
    }

    fn on_body_connected(&mut self, request: OutputRequest) {
        match &mut self.phase {
            Phase::BodyStreaming {
                request: slot @ None,
                ..
            } => {
                *slot = Some(request);
                self.advance();
            }
            _ => request.cancel_output(),
        }
    }

    fn on_body_chunk(&mut self, data: Bytes) {
        let Phase::BodyStreaming {
            request: Some(request),
            ..
        } = &self.phase
        else {
            trace!("body chunk outside of body phase");
            return;
        };
        if data.is_empty() {
            // Nothing to frame; hand the unit of credit back to the body.
            request.request_output(1);
            return;
        }
        if self.downstream.push_lent(encode_chunk(&data)).is_err() {
            trace!(len = data.len(), "chunk refused");
        }
    }

    fn on_body_closed(&mut self) {
        if !matches!(self.phase, Phase::BodyStreaming { .. }) {
            return;
        }
        self.downstream.reclaim();
        self.phase = Phase::ChunkTrailer;
        self.advance();
    }
}

impl Producer for SerializerState {
    type Output = Bytes;

    fn downstream(&mut self) -> &mut Downstream<Bytes> {
        &mut self.downstream
    }

    fn on_request(&mut self, count: usize) {
        self.downstream.grant(count);
        self.advance();
    }

    fn on_cancel(&mut self) {
        debug!(phase = self.phase.name(), "serializer cancelled by consumer");
        self.downstream.cancel();
        if let Some(upstream) = self.upstream.as_ref() {
            upstream.cancel_output();
        }
        if let Phase::BodyStreaming {
            request: Some(body),
            ..
        } = &self.phase
        {
            body.cancel_output();
        }
        self.phase = Phase::Done;
        self.completed.fail(StreamError::Cancelled);
    }

    fn on_attach(&mut self) {
        if let Some(error) = self.pending_error.take() {
            self.downstream.error(error);
            return;
        }
        self.advance();
    }
}

/// Serializes upstream [`Message`]s into HTTP/1.1 wire bytes.
pub struct ChunkedSerializer {
    state: Arc<Mutex<SerializerState>>,
    event_loop: EventLoop,
    completed: Future<usize>,
}

impl ChunkedSerializer {
    pub fn new(event_loop: &EventLoop, config: &SerializerConfig) -> Self {
        Self::with_scratch_capacity(event_loop, config.effective_scratch_capacity())
    }

    /// A serializer whose head pieces are at most `capacity` bytes.
    pub fn with_scratch_capacity(event_loop: &EventLoop, capacity: usize) -> Self {
        let completed = Promise::new();
        let future = completed.future();
        let state = Arc::new_cyclic(|this| {
            Mutex::new(SerializerState {
                downstream: Downstream::new(),
                phase: Phase::Ready,
                upstream: None,
                awaiting_message: false,
                upstream_closed: false,
                pending_error: None,
                scratch: ScratchBuffer::new(capacity),
                written: 0,
                completed,
                this: this.clone(),
                event_loop: event_loop.clone(),
            })
        });
        Self {
            state,
            event_loop: event_loop.clone(),
            completed: future,
        }
    }

    /// The consumer half, to be connected to the message source.
    pub fn as_input(&self) -> Box<dyn InputStream<Message>> {
        Box::new(SerializerInput {
            state: Arc::downgrade(&self.state),
            event_loop: self.event_loop.clone(),
        })
    }

    /// Resolves with the number of messages written once the message source
    /// closed and everything was pushed.
    pub fn completed(&self) -> Future<usize> {
        self.completed.clone()
    }
}

impl OutputStream<Bytes> for ChunkedSerializer {
    fn output(&self, consumer: Box<dyn InputStream<Bytes>>) {
        attach(&self.state, &self.event_loop, consumer);
    }
}

/// Run `f` against the serializer state on its event loop.
fn on_loop<F>(state: &Weak<Mutex<SerializerState>>, event_loop: &EventLoop, f: F)
where
    F: FnOnce(&mut SerializerState) + Send + 'static,
{
    let state = state.clone();
    event_loop.execute(move || match state.upgrade() {
        Some(state) => f(&mut state.lock().unwrap_or_else(|e| e.into_inner())),
        None => trace!("serializer dropped; ignoring event"),
    });
}

struct SerializerInput {
    state: Weak<Mutex<SerializerState>>,
    event_loop: EventLoop,
}

impl InputStream<Message> for SerializerInput {
    fn on_output(&mut self, request: OutputRequest) {
        on_loop(&self.state, &self.event_loop, move |s| {
            if matches!(s.phase, Phase::Done) {
                request.cancel_output();
                return;
            }
            s.upstream = Some(request);
            s.advance();
        });
    }

    fn on_input(&mut self, message: Message) {
        on_loop(&self.state, &self.event_loop, move |s| s.on_message(message));
    }

    fn on_error(&mut self, error: StreamError) {
        on_loop(&self.state, &self.event_loop, move |s| s.fail(error));
    }

    fn on_close(&mut self) {
        on_loop(&self.state, &self.event_loop, |s| {
            s.upstream_closed = true;
            s.advance();
        });
    }
}

/// Consumer attached to a stream body; frames each buffer as a chunk.
struct ChunkEncoder {
    state: Weak<Mutex<SerializerState>>,
    event_loop: EventLoop,
}

impl InputStream<Bytes> for ChunkEncoder {
    fn on_output(&mut self, request: OutputRequest) {
        on_loop(&self.state, &self.event_loop, move |s| {
            s.on_body_connected(request)
        });
    }

    fn on_input(&mut self, data: Bytes) {
        on_loop(&self.state, &self.event_loop, move |s| s.on_body_chunk(data));
    }

    fn on_error(&mut self, error: StreamError) {
        on_loop(&self.state, &self.event_loop, move |s| s.fail(error));
    }

    fn on_close(&mut self) {
        on_loop(&self.state, &self.event_loop, |s| s.on_body_closed());
    }
}
