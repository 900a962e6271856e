//! End-to-end serializer behavior: framing, credit limits and failures.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use ebb_core::{telemetry, SerializerConfig};
use ebb_http::{dechunk, Body, ChunkedSerializer, HttpError, Message, Request, Response};
use ebb_stream::{
    CollectStream, Credit, EventLoop, InputStream, IterStream, OutputRequest, OutputStream,
    PushStream, StreamError,
};

const WAIT: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(50);

struct Setup {
    event_loop: EventLoop,
    serializer: ChunkedSerializer,
    messages: PushStream<Message>,
}

fn setup(name: &str, scratch: usize) -> Setup {
    telemetry::init(telemetry::DEFAULT_FILTER);
    let event_loop = EventLoop::spawn(name).unwrap();
    let serializer = ChunkedSerializer::with_scratch_capacity(&event_loop, scratch);
    let messages = PushStream::new(&event_loop);
    messages.output(serializer.as_input());
    Setup {
        event_loop,
        serializer,
        messages,
    }
}

fn collect(serializer: &ChunkedSerializer, batch: usize) -> Result<Vec<Bytes>, ebb_future::Error> {
    let (sink, wire) = CollectStream::new(Credit::new(batch));
    serializer.output(Box::new(sink));
    wire.blocking_await_timeout(WAIT)
}

/// Split a single serialized message at the end of its head.
fn split_head(wire: &[u8]) -> (String, &[u8]) {
    let end = wire
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("no end of head")
        + 4;
    (String::from_utf8(wire[..end].to_vec()).unwrap(), &wire[end..])
}

fn bytes(data: &'static [u8]) -> Bytes {
    Bytes::from_static(data)
}

#[test]
fn stream_body_is_chunk_framed() {
    let s = setup("ser-chunks", 4096);
    let body = PushStream::new(&s.event_loop);
    body.push(bytes(b"hello"));
    body.push(bytes(b"abc"));
    body.close();
    s.messages
        .push(Response::new(200).body(Body::stream(body)).into());
    s.messages.close();

    let pieces = collect(&s.serializer, 1).unwrap();
    let n = pieces.len();
    assert_eq!(&pieces[n - 3][..], b"5\r\nhello\r\n");
    assert_eq!(&pieces[n - 2][..], b"3\r\nabc\r\n");
    assert_eq!(&pieces[n - 1][..], b"0\r\n\r\n");

    let wire = pieces.concat();
    let (head, rest) = split_head(&wire);
    assert_eq!(
        head,
        "HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n"
    );
    assert_eq!(rest, b"5\r\nhello\r\n3\r\nabc\r\n0\r\n\r\n");
    assert_eq!(&dechunk(rest).unwrap()[..], b"helloabc");

    assert_eq!(s.serializer.completed().blocking_await_timeout(WAIT).unwrap(), 1);
    s.event_loop.shutdown();
}

#[test]
fn message_is_the_only_owner_of_its_body() {
    let s = setup("ser-owned-body", 4096);
    let chunks = vec![bytes(b"hello"), bytes(b"abc")];
    let body = Body::stream(IterStream::new(chunks, &s.event_loop));
    s.messages.push(Response::new(200).body(body).into());
    s.messages.close();

    let wire = collect(&s.serializer, 2).unwrap().concat();
    assert_eq!(
        wire,
        b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n3\r\nabc\r\n0\r\n\r\n"
    );
    assert_eq!(s.serializer.completed().blocking_await_timeout(WAIT).unwrap(), 1);
    s.event_loop.shutdown();
}

#[test]
fn empty_body_buffers_are_skipped() {
    let s = setup("ser-empty-chunks", 4096);
    let body = PushStream::new(&s.event_loop);
    body.push(Bytes::new());
    body.push(bytes(b"ab"));
    body.push(Bytes::new());
    body.close();
    s.messages
        .push(Response::new(200).body(Body::stream(body)).into());
    s.messages.close();

    let wire = collect(&s.serializer, 2).unwrap().concat();
    let (_, rest) = split_head(&wire);
    assert_eq!(rest, b"2\r\nab\r\n0\r\n\r\n");
    s.event_loop.shutdown();
}

#[test]
fn head_is_split_by_the_scratch_buffer() {
    let s = setup("ser-scratch", 8);
    s.messages.push(
        Response::new(201)
            .header("Location", "/users/42")
            .body("payload")
            .into(),
    );
    s.messages.close();

    let pieces = collect(&s.serializer, 3).unwrap();
    let (body, head_pieces) = pieces.split_last().unwrap();
    assert_eq!(&body[..], b"payload");
    assert!(head_pieces.iter().all(|p| !p.is_empty() && p.len() <= 8));

    let head = "HTTP/1.1 201 Created\r\nLocation: /users/42\r\nContent-Length: 7\r\n\r\n";
    assert_eq!(head_pieces.concat(), head.as_bytes());
    assert_eq!(head_pieces.len(), head.len().div_ceil(8));
    s.event_loop.shutdown();
}

#[test]
fn configured_scratch_capacity_is_clamped() {
    telemetry::init(telemetry::DEFAULT_FILTER);
    let event_loop = EventLoop::spawn("ser-config").unwrap();
    let config = SerializerConfig {
        scratch_capacity: 1,
    };
    let serializer = ChunkedSerializer::new(&event_loop, &config);
    let messages = PushStream::new(&event_loop);
    messages.output(serializer.as_input());

    let long_value = "v".repeat(200);
    messages.push(Request::new("GET", "/").header("X-Long", long_value).into());
    messages.close();

    let pieces = collect(&serializer, 8).unwrap();
    assert!(pieces.len() > 1);
    assert!(pieces.iter().all(|p| p.len() <= 64));
    assert!(pieces.iter().any(|p| p.len() == 64));
    event_loop.shutdown();
}

#[test]
fn several_messages_in_order() {
    let s = setup("ser-many", 4096);
    s.messages.push(
        Request::new("POST", "/items")
            .header("Host", "example.com")
            .body(String::from("{\"a\":1}"))
            .into(),
    );
    s.messages.push(Response::new(204).into());
    s.messages.push(Response::new(200).body(vec![1u8, 2, 3]).into());
    s.messages.close();

    let wire = collect(&s.serializer, 4).unwrap().concat();
    let expected: &[u8] = b"POST /items HTTP/1.1\r\nHost: example.com\r\nContent-Length: 7\r\n\r\n{\"a\":1}\
HTTP/1.1 204 No Content\r\n\r\n\
HTTP/1.1 200 OK\r\nContent-Length: 3\r\n\r\n\x01\x02\x03";
    assert_eq!(wire, expected);
    assert_eq!(s.serializer.completed().blocking_await_timeout(WAIT).unwrap(), 3);
    s.event_loop.shutdown();
}

#[test]
fn no_messages_closes_immediately() {
    let s = setup("ser-nothing", 4096);
    s.messages.close();
    assert!(collect(&s.serializer, 1).unwrap().is_empty());
    assert_eq!(s.serializer.completed().blocking_await_timeout(WAIT).unwrap(), 0);
    s.event_loop.shutdown();
}

#[test]
fn body_fault_is_forwarded() {
    let s = setup("ser-body-fault", 4096);
    let body = PushStream::new(&s.event_loop);
    body.push(bytes(b"partial"));
    body.fail(StreamError::fault("upstream reset"));
    s.messages
        .push(Response::new(200).body(Body::stream(body)).into());

    let err = collect(&s.serializer, 16).unwrap_err();
    assert_eq!(err.to_string(), "upstream reset");
    let completed = s.serializer.completed().blocking_await_timeout(WAIT);
    assert_eq!(completed.unwrap_err().to_string(), "upstream reset");
    s.event_loop.shutdown();
}

#[test]
fn invalid_header_fails_the_stream() {
    let s = setup("ser-bad-header", 4096);
    s.messages.push(
        Response::new(302)
            .header("Location", "/next\r\nSet-Cookie: hijacked=1")
            .into(),
    );

    let err = collect(&s.serializer, 4).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<HttpError>(),
        Some(HttpError::InvalidHeader { name, .. }) if name == "Location"
    ));
    s.event_loop.shutdown();
}

#[test]
fn message_source_fault_is_forwarded() {
    let s = setup("ser-source-fault", 4096);
    s.messages.fail(StreamError::fault("parser gave up"));
    let err = collect(&s.serializer, 1).unwrap_err();
    assert_eq!(err.to_string(), "parser gave up");
    s.event_loop.shutdown();
}

#[derive(Debug)]
enum Seen {
    Piece(Bytes),
    Close,
    Error(String),
}

struct Probe {
    request: Arc<Mutex<Option<OutputRequest>>>,
    events: Sender<Seen>,
}

impl InputStream<Bytes> for Probe {
    fn on_output(&mut self, request: OutputRequest) {
        *self.request.lock().unwrap() = Some(request);
    }
    fn on_input(&mut self, input: Bytes) {
        let _ = self.events.send(Seen::Piece(input));
    }
    fn on_error(&mut self, error: StreamError) {
        let _ = self.events.send(Seen::Error(error.to_string()));
    }
    fn on_close(&mut self) {
        let _ = self.events.send(Seen::Close);
    }
}

fn probe(serializer: &ChunkedSerializer) -> (OutputRequest, Receiver<Seen>) {
    let slot = Arc::new(Mutex::new(None));
    let (tx, rx) = mpsc::channel();
    serializer.output(Box::new(Probe {
        request: slot.clone(),
        events: tx,
    }));
    for _ in 0..500 {
        if let Some(request) = slot.lock().unwrap().clone() {
            return (request, rx);
        }
        thread::sleep(Duration::from_millis(2));
    }
    panic!("serializer never connected");
}

fn expect_quiet(rx: &Receiver<Seen>) {
    match rx.recv_timeout(QUIET) {
        // A cancelled serializer drops its consumer, and with it the sender.
        Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => {}
        other => panic!("unexpected delivery: {other:?}"),
    }
}

#[test]
fn never_pushes_beyond_credit() {
    let s = setup("ser-credit", 16);
    let body = PushStream::new(&s.event_loop);
    for part in [&b"one"[..], b"two", b"three"] {
        body.push(Bytes::from_static(part));
    }
    body.close();
    s.messages
        .push(Response::new(200).body(Body::stream(body)).into());
    s.messages.close();

    let (request, rx) = probe(&s.serializer);
    expect_quiet(&rx);

    let mut pieces = Vec::new();
    for step in [1, 2, 3] {
        request.request_output(step);
        for _ in 0..step {
            match rx.recv_timeout(WAIT).unwrap() {
                Seen::Piece(piece) => pieces.push(piece),
                other => panic!("expected a piece, got {other:?}"),
            }
        }
        expect_quiet(&rx);
    }

    request.request_output(usize::MAX);
    loop {
        match rx.recv_timeout(WAIT).unwrap() {
            Seen::Piece(piece) => pieces.push(piece),
            Seen::Close => break,
            Seen::Error(e) => panic!("unexpected error: {e}"),
        }
    }

    let wire = pieces.concat();
    let (head, rest) = split_head(&wire);
    assert!(head.ends_with("Transfer-Encoding: chunked\r\n\r\n"));
    assert_eq!(rest, b"3\r\none\r\n3\r\ntwo\r\n5\r\nthree\r\n0\r\n\r\n");
    s.event_loop.shutdown();
}

#[test]
fn cancelling_fails_completion() {
    let s = setup("ser-cancel", 4096);
    let (request, rx) = probe(&s.serializer);
    request.cancel_output();
    let err = s
        .serializer
        .completed()
        .blocking_await_timeout(WAIT)
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<StreamError>(),
        Some(StreamError::Cancelled)
    ));
    s.messages.push(Response::new(200).into());
    expect_quiet(&rx);
    s.event_loop.shutdown();
}

#[tokio::test]
async fn completion_can_be_awaited() {
    let s = setup("ser-await", 4096);
    s.messages.push(Response::new(200).body("ok").into());
    s.messages.close();

    let (sink, wire) = CollectStream::new(Credit::UNBOUNDED);
    s.serializer.output(Box::new(sink));

    assert_eq!(s.serializer.completed().await.unwrap(), 1);
    let wire = wire.await.unwrap().concat();
    assert!(wire.ends_with(b"\r\n\r\nok"));
    s.event_loop.shutdown();
}
