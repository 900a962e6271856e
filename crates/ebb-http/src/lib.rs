//! ebb-http — HTTP/1.1 message serialization over ebb streams.
//!
//! [`ChunkedSerializer`] turns a stream of [`Message`]s into wire bytes,
//! driven only by the credit its consumer grants. Fixed bodies are sent
//! with `Content-Length`; stream bodies are framed with chunked transfer
//! coding ([`encode_chunk`], decoded again by [`ChunkDecoder`]).
//!
//! # Example
//!
//! ```no_run
//! use bytes::Bytes;
//! use ebb_http::{Body, ChunkedSerializer, Message, Response};
//! use ebb_stream::{Credit, CollectStream, EventLoop, OutputStream, PushStream};
//!
//! let event_loop = EventLoop::spawn("http").unwrap();
//! let serializer = ChunkedSerializer::with_scratch_capacity(&event_loop, 4096);
//!
//! let messages = PushStream::<Message>::new(&event_loop);
//! messages.output(serializer.as_input());
//!
//! let body = PushStream::<Bytes>::new(&event_loop);
//! messages.push(Response::new(200).body(Body::stream(body.clone())).into());
//! messages.close();
//! body.push(Bytes::from_static(b"hello"));
//! body.close();
//!
//! let (sink, wire) = CollectStream::new(Credit::new(16));
//! serializer.output(Box::new(sink));
//! let wire: Vec<Bytes> = wire.blocking_await().unwrap();
//! # drop(wire);
//! ```

mod body;
pub mod chunk;
mod error;
mod header;
mod message;
mod scratch;
mod serializer;

pub use body::Body;
pub use chunk::{dechunk, encode_chunk, ChunkDecoder, LAST_CHUNK};
pub use error::{HttpError, HttpResult};
pub use header::{Header, HeaderMap};
pub use message::{Message, Request, Response};
pub use scratch::ScratchBuffer;
pub use serializer::ChunkedSerializer;
