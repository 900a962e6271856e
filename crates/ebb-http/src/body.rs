//! Message bodies.
//!
//! A body is either fixed (its length is known when the head is written,
//! and it goes out as one buffer) or an open [`OutputStream`] of byte
//! buffers, which the serializer frames with chunked encoding.

use std::fmt;

use bytes::Bytes;
use ebb_stream::OutputStream;

/// Storage behind a message body.
#[derive(Default)]
pub enum Body {
    #[default]
    Empty,
    Bytes(Bytes),
    Text(String),
    Static(&'static [u8]),
    /// Open-ended; length unknown until the producer closes.
    Stream(Box<dyn OutputStream<Bytes>>),
}

impl Body {
    pub fn stream<S>(stream: S) -> Self
    where
        S: OutputStream<Bytes> + 'static,
    {
        Self::Stream(Box::new(stream))
    }

    /// Byte length of a fixed body; `None` for streams.
    pub fn len(&self) -> Option<usize> {
        match self {
            Self::Empty => Some(0),
            Self::Bytes(bytes) => Some(bytes.len()),
            Self::Text(text) => Some(text.len()),
            Self::Static(data) => Some(data.len()),
            Self::Stream(_) => None,
        }
    }

    /// A fixed body with no bytes. Streams are never considered empty.
    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, Self::Stream(_))
    }

    /// Split into the fixed payload or the stream.
    pub(crate) fn into_payload(self) -> Payload {
        match self {
            Self::Empty => Payload::Fixed(Bytes::new()),
            Self::Bytes(bytes) => Payload::Fixed(bytes),
            Self::Text(text) => Payload::Fixed(Bytes::from(text)),
            Self::Static(data) => Payload::Fixed(Bytes::from_static(data)),
            Self::Stream(stream) => Payload::Stream(stream),
        }
    }
}

pub(crate) enum Payload {
    Fixed(Bytes),
    Stream(Box<dyn OutputStream<Bytes>>),
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            Self::Text(text) => f.debug_tuple("Text").field(&text.len()).finish(),
            Self::Static(data) => f.debug_tuple("Static").field(&data.len()).finish(),
            Self::Stream(_) => f.write_str("Stream"),
        }
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(Bytes::from(bytes))
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&'static str> for Body {
    fn from(text: &'static str) -> Self {
        Self::Static(text.as_bytes())
    }
}

impl From<&'static [u8]> for Body {
    fn from(data: &'static [u8]) -> Self {
        Self::Static(data)
    }
}
