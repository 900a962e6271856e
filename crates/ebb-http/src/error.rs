//! Error types for HTTP serialization.

use ebb_stream::StreamError;
use thiserror::Error;

/// Result type alias for HTTP operations.
pub type HttpResult<T> = Result<T, HttpError>;

/// Errors raised while rendering or framing HTTP messages.
#[derive(Debug, Clone, Error)]
pub enum HttpError {
    /// A header name or value would corrupt the message head.
    #[error("invalid header `{name}`: {reason}")]
    InvalidHeader { name: String, reason: &'static str },

    /// The start line cannot be rendered as given.
    #[error("invalid start line: {0}")]
    InvalidStartLine(String),

    #[error("invalid chunk: {0}")]
    InvalidChunk(String),

    #[error("chunked body ended before the terminating chunk")]
    IncompleteChunkedBody,

    #[error("body stream failed: {0}")]
    Body(#[from] StreamError),
}

impl From<HttpError> for StreamError {
    fn from(err: HttpError) -> Self {
        match err {
            HttpError::Body(inner) => inner,
            other => StreamError::Fault(ebb_future::Error::value(other)),
        }
    }
}
