//! Stream error types.

use thiserror::Error;

/// Errors delivered through [`InputStream::on_error`](crate::InputStream::on_error)
/// or reported by stream plumbing.
#[derive(Debug, Clone, Error)]
pub enum StreamError {
    /// Opaque producer fault. Ends the stream.
    #[error("stream fault: {0}")]
    Fault(#[from] ebb_future::Error),

    #[error("stream cancelled by consumer")]
    Cancelled,

    #[error("producer already has a consumer")]
    AlreadyConnected,

    #[error("event loop `{0}` has shut down")]
    EventLoopShutdown(String),
}

impl StreamError {
    /// A fault carrying only a message.
    pub fn fault(message: impl Into<String>) -> Self {
        Self::Fault(ebb_future::Error::msg(message))
    }
}

impl From<StreamError> for ebb_future::Error {
    fn from(err: StreamError) -> Self {
        match err {
            StreamError::Fault(inner) => inner,
            other => ebb_future::Error::value(other),
        }
    }
}
