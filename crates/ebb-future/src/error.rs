//! Error type carried by failed futures.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for future outcomes.
pub type FutureResult<T> = Result<T, Error>;

/// Why a future failed.
///
/// Cloneable so that every waiter of a shared future observes the same
/// failure. Producer-supplied errors are kept opaque behind an `Arc`.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Error supplied by whoever completed the promise.
    #[error("{0}")]
    Value(Arc<dyn std::error::Error + Send + Sync + 'static>),

    /// A blocking wait passed its deadline before the future resolved.
    #[error("timed out after {waited:?} waiting for a value of type `{expected}`")]
    Timeout {
        expected: &'static str,
        waited: Duration,
    },

    /// The promise was dropped without ever being completed.
    #[error("promise dropped before it was completed")]
    BrokenPromise,
}

#[derive(Debug, Error)]
#[error("{0}")]
struct MessageError(String);

impl Error {
    /// Box an arbitrary producer error.
    pub fn value<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Value(Arc::new(error))
    }

    /// An opaque error carrying only a message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::value(MessageError(message.into()))
    }

    /// Borrow the producer error as a concrete type, if it is one.
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: std::error::Error + 'static,
    {
        match self {
            Self::Value(inner) => inner.downcast_ref::<E>(),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub fn is_broken_promise(&self) -> bool {
        matches!(self, Self::BrokenPromise)
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Self::msg(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Self::msg(s)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::value(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_error_display() {
        let err = Error::msg("connection reset");
        assert_eq!(err.to_string(), "connection reset");
    }

    #[test]
    fn from_str_and_string() {
        assert_eq!(Error::from("a").to_string(), "a");
        assert_eq!(Error::from("b".to_string()).to_string(), "b");
    }

    #[test]
    fn downcast_to_producer_error() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        let err = Error::from(io);
        let inner = err.downcast_ref::<std::io::Error>().unwrap();
        assert_eq!(inner.kind(), std::io::ErrorKind::BrokenPipe);
        assert!(err.downcast_ref::<std::fmt::Error>().is_none());
    }

    #[test]
    fn timeout_names_expected_type() {
        let err = Error::Timeout {
            expected: "u32",
            waited: Duration::from_millis(50),
        };
        assert!(err.is_timeout());
        assert!(err.to_string().contains("`u32`"));
    }

    #[test]
    fn clones_share_the_producer_error() {
        let err = Error::msg("shared");
        let cloned = err.clone();
        match (&err, &cloned) {
            (Error::Value(a), Error::Value(b)) => assert!(Arc::ptr_eq(a, b)),
            _ => panic!("expected value errors"),
        }
    }
}
