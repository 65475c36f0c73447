use std::sync::Arc;

use thiserror::Error;

/// Outcome error of a single submitted job.
///
/// `E` is the error type of the batch handler. Every job of a failing batch
/// receives a clone of the same `Arc`, so `E` itself does not need to be `Clone`.
#[derive(Debug, Error)]
pub enum Error<E: std::error::Error + 'static> {
    #[error("Handler Error: {0}")]
    Handler(#[source] Arc<E>),

    #[error("Handler panicked while processing the batch")]
    HandlerPanicked,

    #[error("Handler returned {got} results for a batch of {expected} jobs")]
    ResultCountMismatch { expected: usize, got: usize },

    #[error("Job was abandoned before its batch was processed")]
    Abandoned,
}

impl<E: std::error::Error + 'static> Clone for Error<E> {
    fn clone(&self) -> Self {
        match self {
            Error::Handler(err) => Error::Handler(err.clone()),
            Error::HandlerPanicked => Error::HandlerPanicked,
            Error::ResultCountMismatch { expected, got } => Error::ResultCountMismatch {
                expected: *expected,
                got: *got,
            },
            Error::Abandoned => Error::Abandoned,
        }
    }
}

impl<E: std::error::Error + 'static> Error<E> {
    /// The handler error behind this outcome, if the handler itself failed.
    pub fn handler_error(&self) -> Option<&E> {
        match self {
            Error::Handler(err) => Some(err.as_ref()),
            _ => None,
        }
    }

    #[inline]
    pub fn is_abandoned(&self) -> bool {
        matches!(self, Error::Abandoned)
    }
}

/// Misuse detected while building a [`MicroBatcher`](crate::MicroBatcher).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("Batch size must be at least 1")]
    ZeroBatchSize,

    #[error("MicroBatcher must be built inside a Tokio runtime")]
    NoRuntime,
}

/// Graceful shutdown did not finish draining before its deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Shutdown timed out with {remaining} jobs still queued")]
pub struct ShutdownTimeout {
    pub remaining: usize,
}
