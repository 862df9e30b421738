//! Error types for the evalbridge dispatch core.

use thiserror::Error;

/// Result type alias using our error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the dispatch subsystem.
///
/// Every failure in this crate eventually surfaces as an
/// [`EvalValue::Error`](crate::eval_value::EvalValue::Error) carrying one of
/// these variants; nothing panics or unwinds across the public boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Dispatch was used before `initialize()`.
    #[error("dispatcher not initialized")]
    NotInitialized,

    /// An owner-thread-only entry point was invoked from another thread.
    #[error("operation restricted to the runtime owner thread")]
    WrongThread,

    /// A runtime invocation was attempted while one is already in flight.
    #[error("re-entrance not allowed: runtime call already in flight")]
    ReentranceDenied,

    /// The runtime call exited non-locally and was contained.
    #[error("runtime execution aborted")]
    ExecutionAborted,

    /// The expected-type hint conflicts irreconcilably with the actual result.
    #[error("type mismatch: expected {expected}, got {actual} of length {len}")]
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
        len: usize,
    },

    /// The runtime itself reported a parse or evaluation error.
    #[error("script error: {0}")]
    Script(String),

    /// Send or receive attempted after the channel was closed.
    #[error("channel closed")]
    ChannelClosed,

    /// A worker's wait ceiling was exceeded before completion.
    #[error("timed out waiting for runtime result")]
    Timeout,

    /// Dispatch resources (doorbell fd pair) could not be created.
    #[error("initialization failed: {0}")]
    Init(String),
}
