//! Error types for the nbiot driver.
//!
//! All fallible operations across the workspace return [`Result<T>`], which
//! uses [`Error`] as the error type. Transport-layer, buffer-capacity, and
//! session-layer errors are all captured here.

/// The error type for all nbiot operations.
///
/// Variants cover the failure modes of talking to an AT-command modem:
/// physical transport failures, fixed-capacity buffer violations,
/// transactions whose expected response never arrives, and session
/// misconfiguration.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A transport-level error (serial port open/configure failure).
    #[error("transport error: {0}")]
    Transport(String),

    /// A protocol-level error (malformed hex, unparseable status line).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Timed out waiting for data from the modem.
    ///
    /// Transports return this from `receive()` when nothing arrived within
    /// the deadline. The transaction engine treats it as "no bytes yet" and
    /// keeps polling.
    #[error("timeout waiting for response")]
    Timeout,

    /// The transport is not open or has been closed.
    #[error("not connected")]
    NotConnected,

    /// The connection to the modem was lost unexpectedly.
    #[error("connection lost")]
    ConnectionLost,

    /// An invalid parameter was passed to an operation.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// The requested operation is not available with this configuration.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// A session setting required by the operation has not been set.
    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    /// The accumulated response would exceed the response buffer.
    #[error("response buffer overflow: {required} bytes exceeds capacity of {capacity}")]
    BufferOverflow { required: usize, capacity: usize },

    /// The hex encoding of a payload would exceed the hex scratch buffer.
    #[error("payload too large: {encoded} hex characters exceeds capacity of {capacity}")]
    PayloadTooLarge { encoded: usize, capacity: usize },

    /// A composed command line would exceed the compose scratch buffer.
    #[error("composed command overflow: {required} bytes exceeds capacity of {capacity}")]
    ComposeOverflow { required: usize, capacity: usize },

    /// The expected response never appeared within the retry budget.
    #[error("expected response {pattern:?} not received after {attempts} attempts")]
    PatternNeverMatched { pattern: String, attempts: u32 },

    /// The transaction was cancelled through its cancellation token.
    #[error("transaction cancelled")]
    Cancelled,

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;
