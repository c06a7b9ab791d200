use thiserror::Error;
use torctl_socket::SocketError;

/// Failure taxonomy for the controller kernel and command layer.
/// `msg()` only ever produces the first three variants;
/// `InvalidArguments`/`InvalidRequest`/`OperationFailed` are raised by reply
/// parsers and the command layer once they've classified a reply's status
/// code.
#[derive(Debug, Error)]
pub enum ControlError {
    /// The peer or local side shut the connection down. After this
    /// surfaces from `msg()`, the controller is guaranteed closed.
    #[error("control connection is closed")]
    SocketClosed,
    /// A generic I/O fault on the adapter.
    #[error("control socket transport error: {0}")]
    Transport(String),
    /// The peer violated the protocol contract: wrong status, missing
    /// `OK`, unparsable `key=value`, a reply set that doesn't match the
    /// request set, a multiline value not starting with a newline, or an
    /// unexpected status code.
    #[error("malformed control reply: {0}")]
    MalformedFrame(String),
    /// `552 Unrecognized ...` classes, carrying the offending names.
    #[error("invalid arguments ({code}): {keys:?}")]
    InvalidArguments { code: String, keys: Vec<String> },
    /// `513`/`553` and other `552`s: syntactically valid, semantically
    /// rejected.
    #[error("invalid request ({code}): {message}")]
    InvalidRequest { code: String, message: String },
    /// `551` on `SAVECONF`.
    #[error("operation failed ({code}): {message}")]
    OperationFailed { code: String, message: String },
}

impl From<SocketError> for ControlError {
    fn from(err: SocketError) -> Self {
        match err {
            SocketError::Closed => ControlError::SocketClosed,
            SocketError::Io(io) => ControlError::Transport(io.to_string()),
            SocketError::Protocol(message) => ControlError::MalformedFrame(message),
        }
    }
}

pub type Result<T> = std::result::Result<T, ControlError>;
