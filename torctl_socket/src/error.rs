use thiserror::Error;

/// Failures raised by the control socket adapter itself.
///
/// This sits below [`crate::ControlSocket`]: it knows nothing about replies
/// vs. events or about command semantics, only about getting bytes on and
/// off the wire and framing them into [`crate::ControlMessage`]s.
#[derive(Debug, Error)]
pub enum SocketError {
    #[error("control socket is closed")]
    Closed,
    #[error("control socket io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed control reply: {0}")]
    Protocol(String),
}
