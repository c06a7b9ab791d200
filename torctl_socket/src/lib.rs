//! Control socket adapter: the line-level transport for Tor's control
//! protocol. This crate owns framing (bytes in, [`ControlMessage`] out) and
//! a send lock for serializing writes; it has no notion of replies vs.
//! events, command semantics, or concurrent-caller fairness — that's
//! `torctl_core`'s job.

mod error;
mod line_socket;
mod message;

pub use error::SocketError;
pub use line_socket::{ControlSocket, Endpoint, LineControlSocket};
pub use message::{read_message, ControlMessage, ReplyLine};
