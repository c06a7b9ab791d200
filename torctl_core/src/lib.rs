//! Controller kernel, reply parsers, and command layer for Tor's control
//! protocol: the pieces that sit on top of a [`torctl_socket::ControlSocket`].

mod controller;
mod error;
mod kernel;
mod response;
mod status;

pub use controller::{
    scoped, ConfValue, Controller, Fallback, DEFAULT_CONTROL_ADDR, DEFAULT_CONTROL_PORT,
};
#[cfg(unix)]
pub use controller::DEFAULT_CONTROL_SOCKET_PATH;
pub use error::{ControlError, Result};
pub use kernel::Kernel;
pub use response::{getconf, getinfo, SingleLineResponse};
pub use status::{Status, StatusCallback};

pub use torctl_socket::{ControlMessage, ControlSocket, Endpoint, LineControlSocket, SocketError};
