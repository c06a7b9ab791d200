//! Reply parsers: pure functions from a raw [`torctl_socket::ControlMessage`]
//! to a structured result, with no knowledge of the kernel or the command
//! layer that calls them.

pub mod getconf;
pub mod getinfo;
pub mod singleline;

pub use singleline::SingleLineResponse;
