use crate::kernel::Kernel;
use std::sync::Arc;

/// A state change a control connection can go through. Only [`Status::Init`]
/// and [`Status::Closed`] are emitted by the kernel itself; [`Status::Reset`]
/// is reserved for extensions (e.g. a `SIGHUP`-driven reload) that build on
/// top of the kernel.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Status {
    Init,
    Reset,
    Closed,
}

/// A status-listener callback: `callback(kernel, state, timestamp_seconds)`.
///
/// The kernel handle is cheap to clone (it's an `Arc` underneath), so a
/// listener can use it to call back into `msg()` — e.g. an authentication
/// helper that sends an `AUTHENTICATE` command as soon as it observes
/// `Status::Init`.
pub type StatusCallback = Arc<dyn Fn(Kernel, Status, f64) + Send + Sync>;

/// One entry in the listener registry: the callback plus whether it should
/// be notified via a detached task (`true`) or invoked inline under the
/// kernel's locks (`false`).
pub(crate) struct StatusListener {
    pub(crate) callback: StatusCallback,
    pub(crate) spawn: bool,
}
