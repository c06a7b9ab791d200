use crate::error::ControlError;
use crate::status::{Status, StatusCallback, StatusListener};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex as AsyncMutex, Notify};
use tokio::task::{self, JoinHandle};
use torctl_socket::{ControlMessage, ControlSocket, SocketError};

/// A re-entrant async mutex: the same task that already holds it can
/// re-acquire it without blocking. `msg_lock` needs this because a status
/// listener invoked inline (spawn = false) may itself call `msg()` on the
/// same task (design note: "re-entrant send lock").
struct ReentrantLock {
    mutex: AsyncMutex<()>,
    holder: std::sync::Mutex<Option<task::Id>>,
}

impl ReentrantLock {
    fn new() -> Self {
        Self {
            mutex: AsyncMutex::new(()),
            holder: std::sync::Mutex::new(None),
        }
    }

    async fn acquire(&self) -> ReentrantGuard<'_> {
        let current = task::try_id();
        if current.is_some() && *self.holder.lock().unwrap() == current {
            return ReentrantGuard {
                lock: self,
                guard: None,
            };
        }
        let guard = self.mutex.lock().await;
        *self.holder.lock().unwrap() = current;
        ReentrantGuard {
            lock: self,
            guard: Some(guard),
        }
    }
}

struct ReentrantGuard<'a> {
    lock: &'a ReentrantLock,
    // `None` when this guard represents a re-entrant (already-held) acquire;
    // dropping it must not release the real mutex or clear the holder.
    guard: Option<tokio::sync::MutexGuard<'a, ()>>,
}

impl Drop for ReentrantGuard<'_> {
    fn drop(&mut self) {
        if self.guard.is_some() {
            *self.lock.holder.lock().unwrap() = None;
        }
    }
}

type ReplySlot = Result<ControlMessage, SocketError>;

struct KernelInner {
    socket: Arc<dyn ControlSocket>,
    msg_lock: ReentrantLock,
    reply_tx: mpsc::UnboundedSender<ReplySlot>,
    reply_rx: AsyncMutex<mpsc::UnboundedReceiver<ReplySlot>>,
    event_tx: mpsc::UnboundedSender<ControlMessage>,
    event_rx: AsyncMutex<mpsc::UnboundedReceiver<ControlMessage>>,
    event_notice: Notify,
    listeners: AsyncMutex<Vec<StatusListener>>,
    reader_task: AsyncMutex<Option<JoinHandle<()>>>,
    event_task: AsyncMutex<Option<JoinHandle<()>>>,
    // Overridable event sink; default is a no-op. Set via `set_event_handler`
    // before connecting (mirrors `_handle_event` being overridden by
    // subclasses in the original design).
    handle_event: AsyncMutex<Arc<dyn Fn(ControlMessage) + Send + Sync>>,
    closing: AtomicBool,
}

/// The controller kernel: full-duplex framing and dispatch over one
/// [`ControlSocket`]. Cheap to clone — it's an `Arc` handle.
#[derive(Clone)]
pub struct Kernel {
    inner: Arc<KernelInner>,
}

impl Kernel {
    /// Wraps a socket adapter. Does not connect or start background tasks;
    /// call [`Kernel::connect`] to do that (mirrors the original's lazy
    /// `_launch_threads` on first liveness).
    pub fn new(socket: Arc<dyn ControlSocket>) -> Self {
        let (reply_tx, reply_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Kernel {
            inner: Arc::new(KernelInner {
                socket,
                msg_lock: ReentrantLock::new(),
                reply_tx,
                reply_rx: AsyncMutex::new(reply_rx),
                event_tx,
                event_rx: AsyncMutex::new(event_rx),
                event_notice: Notify::new(),
                listeners: AsyncMutex::new(Vec::new()),
                reader_task: AsyncMutex::new(None),
                event_task: AsyncMutex::new(None),
                handle_event: AsyncMutex::new(Arc::new(|_| {})),
                closing: AtomicBool::new(false),
            }),
        }
    }

    /// Installs the callback invoked for every event (terminal code `650`)
    /// the reader observes, in arrival order. Replaces any previously
    /// installed handler.
    pub async fn set_event_handler<F>(&self, handler: F)
    where
        F: Fn(ControlMessage) + Send + Sync + 'static,
    {
        *self.inner.handle_event.lock().await = Arc::new(handler);
    }

    /// Sends one command and returns its reply.
    pub async fn msg(&self, command: &str) -> Result<ControlMessage, ControlError> {
        let _msg_guard = self.inner.msg_lock.acquire().await;

        // Drain strays left by a prior caller: these are either leftovers
        // from a closed/broken cycle or a bug where a previous msg() call
        // never picked up its reply.
        let mut reply_rx = self.inner.reply_rx.lock().await;
        loop {
            match reply_rx.try_recv() {
                Ok(Ok(stray)) => {
                    tracing::warn!(
                        "BUG: msg() failed to deliver a response: {:?}",
                        stray.terminal_code()
                    );
                }
                Ok(Err(SocketError::Closed)) => {
                    // Expected: our connection was closed and possibly
                    // re-established while someone was blocked on a read.
                }
                Ok(Err(err)) => {
                    tracing::info!("control socket reported a problem ({err})");
                }
                Err(_) => break,
            }
        }

        if let Err(err) = self.inner.socket.send(command).await {
            return Err(self.surface_socket_error(err).await);
        }

        let result = reply_rx
            .recv()
            .await
            .expect("reply_tx is held by this Kernel for its lifetime");
        drop(reply_rx);

        match result {
            Ok(message) => Ok(message),
            Err(err) => Err(self.surface_socket_error(err).await),
        }
    }

    async fn surface_socket_error(&self, err: SocketError) -> ControlError {
        let is_closed = matches!(err, SocketError::Closed);
        let control_err = ControlError::from(err);
        if is_closed {
            // Guarantee the caller observes a quiescent controller once a
            // `SocketClosed` surfaces from `msg()`.
            self.close().await;
        }
        control_err
    }

    /// Mirrors the adapter's `is_alive()`.
    pub fn is_alive(&self) -> bool {
        self.inner.socket.is_alive()
    }

    /// Reconnects the underlying socket. A passthrough to the adapter; does
    /// not itself (re)spawn worker tasks (design note open question) — call
    /// [`Kernel::connect`] instead for a connect that guarantees workers are
    /// running afterward.
    pub async fn reconnect_socket(&self) -> Result<(), ControlError> {
        self.inner.socket.connect().await.map_err(Into::into)
    }

    /// Connects the underlying socket, starts worker tasks (idempotently),
    /// then notifies listeners of [`Status::Init`]. The socket has to be
    /// alive before workers start, since `reader_loop`/`event_loop` both
    /// exit immediately if `is_alive()` is false at entry.
    #[tracing::instrument(skip(self))]
    pub async fn connect(&self) -> Result<(), ControlError> {
        self.inner.closing.store(false, Ordering::SeqCst);
        self.inner.socket.connect().await?;
        self.launch_workers().await;
        self.notify_status_listeners(Status::Init, Some(true)).await;
        Ok(())
    }

    /// Shuts the connection down: wakes the event dispatcher, joins workers
    /// where it's safe to do so (never joining the current task), notifies
    /// listeners of [`Status::Closed`], then closes the adapter.
    #[tracing::instrument(skip(self))]
    pub async fn close(&self) {
        // Re-entrant: concurrent callers (e.g. msg() surfacing SocketClosed
        // while a user explicitly calls close()) should not double-run the
        // teardown sequence.
        if self.inner.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.event_notice.notify_waiters();

        let current = task::try_id();
        for slot in [&self.inner.reader_task, &self.inner.event_task] {
            let handle = slot.lock().await.take();
            if let Some(handle) = handle {
                let is_self = current.is_some() && Some(handle.id()) == current;
                // Join iff the task exists, is still running, and isn't the
                // current task — never join yourself.
                if !handle.is_finished() && !is_self {
                    let _ = handle.await;
                }
            }
        }

        self.notify_status_listeners(Status::Closed, Some(false))
            .await;
        self.inner.socket.close().await;
    }

    pub fn get_socket(&self) -> Arc<dyn ControlSocket> {
        self.inner.socket.clone()
    }

    pub async fn add_status_listener<F>(&self, callback: F, spawn: bool) -> StatusCallback
    where
        F: Fn(Kernel, Status, f64) + Send + Sync + 'static,
    {
        let callback: StatusCallback = Arc::new(callback);
        self.inner
            .listeners
            .lock()
            .await
            .push(StatusListener {
                callback: callback.clone(),
                spawn,
            });
        callback
    }

    pub async fn remove_status_listener(&self, callback: &StatusCallback) -> bool {
        let mut listeners = self.inner.listeners.lock().await;
        let before = listeners.len();
        listeners.retain(|entry| !Arc::ptr_eq(&entry.callback, callback));
        listeners.len() != before
    }

    /// Takes the adapter's send lock then the listener lock (in that order)
    /// to freeze the `is_alive()` observation, drops the notification if
    /// `expect_alive` disagrees with the frozen observation, then fans out
    /// to every listener with one shared timestamp.
    async fn notify_status_listeners(&self, state: Status, expect_alive: Option<bool>) {
        let _send_guard = self.inner.socket.send_lock().lock().await;
        let listeners = self.inner.listeners.lock().await;

        let timestamp = now_unix_seconds();
        if let Some(expected) = expect_alive {
            if expected != self.is_alive() {
                return;
            }
        }

        for listener in listeners.iter() {
            if listener.spawn {
                let callback = listener.callback.clone();
                let kernel = self.clone();
                tokio::spawn(async move {
                    callback(kernel, state, timestamp);
                });
            } else {
                (listener.callback)(self.clone(), state, timestamp);
            }
        }
    }

    /// Spawns the reader and event-dispatcher tasks if the previous handles
    /// are absent or have already finished. Workers are single-use: most
    /// runtimes can't restart a finished task handle in place, so each
    /// connect cycle gets fresh ones.
    async fn launch_workers(&self) {
        let _send_guard = self.inner.socket.send_lock().lock().await;

        let mut reader_slot = self.inner.reader_task.lock().await;
        if reader_slot.as_ref().map_or(true, |h| h.is_finished()) {
            let kernel = self.clone();
            *reader_slot = Some(tokio::spawn(async move { kernel.reader_loop().await }));
        }
        drop(reader_slot);

        let mut event_slot = self.inner.event_task.lock().await;
        if event_slot.as_ref().map_or(true, |h| h.is_finished()) {
            let kernel = self.clone();
            *event_slot = Some(tokio::spawn(async move { kernel.event_loop().await }));
        }
    }

    /// Routes every reader-side error through
    /// `reply_queue`, even ones that have nothing to do with an outstanding
    /// `msg()` call — a misattribution is cheaper than a deadlock, since
    /// `msg()` is the only place positioned to disambiguate.
    async fn reader_loop(&self) {
        while self.is_alive() {
            match self.inner.socket.recv().await {
                Ok(message) => {
                    if message.is_event() {
                        let _ = self.inner.event_tx.send(message);
                        self.inner.event_notice.notify_waiters();
                    } else {
                        let _ = self.inner.reply_tx.send(Ok(message));
                    }
                }
                Err(err) => {
                    let _ = self.inner.reply_tx.send(Err(err));
                }
            }
        }
    }

    /// Runs on its own task so a slow event handler doesn't stall reads.
    async fn event_loop(&self) {
        let mut event_rx = self.inner.event_rx.lock().await;
        loop {
            match event_rx.try_recv() {
                Ok(message) => {
                    let handler = self.inner.handle_event.lock().await.clone();
                    handler(message);
                }
                Err(mpsc::error::TryRecvError::Empty) => {
                    if !self.is_alive() {
                        break;
                    }
                    self.inner.event_notice.notified().await;
                }
                Err(mpsc::error::TryRecvError::Disconnected) => break,
            }
        }
    }
}

fn now_unix_seconds() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
