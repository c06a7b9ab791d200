use crate::error::SocketError;
use crate::message::{read_message, ControlMessage};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;
use tokio::sync::{broadcast, Mutex as AsyncMutex};

#[cfg(unix)]
use std::path::PathBuf;

/// Contract a controller kernel consumes: send a command line,
/// receive one framed [`ControlMessage`], observe or
/// change liveness, and expose the send lock that the kernel reuses as its
/// outermost synchronization boundary.
///
/// This crate owns no controller-kernel invariants; `torctl_core` is where
/// single-flight command/reply pairing, event routing, and status-listener
/// fan-out live.
#[async_trait]
pub trait ControlSocket: Send + Sync {
    async fn send(&self, command: &str) -> Result<(), SocketError>;
    async fn recv(&self) -> Result<ControlMessage, SocketError>;
    fn is_alive(&self) -> bool;
    async fn connect(&self) -> Result<(), SocketError>;
    async fn close(&self);
    /// The adapter's write-serializing lock. The kernel takes this ahead of
    /// its own listener lock when notifying status listeners, so that an
    /// `is_alive()` observation can't change out from under a transition
    /// notification.
    fn send_lock(&self) -> &AsyncMutex<()>;
}

/// Where a [`LineControlSocket`] (re)connects to.
#[derive(Clone, Debug)]
pub enum Endpoint {
    Tcp { addr: String, port: u16 },
    #[cfg(unix)]
    Unix { path: PathBuf },
}

type BoxedReader = BufReader<Box<dyn AsyncRead + Unpin + Send>>;
type BoxedWriter = Box<dyn AsyncWrite + Unpin + Send>;

struct Io {
    reader: AsyncMutex<BoxedReader>,
    writer: AsyncMutex<BoxedWriter>,
    // Fired by `close()` so a `recv()` blocked waiting on the wire doesn't
    // hang past shutdown.
    will_close_tx: broadcast::Sender<()>,
}

/// A [`ControlSocket`] that speaks the line-oriented Tor control wire format
/// over a TCP or Unix-domain stream.
pub struct LineControlSocket {
    endpoint: Endpoint,
    alive: AtomicBool,
    io: AsyncMutex<Option<Arc<Io>>>,
    send_lock: AsyncMutex<()>,
}

impl LineControlSocket {
    /// Builds the adapter without connecting; [`ControlSocket::connect`]
    /// performs the actual dial.
    pub fn new(endpoint: Endpoint) -> Arc<Self> {
        Arc::new(Self {
            endpoint,
            alive: AtomicBool::new(false),
            io: AsyncMutex::new(None),
            send_lock: AsyncMutex::new(()),
        })
    }

    async fn open_streams(&self) -> Result<(BoxedReader, BoxedWriter), SocketError> {
        let (reader, writer): (Box<dyn AsyncRead + Unpin + Send>, BoxedWriter) =
            match &self.endpoint {
                Endpoint::Tcp { addr, port } => {
                    let stream = TcpStream::connect((addr.as_str(), *port)).await?;
                    let (r, w) = tokio::io::split(stream);
                    (Box::new(r), Box::new(w))
                }
                #[cfg(unix)]
                Endpoint::Unix { path } => {
                    let stream = UnixStream::connect(path).await?;
                    let (r, w) = tokio::io::split(stream);
                    (Box::new(r), Box::new(w))
                }
            };
        Ok((BufReader::new(reader), writer))
    }

    async fn current_io(&self) -> Result<Arc<Io>, SocketError> {
        self.io.lock().await.clone().ok_or(SocketError::Closed)
    }
}

#[async_trait]
impl ControlSocket for LineControlSocket {
    async fn send(&self, command: &str) -> Result<(), SocketError> {
        let _send_guard = self.send_lock.lock().await;
        let io = self.current_io().await?;
        let mut writer = io.writer.lock().await;
        writer.write_all(command.as_bytes()).await?;
        writer.write_all(b"\r\n").await?;
        writer.flush().await?;
        Ok(())
    }

    async fn recv(&self) -> Result<ControlMessage, SocketError> {
        let io = self.current_io().await?;
        let mut will_close_rx = io.will_close_tx.subscribe();
        let mut reader = io.reader.lock().await;
        tokio::select! {
            result = read_message(&mut *reader) => result,
            _ = will_close_rx.recv() => Err(SocketError::Closed),
        }
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn connect(&self) -> Result<(), SocketError> {
        let _send_guard = self.send_lock.lock().await;
        let (reader, writer) = self.open_streams().await?;
        let (will_close_tx, _) = broadcast::channel(1);
        let io = Arc::new(Io {
            reader: AsyncMutex::new(reader),
            writer: AsyncMutex::new(writer),
            will_close_tx,
        });
        *self.io.lock().await = Some(io);
        self.alive.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) {
        let _send_guard = self.send_lock.lock().await;
        self.alive.store(false, Ordering::SeqCst);
        if let Some(io) = self.io.lock().await.take() {
            let _ = io.will_close_tx.send(());
        }
    }

    fn send_lock(&self) -> &AsyncMutex<()> {
        &self.send_lock
    }
}
