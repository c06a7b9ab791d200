use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::sync::{broadcast, mpsc, Mutex as AsyncMutex};
use torctl_socket::{read_message, ControlMessage, ControlSocket, SocketError};

/// Parses a raw wire fragment into a [`ControlMessage`], the way a real
/// socket adapter would hand one to the kernel.
pub async fn control_message(raw: &str) -> ControlMessage {
    let mut reader = BufReader::new(raw.as_bytes());
    read_message(&mut reader)
        .await
        .expect("valid scripted control message")
}

/// An in-memory [`ControlSocket`]: `send()` echoes the command back as
/// `250 <command>` unless `push_event`/`push_error` queued something ahead
/// of it, modeling how a real control port interleaves unsolicited events
/// with replies.
pub struct MockSocket {
    alive: AtomicBool,
    send_lock: AsyncMutex<()>,
    tx: mpsc::UnboundedSender<Result<ControlMessage, SocketError>>,
    rx: AsyncMutex<mpsc::UnboundedReceiver<Result<ControlMessage, SocketError>>>,
    will_close_tx: broadcast::Sender<()>,
    sent: AsyncMutex<Vec<String>>,
    scripted_replies: AsyncMutex<VecDeque<String>>,
}

impl MockSocket {
    /// Matches [`torctl_socket::LineControlSocket`]: not alive until
    /// `connect()` runs.
    pub fn new() -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (will_close_tx, _) = broadcast::channel(8);
        Arc::new(Self {
            alive: AtomicBool::new(false),
            send_lock: AsyncMutex::new(()),
            tx,
            rx: AsyncMutex::new(rx),
            will_close_tx,
            sent: AsyncMutex::new(Vec::new()),
            scripted_replies: AsyncMutex::new(VecDeque::new()),
        })
    }

    /// Queues an item the reader observes on a future `recv()`, ahead of any
    /// echoed replies queued after this call.
    pub fn push(&self, message: ControlMessage) {
        let _ = self.tx.send(Ok(message));
    }

    pub fn push_error(&self, err: SocketError) {
        let _ = self.tx.send(Err(err));
    }

    /// Queues a raw wire reply to be returned for the next `send()`, instead
    /// of the default echo. Consumed in FIFO order, one per `send()` call.
    pub async fn script_reply(&self, raw: &str) {
        self.scripted_replies.lock().await.push_back(raw.to_string());
    }

    pub async fn sent_commands(&self) -> Vec<String> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl ControlSocket for MockSocket {
    async fn send(&self, command: &str) -> Result<(), SocketError> {
        let _guard = self.send_lock.lock().await;
        if !self.alive.load(Ordering::SeqCst) {
            return Err(SocketError::Closed);
        }
        self.sent.lock().await.push(command.to_string());

        let scripted = self.scripted_replies.lock().await.pop_front();
        let reply = match scripted {
            Some(raw) => control_message(&raw).await,
            None => control_message(&format!("250 {command}\r\n")).await,
        };
        let _ = self.tx.send(Ok(reply));
        Ok(())
    }

    async fn recv(&self) -> Result<ControlMessage, SocketError> {
        let mut will_close_rx = self.will_close_tx.subscribe();
        let mut rx = self.rx.lock().await;
        tokio::select! {
            item = rx.recv() => item.unwrap_or(Err(SocketError::Closed)),
            _ = will_close_rx.recv() => Err(SocketError::Closed),
        }
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn connect(&self) -> Result<(), SocketError> {
        self.alive.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) {
        self.alive.store(false, Ordering::SeqCst);
        let _ = self.will_close_tx.send(());
    }

    fn send_lock(&self) -> &AsyncMutex<()> {
        &self.send_lock
    }
}

/// A mock that actually honors `SETCONF`/`GETCONF` against an in-memory
/// config table, for round-trip tests that a pure echo can't exercise.
pub struct ConfigMockSocket {
    alive: AtomicBool,
    send_lock: AsyncMutex<()>,
    tx: mpsc::UnboundedSender<Result<ControlMessage, SocketError>>,
    rx: AsyncMutex<mpsc::UnboundedReceiver<Result<ControlMessage, SocketError>>>,
    will_close_tx: broadcast::Sender<()>,
    config: AsyncMutex<std::collections::HashMap<String, Vec<String>>>,
}

impl ConfigMockSocket {
    /// Matches [`torctl_socket::LineControlSocket`]: not alive until
    /// `connect()` runs.
    pub fn new() -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (will_close_tx, _) = broadcast::channel(8);
        Arc::new(Self {
            alive: AtomicBool::new(false),
            send_lock: AsyncMutex::new(()),
            tx,
            rx: AsyncMutex::new(rx),
            will_close_tx,
            config: AsyncMutex::new(std::collections::HashMap::new()),
        })
    }

    async fn handle_setconf(&self, rest: &str) -> ControlMessage {
        let mut config = self.config.lock().await;
        let mut cleared = std::collections::HashSet::new();
        for token in split_quoted_tokens(rest) {
            let (key, value) = split_setconf_token(&token);
            let entry = config.entry(key.clone()).or_default();
            if cleared.insert(key) {
                entry.clear();
            }
            entry.push(value.unwrap_or_default());
        }
        control_message("250 OK\r\n").await
    }

    async fn handle_getconf(&self, rest: &str) -> ControlMessage {
        let config = self.config.lock().await;
        let mut lines = Vec::new();
        for key in rest.split_whitespace() {
            let values = config
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(key))
                .map(|(_, v)| v.clone())
                .unwrap_or_default();
            if values.is_empty() {
                lines.push(format!("250-{key}"));
            } else {
                for value in &values {
                    lines.push(format!("250-{key}={value}"));
                }
            }
        }
        let mut raw = String::new();
        for line in &lines {
            raw.push_str(line);
            raw.push_str("\r\n");
        }
        raw.push_str("250 OK\r\n");
        control_message(&raw).await
    }
}

fn split_quoted_tokens(rest: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for c in rest.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            ' ' if !in_quotes => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

fn split_setconf_token(token: &str) -> (String, Option<String>) {
    match token.split_once('=') {
        Some((key, value)) => (key.to_string(), Some(value.trim_matches('"').to_string())),
        None => (token.to_string(), None),
    }
}

#[async_trait]
impl ControlSocket for ConfigMockSocket {
    async fn send(&self, command: &str) -> Result<(), SocketError> {
        let _guard = self.send_lock.lock().await;
        if !self.alive.load(Ordering::SeqCst) {
            return Err(SocketError::Closed);
        }
        let reply = if let Some(rest) = command.strip_prefix("SETCONF ") {
            self.handle_setconf(rest).await
        } else if let Some(rest) = command.strip_prefix("GETCONF ") {
            self.handle_getconf(rest).await
        } else {
            control_message("250 OK\r\n").await
        };
        let _ = self.tx.send(Ok(reply));
        Ok(())
    }

    async fn recv(&self) -> Result<ControlMessage, SocketError> {
        let mut will_close_rx = self.will_close_tx.subscribe();
        let mut rx = self.rx.lock().await;
        tokio::select! {
            item = rx.recv() => item.unwrap_or(Err(SocketError::Closed)),
            _ = will_close_rx.recv() => Err(SocketError::Closed),
        }
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn connect(&self) -> Result<(), SocketError> {
        self.alive.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) {
        self.alive.store(false, Ordering::SeqCst);
        let _ = self.will_close_tx.send(());
    }

    fn send_lock(&self) -> &AsyncMutex<()> {
        &self.send_lock
    }
}
