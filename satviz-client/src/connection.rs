//! Producer connection.

use crate::error::ClientError;
use parking_lot::Mutex as SyncMutex;
use satviz_protocol::{
    Blueprint, ClauseUpdate, Decoder, Encoder, Message, MessageType, Offer, SatAssignment,
};
use std::collections::VecDeque;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

/// Default read buffer size (8 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;

/// Minimum read buffer size (1 KiB).
pub const MIN_READ_BUFFER_SIZE: usize = 1024;

/// Maximum read buffer size (1 MiB).
pub const MAX_READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Consumer address.
    pub addr: SocketAddr,
    /// Timeout of a single connect attempt.
    pub connect_timeout: Duration,
    /// Pause between refused connect attempts.
    pub retry_interval: Duration,
    /// Read buffer size for socket reads.
    pub read_buffer_size: usize,
}

impl ConnectionConfig {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            connect_timeout: Duration::from_secs(10),
            retry_interval: Duration::from_secs(1),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.clamp(MIN_READ_BUFFER_SIZE, MAX_READ_BUFFER_SIZE);
        self
    }
}

/// Lifecycle of a producer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerState {
    /// Not yet established.
    Init,
    /// Connecting, possibly retrying.
    Connecting,
    /// OFFER sent, waiting for START.
    Established,
    /// START received; clause updates may be sent.
    Started,
    /// Closed locally, stopped by the consumer, or failed.
    Closed,
}

impl fmt::Display for ProducerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProducerState::Init => "init",
            ProducerState::Connecting => "connecting",
            ProducerState::Established => "established",
            ProducerState::Started => "started",
            ProducerState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Notified about the consumer's decisions.
///
/// Methods run on the connection's worker task, except that a failed send
/// reports `on_disconnect` on the sending task.
pub trait ProducerConnectionListener: Send + Sync {
    /// The consumer sent START.
    fn on_connect(&self) {}

    /// The consumer stopped the stream or the connection was lost.
    /// Not called after a local terminate or close.
    fn on_disconnect(&self, _reason: &str) {}
}

/// Reason reported when the consumer sends STOP.
pub const STOPPED_BY_CONSUMER: &str = "stopped by consumer";

/// TERM_OTHER reason sent when the producer closes without terminating.
pub const CLOSED_BY_PRODUCER: &str = "closed";

/// Connection from a producer to a consumer.
///
/// Cloning yields another handle to the same connection.
#[derive(Clone)]
pub struct ProducerConnection {
    inner: Arc<Inner>,
}

struct Inner {
    config: ConnectionConfig,
    offer: Offer,
    blueprint: Arc<Blueprint>,
    state: SyncMutex<ProducerState>,
    writer: Mutex<Option<OwnedWriteHalf>>,
    listener: OnceLock<Arc<dyn ProducerConnectionListener>>,
    shutdown: broadcast::Sender<()>,
    worker: SyncMutex<Option<JoinHandle<()>>>,
    closing: AtomicBool,
}

impl ProducerConnection {
    /// Creates a connection that will offer itself as `offer`.
    pub fn new(config: ConnectionConfig, offer: Offer) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            inner: Arc::new(Inner {
                config,
                offer,
                blueprint: Arc::new(Blueprint::satviz()),
                state: SyncMutex::new(ProducerState::Init),
                writer: Mutex::new(None),
                listener: OnceLock::new(),
                shutdown,
                worker: SyncMutex::new(None),
                closing: AtomicBool::new(false),
            }),
        }
    }

    /// Starts connecting in the background.
    ///
    /// Refused attempts are retried every `retry_interval` until they
    /// succeed or the connection is closed. The OFFER is sent as soon as the
    /// socket is up.
    pub fn establish(
        &self,
        listener: Arc<dyn ProducerConnectionListener>,
    ) -> Result<(), ClientError> {
        if !self
            .inner
            .transition(&[ProducerState::Init], ProducerState::Connecting)
        {
            return Err(ClientError::AlreadyEstablished);
        }
        let _ = self.inner.listener.set(listener);

        let shutdown_rx = self.inner.shutdown.subscribe();
        let worker = tokio::spawn(self.inner.clone().run(shutdown_rx));
        *self.inner.worker.lock() = Some(worker);
        Ok(())
    }

    pub fn state(&self) -> ProducerState {
        self.inner.state()
    }

    pub fn offer(&self) -> &Offer {
        &self.inner.offer
    }

    /// Sends one clause update.
    ///
    /// Returns false, and sends nothing, unless the consumer has started the
    /// stream.
    pub async fn send_clause_update(&self, update: &ClauseUpdate) -> bool {
        self.inner
            .send(&Message::clause_update(update.clone()), &[ProducerState::Started])
            .await
    }

    /// Sends TERM_SOLVE with the satisfying assignment and closes.
    pub async fn terminate_solved(&self, assignment: &SatAssignment) -> bool {
        self.terminate(Message::term_solve(assignment.clone())).await
    }

    /// Sends TERM_REFUTE and closes.
    pub async fn terminate_refuted(&self) -> bool {
        self.terminate(Message::term_refute()).await
    }

    /// Sends TERM_OTHER with a reason and closes.
    pub async fn terminate_otherwise(&self, reason: &str) -> bool {
        self.terminate(Message::term_other(reason)).await
    }

    async fn terminate(&self, message: Message) -> bool {
        let sent = self
            .inner
            .send(
                &message,
                &[ProducerState::Established, ProducerState::Started],
            )
            .await;
        if sent {
            tracing::info!("Sent {} to {}", message_name(&message), self.inner.config.addr);
            self.inner.finish(None).await;
        }
        sent
    }

    /// Closes the connection. Idempotent.
    ///
    /// An open stream that was not terminated yet gets a TERM_OTHER first.
    pub async fn close(&self) {
        self.inner
            .finish(Some(Message::term_other(CLOSED_BY_PRODUCER)))
            .await;
    }

    /// Closes the connection and waits for the worker to exit.
    pub async fn close_and_wait(&self) {
        self.close().await;
        let worker = self.inner.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                tracing::error!("Producer worker panicked: {}", e);
            }
        }
    }
}

async fn write_frame(writer: &mut OwnedWriteHalf, frame: &[u8]) -> std::io::Result<()> {
    writer.write_all(frame).await?;
    writer.flush().await
}

fn message_name(message: &Message) -> String {
    match message.kind() {
        Some(kind) => kind.to_string(),
        None => format!("type {}", message.msg_type),
    }
}

impl Inner {
    fn state(&self) -> ProducerState {
        *self.state.lock()
    }

    fn transition(&self, from: &[ProducerState], to: ProducerState) -> bool {
        let mut state = self.state.lock();
        if from.contains(&*state) {
            *state = to;
            true
        } else {
            false
        }
    }

    /// Moves to `Closed` and releases the socket. Returns false if the
    /// connection was already closed.
    ///
    /// `farewell` is written first, best effort, if the OFFER had gone out.
    async fn finish(&self, farewell: Option<Message>) -> bool {
        let previous = std::mem::replace(&mut *self.state.lock(), ProducerState::Closed);
        if self.closing.swap(true, Ordering::SeqCst) {
            return previous != ProducerState::Closed;
        }
        let _ = self.shutdown.send(());

        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            let farewell = farewell.filter(|_| {
                matches!(previous, ProducerState::Established | ProducerState::Started)
            });
            if let Some(message) = farewell {
                let written = match Encoder::encode_message(&self.blueprint, &message) {
                    Ok(frame) => write_frame(&mut writer, &frame).await.map_err(ClientError::from),
                    Err(e) => Err(e.into()),
                };
                if let Err(e) = written {
                    tracing::debug!("Could not send {}: {}", message_name(&message), e);
                }
            }
            let _ = writer.shutdown().await;
        }
        previous != ProducerState::Closed
    }

    /// Closes after a failure and reports it to the listener once.
    async fn fail(&self, reason: &str) {
        if self.finish(Some(Message::term_other(reason))).await {
            tracing::warn!("Connection to {} lost: {}", self.config.addr, reason);
            if let Some(listener) = self.listener.get() {
                listener.on_disconnect(reason);
            }
        }
    }

    /// Writes a message if the connection is in one of `allowed`.
    async fn send(&self, message: &Message, allowed: &[ProducerState]) -> bool {
        let frame = match Encoder::encode_message(&self.blueprint, message) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("Cannot encode {}: {}", message_name(message), e);
                return false;
            }
        };

        let result = {
            let mut writer_guard = self.writer.lock().await;
            if !allowed.contains(&self.state()) {
                return false;
            }
            let Some(writer) = writer_guard.as_mut() else {
                return false;
            };
            write_frame(writer, &frame).await
        };

        match result {
            Ok(()) => true,
            Err(e) => {
                self.fail(&ClientError::from(e).to_string()).await;
                false
            }
        }
    }

    async fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        let connected = tokio::select! {
            result = self.connect_with_retry() => result,
            _ = shutdown_rx.recv() => return,
        };
        let stream = match connected {
            Ok(stream) => stream,
            Err(e) => {
                self.fail(&e.to_string()).await;
                return;
            }
        };

        let (reader, writer) = stream.into_split();
        let offer = Message::offer(self.offer.to_map());
        let frame = match Encoder::encode_message(&self.blueprint, &offer) {
            Ok(frame) => frame,
            Err(e) => {
                self.fail(&ClientError::from(e).to_string()).await;
                return;
            }
        };

        // The OFFER goes out before anything else can be written.
        let written = {
            let mut guard = self.writer.lock().await;
            if !self.transition(&[ProducerState::Connecting], ProducerState::Established) {
                return;
            }
            write_frame(guard.insert(writer), &frame).await
        };
        if let Err(e) = written {
            self.fail(&ClientError::from(e).to_string()).await;
            return;
        }
        tracing::info!(
            "Offered {} to {}, waiting for START",
            self.offer.type_name(),
            self.config.addr
        );

        self.read_loop(reader, shutdown_rx).await;
    }

    async fn connect_with_retry(&self) -> Result<TcpStream, ClientError> {
        let addr = self.config.addr;
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            tracing::debug!("Connecting to {} (attempt {})", addr, attempt);

            let error = match tokio::time::timeout(
                self.config.connect_timeout,
                TcpStream::connect(addr),
            )
            .await
            {
                Ok(Ok(stream)) => {
                    stream.set_nodelay(true).ok();
                    tracing::info!("Connected to consumer at {}", addr);
                    return Ok(stream);
                }
                Ok(Err(e)) => ClientError::Io(e),
                Err(_) => ClientError::Timeout,
            };

            if !error.is_retryable() {
                return Err(error);
            }
            tracing::debug!(
                "Connect to {} failed: {}, retrying in {:?}",
                addr,
                error,
                self.config.retry_interval
            );
            tokio::time::sleep(self.config.retry_interval).await;
        }
    }

    async fn read_loop(&self, mut reader: OwnedReadHalf, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut decoder = Decoder::new(self.blueprint.clone());
        let mut buf = vec![0u8; self.config.read_buffer_size.max(MIN_READ_BUFFER_SIZE)];
        let mut messages = VecDeque::new();

        let reason = 'read: loop {
            let read = tokio::select! {
                read = reader.read(&mut buf) => read,
                _ = shutdown_rx.recv() => return,
            };
            let n = match read {
                Ok(0) => break "connection closed by consumer".to_string(),
                Ok(n) => n,
                Err(e) => break ClientError::from(e).to_string(),
            };

            let decoded = decoder.decode(&buf[..n], &mut messages);
            while let Some(message) = messages.pop_front() {
                if let Some(reason) = self.on_message(message).await {
                    break 'read reason;
                }
            }
            if let Err(e) = decoded {
                break ClientError::from(e).to_string();
            }
        };

        if reason == STOPPED_BY_CONSUMER {
            if self.finish(None).await {
                tracing::info!("Consumer at {} stopped the stream", self.config.addr);
                if let Some(listener) = self.listener.get() {
                    listener.on_disconnect(&reason);
                }
            }
        } else {
            self.fail(&reason).await;
        }
    }

    /// Handles one message from the consumer. Returns a reason when the
    /// connection has to end.
    async fn on_message(&self, message: Message) -> Option<String> {
        match message.kind() {
            Some(MessageType::Start) => {
                if self.transition(&[ProducerState::Established], ProducerState::Started) {
                    tracing::info!("Consumer at {} started the stream", self.config.addr);
                    if let Some(listener) = self.listener.get() {
                        listener.on_connect();
                    }
                } else {
                    tracing::debug!("Ignoring START while {}", self.state());
                }
                None
            }
            Some(MessageType::Stop) => Some(STOPPED_BY_CONSUMER.to_string()),
            _ => {
                tracing::debug!("Ignoring {} from consumer", message_name(&message));
                None
            }
        }
    }
}
