//! Connection multiplexer.
//!
//! One accept task and one read task per connection funnel their results
//! into a single bounded queue of [`PollEvent`]s. [`ConnectionServer::poll`]
//! drains that queue, so the caller sees every connection's lifecycle from
//! one place.

use crate::config::{NetworkConfig, DEFAULT_READ_BUFFER_SIZE, MAX_READ_BUFFER_SIZE, MIN_READ_BUFFER_SIZE};
use crate::connection::{Connection, ConnectionReader};
use crate::error::ServerError;
use parking_lot::{Mutex as SyncMutex, RwLock};
use satviz_protocol::{Blueprint, Message, Payload};
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;

/// Identifier of one accepted connection.
///
/// Ids count up from zero in accept order and are never reused by the
/// server that assigned them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(pub usize);

impl ConnectionId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One unit of work returned by [`ConnectionServer::poll`].
#[derive(Debug)]
pub enum PollEvent {
    /// A new connection was accepted.
    Accept { id: ConnectionId },
    /// A complete message arrived on a connection.
    Read { id: ConnectionId, message: Message },
    /// A connection failed, or with `id: None` the server itself did.
    Fail {
        id: Option<ConnectionId>,
        error: ServerError,
    },
}

impl PollEvent {
    /// Returns the connection this event belongs to.
    pub fn id(&self) -> Option<ConnectionId> {
        match self {
            PollEvent::Accept { id } | PollEvent::Read { id, .. } => Some(*id),
            PollEvent::Fail { id, .. } => *id,
        }
    }

    /// Returns whether this event reports a failure of the whole server.
    pub fn is_global_failure(&self) -> bool {
        matches!(self, PollEvent::Fail { id: None, .. })
    }
}

/// Multiplexer configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Upper bound on one `poll` call.
    pub poll_timeout: Duration,
    /// Capacity of the event queue.
    pub event_queue_capacity: usize,
    /// Read buffer size per connection.
    pub read_buffer_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        NetworkConfig::default().into()
    }
}

impl From<&NetworkConfig> for ServerConfig {
    fn from(network: &NetworkConfig) -> Self {
        Self {
            bind_addr: network.bind_addr,
            poll_timeout: network.poll_timeout(),
            event_queue_capacity: network.event_queue_capacity,
            read_buffer_size: network.read_buffer_size(),
        }
    }
}

impl From<NetworkConfig> for ServerConfig {
    fn from(network: NetworkConfig) -> Self {
        Self::from(&network)
    }
}

impl ServerConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Default::default()
        }
    }

    /// Sets the poll timeout.
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Sets the event queue capacity. Zero is raised to one.
    pub fn with_event_queue_capacity(mut self, capacity: usize) -> Self {
        self.event_queue_capacity = capacity.max(1);
        self
    }

    /// Sets the read buffer size, clamped to the supported range.
    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.clamp(MIN_READ_BUFFER_SIZE, MAX_READ_BUFFER_SIZE);
        self
    }
}

type ConnectionTable = Arc<RwLock<Vec<Arc<Connection>>>>;

/// Accepts producer connections and multiplexes their messages.
pub struct ConnectionServer {
    local_addr: SocketAddr,
    poll_timeout: Duration,
    connections: ConnectionTable,
    events: Mutex<mpsc::Receiver<PollEvent>>,
    shutdown: broadcast::Sender<()>,
    accept_task: SyncMutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
    #[cfg(test)]
    injector: mpsc::WeakSender<PollEvent>,
}

impl ConnectionServer {
    /// Binds the listening socket and starts accepting.
    pub async fn bind(config: ServerConfig, blueprint: Arc<Blueprint>) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!("Listening for producers on {}", local_addr);

        let (event_tx, event_rx) = mpsc::channel(config.event_queue_capacity.max(1));
        #[cfg(test)]
        let injector = event_tx.downgrade();
        let (shutdown_tx, _) = broadcast::channel(1);
        let connections: ConnectionTable = Arc::new(RwLock::new(Vec::new()));

        let read_buffer_size = if config.read_buffer_size == 0 {
            DEFAULT_READ_BUFFER_SIZE
        } else {
            config.read_buffer_size
        };
        let accept_task = tokio::spawn(Self::accept_loop(
            listener,
            blueprint,
            connections.clone(),
            event_tx,
            shutdown_tx.subscribe(),
            read_buffer_size,
        ));

        Ok(Self {
            local_addr,
            poll_timeout: config.poll_timeout,
            connections,
            events: Mutex::new(event_rx),
            shutdown: shutdown_tx,
            accept_task: SyncMutex::new(Some(accept_task)),
            closed: AtomicBool::new(false),
            #[cfg(test)]
            injector,
        })
    }

    async fn accept_loop(
        listener: TcpListener,
        blueprint: Arc<Blueprint>,
        connections: ConnectionTable,
        events: mpsc::Sender<PollEvent>,
        mut shutdown_rx: broadcast::Receiver<()>,
        read_buffer_size: usize,
    ) {
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let (connection, reader) = {
                                let mut table = connections.write();
                                let id = ConnectionId(table.len());
                                let (connection, reader) = Connection::new(
                                    id,
                                    stream,
                                    addr,
                                    blueprint.clone(),
                                    read_buffer_size,
                                );
                                let connection = Arc::new(connection);
                                table.push(connection.clone());
                                (connection, reader)
                            };
                            let id = connection.id();
                            tracing::info!("[{}] Producer connected from {}", id, addr);

                            if events.send(PollEvent::Accept { id }).await.is_err() {
                                break;
                            }
                            let task = tokio::spawn(Self::read_loop(
                                reader,
                                connection.clone(),
                                events.clone(),
                            ));
                            connection.set_reader_task(task);
                        }
                        Err(e) if is_transient_accept_error(&e) => {
                            tracing::warn!("Accept error: {}", e);
                        }
                        Err(e) => {
                            tracing::error!("Listening socket failed: {}", e);
                            let _ = events
                                .send(PollEvent::Fail { id: None, error: e.into() })
                                .await;
                            break;
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::debug!("Accept loop shutting down");
                    break;
                }
            }
        }
    }

    async fn read_loop(
        mut reader: ConnectionReader,
        connection: Arc<Connection>,
        events: mpsc::Sender<PollEvent>,
    ) {
        let id = reader.id();
        loop {
            match reader.read().await {
                Ok(messages) => {
                    for message in messages {
                        if events.send(PollEvent::Read { id, message }).await.is_err() {
                            return;
                        }
                    }
                }
                Err(error) => {
                    if connection.is_closed() {
                        return;
                    }
                    tracing::debug!("[{}] Read failed: {}", id, error);
                    let _ = events
                        .send(PollEvent::Fail {
                            id: Some(id),
                            error,
                        })
                        .await;
                    return;
                }
            }
        }
    }

    /// Returns the next event, or `None` if nothing arrived within the poll
    /// timeout.
    ///
    /// Concurrent callers are serialised.
    pub async fn poll(&self) -> Option<PollEvent> {
        let mut events = self.events.lock().await;
        match tokio::time::timeout(self.poll_timeout, events.recv()).await {
            Ok(Some(event)) => Some(event),
            Ok(None) if self.is_closed() => None,
            Ok(None) => Some(PollEvent::Fail {
                id: None,
                error: ServerError::ShuttingDown,
            }),
            Err(_) => None,
        }
    }

    fn connection(&self, id: ConnectionId) -> Result<Arc<Connection>, ServerError> {
        self.connections
            .read()
            .get(id.index())
            .cloned()
            .ok_or(ServerError::UnknownConnection(id))
    }

    /// Writes one message to a connection.
    pub async fn write(
        &self,
        id: ConnectionId,
        msg_type: u8,
        payload: &Payload,
    ) -> Result<(), ServerError> {
        let connection = self.connection(id)?;
        connection.write(msg_type, payload).await
    }

    /// Writes a prepared message to a connection.
    pub async fn write_message(&self, id: ConnectionId, message: &Message) -> Result<(), ServerError> {
        self.write(id, message.msg_type, &message.payload).await
    }

    pub fn remote_address(&self, id: ConnectionId) -> Result<SocketAddr, ServerError> {
        Ok(self.connection(id)?.remote_addr())
    }

    /// Closes one connection. Unknown ids are ignored.
    pub async fn close_connection(&self, id: ConnectionId) {
        if let Ok(connection) = self.connection(id) {
            connection.close().await;
        }
    }

    /// Number of connections that have not been closed.
    pub fn connection_count(&self) -> usize {
        self.connections
            .read()
            .iter()
            .filter(|c| !c.is_closed())
            .count()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Stops accepting and closes every connection. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("Closing server on {}", self.local_addr);

        let _ = self.shutdown.send(());
        if let Some(task) = self.accept_task.lock().take() {
            task.abort();
        }

        let connections: Vec<_> = self.connections.read().iter().cloned().collect();
        for connection in connections {
            connection.close().await;
        }
    }
}

#[cfg(test)]
impl ConnectionServer {
    /// Queues an event as if a server task had produced it.
    pub(crate) async fn inject(&self, event: PollEvent) -> bool {
        match self.injector.upgrade() {
            Some(events) => events.send(event).await.is_ok(),
            None => false,
        }
    }
}

impl Drop for ConnectionServer {
    fn drop(&mut self) {
        if let Some(task) = self.accept_task.lock().take() {
            task.abort();
        }
    }
}

/// Errors raised for a single failed handshake rather than the listener.
fn is_transient_accept_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}
