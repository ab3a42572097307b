//! Consumer side of the session protocol.
//!
//! A [`ConsumerConnection`] owns a [`ConnectionServer`] and one worker task.
//! The worker polls the server and drives every producer through
//! OFFER, START, the clause stream and termination, calling the attached
//! listeners synchronously. A slow listener therefore delays every other
//! producer of the same consumer.

use crate::error::ServerError;
use crate::producer::ProducerId;
use crate::server::{ConnectionId, ConnectionServer, PollEvent, ServerConfig};
use crate::session::{Detached, Session, SessionState};
use parking_lot::{Mutex as SyncMutex, RwLock};
use satviz_protocol::{
    Blueprint, ClauseUpdate, Message, MessageType, Offer, Payload, SatAssignment,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

/// Reason passed to listeners when the consumer shuts down.
pub const STOPPED_REASON: &str = "consumer stopped";

/// Receives the stream of one connected producer.
///
/// All methods run on the consumer's worker task. Each terminate method is
/// called at most once per producer, and nothing is called after it.
pub trait ConsumerConnectionListener: Send + Sync {
    fn on_clause_update(&self, _producer: &ProducerId, _update: &ClauseUpdate) {}

    fn on_terminate_solved(&self, _producer: &ProducerId, _assignment: &SatAssignment) {}

    fn on_terminate_refuted(&self, _producer: &ProducerId) {}

    /// The producer stopped for another reason, the connection failed or the
    /// consumer shut down.
    fn on_terminate_otherwise(&self, _producer: &ProducerId, _reason: &str) {}
}

type ConnectCallback = Box<dyn Fn(ProducerId) + Send + Sync>;
type FailCallback = Box<dyn Fn(String) + Send + Sync>;

type SessionHandle = Arc<Mutex<Session>>;

/// Consumer endpoint accepting producers.
///
/// Cloning yields another handle to the same consumer. Dropping the last
/// handle stops it.
#[derive(Clone)]
pub struct ConsumerConnection {
    inner: Arc<Inner>,
    _stop_guard: Arc<StopGuard>,
}

/// Shared by all handles; the worker does not hold one.
struct StopGuard(Arc<Inner>);

impl Drop for StopGuard {
    fn drop(&mut self) {
        self.0.request_stop();
    }
}

struct Inner {
    config: ServerConfig,
    blueprint: Arc<Blueprint>,
    server: OnceLock<Arc<ConnectionServer>>,
    sessions: RwLock<Vec<SessionHandle>>,
    on_connect: ConnectCallback,
    on_fail: FailCallback,
    started: AtomicBool,
    stopping: AtomicBool,
    running: AtomicBool,
    shutdown: broadcast::Sender<()>,
    worker: SyncMutex<Option<JoinHandle<()>>>,
}

impl ConsumerConnection {
    /// Creates a consumer. Nothing is bound until [`start`](Self::start).
    ///
    /// `on_connect` is called once for every producer that sends a valid
    /// OFFER. `on_fail` is called once if the server itself fails.
    pub fn new<C, F>(config: impl Into<ServerConfig>, on_connect: C, on_fail: F) -> Self
    where
        C: Fn(ProducerId) + Send + Sync + 'static,
        F: Fn(String) + Send + Sync + 'static,
    {
        let (shutdown, _) = broadcast::channel(1);
        let inner = Arc::new(Inner {
            config: config.into(),
            blueprint: Arc::new(Blueprint::satviz()),
            server: OnceLock::new(),
            sessions: RwLock::new(Vec::new()),
            on_connect: Box::new(on_connect),
            on_fail: Box::new(on_fail),
            started: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
            running: AtomicBool::new(false),
            shutdown,
            worker: SyncMutex::new(None),
        });
        Self {
            _stop_guard: Arc::new(StopGuard(inner.clone())),
            inner,
        }
    }

    /// Binds the listening socket and spawns the worker.
    pub async fn start(&self) -> Result<SocketAddr, ServerError> {
        let inner = &self.inner;
        if inner.started.swap(true, Ordering::SeqCst) {
            return Err(ServerError::AlreadyStarted);
        }

        let server = match ConnectionServer::bind(inner.config.clone(), inner.blueprint.clone()).await
        {
            Ok(server) => Arc::new(server),
            Err(e) => {
                inner.started.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };
        let addr = server.local_addr();
        let _ = inner.server.set(server.clone());

        inner.running.store(true, Ordering::SeqCst);
        let shutdown_rx = inner.shutdown.subscribe();
        let worker = tokio::spawn(inner.clone().run(server, shutdown_rx));
        *inner.worker.lock() = Some(worker);

        Ok(addr)
    }

    /// Accepts an identified producer: sends START and attaches `listener`.
    ///
    /// Returns false if the producer is unknown, not waiting to be
    /// connected, or START could not be sent.
    pub async fn connect(
        &self,
        producer: &ProducerId,
        listener: Arc<dyn ConsumerConnectionListener>,
    ) -> bool {
        let (Some(server), Some(session)) = (self.inner.server.get(), self.inner.session(producer.id()))
        else {
            return false;
        };

        let mut session = session.lock().await;
        if session.state() != SessionState::Identified || session.producer() != Some(producer) {
            return false;
        }
        if let Err(e) = server.write_message(producer.id(), &Message::start()).await {
            tracing::warn!("[{}] Failed to send START: {}", producer.id(), e);
            return false;
        }
        session.attach(listener);
        tracing::info!("[{}] Started {}", producer.id(), producer);
        true
    }

    /// Sends STOP to a producer and closes its connection.
    ///
    /// No listener is called. Returns false if the producer is unknown or
    /// already disconnected.
    pub async fn disconnect(&self, producer: &ProducerId) -> bool {
        let (Some(server), Some(session)) = (self.inner.server.get(), self.inner.session(producer.id()))
        else {
            return false;
        };

        let mut session = session.lock().await;
        if session.producer() != Some(producer) || session.disconnect().is_none() {
            return false;
        }
        if let Err(e) = server.write_message(producer.id(), &Message::stop()).await {
            tracing::debug!("[{}] Failed to send STOP: {}", producer.id(), e);
        }
        server.close_connection(producer.id()).await;
        tracing::info!("[{}] Disconnected {}", producer.id(), producer);
        true
    }

    /// Requests shutdown. The worker stops every active producer and closes
    /// the server; use [`stop_and_wait`](Self::stop_and_wait) to wait for it.
    pub fn stop(&self) {
        self.inner.request_stop();
    }

    /// Requests shutdown and waits until the worker has finished.
    pub async fn stop_and_wait(&self) {
        self.stop();
        let worker = self.inner.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                tracing::error!("Consumer worker panicked: {}", e);
            }
        }
    }

    /// Returns whether the worker is running.
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Bound address, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.server.get().map(|server| server.local_addr())
    }

    /// Session state of a connection.
    pub async fn session_state(&self, id: ConnectionId) -> Option<SessionState> {
        let session = self.inner.session(id)?;
        let state = session.lock().await.state();
        Some(state)
    }
}

impl Inner {
    fn request_stop(&self) {
        if !self.stopping.swap(true, Ordering::SeqCst) {
            tracing::debug!("Consumer stop requested");
            let _ = self.shutdown.send(());
        }
    }

    fn session(&self, id: ConnectionId) -> Option<SessionHandle> {
        self.sessions.read().get(id.index()).cloned()
    }

    async fn run(self: Arc<Self>, server: Arc<ConnectionServer>, mut shutdown_rx: broadcast::Receiver<()>) {
        tracing::info!("Consumer listening on {}", server.local_addr());

        let failure = loop {
            if self.stopping.load(Ordering::SeqCst) {
                break None;
            }
            let event = tokio::select! {
                event = server.poll() => event,
                _ = shutdown_rx.recv() => None,
            };
            if let Some(event) = event {
                if let Err(reason) = self.dispatch(&server, event).await {
                    break Some(reason);
                }
            }
        };

        match failure {
            None => {
                tracing::info!("Consumer stopping");
                self.teardown(&server, STOPPED_REASON).await;
            }
            Some(reason) => {
                tracing::error!("Consumer failed: {}", reason);
                self.teardown(&server, &reason).await;
                (self.on_fail)(reason);
            }
        }
    }

    /// Handles one event. An error is a failure of the whole server.
    async fn dispatch(&self, server: &ConnectionServer, event: PollEvent) -> Result<(), String> {
        match event {
            PollEvent::Accept { id } => {
                let mut sessions = self.sessions.write();
                while sessions.len() <= id.index() {
                    let next = ConnectionId(sessions.len());
                    sessions.push(Arc::new(Mutex::new(Session::new(next))));
                }
            }
            PollEvent::Read { id, message } => {
                if let Some(session) = self.session(id) {
                    self.on_message(server, &session, id, message).await;
                }
            }
            PollEvent::Fail { id: Some(id), error } => {
                if let Some(session) = self.session(id) {
                    self.on_connection_failed(server, &session, id, error).await;
                }
            }
            PollEvent::Fail { id: None, error } => return Err(error.to_string()),
        }
        Ok(())
    }

    async fn on_message(
        &self,
        server: &ConnectionServer,
        session: &SessionHandle,
        id: ConnectionId,
        message: Message,
    ) {
        let Some(kind) = message.kind() else {
            return;
        };

        match kind {
            MessageType::Offer => self.on_offer(server, session, id, message.payload).await,
            MessageType::ClauseAdd | MessageType::ClauseDel => {
                let session = session.lock().await;
                let (Some(listener), Some(producer)) = (session.listener(), session.producer())
                else {
                    tracing::debug!("[{}] Ignoring clause update while {}", id, session.state());
                    return;
                };
                if let Some(update) = message.into_clause_update() {
                    listener.on_clause_update(producer, &update);
                }
            }
            MessageType::TermSolve | MessageType::TermRefute | MessageType::TermOther => {
                let (detached, producer) = {
                    let mut session = session.lock().await;
                    (session.disconnect(), session.producer().cloned())
                };
                let Some(detached) = detached else {
                    tracing::debug!("[{}] Ignoring {} after disconnect", id, kind);
                    return;
                };
                tracing::info!("[{}] Producer terminated with {}", id, kind);
                server.close_connection(id).await;

                let (Some(listener), Some(producer)) = (detached.listener, producer) else {
                    return;
                };
                match (kind, &message.payload) {
                    (MessageType::TermSolve, Payload::Assignment(assignment)) => {
                        listener.on_terminate_solved(&producer, assignment)
                    }
                    (MessageType::TermOther, Payload::Text(reason)) => {
                        listener.on_terminate_otherwise(&producer, reason)
                    }
                    (MessageType::TermRefute, _) => listener.on_terminate_refuted(&producer),
                    (kind, payload) => tracing::warn!(
                        "[{}] Dropping {} with {} payload",
                        id,
                        kind,
                        payload.kind()
                    ),
                }
            }
            MessageType::Start | MessageType::Stop => {
                tracing::debug!("[{}] Ignoring {} from producer", id, kind);
            }
        }
    }

    async fn on_offer(
        &self,
        server: &ConnectionServer,
        session: &SessionHandle,
        id: ConnectionId,
        payload: Payload,
    ) {
        let Payload::Map(map) = payload else {
            return;
        };

        let mut session = session.lock().await;
        if session.state() != SessionState::Unattached {
            tracing::debug!("[{}] Ignoring repeated OFFER", id);
            return;
        }

        let identity = Offer::from_map(&map)
            .map_err(ServerError::from)
            .and_then(|offer| Ok(ProducerId::new(id, server.remote_address(id)?, offer)));
        let producer = match identity {
            Ok(producer) => producer,
            Err(e) => {
                tracing::warn!("[{}] Rejecting invalid OFFER: {}", id, e);
                session.disconnect();
                drop(session);
                server.close_connection(id).await;
                return;
            }
        };

        session.identify(producer.clone());
        drop(session);

        tracing::info!("[{}] Offer from {}", id, producer);
        (self.on_connect)(producer);
    }

    async fn on_connection_failed(
        &self,
        server: &ConnectionServer,
        session: &SessionHandle,
        id: ConnectionId,
        error: ServerError,
    ) {
        let (detached, producer) = {
            let mut session = session.lock().await;
            (session.disconnect(), session.producer().cloned())
        };
        server.close_connection(id).await;

        let Some(Detached { previous, listener }) = detached else {
            return;
        };
        match &error {
            ServerError::ConnectionClosed => {
                tracing::info!("[{}] Producer closed the connection while {}", id, previous)
            }
            e => tracing::warn!("[{}] Connection failed while {}: {}", id, previous, e),
        }
        if let (Some(listener), Some(producer)) = (listener, producer) {
            listener.on_terminate_otherwise(&producer, &error.to_string());
        }
    }

    /// Stops every active producer and closes the server.
    async fn teardown(&self, server: &ConnectionServer, reason: &str) {
        self.running.store(false, Ordering::SeqCst);

        let sessions: Vec<SessionHandle> = self.sessions.read().clone();
        for session in sessions {
            let mut session = session.lock().await;
            let id = session.id();
            let producer = session.producer().cloned();
            let Some(detached) = session.disconnect() else {
                continue;
            };
            if detached.previous == SessionState::Active {
                if let Err(e) = server.write_message(id, &Message::stop()).await {
                    tracing::debug!("[{}] Failed to send STOP: {}", id, e);
                }
            }
            if let (Some(listener), Some(producer)) = (detached.listener, producer) {
                listener.on_terminate_otherwise(&producer, reason);
            }
        }

        server.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use satviz_protocol::{Encoder, VariableState};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::sync::mpsc;

    struct Recorder(mpsc::UnboundedSender<String>);

    impl ConsumerConnectionListener for Recorder {
        fn on_clause_update(&self, _producer: &ProducerId, update: &ClauseUpdate) {
            let _ = self.0.send(format!("{:?} {}", update.kind, update.clause));
        }

        fn on_terminate_solved(&self, _producer: &ProducerId, assignment: &SatAssignment) {
            let _ = self.0.send(format!("solved {}", assignment.var_count()));
        }

        fn on_terminate_refuted(&self, _producer: &ProducerId) {
            let _ = self.0.send("refuted".to_string());
        }

        fn on_terminate_otherwise(&self, _producer: &ProducerId, reason: &str) {
            let _ = self.0.send(format!("other {}", reason));
        }
    }

    struct Harness {
        consumer: ConsumerConnection,
        connects: mpsc::UnboundedReceiver<ProducerId>,
        fails: mpsc::UnboundedReceiver<String>,
    }

    async fn harness() -> Harness {
        let (connect_tx, connects) = mpsc::unbounded_channel();
        let (fail_tx, fails) = mpsc::unbounded_channel();
        let config = ServerConfig::new("127.0.0.1:0".parse().unwrap())
            .with_poll_timeout(Duration::from_millis(50));
        let consumer = ConsumerConnection::new(
            config,
            move |pid| {
                let _ = connect_tx.send(pid);
            },
            move |reason| {
                let _ = fail_tx.send(reason);
            },
        );
        consumer.start().await.unwrap();
        Harness {
            consumer,
            connects,
            fails,
        }
    }

    async fn recv<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out")
            .expect("channel closed")
    }

    async fn send(stream: &mut TcpStream, message: Message) {
        let frame = Encoder::encode_message(&Blueprint::satviz(), &message).unwrap();
        stream.write_all(&frame).await.unwrap();
    }

    async fn expect_bytes(stream: &mut TcpStream, expected: &[u8]) {
        let mut buf = vec![0u8; expected.len()];
        tokio::time::timeout(Duration::from_secs(5), stream.read_exact(&mut buf))
            .await
            .expect("timed out")
            .unwrap();
        assert_eq!(buf, expected);
    }

    async fn expect_eof(stream: &mut TcpStream) {
        let mut buf = [0u8; 16];
        let n = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf))
            .await
            .expect("timed out")
            .unwrap_or(0);
        assert_eq!(n, 0);
    }

    async fn offered(h: &mut Harness, offer: Offer) -> (TcpStream, ProducerId) {
        let addr = h.consumer.local_addr().unwrap();
        let mut stream = TcpStream::connect(addr).await.unwrap();
        send(&mut stream, Message::offer(offer.to_map())).await;
        let pid = recv(&mut h.connects).await;
        (stream, pid)
    }

    #[tokio::test]
    async fn test_start_twice() {
        let h = harness().await;
        assert!(h.consumer.is_running());
        assert!(matches!(
            h.consumer.start().await,
            Err(ServerError::AlreadyStarted)
        ));
        h.consumer.stop_and_wait().await;
        assert!(!h.consumer.is_running());
    }

    #[tokio::test]
    async fn test_session_flow() {
        let mut h = harness().await;
        let (mut stream, pid) = offered(&mut h, Offer::solver("cadical", false, 7)).await;
        assert_eq!(pid.id(), ConnectionId(0));
        assert_eq!(pid.solver_name(), Some("cadical"));
        assert_eq!(pid.address(), stream.local_addr().unwrap());

        let (tx, mut events) = mpsc::unbounded_channel();
        assert!(h.consumer.connect(&pid, Arc::new(Recorder(tx.clone()))).await);
        assert!(!h.consumer.connect(&pid, Arc::new(Recorder(tx))).await);
        expect_bytes(&mut stream, &[2, 0]).await;

        send(&mut stream, Message::clause_update(ClauseUpdate::add(vec![1, -2]))).await;
        send(&mut stream, Message::clause_update(ClauseUpdate::remove(vec![3]))).await;
        let mut assignment = SatAssignment::new(3);
        assignment.set(1, VariableState::Set);
        send(&mut stream, Message::term_solve(assignment)).await;

        assert_eq!(recv(&mut events).await, "Add 1 -2 0");
        assert_eq!(recv(&mut events).await, "Remove 3 0");
        assert_eq!(recv(&mut events).await, "solved 3");
        expect_eof(&mut stream).await;
        assert_eq!(
            h.consumer.session_state(pid.id()).await,
            Some(SessionState::Disconnected)
        );

        h.consumer.stop_and_wait().await;
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_clause_before_offer_is_ignored() {
        let mut h = harness().await;
        let addr = h.consumer.local_addr().unwrap();
        let mut stream = TcpStream::connect(addr).await.unwrap();
        send(&mut stream, Message::clause_update(ClauseUpdate::add(vec![9]))).await;
        send(&mut stream, Message::offer(Offer::Proof.to_map())).await;
        let pid = recv(&mut h.connects).await;

        let (tx, mut events) = mpsc::unbounded_channel();
        assert!(h.consumer.connect(&pid, Arc::new(Recorder(tx))).await);
        expect_bytes(&mut stream, &[2, 0]).await;
        send(&mut stream, Message::clause_update(ClauseUpdate::add(vec![2]))).await;
        send(&mut stream, Message::term_other("budget exhausted")).await;

        assert_eq!(recv(&mut events).await, "Add 2 0");
        assert_eq!(recv(&mut events).await, "other budget exhausted");
    }

    #[tokio::test]
    async fn test_invalid_offer_closes_connection() {
        let mut h = harness().await;
        let addr = h.consumer.local_addr().unwrap();
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let mut map = satviz_protocol::StringMap::new();
        map.insert("type".to_string(), "oracle".to_string());
        send(&mut stream, Message::offer(map)).await;

        expect_eof(&mut stream).await;
        assert!(h.connects.try_recv().is_err());
        assert_eq!(
            h.consumer.session_state(ConnectionId(0)).await,
            Some(SessionState::Disconnected)
        );

        let (_other, pid) = offered(&mut h, Offer::Proof).await;
        assert_eq!(pid.id(), ConnectionId(1));
    }

    #[tokio::test]
    async fn test_disconnect_sends_stop_once() {
        let mut h = harness().await;
        let (mut stream, pid) = offered(&mut h, Offer::Proof).await;
        let (tx, mut events) = mpsc::unbounded_channel();
        assert!(h.consumer.connect(&pid, Arc::new(Recorder(tx))).await);
        expect_bytes(&mut stream, &[2, 0]).await;

        assert!(h.consumer.disconnect(&pid).await);
        assert!(!h.consumer.disconnect(&pid).await);
        expect_bytes(&mut stream, &[3, 0]).await;
        expect_eof(&mut stream).await;

        h.consumer.stop_and_wait().await;
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_disconnect_identified_producer() {
        let mut h = harness().await;
        let (mut stream, pid) = offered(&mut h, Offer::Proof).await;
        assert!(h.consumer.disconnect(&pid).await);
        expect_bytes(&mut stream, &[3, 0]).await;

        let (tx, _events) = mpsc::unbounded_channel();
        assert!(!h.consumer.connect(&pid, Arc::new(Recorder(tx))).await);
    }

    #[tokio::test]
    async fn test_producer_failure_reports_once() {
        let mut h = harness().await;
        let (mut stream, pid) = offered(&mut h, Offer::Proof).await;
        let (tx, mut events) = mpsc::unbounded_channel();
        assert!(h.consumer.connect(&pid, Arc::new(Recorder(tx))).await);
        expect_bytes(&mut stream, &[2, 0]).await;

        stream.write_all(&[0x7f]).await.unwrap();
        let event = recv(&mut events).await;
        assert!(event.starts_with("other protocol error"), "{}", event);

        h.consumer.stop_and_wait().await;
        assert!(events.try_recv().is_err());
        assert!(h.fails.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stop_terminates_active_producers() {
        let mut h = harness().await;
        let (mut active, pid) = offered(&mut h, Offer::solver("kissat", true, 1)).await;
        let (mut idle, _idle_pid) = offered(&mut h, Offer::Proof).await;

        let (tx, mut events) = mpsc::unbounded_channel();
        assert!(h.consumer.connect(&pid, Arc::new(Recorder(tx))).await);
        expect_bytes(&mut active, &[2, 0]).await;

        h.consumer.stop_and_wait().await;
        assert!(!h.consumer.is_running());
        assert_eq!(recv(&mut events).await, format!("other {}", STOPPED_REASON));
        expect_bytes(&mut active, &[3, 0]).await;
        expect_eof(&mut active).await;
        expect_eof(&mut idle).await;

        assert!(events.try_recv().is_err());
        assert!(h.fails.try_recv().is_err());
        assert!(!h.consumer.disconnect(&pid).await);
    }

    #[tokio::test]
    async fn test_second_terminal_in_same_write_is_ignored() {
        let mut h = harness().await;
        let (mut stream, pid) = offered(&mut h, Offer::Proof).await;
        let (tx, mut events) = mpsc::unbounded_channel();
        assert!(h.consumer.connect(&pid, Arc::new(Recorder(tx))).await);
        expect_bytes(&mut stream, &[2, 0]).await;

        let blueprint = Blueprint::satviz();
        let mut frames = Encoder::encode_message(&blueprint, &Message::term_refute()).unwrap();
        frames.extend(Encoder::encode_message(&blueprint, &Message::term_other("late")).unwrap());
        stream.write_all(&frames).await.unwrap();

        assert_eq!(recv(&mut events).await, "refuted");
        expect_eof(&mut stream).await;

        h.consumer.stop_and_wait().await;
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_global_failure_tears_down_once() {
        let mut h = harness().await;
        let (mut active, pid) = offered(&mut h, Offer::Proof).await;
        let (mut idle, _idle_pid) = offered(&mut h, Offer::Proof).await;
        let (tx, mut events) = mpsc::unbounded_channel();
        assert!(h.consumer.connect(&pid, Arc::new(Recorder(tx))).await);
        expect_bytes(&mut active, &[2, 0]).await;

        let error = ServerError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            "listener lost",
        ));
        let reason = error.to_string();
        let server = h.consumer.inner.server.get().unwrap().clone();
        assert!(server.inject(PollEvent::Fail { id: None, error }).await);

        assert_eq!(recv(&mut h.fails).await, reason);
        assert_eq!(recv(&mut events).await, format!("other {}", reason));
        expect_bytes(&mut active, &[3, 0]).await;
        expect_eof(&mut active).await;
        expect_eof(&mut idle).await;
        assert!(!h.consumer.is_running());
        assert!(server.is_closed());

        h.consumer.stop_and_wait().await;
        assert!(h.fails.try_recv().is_err());
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dropping_last_handle_stops() {
        let mut h = harness().await;
        let (mut active, pid) = offered(&mut h, Offer::Proof).await;
        let (tx, mut events) = mpsc::unbounded_channel();
        assert!(h.consumer.connect(&pid, Arc::new(Recorder(tx))).await);
        expect_bytes(&mut active, &[2, 0]).await;

        let clone = h.consumer.clone();
        drop(h.consumer);
        assert!(clone.is_running());

        drop(clone);
        assert_eq!(recv(&mut events).await, format!("other {}", STOPPED_REASON));
        expect_bytes(&mut active, &[3, 0]).await;
        expect_eof(&mut active).await;
        assert!(h.fails.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_terminal_with_wrong_payload_is_not_reported() {
        let mut h = harness().await;
        let (mut stream, pid) = offered(&mut h, Offer::Proof).await;
        let (tx, mut events) = mpsc::unbounded_channel();
        assert!(h.consumer.connect(&pid, Arc::new(Recorder(tx))).await);
        expect_bytes(&mut stream, &[2, 0]).await;

        let server = h.consumer.inner.server.get().unwrap().clone();
        let message = Message::new(MessageType::TermSolve.as_u8(), Payload::None);
        assert!(server.inject(PollEvent::Read { id: pid.id(), message }).await);

        expect_eof(&mut stream).await;
        assert_eq!(
            h.consumer.session_state(pid.id()).await,
            Some(SessionState::Disconnected)
        );
        h.consumer.stop_and_wait().await;
        assert!(events.try_recv().is_err());
    }
}
