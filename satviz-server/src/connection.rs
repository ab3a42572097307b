//! One accepted producer socket.
//!
//! The socket is split: a [`ConnectionReader`] owns the read half and turns
//! bytes into messages, while [`Connection`] guards the write half so that
//! concurrent writers never interleave frames.

use crate::error::ServerError;
use crate::server::ConnectionId;
use parking_lot::Mutex as SyncMutex;
use satviz_protocol::{Blueprint, Decoder, Encoder, Message, Payload, ProtocolError};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Write side and lifecycle of one connection.
pub struct Connection {
    id: ConnectionId,
    remote_addr: SocketAddr,
    blueprint: Arc<Blueprint>,
    writer: Mutex<Option<OwnedWriteHalf>>,
    reader_task: SyncMutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl Connection {
    /// Splits `stream` into a connection and its reader.
    pub fn new(
        id: ConnectionId,
        stream: TcpStream,
        remote_addr: SocketAddr,
        blueprint: Arc<Blueprint>,
        read_buffer_size: usize,
    ) -> (Self, ConnectionReader) {
        stream.set_nodelay(true).ok();
        let (read_half, write_half) = stream.into_split();
        let reader = ConnectionReader {
            id,
            reader: read_half,
            decoder: Decoder::new(blueprint.clone()),
            buf: vec![0u8; read_buffer_size],
            pending: None,
        };
        let connection = Self {
            id,
            remote_addr,
            blueprint,
            writer: Mutex::new(Some(write_half)),
            reader_task: SyncMutex::new(None),
            closed: AtomicBool::new(false),
        };
        (connection, reader)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Serializes one message and writes it completely.
    ///
    /// Writes on the same connection are serialized; a stalled peer only
    /// stalls writers of this connection.
    pub async fn write(&self, msg_type: u8, payload: &Payload) -> Result<(), ServerError> {
        let frame = Encoder::encode(&self.blueprint, msg_type, payload)?;

        let mut writer_guard = self.writer.lock().await;
        let writer = writer_guard.as_mut().ok_or(ServerError::ConnectionClosed)?;
        tracing::debug!("[{}] Writing {} bytes", self.id, frame.len());
        writer.write_all(&frame).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Attaches the task that drives this connection's reader.
    pub(crate) fn set_reader_task(&self, task: JoinHandle<()>) {
        let mut slot = self.reader_task.lock();
        if self.is_closed() {
            task.abort();
            return;
        }
        *slot = Some(task);
    }

    /// Returns whether close has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Closes the socket. Idempotent; errors are ignored.
    pub async fn close(&self) {
        // `closed` flips under the reader slot lock so a task attached
        // concurrently is either aborted here or by `set_reader_task`.
        let reader_task = {
            let mut slot = self.reader_task.lock();
            if self.closed.swap(true, Ordering::SeqCst) {
                return;
            }
            slot.take()
        };
        tracing::debug!("[{}] Closing connection to {}", self.id, self.remote_addr);

        if let Some(task) = reader_task {
            task.abort();
        }
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
    }
}

/// Read side of one connection.
pub struct ConnectionReader {
    id: ConnectionId,
    reader: OwnedReadHalf,
    decoder: Decoder,
    buf: Vec<u8>,
    pending: Option<ProtocolError>,
}

impl ConnectionReader {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Waits for the next chunk of bytes and returns the messages it
    /// completed, in order. The queue may be empty.
    ///
    /// After a decode error every call fails; the stream is never
    /// resynchronised. Messages completed before the error are returned
    /// first and the error is reported by the following call.
    pub async fn read(&mut self) -> Result<VecDeque<Message>, ServerError> {
        if let Some(e) = self.pending.take() {
            return Err(e.into());
        }
        if let Some(failure) = self.decoder.failure() {
            return Err(ProtocolError::ReadFailed(failure.to_string()).into());
        }

        let n = self.reader.read(&mut self.buf).await?;
        if n == 0 {
            tracing::debug!("[{}] Connection closed by peer", self.id);
            return Err(ServerError::ConnectionClosed);
        }
        tracing::debug!("[{}] Received {} bytes", self.id, n);

        let mut messages = VecDeque::new();
        match self.decoder.decode(&self.buf[..n], &mut messages) {
            Ok(()) => Ok(messages),
            Err(e) if messages.is_empty() => Err(e.into()),
            Err(e) => {
                self.pending = Some(e);
                Ok(messages)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use satviz_protocol::{ClauseUpdate, MessageType};
    use tokio::net::TcpListener;

    async fn pair() -> (Connection, ConnectionReader, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, remote) = listener.accept().await.unwrap();
        let (conn, reader) = Connection::new(
            ConnectionId(0),
            server,
            remote,
            Arc::new(Blueprint::satviz()),
            1024,
        );
        (conn, reader, client)
    }

    /// Reads until at least one message is complete.
    async fn read_some(reader: &mut ConnectionReader) -> VecDeque<Message> {
        loop {
            let messages = reader.read().await.unwrap();
            if !messages.is_empty() {
                return messages;
            }
        }
    }

    #[tokio::test]
    async fn test_read_decodes_messages() {
        let (_conn, mut reader, mut client) = pair().await;
        client.write_all(&[2, 0, b'a', 0x02]).await.unwrap();

        let messages = read_some(&mut reader).await;
        assert_eq!(messages.into_iter().collect::<Vec<_>>(), vec![Message::start()]);

        client.write_all(&[0x00]).await.unwrap();
        let mut messages = read_some(&mut reader).await;
        assert_eq!(
            messages.pop_front(),
            Some(Message::clause_update(ClauseUpdate::add(vec![1])))
        );
    }

    #[tokio::test]
    async fn test_read_error_is_sticky() {
        let (_conn, mut reader, mut client) = pair().await;
        client.write_all(&[2, 0, 0xee]).await.unwrap();

        let messages = read_some(&mut reader).await;
        assert_eq!(messages.len(), 1);
        let err = reader.read().await.unwrap_err();
        assert!(matches!(
            err,
            ServerError::Protocol(ProtocolError::UnknownMessageType(0xee))
        ));
        let err = reader.read().await.unwrap_err();
        assert!(matches!(
            err,
            ServerError::Protocol(ProtocolError::ReadFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_read_eof() {
        let (_conn, mut reader, client) = pair().await;
        drop(client);
        assert!(matches!(
            reader.read().await,
            Err(ServerError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_write_and_close() {
        let (conn, _reader, mut client) = pair().await;
        conn.write(MessageType::Stop.as_u8(), &Payload::None)
            .await
            .unwrap();

        let mut buf = [0u8; 2];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [3, 0]);

        conn.close().await;
        conn.close().await;
        assert!(conn.is_closed());
        assert!(matches!(
            conn.write(MessageType::Stop.as_u8(), &Payload::None).await,
            Err(ServerError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_write_rejects_wrong_payload() {
        let (conn, _reader, _client) = pair().await;
        let err = conn
            .write(MessageType::Start.as_u8(), &Payload::Int(3))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServerError::Protocol(ProtocolError::PayloadMismatch { .. })
        ));
    }

    async fn finishes(handle: tokio::task::AbortHandle) -> bool {
        let wait = async {
            while !handle.is_finished() {
                tokio::task::yield_now().await;
            }
        };
        tokio::time::timeout(std::time::Duration::from_secs(1), wait)
            .await
            .is_ok()
    }

    #[tokio::test]
    async fn test_reader_task_aborted_on_close() {
        let (conn, _reader, _client) = pair().await;
        let attached = tokio::spawn(std::future::pending::<()>());
        conn.set_reader_task(attached);
        let handle = conn.reader_task.lock().as_ref().map(|t| t.abort_handle());
        conn.close().await;
        assert!(conn.reader_task.lock().is_none());
        assert!(finishes(handle.unwrap()).await);

        let late = tokio::spawn(std::future::pending::<()>());
        let late_handle = late.abort_handle();
        conn.set_reader_task(late);
        assert!(conn.reader_task.lock().is_none());
        assert!(finishes(late_handle).await);
    }
}
