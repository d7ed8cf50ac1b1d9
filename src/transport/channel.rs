//! # Channel
//!
//! One TCP connection and its framing state.
//!
//! The [`Channel`] value itself lives inside its service's driver task and is
//! only ever touched there. Socket I/O runs in two helper tasks per channel:
//!
//! - the **reader** owns the receive [`RingBuffer`] and the [`PacketParser`];
//!   it reads straight into the buffer's write region and posts every decoded
//!   packet back to the driver, in stream order
//! - the **writer** receives one send window at a time, writes it out and
//!   reports the byte count back, so the driver can advance the send buffer
//!   and issue the next window
//!
//! Both helpers only talk to the driver through [`IoEvent`]s. A zero-byte
//! read, a socket error or a framing error ends the helper with
//! [`IoEvent::Failed`]; the driver then removes the channel. A broken socket
//! is never retried.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::core::packet::{inner_header, outer_header, Packet, ServiceKind};
use crate::core::parser::PacketParser;
use crate::core::ring_buffer::RingBuffer;
use crate::error::codes::{
    ERR_CONNECT_TIMEOUT, ERR_PACKET_PARSER_ERROR, ERR_PEER_DISCONNECT, ERR_SOCKET_ERROR,
};
use crate::error::{ProtocolError, Result};
use crate::transport::channel_id::ChannelId;
use crate::utils::metrics::Metrics;
use crate::utils::timeout::with_timeout_error;

/// Which side opened the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelType {
    Connect,
    Accept,
}

/// Completion notices posted from socket tasks to the owning driver.
#[derive(Debug)]
pub(crate) enum IoEvent {
    Connected { channel_id: ChannelId, stream: TcpStream },
    Received { channel_id: ChannelId, packet: Packet },
    Sent { channel_id: ChannelId, count: usize },
    Failed { channel_id: ChannelId, code: i32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChannelState {
    Connecting,
    Connected,
}

/// Settings shared by every channel of one service.
#[derive(Debug, Clone)]
pub(crate) struct ChannelOptions {
    pub kind: ServiceKind,
    pub chunk_size: usize,
    pub connect_timeout: Duration,
    pub metrics: Arc<Metrics>,
}

#[derive(Debug)]
pub(crate) struct Channel {
    id: ChannelId,
    channel_type: ChannelType,
    remote: SocketAddr,
    kind: ServiceKind,
    chunk_size: usize,
    state: ChannelState,
    send_buffer: RingBuffer,
    is_sending: bool,
    writer_tx: Option<mpsc::UnboundedSender<Bytes>>,
    tasks: Vec<JoinHandle<()>>,
    metrics: Arc<Metrics>,
}

impl Channel {
    fn new(
        id: ChannelId,
        channel_type: ChannelType,
        remote: SocketAddr,
        options: &ChannelOptions,
    ) -> Self {
        Self {
            id,
            channel_type,
            remote,
            kind: options.kind,
            chunk_size: options.chunk_size,
            state: ChannelState::Connecting,
            send_buffer: RingBuffer::new(options.chunk_size),
            is_sending: false,
            writer_tx: None,
            tasks: Vec::with_capacity(3),
            metrics: options.metrics.clone(),
        }
    }

    /// Start dialing `remote`. Sends issued before the connection completes
    /// are buffered and flushed once it does.
    pub(crate) fn connect(
        id: ChannelId,
        remote: SocketAddr,
        options: &ChannelOptions,
        events: mpsc::UnboundedSender<IoEvent>,
    ) -> Self {
        let mut channel = Self::new(id, ChannelType::Connect, remote, options);
        let timeout = options.connect_timeout;
        channel.tasks.push(tokio::spawn(async move {
            let dial = async { TcpStream::connect(remote).await.map_err(ProtocolError::from) };
            let event = match with_timeout_error(dial, timeout).await {
                Ok(stream) => IoEvent::Connected {
                    channel_id: id,
                    stream,
                },
                Err(ProtocolError::Timeout) => {
                    warn!(channel_id = %id, %remote, "Connect timed out");
                    IoEvent::Failed {
                        channel_id: id,
                        code: ERR_CONNECT_TIMEOUT,
                    }
                }
                Err(e) => {
                    warn!(channel_id = %id, %remote, error = %e, "Connect failed");
                    IoEvent::Failed {
                        channel_id: id,
                        code: ERR_SOCKET_ERROR,
                    }
                }
            };
            let _ = events.send(event);
        }));
        channel
    }

    /// Wrap a socket handed out by the listener.
    pub(crate) fn accept(
        id: ChannelId,
        stream: TcpStream,
        remote: SocketAddr,
        options: &ChannelOptions,
        events: mpsc::UnboundedSender<IoEvent>,
    ) -> Self {
        let mut channel = Self::new(id, ChannelType::Accept, remote, options);
        channel.start(stream, events);
        channel
    }

    /// Spawn the reader and writer for a connected socket.
    pub(crate) fn start(&mut self, stream: TcpStream, events: mpsc::UnboundedSender<IoEvent>) {
        if self.id.is_none() || self.state == ChannelState::Connected {
            return;
        }
        if let Err(e) = stream.set_nodelay(true) {
            debug!(channel_id = %self.id, error = %e, "Failed to set TCP_NODELAY");
        }

        let (read_half, write_half) = stream.into_split();
        let (writer_tx, writer_rx) = mpsc::unbounded_channel();

        let parser = PacketParser::new(self.kind);
        let buffer = RingBuffer::new(self.chunk_size);
        self.tasks.push(tokio::spawn(recv_loop(
            self.id,
            read_half,
            buffer,
            parser,
            events.clone(),
            self.metrics.clone(),
        )));
        self.tasks.push(tokio::spawn(send_loop(
            self.id,
            write_half,
            writer_rx,
            events,
            self.metrics.clone(),
        )));

        self.writer_tx = Some(writer_tx);
        self.state = ChannelState::Connected;
        info!(
            channel_id = %self.id,
            remote = %self.remote,
            channel_type = ?self.channel_type,
            "Channel connected"
        );
    }

    #[inline]
    pub(crate) fn id(&self) -> ChannelId {
        self.id
    }

    #[inline]
    pub(crate) fn remote(&self) -> SocketAddr {
        self.remote
    }

    #[inline]
    pub(crate) fn channel_type(&self) -> ChannelType {
        self.channel_type
    }

    /// Frame a message into the send buffer. Returns whether the channel now
    /// needs a flush.
    pub(crate) fn send(&mut self, actor_id: u64, opcode: u16, body: &[u8]) -> Result<bool> {
        if self.id.is_none() {
            return Err(ProtocolError::ConnectionClosed);
        }
        match self.kind {
            ServiceKind::Inner => {
                let header = inner_header(actor_id, opcode, body.len())?;
                self.send_buffer.write(&header);
            }
            ServiceKind::Outer => {
                let header = outer_header(opcode, body.len())?;
                self.send_buffer.write(&header);
            }
        }
        self.send_buffer.write(body);
        self.metrics.packet_sent();
        Ok(!self.is_sending && self.state == ChannelState::Connected)
    }

    /// Hand the next window of buffered bytes to the writer.
    pub(crate) fn start_send(&mut self) {
        if self.is_sending || self.state != ChannelState::Connected || self.send_buffer.is_empty()
        {
            return;
        }
        let Some(writer) = self.writer_tx.as_ref() else {
            return;
        };
        let window = Bytes::copy_from_slice(self.send_buffer.peek_read_region());
        trace!(channel_id = %self.id, bytes = window.len(), "Flushing send window");
        if writer.send(window).is_ok() {
            self.is_sending = true;
        }
    }

    /// The writer finished `count` bytes of the current window.
    pub(crate) fn on_sent(&mut self, count: usize) -> Result<()> {
        self.send_buffer.advance_read(count)?;
        self.is_sending = false;
        self.start_send();
        Ok(())
    }

    /// Release the socket tasks. Safe to call more than once.
    pub(crate) fn dispose(&mut self) {
        if self.id.is_none() {
            return;
        }
        debug!(channel_id = %self.id, remote = %self.remote, "Channel disposed");
        self.id = ChannelId::NONE;
        self.writer_tx = None;
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.dispose();
    }
}

async fn recv_loop(
    channel_id: ChannelId,
    mut socket: OwnedReadHalf,
    mut buffer: RingBuffer,
    mut parser: PacketParser,
    events: mpsc::UnboundedSender<IoEvent>,
    metrics: Arc<Metrics>,
) {
    loop {
        let read = socket.read(buffer.peek_write_region()).await;
        let count = match read {
            Ok(0) => {
                debug!(%channel_id, "Peer closed connection");
                let _ = events.send(IoEvent::Failed {
                    channel_id,
                    code: ERR_PEER_DISCONNECT,
                });
                return;
            }
            Ok(count) => count,
            Err(e) => {
                debug!(%channel_id, error = %e, "Socket read failed");
                let _ = events.send(IoEvent::Failed {
                    channel_id,
                    code: ERR_SOCKET_ERROR,
                });
                return;
            }
        };
        buffer.advance_write(count);
        metrics.bytes_read(count as u64);

        loop {
            match parser.parse(&mut buffer) {
                Ok(Some(packet)) => {
                    metrics.packet_received();
                    if events
                        .send(IoEvent::Received { channel_id, packet })
                        .is_err()
                    {
                        return;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    error!(%channel_id, error = %e, "Framing error, closing channel");
                    metrics.framing_error();
                    let _ = events.send(IoEvent::Failed {
                        channel_id,
                        code: ERR_PACKET_PARSER_ERROR,
                    });
                    return;
                }
            }
        }
    }
}

async fn send_loop(
    channel_id: ChannelId,
    mut socket: OwnedWriteHalf,
    mut windows: mpsc::UnboundedReceiver<Bytes>,
    events: mpsc::UnboundedSender<IoEvent>,
    metrics: Arc<Metrics>,
) {
    while let Some(window) = windows.recv().await {
        if let Err(e) = socket.write_all(&window).await {
            debug!(%channel_id, error = %e, "Socket write failed");
            let _ = events.send(IoEvent::Failed {
                channel_id,
                code: ERR_SOCKET_ERROR,
            });
            return;
        }
        metrics.bytes_written(window.len() as u64);
        if events
            .send(IoEvent::Sent {
                channel_id,
                count: window.len(),
            })
            .is_err()
        {
            return;
        }
    }
    let _ = socket.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn options(kind: ServiceKind) -> ChannelOptions {
        ChannelOptions {
            kind,
            chunk_size: 16,
            connect_timeout: Duration::from_secs(1),
            metrics: Arc::new(Metrics::new()),
        }
    }

    async fn pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (client, server)
    }

    #[tokio::test]
    async fn test_send_spans_windows_and_arrives_whole() {
        let (client, mut server) = pair().await;
        let remote = client.peer_addr().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = ChannelId::new(1, 0);
        let mut channel = Channel::accept(id, client, remote, &options(ServiceKind::Inner), tx);

        let body = vec![0x5Au8; 40];
        assert!(channel.send(9, 100, &body).unwrap());
        channel.start_send();
        while !channel.send_buffer.is_empty() {
            match rx.recv().await.unwrap() {
                IoEvent::Sent { count, .. } => channel.on_sent(count).unwrap(),
                other => panic!("unexpected event {other:?}"),
            }
        }

        let mut wire = vec![0u8; 4 + 10 + 40];
        server.read_exact(&mut wire).await.unwrap();
        assert_eq!(&wire[..4], &50u32.to_le_bytes());
        assert_eq!(&wire[14..], &body[..]);
    }

    #[tokio::test]
    async fn test_garbage_length_reports_parser_error() {
        let (client, mut server) = pair().await;
        let remote = client.peer_addr().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _channel = Channel::accept(
            ChannelId::new(2, 0),
            client,
            remote,
            &options(ServiceKind::Outer),
            tx,
        );

        server.write_all(&[1, 0, 0xFF]).await.unwrap();
        match rx.recv().await.unwrap() {
            IoEvent::Failed { code, .. } => assert_eq!(code, ERR_PACKET_PARSER_ERROR),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_dispose_is_idempotent() {
        let (client, _server) = pair().await;
        let remote = client.peer_addr().unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut channel = Channel::accept(
            ChannelId::new(3, 0),
            client,
            remote,
            &options(ServiceKind::Inner),
            tx,
        );
        channel.dispose();
        channel.dispose();
        assert!(channel.id().is_none());
        assert!(channel.send(0, 1, b"x").is_err());
    }
}
