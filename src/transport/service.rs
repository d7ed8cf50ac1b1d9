//! # Service
//!
//! Owns every channel of one listener (or one dialing endpoint) and the
//! single task that mutates them.
//!
//! ```text
//!   ServiceHandle ──commands──►┌──────────────┐──ServiceEvent──► upper layer
//!                              │    driver    │
//!   reader/writer ──IoEvent───►│  (one task)  │◄── listener.accept()
//!                              └──────────────┘◄── flush tick (update)
//! ```
//!
//! The driver is the only owner of the id → channel map, the send buffers and
//! the need-flush set, so none of them are locked. Everything else talks to it
//! by message: [`ServiceHandle`] enqueues commands, socket tasks post
//! completions, and the layer above receives [`ServiceEvent`]s.
//!
//! Sends are not written to the socket immediately. They are framed into the
//! channel's send buffer and the channel is marked; the flush tick then pushes
//! every marked channel once, batching all sends issued since the last tick.

use std::collections::{HashMap, HashSet};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use crate::config::ServiceConfig;
use crate::core::packet::{Packet, ServiceKind};
use crate::error::codes::{ERR_SEND_MESSAGE_NOT_FOUND_CHANNEL, ERR_SOCKET_ERROR};
use crate::error::{constants, ProtocolError, Result};
use crate::transport::channel::{Channel, ChannelOptions, IoEvent};
use crate::transport::channel_id::{ChannelId, ChannelIdGenerator};
use crate::utils::metrics::Metrics;

/// Notifications from a service to the layer above it.
#[derive(Debug)]
pub enum ServiceEvent {
    /// The listener produced a new channel.
    Accepted {
        channel_id: ChannelId,
        remote: SocketAddr,
    },
    /// A complete packet arrived on a channel.
    Read { channel_id: ChannelId, packet: Packet },
    /// A channel failed and has been removed. `code` is one of
    /// [`crate::error::codes`].
    Error { channel_id: ChannelId, code: i32 },
}

#[derive(Debug)]
pub(crate) enum ServiceCommand {
    GetOrCreate {
        channel_id: ChannelId,
        remote: SocketAddr,
    },
    Send {
        channel_id: ChannelId,
        actor_id: u64,
        opcode: u16,
        body: Bytes,
    },
    Remove {
        channel_id: ChannelId,
    },
    Shutdown,
}

/// Stream of events produced by a service.
pub type ServiceEvents = mpsc::UnboundedReceiver<ServiceEvent>;

/// Cheap, cloneable front of a running service.
#[derive(Debug, Clone)]
pub struct ServiceHandle {
    kind: ServiceKind,
    local_addr: Option<SocketAddr>,
    commands: mpsc::UnboundedSender<ServiceCommand>,
    ids: Arc<ChannelIdGenerator>,
    metrics: Arc<Metrics>,
}

impl ServiceHandle {
    #[inline]
    pub fn kind(&self) -> ServiceKind {
        self.kind
    }

    /// Bound listener address, `None` for a dial-only service.
    #[inline]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    #[inline]
    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    /// Allocate an id for a channel this service will dial.
    pub fn create_connect_channel_id(&self) -> ChannelId {
        self.ids.next_connect()
    }

    /// Dial `remote` under `channel_id`. A second call with the same id is a
    /// no-op.
    pub fn get_or_create(&self, channel_id: ChannelId, remote: SocketAddr) -> Result<()> {
        self.command(ServiceCommand::GetOrCreate { channel_id, remote })
    }

    /// Queue a message on a channel. An unknown channel is reported as an
    /// [`ServiceEvent::Error`], not here.
    pub fn send(&self, channel_id: ChannelId, actor_id: u64, opcode: u16, body: Bytes) -> Result<()> {
        let size = self.kind.header_len() + body.len();
        if size > self.kind.max_packet_size() {
            return Err(ProtocolError::OversizedPacket(size));
        }
        self.command(ServiceCommand::Send {
            channel_id,
            actor_id,
            opcode,
            body,
        })
    }

    /// Dispose and forget a channel. Safe to call twice.
    pub fn remove(&self, channel_id: ChannelId) {
        let _ = self.command(ServiceCommand::Remove { channel_id });
    }

    /// Close the listener and every channel.
    pub fn shutdown(&self) {
        let _ = self.command(ServiceCommand::Shutdown);
    }

    /// Handle whose commands land in the returned receiver instead of a driver.
    #[cfg(test)]
    pub(crate) fn detached(kind: ServiceKind) -> (Self, mpsc::UnboundedReceiver<ServiceCommand>) {
        let (commands, rx) = mpsc::unbounded_channel();
        let handle = ServiceHandle {
            kind,
            local_addr: None,
            commands,
            ids: Arc::new(ChannelIdGenerator::new()),
            metrics: Arc::new(Metrics::new()),
        };
        (handle, rx)
    }

    fn command(&self, command: ServiceCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| ProtocolError::Custom(constants::ERR_SERVICE_CLOSED.to_string()))
    }
}

fn check_config(config: &ServiceConfig) -> Result<()> {
    let errors = config.validate();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ProtocolError::ConfigError(errors.join("; ")))
    }
}

/// The driver of one network service.
pub struct Service {
    options: ChannelOptions,
    channels: HashMap<ChannelId, Channel>,
    need_flush: HashSet<ChannelId>,
    io_tx: mpsc::UnboundedSender<IoEvent>,
    events: mpsc::UnboundedSender<ServiceEvent>,
    ids: Arc<ChannelIdGenerator>,
}

impl Service {
    /// Start a service from `config`, listening when `config.listen` is set.
    #[instrument(skip(config, ids), fields(address = %config.address, kind = ?config.kind))]
    pub fn start(
        config: &ServiceConfig,
        ids: Arc<ChannelIdGenerator>,
    ) -> Result<(ServiceHandle, ServiceEvents)> {
        check_config(config)?;
        let listener = if config.listen {
            let addr: SocketAddr = config.address.parse().map_err(|e| {
                ProtocolError::ConfigError(format!("Invalid service address '{}': {e}", config.address))
            })?;
            Some(bind_listener(addr, config.backlog)?)
        } else {
            None
        };
        Ok(Self::spawn(config, ids, listener))
    }

    /// Start a service that only dials out.
    pub fn client(
        config: &ServiceConfig,
        ids: Arc<ChannelIdGenerator>,
    ) -> Result<(ServiceHandle, ServiceEvents)> {
        check_config(config)?;
        Ok(Self::spawn(config, ids, None))
    }

    fn spawn(
        config: &ServiceConfig,
        ids: Arc<ChannelIdGenerator>,
        listener: Option<TcpListener>,
    ) -> (ServiceHandle, ServiceEvents) {
        let metrics = Arc::new(Metrics::new());
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (io_tx, io_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let local_addr = listener.as_ref().and_then(|l| l.local_addr().ok());

        let handle = ServiceHandle {
            kind: config.kind,
            local_addr,
            commands: commands_tx,
            ids: ids.clone(),
            metrics: metrics.clone(),
        };

        let service = Service {
            options: ChannelOptions {
                kind: config.kind,
                chunk_size: config.chunk_size,
                connect_timeout: config.connect_timeout,
                metrics,
            },
            channels: HashMap::new(),
            need_flush: HashSet::new(),
            io_tx,
            events: events_tx,
            ids,
        };

        tokio::spawn(service.run(commands_rx, io_rx, listener, config.update_interval));
        (handle, events_rx)
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<ServiceCommand>,
        mut io_events: mpsc::UnboundedReceiver<IoEvent>,
        mut listener: Option<TcpListener>,
        update_interval: Duration,
    ) {
        let mut ticker = tokio::time::interval(update_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        if let Some(addr) = listener.as_ref().and_then(|l| l.local_addr().ok()) {
            info!(address = %addr, kind = ?self.options.kind, "Service listening");
        }

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(ServiceCommand::Shutdown) | None => break,
                    Some(command) => self.on_command(command),
                },
                Some(event) = io_events.recv() => self.on_io(event),
                accepted = accept(&listener) => match accepted {
                    Ok((stream, remote)) => self.on_accept(stream, remote),
                    Err(e) => {
                        // a failed accept never stops the listener
                        warn!(error = %e, "Accept failed");
                        self.options.metrics.accept_failed();
                    }
                },
                _ = ticker.tick() => self.update(),
            }
        }

        listener.take();
        let count = self.channels.len();
        for (_, mut channel) in self.channels.drain() {
            channel.dispose();
            self.options.metrics.connection_closed();
        }
        info!(channels = count, "Service shut down");
    }

    fn on_command(&mut self, command: ServiceCommand) {
        match command {
            ServiceCommand::GetOrCreate { channel_id, remote } => {
                if self.channels.contains_key(&channel_id) {
                    return;
                }
                let channel =
                    Channel::connect(channel_id, remote, &self.options, self.io_tx.clone());
                self.channels.insert(channel_id, channel);
                self.options.metrics.connection_connected();
                debug!(%channel_id, %remote, "Connecting channel");
            }
            ServiceCommand::Send {
                channel_id,
                actor_id,
                opcode,
                body,
            } => {
                let Some(channel) = self.channels.get_mut(&channel_id) else {
                    debug!(%channel_id, opcode, "Send to unknown channel");
                    let _ = self.events.send(ServiceEvent::Error {
                        channel_id,
                        code: ERR_SEND_MESSAGE_NOT_FOUND_CHANNEL,
                    });
                    return;
                };
                match channel.send(actor_id, opcode, &body) {
                    Ok(true) => {
                        self.need_flush.insert(channel_id);
                    }
                    Ok(false) => {}
                    Err(e) => error!(%channel_id, opcode, error = %e, "Dropping unsendable message"),
                }
            }
            ServiceCommand::Remove { channel_id } => self.remove(channel_id),
            ServiceCommand::Shutdown => {}
        }
    }

    fn on_io(&mut self, event: IoEvent) {
        match event {
            IoEvent::Connected { channel_id, stream } => {
                if let Some(channel) = self.channels.get_mut(&channel_id) {
                    channel.start(stream, self.io_tx.clone());
                    self.need_flush.insert(channel_id);
                }
            }
            IoEvent::Received { channel_id, packet } => {
                // late packets from a removed channel are dropped
                if self.channels.contains_key(&channel_id) {
                    let _ = self.events.send(ServiceEvent::Read { channel_id, packet });
                }
            }
            IoEvent::Sent { channel_id, count } => {
                let Some(channel) = self.channels.get_mut(&channel_id) else {
                    return;
                };
                if let Err(e) = channel.on_sent(count) {
                    error!(%channel_id, error = %e, "Send buffer out of step with writer");
                    self.fail(channel_id, ERR_SOCKET_ERROR);
                }
            }
            IoEvent::Failed { channel_id, code } => self.fail(channel_id, code),
        }
    }

    fn on_accept(&mut self, stream: TcpStream, remote: SocketAddr) {
        let channel_id = self.ids.next_accept();
        let channel = Channel::accept(channel_id, stream, remote, &self.options, self.io_tx.clone());
        self.channels.insert(channel_id, channel);
        self.options.metrics.connection_accepted();
        let _ = self.events.send(ServiceEvent::Accepted { channel_id, remote });
    }

    /// Push every channel marked since the last tick.
    fn update(&mut self) {
        if self.need_flush.is_empty() {
            return;
        }
        for channel_id in std::mem::take(&mut self.need_flush) {
            if let Some(channel) = self.channels.get_mut(&channel_id) {
                channel.start_send();
            }
        }
    }

    fn fail(&mut self, channel_id: ChannelId, code: i32) {
        if let Some(mut channel) = self.channels.remove(&channel_id) {
            info!(
                %channel_id,
                remote = %channel.remote(),
                channel_type = ?channel.channel_type(),
                code,
                "Channel closed on error"
            );
            channel.dispose();
            self.need_flush.remove(&channel_id);
            self.options.metrics.channel_error();
            self.options.metrics.connection_closed();
            let _ = self.events.send(ServiceEvent::Error { channel_id, code });
        }
    }

    fn remove(&mut self, channel_id: ChannelId) {
        if let Some(mut channel) = self.channels.remove(&channel_id) {
            debug!(channel_id = %channel.id(), remote = %channel.remote(), "Channel removed");
            channel.dispose();
            self.need_flush.remove(&channel_id);
            self.options.metrics.connection_closed();
        }
    }
}

fn bind_listener(addr: SocketAddr, backlog: u32) -> Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    Ok(socket.listen(backlog)?)
}

async fn accept(listener: &Option<TcpListener>) -> io::Result<(TcpStream, SocketAddr)> {
    match listener {
        Some(listener) => listener.accept().await,
        None => std::future::pending().await,
    }
}
