//! # Network
//!
//! Binds one [`Service`] to the session table, the opcode registry and the
//! dispatcher.
//!
//! Service events are pumped by a single task:
//!
//! - `Accepted` creates an accept-side session
//! - `Read` decodes the body and routes it: responses to the session that
//!   issued the call, actor responses to the attached actor sender, anything
//!   else to the dispatcher
//! - `Error` closes the session with the channel's error code
//!
//! When the service stops, every remaining session is disposed with
//! `ERR_SERVICE_SHUTDOWN`, so no pending call is left hanging.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{NetworkConfig, SessionConfig};
use crate::core::packet::Packet;
use crate::error::codes::{ERR_PACKET_PARSER_ERROR, ERR_SERVICE_SHUTDOWN, ERR_SESSION_IDLE_TIMEOUT};
use crate::error::{ProtocolError, Result};
use crate::protocol::actor_id::ActorId;
use crate::protocol::dispatcher::{MessageContext, MessageDispatcher};
use crate::protocol::message::MessageKind;
use crate::protocol::opcode::OpcodeRegistry;
use crate::service::actor_sender::ActorMessageSender;
use crate::service::session::{Session, SessionTable};
use crate::transport::channel::ChannelType;
use crate::transport::channel_id::{ChannelId, ChannelIdGenerator};
use crate::transport::service::{Service, ServiceEvent, ServiceEvents, ServiceHandle};
use crate::utils::metrics::Metrics;
use crate::utils::time::{is_expired, now_ms};

/// A running network service and its sessions. Cloning shares the same
/// network; the service shuts down when the last clone is dropped.
#[derive(Clone)]
pub struct Network {
    inner: Arc<NetworkInner>,
}

struct NetworkInner {
    service: ServiceHandle,
    registry: Arc<OpcodeRegistry>,
    dispatcher: Arc<MessageDispatcher>,
    sessions: Arc<SessionTable>,
    process: u32,
    actor_sender: RwLock<Weak<ActorMessageSender>>,
    dial_lock: Mutex<()>,
    idle_checker: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Network")
            .field("kind", &self.inner.service.kind())
            .field("local_addr", &self.inner.service.local_addr())
            .field("process", &self.inner.process)
            .field("sessions", &self.inner.sessions.len())
            .finish()
    }
}

impl Network {
    /// Start the service described by `config.service` and begin pumping its
    /// events. Must be called from within a tokio runtime.
    #[instrument(skip_all, fields(address = %config.service.address, process = config.actor.process))]
    pub fn start(
        config: &NetworkConfig,
        registry: Arc<OpcodeRegistry>,
        dispatcher: Arc<MessageDispatcher>,
        ids: Arc<ChannelIdGenerator>,
    ) -> Result<Network> {
        config.validate_strict()?;
        let (service, events) = Service::start(&config.service, ids)?;

        let sessions = Arc::new(SessionTable::default());
        let inner = Arc::new(NetworkInner {
            service,
            registry,
            dispatcher,
            sessions: sessions.clone(),
            process: config.actor.process,
            actor_sender: RwLock::new(Weak::new()),
            dial_lock: Mutex::new(()),
            idle_checker: Mutex::new(None),
        });

        tokio::spawn(pump(Arc::downgrade(&inner), sessions, events));

        if config.session.idle_check_enabled {
            let checker = tokio::spawn(idle_check(Arc::downgrade(&inner), config.session.clone()));
            *inner
                .idle_checker
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(checker);
        }

        info!(
            kind = ?inner.service.kind(),
            local_addr = ?inner.service.local_addr(),
            "Network started"
        );
        Ok(Network { inner })
    }

    /// Dial `remote` on a fresh channel. The session is usable at once;
    /// sends are buffered until the connection is up.
    pub fn connect(&self, remote: SocketAddr) -> Result<Session> {
        let channel_id = self.inner.service.create_connect_channel_id();
        let session = self.inner.create_session(channel_id, remote, ChannelType::Connect);
        if let Err(e) = self.inner.service.get_or_create(channel_id, remote) {
            session.dispose();
            return Err(e);
        }
        Ok(session)
    }

    /// Reuse a live outbound session to `remote`, dialing if there is none.
    pub fn get_or_connect(&self, remote: SocketAddr) -> Result<Session> {
        let _dialing = self
            .inner
            .dial_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let existing = self
            .inner
            .sessions
            .lock()
            .values()
            .find(|s| {
                s.channel_type() == ChannelType::Connect
                    && s.remote_address() == remote
                    && !s.is_disposed()
            })
            .cloned();
        match existing {
            Some(session) => Ok(session),
            None => self.connect(remote),
        }
    }

    pub fn session(&self, channel_id: ChannelId) -> Option<Session> {
        self.inner.sessions.get(channel_id)
    }

    pub fn sessions(&self) -> Vec<Session> {
        self.inner.sessions.snapshot()
    }

    pub fn session_count(&self) -> usize {
        self.inner.sessions.len()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.service.local_addr()
    }

    pub fn registry(&self) -> &Arc<OpcodeRegistry> {
        &self.inner.registry
    }

    pub fn dispatcher(&self) -> &Arc<MessageDispatcher> {
        &self.inner.dispatcher
    }

    pub fn service(&self) -> &ServiceHandle {
        &self.inner.service
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        self.inner.service.metrics()
    }

    /// Local process id, the process field of every actor this network owns.
    pub fn process(&self) -> u32 {
        self.inner.process
    }

    /// Route arriving actor responses to `sender`.
    pub fn attach_actor_sender(&self, sender: &Arc<ActorMessageSender>) {
        *self
            .inner
            .actor_sender
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::downgrade(sender);
    }

    /// Stop the service and dispose every session.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }
}

impl NetworkInner {
    fn create_session(
        &self,
        channel_id: ChannelId,
        remote: SocketAddr,
        channel_type: ChannelType,
    ) -> Session {
        let session = Session::new(
            channel_id,
            remote,
            channel_type,
            self.service.clone(),
            self.registry.clone(),
            Arc::downgrade(&self.sessions),
        );
        self.sessions.insert(session.clone());
        session
    }

    fn actor_sender(&self) -> Option<Arc<ActorMessageSender>> {
        self.actor_sender
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .upgrade()
    }

    fn on_read(&self, channel_id: ChannelId, packet: Packet) {
        let Some(session) = self.sessions.get(channel_id) else {
            debug!(%channel_id, opcode = packet.opcode, "Packet for unknown session dropped");
            return;
        };
        session.touch_recv();

        let message = match self.registry.decode(packet.opcode, &packet.body) {
            Ok(message) => message,
            Err(ProtocolError::UnknownOpcode(opcode)) => {
                warn!(%channel_id, opcode, "Unregistered opcode ignored");
                return;
            }
            Err(e) => {
                error!(%channel_id, opcode = packet.opcode, error = %e, "Failed to decode message");
                session.close(ERR_PACKET_PARSER_ERROR);
                return;
            }
        };

        match self.registry.kind(packet.opcode) {
            Some(MessageKind::Response) => session.on_response(message),
            Some(MessageKind::ActorResponse) => {
                let unclaimed = match self.actor_sender() {
                    Some(sender) => match sender.run_message(message) {
                        Ok(()) => return,
                        Err(message) => message,
                    },
                    None => message,
                };
                session.on_response(unclaimed);
            }
            _ => {
                let actor_id = ActorId::from_raw(packet.actor_id);
                let actor_id = if actor_id.is_none() {
                    actor_id
                } else {
                    actor_id.with_process(self.process)
                };
                let ctx = MessageContext { session, actor_id };
                self.dispatcher.handle(&ctx, packet.opcode, message.into());
            }
        }
    }

    fn on_error(&self, channel_id: ChannelId, code: i32) {
        match self.sessions.remove(channel_id) {
            Some(session) => session.close(code),
            None => debug!(%channel_id, code, "Error for unknown session"),
        }
    }

    fn shutdown(&self) {
        self.service.shutdown();
        if let Some(checker) = self
            .idle_checker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            checker.abort();
        }
        for session in self.sessions.snapshot() {
            session.close(ERR_SERVICE_SHUTDOWN);
        }
    }
}

impl Drop for NetworkInner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn pump(inner: Weak<NetworkInner>, sessions: Arc<SessionTable>, mut events: ServiceEvents) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        match event {
            ServiceEvent::Accepted { channel_id, remote } => {
                inner.create_session(channel_id, remote, ChannelType::Accept);
            }
            ServiceEvent::Read { channel_id, packet } => inner.on_read(channel_id, packet),
            ServiceEvent::Error { channel_id, code } => inner.on_error(channel_id, code),
        }
    }

    let remaining = sessions.snapshot();
    if !remaining.is_empty() {
        info!(sessions = remaining.len(), "Disposing sessions of stopped service");
    }
    for session in remaining {
        session.close(ERR_SERVICE_SHUTDOWN);
    }
}

async fn idle_check(inner: Weak<NetworkInner>, config: SessionConfig) {
    let mut ticker = tokio::time::interval(config.idle_check_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let recv_max = millis(config.recv_max_idle);
    let send_max = millis(config.send_max_idle);

    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let now = now_ms();
        for session in inner.sessions.snapshot() {
            if is_expired(session.last_recv_time(), recv_max, now)
                || is_expired(session.last_send_time(), send_max, now)
            {
                info!(
                    channel_id = %session.id(),
                    remote = %session.remote_address(),
                    "Session idle, closing"
                );
                session.close(ERR_SESSION_IDLE_TIMEOUT);
            }
        }
    }
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
