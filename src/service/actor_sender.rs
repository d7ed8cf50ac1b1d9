//! # Actor Messaging
//!
//! Calls addressed to actors living in other processes.
//!
//! The target [`ActorId`] names its owning process; [`ProcessActorId`] splits
//! that off to pick a session (through a [`ProcessRouter`]) and rewrites the
//! id for the wire. Outstanding calls are kept in rpc id order, so the
//! timeout sweep walks them oldest first and stops at the first one still
//! within its deadline.
//!
//! ## Example
//! ```rust,ignore
//! let router = AddressRouter::new(network.clone()).with_process(2, "10.0.0.2:20001".parse()?);
//! let sender = ActorMessageSender::start(&config.actor, &network, router);
//! let reply = sender.call(target, GetBalance { rpc_id: 0, account }, true).await?;
//! ```

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::config::ActorConfig;
use crate::error::codes::{is_rpc_need_throw, ERR_ACTOR_TIMEOUT};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::actor_id::{ActorId, ProcessActorId};
use crate::protocol::message::{ActorMessage, ActorRequest, AnyMessage};
use crate::protocol::opcode::OpcodeRegistry;
use crate::service::network::Network;
use crate::service::session::Session;
use crate::utils::metrics::Metrics;

const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(1);

/// Maps a process id to a session that reaches it.
pub trait ProcessRouter: Send + Sync + 'static {
    fn session_for(&self, process: u32) -> Result<Session>;
}

impl<F> ProcessRouter for F
where
    F: Fn(u32) -> Result<Session> + Send + Sync + 'static,
{
    fn session_for(&self, process: u32) -> Result<Session> {
        self(process)
    }
}

/// Static process → address book, dialing through a [`Network`] on demand.
#[derive(Debug)]
pub struct AddressRouter {
    network: Network,
    addresses: HashMap<u32, SocketAddr>,
}

impl AddressRouter {
    pub fn new(network: Network) -> Self {
        Self {
            network,
            addresses: HashMap::new(),
        }
    }

    pub fn with_process(mut self, process: u32, address: SocketAddr) -> Self {
        self.insert(process, address);
        self
    }

    pub fn insert(&mut self, process: u32, address: SocketAddr) {
        self.addresses.insert(process, address);
    }
}

impl ProcessRouter for AddressRouter {
    fn session_for(&self, process: u32) -> Result<Session> {
        let address = self
            .addresses
            .get(&process)
            .ok_or(ProtocolError::NoRoute(process))?;
        self.network.get_or_connect(*address)
    }
}

struct PendingActorCall {
    actor_id: ActorId,
    request_opcode: u16,
    created_at: Instant,
    need_exception: bool,
    tx: oneshot::Sender<Result<Box<dyn AnyMessage>>>,
}

#[derive(Default)]
struct SenderState {
    next_rpc_id: u32,
    calls: BTreeMap<u32, PendingActorCall>,
}

pub struct ActorMessageSender {
    process: u32,
    timeout: Duration,
    router: Box<dyn ProcessRouter>,
    registry: Arc<OpcodeRegistry>,
    metrics: Arc<Metrics>,
    state: Mutex<SenderState>,
}

impl std::fmt::Debug for ActorMessageSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorMessageSender")
            .field("process", &self.process)
            .field("timeout", &self.timeout)
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl ActorMessageSender {
    /// Create a sender for `network`'s process and attach it, so arriving
    /// actor responses reach it. No sweeper runs; see [`Self::start`].
    pub fn new<R: ProcessRouter>(config: &ActorConfig, network: &Network, router: R) -> Arc<Self> {
        let sender = Arc::new(Self::with_parts(
            network.process(),
            config.rpc_timeout,
            network.registry().clone(),
            network.metrics().clone(),
            Box::new(router),
        ));
        network.attach_actor_sender(&sender);
        sender
    }

    /// [`Self::new`] plus a timeout sweeper every `config.sweep_interval`.
    pub fn start<R: ProcessRouter>(config: &ActorConfig, network: &Network, router: R) -> Arc<Self> {
        let sender = Self::new(config, network, router);
        sender.spawn_sweeper(config.sweep_interval);
        sender
    }

    pub(crate) fn with_parts(
        process: u32,
        timeout: Duration,
        registry: Arc<OpcodeRegistry>,
        metrics: Arc<Metrics>,
        router: Box<dyn ProcessRouter>,
    ) -> Self {
        Self {
            process,
            timeout,
            router,
            registry,
            metrics,
            state: Mutex::new(SenderState::default()),
        }
    }

    pub fn process(&self) -> u32 {
        self.process
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn pending_count(&self) -> usize {
        self.state().calls.len()
    }

    fn state(&self) -> MutexGuard<'_, SenderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fire-and-forget delivery to `actor_id`.
    pub fn send<M: ActorMessage>(&self, actor_id: ActorId, message: &M) -> Result<()> {
        let target = ProcessActorId::new(actor_id, self.process);
        let session = self.router.session_for(target.process)?;
        session.send(target.actor_id, message)
    }

    /// Send `request` to `actor_id` and wait for the answer.
    ///
    /// With `need_exception`, a must-raise error code or a timeout is an
    /// `Err`. Without it both come back as a response carrying the code.
    pub async fn call<R: ActorRequest>(
        &self,
        actor_id: ActorId,
        mut request: R,
        need_exception: bool,
    ) -> Result<R::Response> {
        let target = ProcessActorId::new(actor_id, self.process);
        let session = self.router.session_for(target.process)?;

        let (tx, rx) = oneshot::channel();
        let rpc_id = {
            let mut state = self.state();
            state.next_rpc_id = state.next_rpc_id.wrapping_add(1);
            let rpc_id = state.next_rpc_id;
            state.calls.insert(
                rpc_id,
                PendingActorCall {
                    actor_id,
                    request_opcode: R::OPCODE,
                    created_at: Instant::now(),
                    need_exception,
                    tx,
                },
            );
            rpc_id
        };
        request.set_rpc_id(rpc_id);
        self.metrics.rpc_call();

        if let Err(e) = session.send(target.actor_id, &request) {
            self.state().calls.remove(&rpc_id);
            return Err(e);
        }

        let response = rx
            .await
            .map_err(|_| ProtocolError::Custom(constants::ERR_RESPONSE_DROPPED.to_string()))??;
        response
            .downcast::<R::Response>()
            .ok_or(ProtocolError::UnexpectedMessage)
    }

    /// Complete the call an actor response belongs to. The response is handed
    /// back when no pending call of this sender expects it.
    pub fn run_message(
        &self,
        response: Box<dyn AnyMessage>,
    ) -> std::result::Result<(), Box<dyn AnyMessage>> {
        let Some(header) = self.registry.rpc_header(response.as_ref()) else {
            return Err(response);
        };

        let call = {
            let mut state = self.state();
            let expected = state.calls.get(&header.rpc_id).is_some_and(|call| {
                self.registry.response_opcode(call.request_opcode).ok() == Some(response.opcode())
            });
            if expected {
                state.calls.remove(&header.rpc_id)
            } else {
                None
            }
        };
        let Some(call) = call else {
            debug!(rpc_id = header.rpc_id, opcode = response.opcode(), "No actor call for response");
            return Err(response);
        };

        let result = if call.need_exception && is_rpc_need_throw(header.error) {
            Err(ProtocolError::Rpc {
                code: header.error,
                message: header.message,
            })
        } else {
            Ok(response)
        };
        let _ = call.tx.send(result);
        Ok(())
    }

    /// Resolve every call issued more than the timeout before `now`.
    /// Returns how many were resolved.
    pub fn check_timeouts(&self, now: Instant) -> usize {
        let expired: Vec<(u32, PendingActorCall)> = {
            let mut state = self.state();
            let due: Vec<u32> = state
                .calls
                .iter()
                .take_while(|(_, call)| now.saturating_duration_since(call.created_at) >= self.timeout)
                .map(|(&rpc_id, _)| rpc_id)
                .collect();
            due.into_iter()
                .filter_map(|rpc_id| state.calls.remove(&rpc_id).map(|call| (rpc_id, call)))
                .collect()
        };

        let count = expired.len();
        for (rpc_id, call) in expired {
            self.metrics.rpc_timeout();
            let type_name = self.registry.type_name(call.request_opcode).unwrap_or("unknown");
            warn!(
                rpc_id,
                actor_id = %call.actor_id,
                request = type_name,
                "Actor call timed out"
            );
            let result = if call.need_exception {
                Err(ProtocolError::RpcTimeout { rpc_id })
            } else {
                self.registry.new_error_response(
                    call.request_opcode,
                    rpc_id,
                    ERR_ACTOR_TIMEOUT,
                    format!("actor call timed out: actor {} request {type_name}", call.actor_id),
                )
            };
            let _ = call.tx.send(result);
        }
        count
    }

    /// Run [`Self::check_timeouts`] every `interval` until the sender is
    /// dropped. Intervals under one millisecond are raised to it.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let interval = interval.max(MIN_SWEEP_INTERVAL);
        let sender = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(sender) = sender.upgrade() else {
                    break;
                };
                sender.check_timeouts(Instant::now());
            }
        })
    }
}
