//! # Session
//!
//! Message-level face of one channel: payloads are (de)serialized here, calls
//! are correlated with their responses by rpc id, and activity timestamps are
//! kept for idle checks.
//!
//! A pending call resolves exactly once, by whichever of these happens first:
//!
//! 1. a matching response arrives ([`Session::on_response`])
//! 2. the caller's cancellation token fires
//! 3. the session is disposed
//!
//! Every path starts by removing the call from the pending table under its
//! lock, so the losers find nothing and do nothing.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::codes::{is_rpc_need_throw, ERR_CANCEL, ERR_OK};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::actor_id::ActorId;
use crate::protocol::message::{AnyMessage, Message, Request, Response};
use crate::protocol::opcode::OpcodeRegistry;
use crate::transport::channel::ChannelType;
use crate::transport::channel_id::ChannelId;
use crate::transport::service::ServiceHandle;
use crate::utils::metrics::Metrics;
use crate::utils::time::now_ms;

type PendingResult = Result<Box<dyn AnyMessage>>;

struct RpcInfo {
    request_opcode: u16,
    tx: oneshot::Sender<PendingResult>,
}

/// Live sessions of one network, by channel id.
#[derive(Default)]
pub(crate) struct SessionTable {
    sessions: Mutex<HashMap<ChannelId, Session>>,
}

impl SessionTable {
    pub(crate) fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ChannelId, Session>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn get(&self, id: ChannelId) -> Option<Session> {
        self.lock().get(&id).cloned()
    }

    pub(crate) fn insert(&self, session: Session) {
        self.lock().insert(session.id(), session);
    }

    pub(crate) fn remove(&self, id: ChannelId) -> Option<Session> {
        self.lock().remove(&id)
    }

    pub(crate) fn snapshot(&self) -> Vec<Session> {
        self.lock().values().cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }
}

/// Removes a call's entry when its future is dropped before resolving.
struct PendingGuard<'a> {
    session: &'a Session,
    rpc_id: u32,
    armed: bool,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.armed && self.session.requests().remove(&self.rpc_id).is_some() {
            debug!(channel_id = %self.session.inner.id, rpc_id = self.rpc_id, "Abandoned rpc removed");
        }
    }
}

#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    id: ChannelId,
    remote: SocketAddr,
    channel_type: ChannelType,
    service: ServiceHandle,
    registry: Arc<OpcodeRegistry>,
    table: Weak<SessionTable>,
    requests: Mutex<HashMap<u32, RpcInfo>>,
    rpc_id: AtomicU32,
    last_send_time: AtomicI64,
    last_recv_time: AtomicI64,
    error: AtomicI32,
    disposed: AtomicBool,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("remote", &self.inner.remote)
            .field("channel_type", &self.inner.channel_type)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl Session {
    pub(crate) fn new(
        id: ChannelId,
        remote: SocketAddr,
        channel_type: ChannelType,
        service: ServiceHandle,
        registry: Arc<OpcodeRegistry>,
        table: Weak<SessionTable>,
    ) -> Self {
        let now = now_ms();
        info!(channel_id = %id, %remote, ?channel_type, "Session created");
        Self {
            inner: Arc::new(SessionInner {
                id,
                remote,
                channel_type,
                service,
                registry,
                table,
                requests: Mutex::new(HashMap::new()),
                rpc_id: AtomicU32::new(0),
                last_send_time: AtomicI64::new(now),
                last_recv_time: AtomicI64::new(now),
                error: AtomicI32::new(ERR_OK),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    #[inline]
    pub fn id(&self) -> ChannelId {
        self.inner.id
    }

    #[inline]
    pub fn remote_address(&self) -> SocketAddr {
        self.inner.remote
    }

    #[inline]
    pub fn channel_type(&self) -> ChannelType {
        self.inner.channel_type
    }

    pub fn registry(&self) -> &Arc<OpcodeRegistry> {
        &self.inner.registry
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        self.inner.service.metrics()
    }

    /// Last error code recorded on this session, 0 if none.
    pub fn error(&self) -> i32 {
        self.inner.error.load(Ordering::Acquire)
    }

    pub fn set_error(&self, error: i32) {
        self.inner.error.store(error, Ordering::Release);
    }

    /// Milliseconds since the Unix epoch of the last send.
    pub fn last_send_time(&self) -> i64 {
        self.inner.last_send_time.load(Ordering::Acquire)
    }

    /// Milliseconds since the Unix epoch of the last receive.
    pub fn last_recv_time(&self) -> i64 {
        self.inner.last_recv_time.load(Ordering::Acquire)
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// Calls still waiting for a result.
    pub fn pending_calls(&self) -> usize {
        self.requests().len()
    }

    fn requests(&self) -> std::sync::MutexGuard<'_, HashMap<u32, RpcInfo>> {
        self.inner
            .requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn touch_recv(&self) {
        self.inner.last_recv_time.fetch_max(now_ms(), Ordering::AcqRel);
    }

    fn touch_send(&self) {
        self.inner.last_send_time.fetch_max(now_ms(), Ordering::AcqRel);
    }

    fn disposed_error(&self) -> ProtocolError {
        ProtocolError::SessionDisposed {
            channel_id: self.inner.id,
            error: self.error(),
        }
    }

    /// Serialize and queue a message. `actor_id` is carried on inner links
    /// only.
    pub fn send<M: Message>(&self, actor_id: ActorId, message: &M) -> Result<()> {
        let body = self.inner.registry.encode(message)?;
        self.send_bytes(actor_id, M::OPCODE, body)
    }

    /// Queue an already serialized body, e.g. when forwarding.
    pub fn send_bytes(&self, actor_id: ActorId, opcode: u16, body: Bytes) -> Result<()> {
        if self.is_disposed() {
            return Err(self.disposed_error());
        }
        self.inner
            .service
            .send(self.inner.id, actor_id.raw(), opcode, body)?;
        self.touch_send();
        Ok(())
    }

    /// Answer a request on this session.
    pub fn reply<R: Response>(&self, response: &R) -> Result<()> {
        self.send(ActorId::NONE, response)
    }

    /// Send `request` and wait for its response.
    ///
    /// A response whose error code must raise becomes [`ProtocolError::Rpc`].
    /// Cancellation yields a response carrying `ERR_CANCEL` instead of an
    /// error.
    pub async fn call<R: Request>(
        &self,
        mut request: R,
        cancel: Option<&CancellationToken>,
    ) -> Result<R::Response> {
        let rpc_id = self.inner.rpc_id.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        request.set_rpc_id(rpc_id);

        let (tx, mut rx) = oneshot::channel();
        {
            let mut requests = self.requests();
            // checked under the table lock so dispose cannot miss this entry
            if self.is_disposed() {
                return Err(self.disposed_error());
            }
            requests.insert(
                rpc_id,
                RpcInfo {
                    request_opcode: R::OPCODE,
                    tx,
                },
            );
        }
        self.metrics().rpc_call();
        let mut pending = PendingGuard {
            session: self,
            rpc_id,
            armed: true,
        };

        self.send(ActorId::NONE, &request)?;

        let outcome = match cancel {
            Some(token) => {
                let finished = tokio::select! {
                    biased;
                    result = &mut rx => Some(result),
                    _ = token.cancelled() => None,
                };
                match finished {
                    Some(result) => result,
                    None => match self.cancel_pending::<R>(rpc_id) {
                        Some(response) => Ok(response),
                        // lost the race: a result is already on its way
                        None => rx.await,
                    },
                }
            }
            None => rx.await,
        };
        pending.armed = false;

        let response = outcome
            .map_err(|_| ProtocolError::Custom(constants::ERR_RESPONSE_DROPPED.to_string()))??;
        response
            .downcast::<R::Response>()
            .ok_or(ProtocolError::UnexpectedMessage)
    }

    /// [`Self::call`] bounded by `timeout`. An expired call is dropped from
    /// the pending table and reported as [`ProtocolError::Timeout`].
    pub async fn call_with_timeout<R: Request>(
        &self,
        request: R,
        timeout: Duration,
    ) -> Result<R::Response> {
        match tokio::time::timeout(timeout, self.call(request, None)).await {
            Ok(result) => result,
            Err(_) => {
                self.metrics().rpc_timeout();
                debug!(channel_id = %self.inner.id, ?timeout, "Rpc timed out");
                Err(ProtocolError::Timeout)
            }
        }
    }

    fn cancel_pending<R: Request>(&self, rpc_id: u32) -> Option<PendingResult> {
        let info = self.requests().remove(&rpc_id)?;
        drop(info);
        self.metrics().rpc_cancelled();
        debug!(channel_id = %self.inner.id, rpc_id, "Rpc cancelled");
        Some(self.inner.registry.new_error_response(
            R::OPCODE,
            rpc_id,
            ERR_CANCEL,
            format!("rpc cancelled: {}", std::any::type_name::<R>()),
        ))
    }

    /// Complete the pending call a response belongs to. A response for an
    /// unknown or already resolved call is ignored.
    pub fn on_response(&self, response: Box<dyn AnyMessage>) {
        let Some(header) = self.inner.registry.rpc_header(response.as_ref()) else {
            warn!(
                channel_id = %self.inner.id,
                opcode = response.opcode(),
                "Not a registered response type"
            );
            return;
        };

        let Some(info) = self.requests().remove(&header.rpc_id) else {
            warn!(
                channel_id = %self.inner.id,
                rpc_id = header.rpc_id,
                opcode = response.opcode(),
                "Response for unknown or finished rpc"
            );
            return;
        };

        let expected = self.inner.registry.response_opcode(info.request_opcode).ok();
        let result = if expected != Some(response.opcode()) {
            Err(ProtocolError::UnexpectedMessage)
        } else if is_rpc_need_throw(header.error) {
            Err(ProtocolError::Rpc {
                code: header.error,
                message: header.message,
            })
        } else {
            Ok(response)
        };
        let _ = info.tx.send(result);
    }

    /// Record `error` and dispose.
    pub fn close(&self, error: i32) {
        if error != ERR_OK {
            self.set_error(error);
        }
        self.dispose();
    }

    /// Release the channel and fail every pending call. Idempotent.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.inner.service.remove(self.inner.id);
        if let Some(table) = self.inner.table.upgrade() {
            table.remove(self.inner.id);
        }

        let pending: Vec<RpcInfo> = self.requests().drain().map(|(_, info)| info).collect();
        info!(
            channel_id = %self.inner.id,
            remote = %self.inner.remote,
            error = self.error(),
            pending = pending.len(),
            "Session disposed"
        );
        for info in pending {
            let _ = info.tx.send(Err(self.disposed_error()));
        }
    }
}
