//! # Message Dispatcher
//!
//! Routes a decoded message to every handler registered for its opcode, in
//! registration order. A handler that fails or panics is logged and counted;
//! its siblings still run. An opcode with no handler is a warning, not an
//! error.
//!
//! Two handler kinds:
//! - [`MessageFn`]: fire-and-forget, runs inline on the dispatching task
//! - [`RpcFn`]: request/response, runs on its own task and replies on the
//!   originating session with the request's rpc id; a handler error becomes
//!   an `ERR_RPC_FAIL` response

use crate::error::codes::ERR_RPC_FAIL;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::actor_id::ActorId;
use crate::protocol::message::{AnyMessage, Message, Request, Response};
use crate::service::session::Session;
use futures::FutureExt;
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, RwLock};
use tracing::{debug, error, warn};

/// Where a dispatched message came from.
#[derive(Debug, Clone)]
pub struct MessageContext {
    pub session: Session,
    /// Target actor, already rewritten to the local process. `ActorId::NONE`
    /// for plain session messages.
    pub actor_id: ActorId,
}

/// One reaction to one opcode.
pub trait MessageHandler: Send + Sync + 'static {
    fn message_opcode(&self) -> u16;

    /// Opcode of the reply, for request handlers.
    fn response_opcode(&self) -> Option<u16> {
        None
    }

    fn handle(&self, ctx: &MessageContext, message: Arc<dyn AnyMessage>) -> Result<()>;
}

/// Fire-and-forget handler over a closure.
pub struct MessageFn<M, F> {
    f: F,
    _marker: PhantomData<fn(M)>,
}

impl<M, F> MessageFn<M, F>
where
    M: Message,
    F: Fn(&MessageContext, &M) -> Result<()> + Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            _marker: PhantomData,
        }
    }
}

impl<M, F> MessageHandler for MessageFn<M, F>
where
    M: Message,
    F: Fn(&MessageContext, &M) -> Result<()> + Send + Sync + 'static,
{
    fn message_opcode(&self) -> u16 {
        M::OPCODE
    }

    fn handle(&self, ctx: &MessageContext, message: Arc<dyn AnyMessage>) -> Result<()> {
        let Some(msg) = message.downcast_ref::<M>() else {
            error!(
                expected = std::any::type_name::<M>(),
                opcode = message.opcode(),
                "Message type mismatch"
            );
            return Err(ProtocolError::UnexpectedMessage);
        };
        if ctx.session.is_disposed() {
            warn!(channel_id = %ctx.session.id(), opcode = M::OPCODE, "Session disposed, message skipped");
            return Ok(());
        }
        (self.f)(ctx, msg)
    }
}

/// Request handler over an async closure. The reply is sent on the
/// originating session with the request's rpc id; a handler error or panic
/// becomes a response carrying `ERR_RPC_FAIL`.
pub struct RpcFn<R, F, Fut> {
    f: Arc<F>,
    _marker: PhantomData<fn(R) -> Fut>,
}

impl<R, F, Fut> RpcFn<R, F, Fut>
where
    R: Request + Clone,
    F: Fn(MessageContext, R) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R::Response>> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self {
            f: Arc::new(f),
            _marker: PhantomData,
        }
    }
}

impl<R, F, Fut> MessageHandler for RpcFn<R, F, Fut>
where
    R: Request + Clone,
    F: Fn(MessageContext, R) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R::Response>> + Send + 'static,
{
    fn message_opcode(&self) -> u16 {
        R::OPCODE
    }

    fn response_opcode(&self) -> Option<u16> {
        Some(<R::Response as Message>::OPCODE)
    }

    fn handle(&self, ctx: &MessageContext, message: Arc<dyn AnyMessage>) -> Result<()> {
        let Some(request) = message.downcast_ref::<R>().cloned() else {
            error!(
                expected = std::any::type_name::<R>(),
                opcode = message.opcode(),
                "Request type mismatch"
            );
            return Err(ProtocolError::UnexpectedMessage);
        };

        let rpc_id = request.rpc_id();
        let session = ctx.session.clone();
        let run = (self.f)(ctx.clone(), request);

        tokio::spawn(async move {
            let outcome = AssertUnwindSafe(run).catch_unwind().await;
            let mut response = match outcome {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => {
                    warn!(opcode = R::OPCODE, rpc_id, error = %e, "Rpc handler failed");
                    session.metrics().handler_failed();
                    failure::<R::Response>(e.to_string())
                }
                Err(_) => {
                    error!(opcode = R::OPCODE, rpc_id, "Rpc handler panicked");
                    session.metrics().handler_failed();
                    failure::<R::Response>("rpc handler panicked".to_string())
                }
            };
            response.set_rpc_id(rpc_id);

            if session.is_disposed() {
                debug!(channel_id = %session.id(), rpc_id, "Session gone before reply");
                return;
            }
            if let Err(e) = session.reply(&response) {
                warn!(channel_id = %session.id(), rpc_id, error = %e, "Failed to send reply");
            }
        });
        Ok(())
    }
}

fn failure<T: Response>(message: String) -> T {
    let mut response = T::default();
    response.set_error(ERR_RPC_FAIL);
    response.set_message(message);
    response
}

type HandlerList = Vec<Arc<dyn MessageHandler>>;

/// Opcode → ordered handler list.
///
/// Several handlers may subscribe to one opcode; they run in registration
/// order and a failing or panicking handler does not stop the others.
pub struct MessageDispatcher {
    handlers: Arc<RwLock<HashMap<u16, HandlerList>>>,
}

impl Default for MessageDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageDispatcher {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn register<H: MessageHandler>(&self, handler: H) -> Result<()> {
        let mut handlers = self.handlers.write().map_err(|_| {
            ProtocolError::Custom(constants::ERR_DISPATCHER_WRITE_LOCK.to_string())
        })?;

        handlers
            .entry(handler.message_opcode())
            .or_default()
            .push(Arc::new(handler));
        Ok(())
    }

    /// Register a fire-and-forget handler for `M`.
    pub fn on_message<M, F>(&self, f: F) -> Result<()>
    where
        M: Message,
        F: Fn(&MessageContext, &M) -> Result<()> + Send + Sync + 'static,
    {
        self.register(MessageFn::<M, F>::new(f))
    }

    /// Register a request handler for `R`.
    pub fn on_request<R, F, Fut>(&self, f: F) -> Result<()>
    where
        R: Request + Clone,
        F: Fn(MessageContext, R) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R::Response>> + Send + 'static,
    {
        self.register(RpcFn::<R, F, Fut>::new(f))
    }

    pub fn handler_count(&self, opcode: u16) -> usize {
        self.handlers
            .read()
            .map(|h| h.get(&opcode).map_or(0, Vec::len))
            .unwrap_or(0)
    }

    /// Run every handler registered for `opcode`.
    pub fn handle(&self, ctx: &MessageContext, opcode: u16, message: Arc<dyn AnyMessage>) {
        let handlers = match self.handlers.read() {
            Ok(handlers) => handlers.get(&opcode).cloned(),
            Err(_) => {
                error!(opcode, "{}", constants::ERR_DISPATCHER_READ_LOCK);
                return;
            }
        };

        let Some(handlers) = handlers else {
            warn!(opcode, channel_id = %ctx.session.id(), "No handler registered for opcode");
            return;
        };

        for handler in handlers {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler.handle(ctx, message.clone())));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(opcode, error = %e, "Message handler failed");
                    ctx.session.metrics().handler_failed();
                }
                Err(_) => {
                    error!(opcode, "Message handler panicked");
                    ctx.session.metrics().handler_failed();
                }
            }
        }
    }
}
