//! Authenticated sessions and the streams multiplexed on them.

mod config;
mod handle;
mod manager;
mod stream;

pub use config::SessionConfig;
pub use handle::{Direction, StreamGuard, StreamHandle, StreamKey, StreamRegistry};
pub use manager::SessionManager;
pub use stream::{InboundStream, ResponseStream};

use bytes::Bytes;
use dashmap::DashMap;
use prost::Message;
use std::fmt;
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::{AuthorizationGate, Principal};
use crate::dispatcher::{RequestContext, RouteDispatcher, RouteHandler};
use crate::error::{DispatchError, StreamError, TransportError};
use crate::frame::Frame;
use crate::transport::{FrameSender, TransportFailure};

/// Which side of the handshake a session was established from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Sent the setup frame.
    Initiator,
    /// Accepted the setup frame.
    Responder,
}

impl Role {
    /// Initiators use odd stream ids, responders even ones.
    fn first_stream_id(self) -> u32 {
        match self {
            Role::Initiator => 1,
            Role::Responder => 2,
        }
    }
}

/// Live sessions of one manager, keyed by session id.
pub(crate) type SessionTable = DashMap<Uuid, String, ahash::RandomState>;

/// Where responses for one outbound stream are delivered.
pub(crate) struct Responder {
    route: String,
    tx: mpsc::UnboundedSender<Result<Bytes, StreamError>>,
}

pub(crate) type ResponderMap = DashMap<u32, Responder, ahash::RandomState>;

/// An authenticated, bidirectional connection to one peer.
///
/// Either side may open streams on it. Clones refer to the same session.
/// Dropping the last clone closes it, as does [`close`](Session::close).
/// Inbound streams still being served keep it alive until they end.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    id: Uuid,
    role: Role,
    principal: Principal,
    sender: FrameSender,
    transport_shutdown: CancellationToken,
    failure: TransportFailure,
    root: CancellationToken,
    next_stream_id: AtomicU32,
    streams: Arc<StreamRegistry>,
    responders: Arc<ResponderMap>,
    dispatcher: Arc<RouteDispatcher>,
    gate: Arc<AuthorizationGate>,
    sessions: Arc<SessionTable>,
    closed: AtomicBool,
}

pub(crate) struct SessionParts {
    pub role: Role,
    pub principal: Principal,
    pub sender: FrameSender,
    pub transport_shutdown: CancellationToken,
    pub failure: TransportFailure,
    pub dispatcher: Arc<RouteDispatcher>,
    pub gate: Arc<AuthorizationGate>,
    pub sessions: Arc<SessionTable>,
}

impl Session {
    /// Register the session and start reading `inbound`.
    pub(crate) fn start(parts: SessionParts, inbound: mpsc::Receiver<Frame>) -> Session {
        let inner = SessionInner {
            id: Uuid::new_v4(),
            role: parts.role,
            next_stream_id: AtomicU32::new(parts.role.first_stream_id()),
            principal: parts.principal,
            sender: parts.sender,
            transport_shutdown: parts.transport_shutdown,
            failure: parts.failure,
            root: CancellationToken::new(),
            streams: Arc::new(StreamRegistry::new()),
            responders: Arc::new(ResponderMap::default()),
            dispatcher: parts.dispatcher,
            gate: parts.gate,
            sessions: parts.sessions,
            closed: AtomicBool::new(false),
        };
        inner
            .sessions
            .insert(inner.id, inner.principal.username().to_string());

        let session = Session {
            inner: Arc::new(inner),
        };
        tokio::spawn(drive(
            Arc::downgrade(&session.inner),
            session.inner.root.clone(),
            inbound,
        ));
        session
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn role(&self) -> Role {
        self.inner.role
    }

    /// The authenticated principal. Both peers see the same one.
    pub fn principal(&self) -> &Principal {
        &self.inner.principal
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Resolves once the session is closed, locally or by the transport.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.inner.root.cancelled()
    }

    /// Streams currently open in either direction.
    pub fn open_streams(&self) -> Vec<StreamHandle> {
        self.inner.streams.handles()
    }

    /// Open a stream on `route` at the remote peer.
    ///
    /// A rejection by the remote (unknown route, denied access) arrives as
    /// the first item of the returned stream.
    pub async fn open_stream<Req, Resp>(
        &self,
        route: impl Into<String>,
        request: &Req,
    ) -> Result<ResponseStream<Resp>, StreamError>
    where
        Req: Message,
        Resp: Message + Default,
    {
        if self.is_closed() {
            return Err(StreamError::SessionClosed);
        }

        let route = route.into();
        let stream_id = self.inner.next_stream_id.fetch_add(2, Ordering::Relaxed);
        let handle = StreamHandle::new(
            stream_id,
            route.clone(),
            Direction::Outbound,
            self.inner.root.child_token(),
        );
        let guard = self
            .inner
            .streams
            .try_register(handle.clone())
            .map_err(|e| StreamError::Internal(e.to_string()))?;

        let (responder, rx) = stream::responder(&route);
        self.inner.responders.insert(stream_id, responder);
        let response = ResponseStream::new(
            handle,
            rx,
            self.inner.sender.clone(),
            Arc::clone(&self.inner.responders),
            guard,
        );

        // close() may have drained the registry while we were registering
        if self.is_closed() {
            return Err(StreamError::SessionClosed);
        }

        let frame = Frame::RequestStream {
            stream_id,
            route: route.clone(),
            payload: request.encode_to_vec().into(),
        };
        if self.inner.sender.send(frame).await.is_err() {
            return Err(StreamError::SessionClosed);
        }

        debug!(session_id = %self.inner.id, stream_id, route = %route, "Opened stream");
        Ok(response)
    }

    /// Dispatch a remote stream-open to the local handler for `route`.
    ///
    /// Access is checked against the session principal before the route is
    /// resolved. The stream is canceled if the session closes or the remote
    /// cancels it.
    pub async fn dispatch_inbound(
        &self,
        stream_id: u32,
        route: &str,
        payload: Bytes,
    ) -> Result<InboundStream, DispatchError> {
        let (handler, handle, guard) = self.open_inbound(stream_id, route)?;
        self.invoke(handler, handle, guard, payload).await
    }

    fn open_inbound(
        &self,
        stream_id: u32,
        route: &str,
    ) -> Result<(RouteHandler, StreamHandle, StreamGuard), DispatchError> {
        self.inner
            .gate
            .check(Some(&self.inner.principal), route)?;
        let handler = self.inner.dispatcher.resolve(route)?;

        let handle = StreamHandle::new(
            stream_id,
            route,
            Direction::Inbound,
            self.inner.root.child_token(),
        );
        let guard = self.inner.streams.try_register(handle.clone())?;
        Ok((handler, handle, guard))
    }

    async fn invoke(
        &self,
        handler: RouteHandler,
        handle: StreamHandle,
        guard: StreamGuard,
        payload: Bytes,
    ) -> Result<InboundStream, DispatchError> {
        let ctx = RequestContext::new(self.clone(), handle.clone());
        let body = tokio::select! {
            biased;
            _ = handle.cancelled() => return Err(DispatchError::Cancelled),
            body = handler.call(ctx, payload) => body?,
        };
        Ok(InboundStream::new(handle, body, guard))
    }

    /// Apply one frame received from the transport.
    pub fn on_inbound(&self, frame: Frame) {
        match frame {
            Frame::RequestStream {
                stream_id,
                route,
                payload,
            } => self.accept_stream(stream_id, route, payload),

            Frame::Next { stream_id, payload } => match self.inner.responders.get(&stream_id) {
                Some(responder) => {
                    // the consumer may already be gone
                    let _ = responder.tx.send(Ok(payload));
                }
                None => debug!(stream_id, "Dropping element for unknown stream"),
            },

            Frame::Complete { stream_id } => {
                // dropping the sender ends the consumer's stream
                self.inner.responders.remove(&stream_id);
            }

            Frame::Error {
                stream_id,
                code,
                message,
            } => {
                if let Some((_, responder)) = self.inner.responders.remove(&stream_id) {
                    let err = StreamError::from_code(code, &responder.route, message);
                    let _ = responder.tx.send(Err(err));
                }
            }

            Frame::Cancel { stream_id } => {
                let key = StreamKey::new(Direction::Inbound, stream_id);
                if let Some(handle) = self.inner.streams.get(&key) {
                    debug!(session_id = %self.inner.id, stream_id, "Remote canceled stream");
                    handle.cancel();
                }
            }

            other => warn!(
                session_id = %self.inner.id,
                kind = other.kind_name(),
                "Ignoring handshake frame on an established session"
            ),
        }
    }

    fn accept_stream(&self, stream_id: u32, route: String, payload: Bytes) {
        // register synchronously so a cancel right behind the open finds it
        let opened = self.open_inbound(stream_id, &route);
        let session = self.clone();

        tokio::spawn(async move {
            let result = match opened {
                Ok((handler, handle, guard)) => session.invoke(handler, handle, guard, payload).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(inbound) => session.pipe(inbound).await,
                Err(DispatchError::Cancelled) => {
                    debug!(stream_id, route = %route, "Stream canceled during dispatch");
                }
                Err(e) => {
                    warn!(
                        session_id = %session.inner.id,
                        stream_id,
                        route = %route,
                        error = %e,
                        "Refusing stream"
                    );
                    let err = StreamError::from(e);
                    let frame = Frame::Error {
                        stream_id,
                        code: err.to_code(),
                        message: err.wire_message(),
                    };
                    let _ = session.inner.sender.send(frame).await;
                }
            }
        });
    }

    /// Forward a handler's output to the remote until it ends or is canceled.
    async fn pipe(&self, mut inbound: InboundStream) {
        let stream_id = inbound.handle().stream_id();

        loop {
            let frame = match inbound.next_or_cancelled().await {
                Some(Ok(payload)) => Frame::Next { stream_id, payload },
                Some(Err(e)) => {
                    warn!(stream_id, error = %e, "Handler failed");
                    let err = StreamError::Handler(e.message().to_string());
                    Frame::Error {
                        stream_id,
                        code: err.to_code(),
                        message: err.wire_message(),
                    }
                }
                None if inbound.handle().is_cancelled() => {
                    debug!(stream_id, "Stream canceled");
                    return;
                }
                None => Frame::Complete { stream_id },
            };

            let last = !matches!(frame, Frame::Next { .. });
            if self.inner.sender.send(frame).await.is_err() || last {
                return;
            }
        }
    }

    /// Close the session and cancel every stream still open on it.
    ///
    /// Returns how many streams this call canceled. Closing again is a no-op
    /// and returns 0.
    pub fn close(&self) -> usize {
        self.inner.shutdown()
    }

    /// Tear the session down after its transport failed.
    fn fail(&self, err: TransportError) {
        if self.is_closed() {
            return;
        }
        warn!(session_id = %self.inner.id, error = %err, "Transport lost, closing session");

        for responder in self.inner.responders.iter() {
            let _ = responder.tx.send(Err(StreamError::SessionClosed));
        }
        self.close();
    }
}

impl SessionInner {
    fn shutdown(&self) -> usize {
        if self.closed.swap(true, Ordering::AcqRel) {
            return 0;
        }

        let mut cancelled = 0;
        for handle in self.streams.drain() {
            if !handle.cancel() {
                continue;
            }
            cancelled += 1;
            if handle.direction() == Direction::Outbound {
                let _ = self.sender.try_send(Frame::Cancel {
                    stream_id: handle.stream_id(),
                });
            }
        }

        self.responders.clear();
        self.root.cancel();
        self.transport_shutdown.cancel();
        self.sessions.remove(&self.id);

        info!(
            session_id = %self.id,
            principal = %self.principal,
            cancelled,
            "Session closed"
        );
        cancelled
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Read frames until the session closes or the transport ends.
///
/// Holds the session weakly so an abandoned session is still released.
async fn drive(weak: Weak<SessionInner>, root: CancellationToken, mut inbound: mpsc::Receiver<Frame>) {
    loop {
        let frame = tokio::select! {
            biased;
            _ = root.cancelled() => break,
            frame = inbound.recv() => frame,
        };

        let Some(inner) = weak.upgrade() else { break };
        let session = Session { inner };
        match frame {
            Some(frame) => session.on_inbound(frame),
            None => {
                session.fail(session.inner.failure.take());
                break;
            }
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("role", &self.inner.role)
            .field("principal", &self.inner.principal)
            .field("closed", &self.is_closed())
            .finish()
    }
}
