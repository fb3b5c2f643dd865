use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{FutureExt, Stream, StreamExt, TryStreamExt};
use prost::Message;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::auth::Principal;
use crate::error::HandlerError;
use crate::session::{Session, StreamHandle};

/// Encoded output of a route handler.
pub type HandlerStream = BoxStream<'static, Result<Bytes, HandlerError>>;

/// A route handler seen only through encoded bytes.
///
/// The dispatcher keys these by route; the message types live behind the
/// decode and encode done by [`TypedHandler`].
pub(crate) trait ErasedHandler: Send + Sync {
    /// Decode the request, run the handler and encode everything it emits.
    fn call(&self, ctx: RequestContext, payload: Bytes) -> BoxFuture<'static, Result<HandlerStream, HandlerError>>;
}

/// What a handler knows about the stream it is serving.
pub struct RequestContext {
    session: Session,
    handle: StreamHandle,
}

impl RequestContext {
    pub(crate) fn new(session: Session, handle: StreamHandle) -> Self {
        Self { session, handle }
    }

    /// The principal the session was authenticated as.
    pub fn principal(&self) -> &Principal {
        self.session.principal()
    }

    /// The session the request arrived on. Use it to open reverse streams
    /// back to the requesting peer.
    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn handle(&self) -> &StreamHandle {
        &self.handle
    }

    pub fn route(&self) -> &str {
        self.handle.route()
    }
}

/// A boxed handler function.
///
/// It receives the request context and the decoded request, and returns a
/// (possibly infinite) stream of responses.
pub type HandlerFn<Req, Resp> = Arc<
    dyn Fn(
            RequestContext,
            Req,
        ) -> BoxFuture<'static, Result<BoxStream<'static, Result<Resp, HandlerError>>, HandlerError>>
        + Send
        + Sync
        + 'static,
>;

/// A typed handler that wraps a handler function.
pub(crate) struct TypedHandler<Req, Resp> {
    handler: HandlerFn<Req, Resp>,
    _marker: PhantomData<fn(Req) -> Resp>,
}

impl<Req, Resp> TypedHandler<Req, Resp>
where
    Req: Message + Default + Send + 'static,
    Resp: Message + Send + 'static,
{
    pub fn new(handler: HandlerFn<Req, Resp>) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

impl<Req, Resp> ErasedHandler for TypedHandler<Req, Resp>
where
    Req: Message + Default + Send + 'static,
    Resp: Message + Send + 'static,
{
    fn call(&self, ctx: RequestContext, payload: Bytes) -> BoxFuture<'static, Result<HandlerStream, HandlerError>> {
        invoke(Arc::clone(&self.handler), ctx, payload).boxed()
    }
}

async fn invoke<Req, Resp>(
    handler: HandlerFn<Req, Resp>,
    ctx: RequestContext,
    payload: Bytes,
) -> Result<HandlerStream, HandlerError>
where
    Req: Message + Default + Send + 'static,
    Resp: Message + Send + 'static,
{
    // an empty payload decodes to the default request
    let request = Req::decode(payload)
        .map_err(|e| HandlerError::new(format!("failed to decode request: {e}")))?;

    let responses = handler(ctx, request).await?;

    Ok(responses
        .map_ok(|msg| Bytes::from(msg.encode_to_vec()))
        .boxed())
}

/// Turn an async closure returning any response stream into a [`HandlerFn`].
///
/// The returned stream is boxed, so closures with different stream types
/// can serve routes of the same message types.
pub fn make_handler<Req, Resp, F, Fut, S>(f: F) -> HandlerFn<Req, Resp>
where
    Req: Message + Default + Send + 'static,
    Resp: Message + Send + 'static,
    F: Fn(RequestContext, Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<S, HandlerError>> + Send + 'static,
    S: Stream<Item = Result<Resp, HandlerError>> + Send + 'static,
{
    Arc::new(move |ctx: RequestContext, request: Req| {
        let fut = f(ctx, request);
        fut.map(|result| result.map(StreamExt::boxed)).boxed()
    })
}

/// A resolved route, ready to be invoked.
#[derive(Clone)]
pub struct RouteHandler {
    route: String,
    inner: Arc<dyn ErasedHandler>,
}

impl RouteHandler {
    pub(crate) fn new(route: String, inner: Arc<dyn ErasedHandler>) -> Self {
        Self { route, inner }
    }

    pub fn route(&self) -> &str {
        &self.route
    }

    pub(crate) fn call(&self, ctx: RequestContext, payload: Bytes) -> BoxFuture<'static, Result<HandlerStream, HandlerError>> {
        self.inner.call(ctx, payload)
    }
}

impl std::fmt::Debug for RouteHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteHandler")
            .field("route", &self.route)
            .finish()
    }
}
