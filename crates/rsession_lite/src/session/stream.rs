use bytes::Bytes;
use futures::{Stream, StreamExt};
use prost::Message;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tracing::debug;

use crate::dispatcher::HandlerStream;
use crate::error::{HandlerError, StreamError};
use crate::frame::Frame;
use crate::session::handle::{StreamGuard, StreamHandle};
use crate::session::{Responder, ResponderMap};
use crate::transport::FrameSender;

/// The receive side of a stream this peer opened.
///
/// Yields decoded responses until the remote completes or fails the stream.
/// Dropping it early cancels the stream on the remote peer.
pub struct ResponseStream<Resp> {
    handle: StreamHandle,
    rx: mpsc::UnboundedReceiver<Result<Bytes, StreamError>>,
    sender: FrameSender,
    responders: Arc<ResponderMap>,
    done: bool,
    guard: Option<StreamGuard>,
    _marker: PhantomData<fn() -> Resp>,
}

impl<Resp> ResponseStream<Resp> {
    pub(crate) fn new(
        handle: StreamHandle,
        rx: mpsc::UnboundedReceiver<Result<Bytes, StreamError>>,
        sender: FrameSender,
        responders: Arc<ResponderMap>,
        guard: StreamGuard,
    ) -> Self {
        Self {
            handle,
            rx,
            sender,
            responders,
            done: false,
            guard: Some(guard),
            _marker: PhantomData,
        }
    }

    pub fn handle(&self) -> &StreamHandle {
        &self.handle
    }

    pub fn stream_id(&self) -> u32 {
        self.handle.stream_id()
    }

    /// Cancel the stream. The remote producer is told to stop and no further
    /// responses are yielded.
    pub fn cancel(&mut self) {
        if self.done {
            return;
        }
        self.cancel_remote();
        self.finish();
    }

    fn cancel_remote(&self) {
        if self.handle.cancel() {
            let stream_id = self.handle.stream_id();
            if self.sender.try_send(Frame::Cancel { stream_id }).is_err() {
                debug!(stream_id, "Could not send cancel, transport is gone");
            }
        }
    }

    fn finish(&mut self) {
        self.done = true;
        self.responders.remove(&self.handle.stream_id());
        self.guard = None;
        self.rx.close();
    }
}

impl<Resp> Stream for ResponseStream<Resp>
where
    Resp: Message + Default,
{
    type Item = Result<Resp, StreamError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(Ok(bytes))) => match Resp::decode(bytes) {
                Ok(msg) => Poll::Ready(Some(Ok(msg))),
                // stop the stream, the rest of it is useless to us
                Err(_) => {
                    this.cancel_remote();
                    this.finish();
                    Poll::Ready(Some(Err(StreamError::Decode)))
                }
            },
            Poll::Ready(Some(Err(err))) => {
                this.finish();
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                this.finish();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<Resp> Drop for ResponseStream<Resp> {
    fn drop(&mut self) {
        if !self.done {
            self.cancel_remote();
            self.finish();
        }
    }
}

impl<Resp> std::fmt::Debug for ResponseStream<Resp> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseStream")
            .field("handle", &self.handle)
            .field("done", &self.done)
            .finish()
    }
}

/// A remote peer's stream-open, dispatched to a local handler.
///
/// Yields the handler's encoded output. The stream stays registered on its
/// session until this is dropped.
pub struct InboundStream {
    handle: StreamHandle,
    body: HandlerStream,
    _guard: StreamGuard,
}

impl InboundStream {
    pub(crate) fn new(handle: StreamHandle, body: HandlerStream, guard: StreamGuard) -> Self {
        Self {
            handle,
            body,
            _guard: guard,
        }
    }

    pub fn handle(&self) -> &StreamHandle {
        &self.handle
    }

    /// Next element, or `None` once the handler is done or the stream is
    /// canceled.
    pub(crate) async fn next_or_cancelled(&mut self) -> Option<Result<Bytes, HandlerError>> {
        tokio::select! {
            biased;
            _ = self.handle.cancelled() => None,
            next = self.body.next() => next,
        }
    }
}

impl Stream for InboundStream {
    type Item = Result<Bytes, HandlerError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.handle.is_cancelled() {
            return Poll::Ready(None);
        }
        self.body.poll_next_unpin(cx)
    }
}

impl std::fmt::Debug for InboundStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundStream")
            .field("handle", &self.handle)
            .finish()
    }
}

/// Register the consumer side of an outbound stream.
pub(crate) fn responder(route: &str) -> (Responder, mpsc::UnboundedReceiver<Result<Bytes, StreamError>>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let responder = Responder {
        route: route.to_string(),
        tx,
    };
    (responder, rx)
}
