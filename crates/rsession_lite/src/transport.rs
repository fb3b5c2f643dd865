use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::TransportError;
use crate::frame::Frame;

/// An ordered, bidirectional frame connection to one peer.
///
/// Frames are moved by background tasks; the transport is released by
/// canceling its shutdown token, after which frames already queued are
/// still flushed.
pub struct Transport {
    outbound: mpsc::Sender<Frame>,
    inbound: mpsc::Receiver<Frame>,
    shutdown: CancellationToken,
    failure: TransportFailure,
}

/// The first error that ended a transport's background tasks.
///
/// Shared between those tasks and the session reading the transport.
#[derive(Debug, Clone, Default)]
pub(crate) struct TransportFailure {
    slot: Arc<Mutex<Option<TransportError>>>,
}

impl TransportFailure {
    /// Keep `err` unless an earlier error was already recorded.
    pub(crate) fn record(&self, err: TransportError) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    /// Why the transport ended. A plain close reports [`TransportError::Closed`].
    pub(crate) fn take(&self) -> TransportError {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .unwrap_or(TransportError::Closed)
    }
}

impl Transport {
    /// Two in-process transports connected to each other.
    pub fn pair(buffer: usize) -> (Transport, Transport) {
        let (a_out_tx, a_out_rx) = mpsc::channel(buffer);
        let (b_out_tx, b_out_rx) = mpsc::channel(buffer);
        let (a_in_tx, a_in_rx) = mpsc::channel(buffer);
        let (b_in_tx, b_in_rx) = mpsc::channel(buffer);
        let a_shutdown = CancellationToken::new();
        let b_shutdown = CancellationToken::new();

        tokio::spawn(forward_frames(a_out_rx, b_in_tx, a_shutdown.clone()));
        tokio::spawn(forward_frames(b_out_rx, a_in_tx, b_shutdown.clone()));

        let a = Transport {
            outbound: a_out_tx,
            inbound: a_in_rx,
            shutdown: a_shutdown,
            failure: TransportFailure::default(),
        };
        let b = Transport {
            outbound: b_out_tx,
            inbound: b_in_rx,
            shutdown: b_shutdown,
            failure: TransportFailure::default(),
        };
        (a, b)
    }

    /// Length-delimited frames over a TCP connection.
    pub fn tcp(stream: TcpStream, buffer: usize) -> Transport {
        let (read_half, write_half) = stream.into_split();
        let (out_tx, out_rx) = mpsc::channel(buffer);
        let (in_tx, in_rx) = mpsc::channel(buffer);
        let shutdown = CancellationToken::new();
        let failure = TransportFailure::default();

        let writer = FramedWrite::new(write_half, LengthDelimitedCodec::new());
        let reader = FramedRead::new(read_half, LengthDelimitedCodec::new());
        tokio::spawn(write_frames(writer, out_rx, shutdown.clone(), failure.clone()));
        tokio::spawn(read_frames(reader, in_tx, shutdown.clone(), failure.clone()));

        Transport {
            outbound: out_tx,
            inbound: in_rx,
            shutdown,
            failure,
        }
    }

    pub(crate) fn sender(&self) -> FrameSender {
        FrameSender {
            tx: self.outbound.clone(),
            shutdown: self.shutdown.clone(),
        }
    }

    pub(crate) async fn recv(&mut self) -> Option<Frame> {
        self.inbound.recv().await
    }

    /// Release the connection.
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub(crate) fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub(crate) fn failure(&self) -> TransportFailure {
        self.failure.clone()
    }

    pub(crate) fn into_inbound(self) -> mpsc::Receiver<Frame> {
        self.inbound
    }
}

/// Cloneable send half of a [`Transport`].
#[derive(Debug, Clone)]
pub(crate) struct FrameSender {
    tx: mpsc::Sender<Frame>,
    shutdown: CancellationToken,
}

impl FrameSender {
    pub(crate) async fn send(&self, frame: Frame) -> Result<(), TransportError> {
        if self.shutdown.is_cancelled() {
            return Err(TransportError::Closed);
        }
        self.tx.send(frame).await.map_err(|_| TransportError::Closed)
    }

    /// Queue a frame without waiting. Used from `Drop` impls.
    pub(crate) fn try_send(&self, frame: Frame) -> Result<(), TransportError> {
        if self.shutdown.is_cancelled() {
            return Err(TransportError::Closed);
        }
        self.tx.try_send(frame).map_err(|_| TransportError::Closed)
    }
}

async fn forward_frames(
    mut frames: mpsc::Receiver<Frame>,
    peer: mpsc::Sender<Frame>,
    shutdown: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            biased;
            frame = frames.recv() => frame,
            _ = shutdown.cancelled() => None,
        };
        let Some(frame) = frame else { break };

        if peer.send(frame).await.is_err() {
            break;
        }
    }
    shutdown.cancel();
    // dropping `peer` is the end-of-stream signal for the other side
}

async fn write_frames(
    mut sink: FramedWrite<tokio::net::tcp::OwnedWriteHalf, LengthDelimitedCodec>,
    mut frames: mpsc::Receiver<Frame>,
    shutdown: CancellationToken,
    failure: TransportFailure,
) {
    loop {
        let frame = tokio::select! {
            biased;
            frame = frames.recv() => frame,
            _ = shutdown.cancelled() => None,
        };
        let Some(frame) = frame else { break };

        if let Err(e) = sink.send(frame.encode_to_bytes()).await {
            warn!(error = %e, "Failed to write frame");
            failure.record(e.into());
            break;
        }
    }

    if let Err(e) = SinkExt::<Bytes>::close(&mut sink).await {
        debug!(error = %e, "Failed to shut down write half");
    }
    shutdown.cancel();
}

async fn read_frames(
    mut stream: FramedRead<tokio::net::tcp::OwnedReadHalf, LengthDelimitedCodec>,
    frames: mpsc::Sender<Frame>,
    shutdown: CancellationToken,
    failure: TransportFailure,
) {
    loop {
        let next = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            next = stream.next() => next,
        };

        match next {
            Some(Ok(buf)) => match Frame::decode(buf.freeze()) {
                Ok(frame) => {
                    if frames.send(frame).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Dropping connection after malformed frame");
                    failure.record(e.into());
                    break;
                }
            },
            Some(Err(e)) => {
                warn!(error = %e, "Failed to read frame");
                failure.record(e.into());
                break;
            }
            None => {
                debug!("Peer closed the connection");
                break;
            }
        }
    }
    shutdown.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FrameError;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_pair_delivers_in_order() {
        let (a, mut b) = Transport::pair(8);
        let sender = a.sender();

        for stream_id in 1..=3 {
            sender.send(Frame::Complete { stream_id }).await.unwrap();
        }

        for stream_id in 1..=3 {
            assert_eq!(b.recv().await, Some(Frame::Complete { stream_id }));
        }
    }

    #[tokio::test]
    async fn test_pair_close_flushes_then_ends_peer() {
        let (a, mut b) = Transport::pair(8);
        let sender = a.sender();

        sender
            .send(Frame::SetupReject {
                reason: "bad credentials".to_string(),
            })
            .await
            .unwrap();
        a.close();

        assert!(matches!(b.recv().await, Some(Frame::SetupReject { .. })));
        assert_eq!(b.recv().await, None);
        assert!(matches!(
            sender.send(Frame::Cancel { stream_id: 1 }).await,
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_tcp_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let accept = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            Transport::tcp(stream, 8)
        });
        let client = Transport::tcp(TcpStream::connect(addr).await.unwrap(), 8);
        let mut server = accept.await.unwrap();

        let frame = Frame::RequestStream {
            stream_id: 1,
            route: "greetings".to_string(),
            payload: Bytes::from_static(b"hello"),
        };
        client.sender().send(frame.clone()).await.unwrap();
        assert_eq!(server.recv().await, Some(frame));

        client.close();
        assert_eq!(server.recv().await, None);
    }

    #[tokio::test]
    async fn test_tcp_malformed_frame_is_recorded() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let accept = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            Transport::tcp(stream, 8)
        });
        let mut peer = FramedWrite::new(TcpStream::connect(addr).await.unwrap(), LengthDelimitedCodec::new());
        let mut server = accept.await.unwrap();

        // frame kind 99 does not exist
        peer.send(Bytes::from_static(&[0x08, 0x63])).await.unwrap();

        assert_eq!(server.recv().await, None);
        assert!(server.is_closed());
        assert!(matches!(
            server.failure().take(),
            TransportError::Frame(FrameError::UnknownKind(99))
        ));
    }

    #[test]
    fn test_failure_keeps_first_error() {
        let failure = TransportFailure::default();
        failure.record(FrameError::UnknownKind(7).into());
        failure.record(TransportError::Closed);

        assert!(matches!(failure.take(), TransportError::Frame(FrameError::UnknownKind(7))));
        // once taken, the transport just reads as closed
        assert!(matches!(failure.take(), TransportError::Closed));
    }

    #[tokio::test]
    async fn test_plain_close_reports_closed() {
        let (a, b) = Transport::pair(8);
        a.close();
        assert!(matches!(b.failure().take(), TransportError::Closed));
    }
}
