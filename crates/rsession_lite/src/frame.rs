use bytes::Bytes;
use prost::Message;

use crate::auth::Principal;
use crate::error::FrameError;

/// One unit of traffic on a session's transport.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// First frame from the initiator, carrying encoded credentials.
    Setup { metadata: Bytes },
    /// Handshake accepted; echoes the principal the session runs as.
    SetupAck { principal: Principal },
    /// Handshake refused. The connection is torn down after this frame.
    SetupReject { reason: String },
    /// Open a stream on `route`.
    RequestStream {
        stream_id: u32,
        route: String,
        payload: Bytes,
    },
    /// One element of a stream.
    Next { stream_id: u32, payload: Bytes },
    /// Normal end of a stream.
    Complete { stream_id: u32 },
    /// Abnormal end of a stream.
    Error {
        stream_id: u32,
        code: u32,
        message: String,
    },
    /// The requester no longer wants the stream.
    Cancel { stream_id: u32 },
}

impl Frame {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Frame::Setup { .. } => "setup",
            Frame::SetupAck { .. } => "setup-ack",
            Frame::SetupReject { .. } => "setup-reject",
            Frame::RequestStream { .. } => "request-stream",
            Frame::Next { .. } => "next",
            Frame::Complete { .. } => "complete",
            Frame::Error { .. } => "error",
            Frame::Cancel { .. } => "cancel",
        }
    }

    /// Serialize for a byte-oriented transport.
    pub fn encode_to_bytes(&self) -> Bytes {
        WireFrame::from(self.clone()).encode_to_vec().into()
    }

    /// Parse a frame produced by [`Frame::encode_to_bytes`].
    pub fn decode(bytes: Bytes) -> Result<Self, FrameError> {
        WireFrame::decode(bytes)?.into_frame()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
enum FrameKind {
    Unspecified = 0,
    Setup = 1,
    SetupAck = 2,
    SetupReject = 3,
    RequestStream = 4,
    Next = 5,
    Complete = 6,
    Failure = 7,
    Cancel = 8,
}

#[derive(Clone, PartialEq, prost::Message)]
struct WireFrame {
    #[prost(enumeration = "FrameKind", tag = "1")]
    kind: i32,
    #[prost(uint32, tag = "2")]
    stream_id: u32,
    #[prost(string, tag = "3")]
    route: String,
    #[prost(bytes = "bytes", tag = "4")]
    payload: Bytes,
    #[prost(uint32, tag = "5")]
    error_code: u32,
    #[prost(string, tag = "6")]
    message: String,
    #[prost(string, tag = "7")]
    username: String,
    #[prost(string, repeated, tag = "8")]
    roles: Vec<String>,
}

impl WireFrame {
    fn of(kind: FrameKind, stream_id: u32) -> Self {
        Self {
            kind: kind.into(),
            stream_id,
            ..Default::default()
        }
    }
}

impl From<Frame> for WireFrame {
    fn from(frame: Frame) -> Self {
        match frame {
            Frame::Setup { metadata } => Self {
                payload: metadata,
                ..Self::of(FrameKind::Setup, 0)
            },
            Frame::SetupAck { principal } => Self {
                username: principal.username().to_string(),
                roles: principal.roles().iter().cloned().collect(),
                ..Self::of(FrameKind::SetupAck, 0)
            },
            Frame::SetupReject { reason } => Self {
                message: reason,
                ..Self::of(FrameKind::SetupReject, 0)
            },
            Frame::RequestStream {
                stream_id,
                route,
                payload,
            } => Self {
                route,
                payload,
                ..Self::of(FrameKind::RequestStream, stream_id)
            },
            Frame::Next { stream_id, payload } => Self {
                payload,
                ..Self::of(FrameKind::Next, stream_id)
            },
            Frame::Complete { stream_id } => Self::of(FrameKind::Complete, stream_id),
            Frame::Error {
                stream_id,
                code,
                message,
            } => Self {
                error_code: code,
                message,
                ..Self::of(FrameKind::Failure, stream_id)
            },
            Frame::Cancel { stream_id } => Self::of(FrameKind::Cancel, stream_id),
        }
    }
}

impl WireFrame {
    fn into_frame(self) -> Result<Frame, FrameError> {
        let kind = FrameKind::try_from(self.kind).map_err(|_| FrameError::UnknownKind(self.kind))?;
        let stream_id = self.stream_id;

        let frame = match kind {
            FrameKind::Unspecified => return Err(FrameError::UnknownKind(self.kind)),
            FrameKind::Setup => Frame::Setup {
                metadata: self.payload,
            },
            FrameKind::SetupAck => Frame::SetupAck {
                principal: Principal::new(self.username, self.roles),
            },
            FrameKind::SetupReject => Frame::SetupReject {
                reason: self.message,
            },
            FrameKind::RequestStream => Frame::RequestStream {
                stream_id,
                route: self.route,
                payload: self.payload,
            },
            FrameKind::Next => Frame::Next {
                stream_id,
                payload: self.payload,
            },
            FrameKind::Complete => Frame::Complete { stream_id },
            FrameKind::Failure => Frame::Error {
                stream_id,
                code: self.error_code,
                message: self.message,
            },
            FrameKind::Cancel => Frame::Cancel { stream_id },
        };

        Ok(frame)
    }
}
