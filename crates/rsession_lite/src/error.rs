use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while encoding or decoding setup metadata.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CredentialError {
    #[error("setup metadata is empty")]
    Empty,

    #[error("unsupported authentication type: {0:#04x}")]
    UnsupportedAuthType(u8),

    #[error("setup metadata truncated")]
    Truncated,

    #[error("username does not fit the metadata length prefix ({0} bytes)")]
    UsernameTooLong(usize),

    #[error("credentials are not valid UTF-8")]
    InvalidUtf8(#[from] std::str::Utf8Error),
}

/// Errors that end a handshake. Fatal to the attempted session only.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuthenticationError {
    /// The credential store does not know this username/secret pair.
    #[error("bad credentials for '{0}'")]
    BadCredentials(String),

    /// The setup metadata could not be decoded.
    #[error("malformed setup metadata")]
    Malformed(#[from] CredentialError),

    /// The responder rejected the setup frame.
    #[error("setup rejected by peer: {0}")]
    Rejected(String),

    /// No setup frame or acknowledgement arrived in time.
    #[error("handshake timed out after {0:?}")]
    Timeout(Duration),

    /// The transport closed before the handshake completed.
    #[error("connection closed during handshake")]
    ConnectionClosed,

    /// The peer sent something other than a handshake frame.
    #[error("unexpected {0} frame during handshake")]
    UnexpectedFrame(&'static str),

    /// This manager cannot accept sessions.
    #[error("no credential store configured")]
    NoCredentialStore,
}

/// A stream-open was denied for an authenticated principal.
///
/// Local to the stream-open; the session stays usable.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("access to '{route}' denied: {reason}")]
pub struct AuthorizationError {
    pub route: String,
    pub reason: String,
}

/// No handler is registered for a route.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("no handler registered for '{0}'")]
pub struct RouteNotFoundError(pub String);

/// Errors raised while building a route table.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RegistrationError {
    #[error("a handler is already registered for '{0}'")]
    DuplicateRoute(String),
}

/// An error reported by a route handler.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Errors configuring a health monitor.
#[derive(Debug, Error, Clone, PartialEq)]
#[non_exhaustive]
pub enum HealthError {
    #[error("unhealthy probability must be within [0, 1], got {0}")]
    InvalidProbability(f64),
}

/// Errors decoding a frame off the wire.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FrameError {
    #[error("unknown frame kind {0}")]
    UnknownKind(i32),

    #[error("protobuf decode error")]
    Decode(#[from] prost::DecodeError),
}

/// The underlying connection failed. Fatal to the session.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TransportError {
    #[error("connection closed")]
    Closed,

    #[error("i/o error")]
    Io(#[from] std::io::Error),

    #[error("malformed frame")]
    Frame(#[from] FrameError),
}

/// Errors that end (or prevent) a whole session.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    #[error(transparent)]
    Authentication(#[from] AuthenticationError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Errors from dispatching an inbound stream-open to a local handler.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DispatchError {
    #[error(transparent)]
    Authorization(#[from] AuthorizationError),

    #[error(transparent)]
    RouteNotFound(#[from] RouteNotFoundError),

    #[error("handler failed: {0}")]
    Handler(#[from] HandlerError),

    /// The peer reused a stream id that is still open.
    #[error("stream {0} is already open")]
    DuplicateStream(u32),

    /// The stream was canceled before the handler produced its output.
    #[error("stream canceled before dispatch completed")]
    Cancelled,
}

/// Errors seen by the consumer of a single stream.
///
/// Stream errors never affect sibling streams on the same session.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum StreamError {
    #[error(transparent)]
    Authorization(#[from] AuthorizationError),

    #[error(transparent)]
    RouteNotFound(#[from] RouteNotFoundError),

    #[error("handler failed: {0}")]
    Handler(String),

    #[error("failed to decode payload")]
    Decode,

    #[error("internal error: {0}")]
    Internal(String),

    #[error("session closed")]
    SessionClosed,
}

impl StreamError {
    pub const CODE_UNAUTHORIZED: u32 = 1;
    pub const CODE_ROUTE_NOT_FOUND: u32 = 2;
    pub const CODE_HANDLER: u32 = 3;
    pub const CODE_DECODE: u32 = 4;
    pub const CODE_INTERNAL: u32 = 5;

    pub fn to_code(&self) -> u32 {
        match self {
            StreamError::Authorization(_) => Self::CODE_UNAUTHORIZED,
            StreamError::RouteNotFound(_) => Self::CODE_ROUTE_NOT_FOUND,
            StreamError::Handler(_) => Self::CODE_HANDLER,
            StreamError::Decode => Self::CODE_DECODE,
            StreamError::Internal(_) | StreamError::SessionClosed => Self::CODE_INTERNAL,
        }
    }

    /// The human-readable part carried next to the code in an error frame.
    pub fn wire_message(&self) -> String {
        match self {
            StreamError::Authorization(e) => e.reason.clone(),
            StreamError::RouteNotFound(e) => e.0.clone(),
            StreamError::Handler(message) | StreamError::Internal(message) => message.clone(),
            StreamError::Decode => String::new(),
            StreamError::SessionClosed => "session closed".to_string(),
        }
    }

    /// Rebuild an error received in an error frame for a stream opened on `route`.
    pub fn from_code(code: u32, route: &str, message: String) -> Self {
        match code {
            Self::CODE_UNAUTHORIZED => StreamError::Authorization(AuthorizationError {
                route: route.to_string(),
                reason: message,
            }),
            Self::CODE_ROUTE_NOT_FOUND => StreamError::RouteNotFound(RouteNotFoundError(
                route.to_string(),
            )),
            Self::CODE_HANDLER => StreamError::Handler(message),
            Self::CODE_DECODE => StreamError::Decode,
            _ => StreamError::Internal(message),
        }
    }
}

impl From<DispatchError> for StreamError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::Authorization(e) => StreamError::Authorization(e),
            DispatchError::RouteNotFound(e) => StreamError::RouteNotFound(e),
            DispatchError::Handler(e) => StreamError::Handler(e.message),
            other => StreamError::Internal(other.to_string()),
        }
    }
}
