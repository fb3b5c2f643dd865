//! Authenticated, multiplexed streaming sessions between two peers.
//!
//! An initiator establishes a [`Session`] by sending credentials; the
//! responder authenticates them once and afterwards checks every stream-open
//! against an [`AuthorizationGate`]. Either peer may then open streams to the
//! other by route name. Handlers can race their output against a reverse
//! stream with [`lifecycle::produce`].

pub mod auth;
pub mod credentials;
pub mod dispatcher;
pub mod error;
pub mod frame;
pub mod health;
pub mod lifecycle;
pub mod session;
pub mod transport;

pub use auth::{AccessRule, AuthorizationGate, CredentialStore, InMemoryCredentialStore, Principal};
pub use credentials::Credentials;
pub use dispatcher::{RequestContext, RouteDispatcher};
pub use error::{
    AuthenticationError, AuthorizationError, DispatchError, HandlerError, RouteNotFoundError, SessionError,
    StreamError, TransportError,
};
pub use health::{HealthMonitor, HealthSample};
pub use lifecycle::{Termination, bounded, produce};
pub use session::{ResponseStream, Session, SessionConfig, SessionManager, StreamHandle};
pub use transport::Transport;
