use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::{AuthorizationGate, CredentialStore};
use crate::credentials::Credentials;
use crate::dispatcher::RouteDispatcher;
use crate::error::{AuthenticationError, SessionError};
use crate::frame::Frame;
use crate::session::config::SessionConfig;
use crate::session::{Role, Session, SessionParts, SessionTable};
use crate::transport::Transport;

/// Establishes sessions and tracks the ones that are alive.
///
/// Both peers run one. The initiator calls [`establish`](Self::establish),
/// the responder calls [`accept`](Self::accept) and needs a credential store.
pub struct SessionManager {
    config: SessionConfig,
    dispatcher: Arc<RouteDispatcher>,
    gate: Arc<AuthorizationGate>,
    store: Option<Arc<dyn CredentialStore>>,
    sessions: Arc<SessionTable>,
}

impl SessionManager {
    /// A manager for the peer that starts handshakes.
    pub fn initiator(config: SessionConfig, dispatcher: RouteDispatcher) -> Self {
        Self {
            config,
            dispatcher: Arc::new(dispatcher),
            gate: Arc::new(AuthorizationGate::new()),
            store: None,
            sessions: Arc::new(SessionTable::default()),
        }
    }

    /// A manager for the peer that authenticates incoming handshakes.
    pub fn responder(
        config: SessionConfig,
        dispatcher: RouteDispatcher,
        store: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            store: Some(store),
            ..Self::initiator(config, dispatcher)
        }
    }

    /// Replace the gate checked on every inbound stream-open.
    pub fn with_gate(mut self, gate: AuthorizationGate) -> Self {
        self.gate = Arc::new(gate);
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &RouteDispatcher {
        &self.dispatcher
    }

    /// Number of sessions that are established and not yet closed.
    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Ids of the live sessions.
    pub fn session_ids(&self) -> Vec<Uuid> {
        self.sessions.iter().map(|entry| *entry.key()).collect()
    }

    /// Run the initiator half of the handshake over `transport`.
    pub async fn establish(
        &self,
        mut transport: Transport,
        credentials: Credentials,
    ) -> Result<Session, SessionError> {
        let metadata = match credentials.encode() {
            Ok(metadata) => metadata,
            Err(e) => return Err(abort(&transport, e.into())),
        };

        transport.sender().send(Frame::Setup { metadata }).await?;
        debug!(username = %credentials.username(), "Sent setup");

        let reply = tokio::time::timeout(self.config.handshake_timeout, transport.recv()).await;
        let principal = match reply {
            Ok(Some(Frame::SetupAck { principal })) => principal,
            Ok(Some(Frame::SetupReject { reason })) => {
                warn!(username = %credentials.username(), reason = %reason, "Setup rejected");
                return Err(abort(&transport, AuthenticationError::Rejected(reason)));
            }
            Ok(Some(other)) => {
                return Err(abort(
                    &transport,
                    AuthenticationError::UnexpectedFrame(other.kind_name()),
                ));
            }
            Ok(None) => return Err(abort(&transport, AuthenticationError::ConnectionClosed)),
            Err(_) => {
                return Err(abort(
                    &transport,
                    AuthenticationError::Timeout(self.config.handshake_timeout),
                ));
            }
        };

        let session = self.start(Role::Initiator, principal, transport);
        info!(session_id = %session.id(), principal = %session.principal(), "Session established");
        Ok(session)
    }

    /// Run the responder half of the handshake over `transport`.
    ///
    /// Bad credentials are answered with a setup rejection before the
    /// transport is released.
    pub async fn accept(&self, mut transport: Transport) -> Result<Session, SessionError> {
        let Some(store) = &self.store else {
            return Err(abort(&transport, AuthenticationError::NoCredentialStore));
        };

        let first = tokio::time::timeout(self.config.handshake_timeout, transport.recv()).await;
        let metadata = match first {
            Ok(Some(Frame::Setup { metadata })) => metadata,
            Ok(Some(other)) => {
                return Err(abort(
                    &transport,
                    AuthenticationError::UnexpectedFrame(other.kind_name()),
                ));
            }
            Ok(None) => return Err(abort(&transport, AuthenticationError::ConnectionClosed)),
            Err(_) => {
                return Err(abort(
                    &transport,
                    AuthenticationError::Timeout(self.config.handshake_timeout),
                ));
            }
        };

        let authenticated = Credentials::decode(metadata)
            .map_err(AuthenticationError::from)
            .and_then(|credentials| store.authenticate(credentials));

        let principal = match authenticated {
            Ok(principal) => principal,
            Err(e) => {
                warn!(error = %e, "Rejecting setup");
                let reject = Frame::SetupReject {
                    reason: e.to_string(),
                };
                if transport.sender().send(reject).await.is_err() {
                    debug!("Peer left before the rejection was sent");
                }
                return Err(abort(&transport, e));
            }
        };

        transport
            .sender()
            .send(Frame::SetupAck {
                principal: principal.clone(),
            })
            .await?;

        let session = self.start(Role::Responder, principal, transport);
        info!(session_id = %session.id(), principal = %session.principal(), "Session accepted");
        Ok(session)
    }

    fn start(&self, role: Role, principal: crate::auth::Principal, transport: Transport) -> Session {
        let parts = SessionParts {
            role,
            principal,
            sender: transport.sender(),
            transport_shutdown: transport.shutdown_token(),
            failure: transport.failure(),
            dispatcher: Arc::clone(&self.dispatcher),
            gate: Arc::clone(&self.gate),
            sessions: Arc::clone(&self.sessions),
        };
        Session::start(parts, transport.into_inbound())
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("config", &self.config)
            .field("dispatcher", &self.dispatcher)
            .field("accepts", &self.store.is_some())
            .field("active_sessions", &self.sessions.len())
            .finish()
    }
}

/// Release the transport of a failed handshake.
fn abort(transport: &Transport, err: AuthenticationError) -> SessionError {
    transport.close();
    err.into()
}
