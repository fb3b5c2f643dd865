use anyhow::Result;
use greeting_sandbox::config::ServiceConfig;
use greeting_sandbox::greeting::register_greetings;
use greeting_sandbox::{default_credential_store, init_tracing};
use rsession_lite::session::{SessionConfig, SessionManager};
use rsession_lite::{AuthorizationGate, RouteDispatcher, Transport};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let config = ServiceConfig::from_env()?;

    let mut dispatcher = RouteDispatcher::new();
    register_greetings(&mut dispatcher, config.greetings)?;

    // every route requires an authenticated principal
    let manager = SessionManager::responder(
        SessionConfig::default(),
        dispatcher,
        Arc::new(default_credential_store()),
    )
    .with_gate(AuthorizationGate::new());
    let manager = Arc::new(manager);

    let listener = TcpListener::bind(&config.addr).await?;
    info!(addr = %config.addr, "Greeting service listening");

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "Failed to accept connection");
                continue;
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            warn!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
        }

        let manager = Arc::clone(&manager);
        tokio::spawn(async move {
            let transport = Transport::tcp(stream, manager.config().transport_buffer);
            match manager.accept(transport).await {
                Ok(session) => {
                    info!(
                        peer = %peer,
                        session_id = %session.id(),
                        active = manager.active_sessions(),
                        "Peer connected"
                    );
                    session.closed().await;
                    info!(peer = %peer, session_id = %session.id(), "Peer disconnected");
                }
                Err(e) => warn!(peer = %peer, error = %e, "Handshake failed"),
            }
        });
    }
}
