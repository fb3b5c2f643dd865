pub mod config;
pub mod greeting;
pub mod inbox;
pub mod messages;

use anyhow::Result;
use rsession_lite::session::{Session, SessionManager};
use rsession_lite::{Credentials, InMemoryCredentialStore, Transport};
use tokio::net::TcpStream;

use crate::config::{DEFAULT_PASSWORD, DEFAULT_USERNAME};

/// The single demo account the service knows.
pub fn default_credential_store() -> InMemoryCredentialStore {
    InMemoryCredentialStore::new().with_user(DEFAULT_USERNAME, DEFAULT_PASSWORD, ["USER"])
}

/// Connect to the service over TCP and run the handshake.
pub async fn connect(addr: &str, credentials: Credentials, manager: &SessionManager) -> Result<Session> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;

    let transport = Transport::tcp(stream, manager.config().transport_buffer);
    Ok(manager.establish(transport, credentials).await?)
}

/// Plain fmt logging for the binaries.
pub fn init_tracing() {
    let no_color = std::env::var("NO_COLOR").is_ok() || !std::io::IsTerminal::is_terminal(&std::io::stdout());

    tracing_subscriber::fmt()
        .with_target(false)
        .with_ansi(!no_color)
        .init();
}
