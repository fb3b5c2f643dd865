use anyhow::Result;
use futures::StreamExt;
use greeting_sandbox::config::ClientConfig;
use greeting_sandbox::greeting::{GREETINGS_ROUTE, register_health};
use greeting_sandbox::messages::{GreetingRequest, GreetingResponse};
use greeting_sandbox::{connect, init_tracing};
use rsession_lite::session::{SessionConfig, SessionManager};
use rsession_lite::{Credentials, RouteDispatcher};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let config = ClientConfig::from_env()?;

    // the service checks our health while it streams to us
    let mut dispatcher = RouteDispatcher::new();
    register_health(&mut dispatcher, config.health)?;
    let manager = SessionManager::initiator(SessionConfig::default(), dispatcher);

    info!(addr = %config.addr, username = %config.username, "Connecting to greeting service");
    let credentials = Credentials::new(config.username.as_str(), config.password.expose_secret());
    let session = connect(&config.addr, credentials, &manager).await?;

    let mut greetings = session
        .open_stream::<GreetingRequest, GreetingResponse>(GREETINGS_ROUTE, &GreetingRequest::default())
        .await?;

    let mut received = 0usize;
    while let Some(greeting) = greetings.next().await {
        match greeting {
            Ok(greeting) => {
                received += 1;
                println!("{}", greeting.message);
            }
            Err(e) => {
                warn!(error = %e, "Greeting stream failed");
                break;
            }
        }
    }

    info!(received, "Greeting stream ended");
    session.close();
    Ok(())
}
