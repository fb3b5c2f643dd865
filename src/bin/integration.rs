use anyhow::Result;
use futures::StreamExt;
use greeting_sandbox::config::IntegrationConfig;
use greeting_sandbox::greeting::{GREETINGS_ROUTE, register_health};
use greeting_sandbox::inbox::Inbox;
use greeting_sandbox::messages::{GreetingRequest, GreetingResponse};
use greeting_sandbox::{connect, init_tracing};
use rsession_lite::session::{Session, SessionConfig, SessionManager};
use rsession_lite::{Credentials, RouteDispatcher};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let config = IntegrationConfig::from_env()?;

    let mut dispatcher = RouteDispatcher::new();
    register_health(&mut dispatcher, config.client.health)?;
    let manager = SessionManager::initiator(SessionConfig::default(), dispatcher);

    let credentials = Credentials::new(
        config.client.username.as_str(),
        config.client.password.expose_secret(),
    );
    let session = connect(&config.client.addr, credentials, &manager).await?;

    let inbox = Inbox::new(&config.inbox_dir, config.poll_interval);
    info!(dir = %inbox.dir().display(), "Watching inbox");

    let requests = inbox.requests();
    let mut requests = std::pin::pin!(requests);

    loop {
        let request = tokio::select! {
            _ = session.closed() => {
                info!("Session closed, no longer forwarding requests");
                break;
            }
            request = requests.next() => request,
        };

        match request {
            Some(Ok(request)) => {
                tokio::spawn(forward(session.clone(), request));
            }
            Some(Err(e)) => warn!(error = %e, "Inbox error"),
            None => break,
        }
    }

    session.close();
    Ok(())
}

async fn forward(session: Session, request: GreetingRequest) {
    let name = request.name.clone();
    let mut responses = match session
        .open_stream::<GreetingRequest, GreetingResponse>(GREETINGS_ROUTE, &request)
        .await
    {
        Ok(responses) => responses,
        Err(e) => {
            warn!(name = %name, error = %e, "Could not open greetings stream");
            return;
        }
    };

    while let Some(response) = responses.next().await {
        match response {
            Ok(response) => println!("new message: {}", response.message),
            Err(e) => {
                warn!(name = %name, error = %e, "Greetings stream failed");
                return;
            }
        }
    }
}
