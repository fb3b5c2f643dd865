use futures::StreamExt;
use futures::stream::{self, BoxStream};
use greeting_sandbox::default_credential_store;
use greeting_sandbox::greeting::{GREETINGS_ROUTE, GreetingSettings, HEALTH_ROUTE, register_greetings, register_health};
use greeting_sandbox::messages::{GreetingRequest, GreetingResponse};
use rsession_lite::error::HandlerError;
use rsession_lite::health::{HealthMonitor, HealthSample};
use rsession_lite::lifecycle::paced;
use rsession_lite::session::{Session, SessionConfig, SessionManager};
use rsession_lite::{Credentials, RouteDispatcher, StreamError, Transport};
use std::sync::Arc;
use std::time::Duration;

type HealthScript = fn() -> BoxStream<'static, Result<HealthSample, HandlerError>>;

/// Nine healthy samples, then an unhealthy one, slightly ahead of each greeting.
fn nine_healthy_then_sick() -> BoxStream<'static, Result<HealthSample, HandlerError>> {
    let samples = (0..10).map(|i| Ok(HealthSample::now(i < 9)));
    paced(stream::iter(samples), Duration::from_millis(990)).boxed()
}

fn always_healthy() -> BoxStream<'static, Result<HealthSample, HandlerError>> {
    let monitor = HealthMonitor::new(0.0, Duration::from_secs(1), 100).unwrap();
    monitor.sample().map(Ok).boxed()
}

fn always_sick() -> BoxStream<'static, Result<HealthSample, HandlerError>> {
    let monitor = HealthMonitor::new(1.0, Duration::from_millis(500), 100).unwrap();
    monitor.sample().map(Ok).boxed()
}

struct Sandbox {
    _client: SessionManager,
    _service: SessionManager,
    _service_session: Session,
    session: Session,
}

async fn sandbox(health: Option<HealthScript>, settings: GreetingSettings) -> Sandbox {
    let mut service_routes = RouteDispatcher::new();
    register_greetings(&mut service_routes, settings).unwrap();
    let service = SessionManager::responder(
        SessionConfig::default(),
        service_routes,
        Arc::new(default_credential_store()),
    );

    let mut client_routes = RouteDispatcher::new();
    if let Some(script) = health {
        client_routes
            .register::<(), HealthSample, _, _, _>(HEALTH_ROUTE, move |_ctx, ()| async move { Ok(script()) })
            .unwrap();
    }
    let client = SessionManager::initiator(SessionConfig::default(), client_routes);

    let (a, b) = Transport::pair(32);
    let (session, accepted) = tokio::join!(
        client.establish(a, Credentials::new("memphis", "pwd")),
        service.accept(b)
    );
    Sandbox {
        _client: client,
        _service: service,
        _service_session: accepted.unwrap(),
        session: session.unwrap(),
    }
}

async fn greetings(session: &Session, request: GreetingRequest) -> Vec<Result<GreetingResponse, StreamError>> {
    session
        .open_stream::<GreetingRequest, GreetingResponse>(GREETINGS_ROUTE, &request)
        .await
        .unwrap()
        .collect()
        .await
}

#[tokio::test(start_paused = true)]
async fn test_greetings_stop_at_first_unhealthy_sample() {
    let sandbox = sandbox(Some(nine_healthy_then_sick), GreetingSettings::default()).await;

    let responses = greetings(&sandbox.session, GreetingRequest::default()).await;

    assert_eq!(responses.len(), 9);
    for (i, response) in responses.iter().enumerate() {
        let message = &response.as_ref().unwrap().message;
        assert!(
            message.starts_with(&format!("ni hao memphis #{} @ ", i + 1)),
            "unexpected greeting: {message}"
        );
        assert!(message.ends_with('!'));
    }
    assert!(!sandbox.session.is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_greetings_use_requested_name_until_limit() {
    let settings = GreetingSettings {
        interval: Duration::from_secs(1),
        limit: 3,
    };
    let sandbox = sandbox(Some(always_healthy), settings).await;

    let responses = greetings(&sandbox.session, GreetingRequest::new("alice")).await;

    let messages: Vec<String> = responses.into_iter().map(|r| r.unwrap().message).collect();
    assert_eq!(messages.len(), 3);
    assert!(messages[0].starts_with("ni hao alice #1 @ "));
    assert!(messages[2].starts_with("ni hao alice #3 @ "));
}

#[tokio::test(start_paused = true)]
async fn test_unhealthy_before_first_tick_yields_nothing() {
    let sandbox = sandbox(Some(always_sick), GreetingSettings::default()).await;

    let responses = greetings(&sandbox.session, GreetingRequest::new("bob")).await;
    assert!(responses.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_missing_health_route_counts_as_unhealthy() {
    let sandbox = sandbox(None, GreetingSettings::default()).await;

    // the reverse stream fails immediately, which ends the greetings normally
    let responses = greetings(&sandbox.session, GreetingRequest::new("bob")).await;
    assert!(responses.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_health_route_from_monitor() {
    let mut client_routes = RouteDispatcher::new();
    let monitor = HealthMonitor::new(0.0, Duration::from_millis(100), 4).unwrap();
    register_health(&mut client_routes, monitor).unwrap();
    let client = SessionManager::initiator(SessionConfig::default(), client_routes);

    let service = SessionManager::responder(
        SessionConfig::default(),
        RouteDispatcher::new(),
        Arc::new(default_credential_store()),
    );

    let (a, b) = Transport::pair(32);
    let (_client_session, service_session) = tokio::join!(
        client.establish(a, Credentials::new("memphis", "pwd")),
        service.accept(b)
    );

    let samples: Vec<_> = service_session
        .unwrap()
        .open_stream::<(), HealthSample>(HEALTH_ROUTE, &())
        .await
        .unwrap()
        .collect()
        .await;
    assert_eq!(samples.len(), 4);
    assert!(samples.into_iter().all(|s| s.unwrap().healthy));
}
