//! The greetings service and the health route it checks back against.

use futures::StreamExt;
use futures::stream;
use rsession_lite::error::{HandlerError, RegistrationError};
use rsession_lite::health::{HealthMonitor, HealthSample, now_millis};
use rsession_lite::lifecycle::{Raced, bounded, produce};
use rsession_lite::{RequestContext, RouteDispatcher};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::messages::{GreetingRequest, GreetingResponse};

pub const GREETINGS_ROUTE: &str = "greetings";
pub const HEALTH_ROUTE: &str = "health";

/// Cadence and length of one greeting stream.
#[derive(Debug, Clone, Copy)]
pub struct GreetingSettings {
    pub interval: Duration,
    pub limit: usize,
}

impl Default for GreetingSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            limit: 100,
        }
    }
}

pub fn greeting_message(name: &str, sequence: u64, millis: u64) -> String {
    format!("ni hao {name} #{sequence} @ {millis}!")
}

/// Serve `greetings` on the responder.
///
/// Every greeting stream opens a `health` stream back to the requesting peer
/// and stops at the first unhealthy sample.
pub fn register_greetings(
    dispatcher: &mut RouteDispatcher,
    settings: GreetingSettings,
) -> Result<(), RegistrationError> {
    dispatcher.register::<GreetingRequest, GreetingResponse, _, _, _>(
        GREETINGS_ROUTE,
        move |ctx, request| greet(ctx, request, settings),
    )
}

async fn greet(
    ctx: RequestContext,
    request: GreetingRequest,
    settings: GreetingSettings,
) -> Result<Raced<Result<GreetingResponse, HandlerError>>, HandlerError> {
    let name = match request.name.trim() {
        "" => ctx.principal().username().to_string(),
        name => name.to_string(),
    };

    let health = ctx
        .session()
        .open_stream::<(), HealthSample>(HEALTH_ROUTE, &())
        .await
        .map_err(|e| HandlerError::new(format!("cannot watch requester health: {e}")))?;

    let stream_id = ctx.handle().stream_id();
    let unhealthy = health.map(move |sample| match sample {
        Ok(sample) => !sample.healthy,
        Err(e) => {
            warn!(stream_id, error = %e, "Health stream failed, treating requester as unhealthy");
            true
        }
    });

    info!(
        session_id = %ctx.session().id(),
        stream_id,
        name = %name,
        "Streaming greetings"
    );

    let mut sequence = 0u64;
    let greetings = stream::repeat_with(move || {
        sequence += 1;
        debug!(sequence, "Greeting");
        Ok(GreetingResponse {
            message: greeting_message(&name, sequence, now_millis()),
        })
    });

    Ok(produce(
        bounded(greetings, settings.limit),
        unhealthy,
        settings.interval,
    ))
}

/// Serve `health` on the initiator from `monitor`.
pub fn register_health(
    dispatcher: &mut RouteDispatcher,
    monitor: HealthMonitor,
) -> Result<(), RegistrationError> {
    dispatcher.register::<(), HealthSample, _, _, _>(HEALTH_ROUTE, move |ctx, ()| async move {
        debug!(principal = %ctx.principal(), "Serving health samples");
        Ok(monitor.sample().map(Ok))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_greeting_message_format() {
        assert_eq!(
            greeting_message("memphis", 3, 1_700_000_000_000),
            "ni hao memphis #3 @ 1700000000000!"
        );
    }

    #[test]
    fn test_default_settings() {
        let settings = GreetingSettings::default();
        assert_eq!(settings.interval, Duration::from_secs(1));
        assert_eq!(settings.limit, 100);
    }
}
