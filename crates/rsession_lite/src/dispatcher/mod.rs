//! Route table mapping route names to stream handlers.

mod handler;

pub use handler::{HandlerFn, HandlerStream, RequestContext, RouteHandler, make_handler};

use futures::Stream;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::info;

use crate::error::{HandlerError, RegistrationError, RouteNotFoundError};
use handler::{ErasedHandler, TypedHandler};

/// Maps route names to handlers that produce response streams.
///
/// The table is built before sessions start and is read-only afterwards.
#[derive(Default)]
pub struct RouteDispatcher {
    handlers: HashMap<String, Arc<dyn ErasedHandler>>,
}

impl RouteDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a stream handler for `route`.
    ///
    /// # Example
    /// ```ignore
    /// dispatcher.register::<GreetingRequest, GreetingResponse, _, _, _>(
    ///     "greetings",
    ///     |ctx, request| async move {
    ///         let name = request.name;
    ///         Ok(futures::stream::iter([Ok(GreetingResponse { message: name })]))
    ///     },
    /// )?;
    /// ```
    pub fn register<Req, Resp, F, Fut, S>(
        &mut self,
        route: impl Into<String>,
        handler: F,
    ) -> Result<(), RegistrationError>
    where
        Req: prost::Message + Default + Send + 'static,
        Resp: prost::Message + Send + 'static,
        F: Fn(RequestContext, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<S, HandlerError>> + Send + 'static,
        S: Stream<Item = Result<Resp, HandlerError>> + Send + 'static,
    {
        let route = route.into();
        if self.handlers.contains_key(&route) {
            return Err(RegistrationError::DuplicateRoute(route));
        }

        let handler = TypedHandler::<Req, Resp>::new(make_handler(handler));
        self.handlers.insert(route.clone(), Arc::new(handler));

        info!(route = %route, "Registered route handler");
        Ok(())
    }

    /// Register a handler that answers with exactly one response.
    pub fn register_unary<Req, Resp, F, Fut>(
        &mut self,
        route: impl Into<String>,
        handler: F,
    ) -> Result<(), RegistrationError>
    where
        Req: prost::Message + Default + Send + 'static,
        Resp: prost::Message + Send + 'static,
        F: Fn(RequestContext, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp, HandlerError>> + Send + 'static,
    {
        self.register::<Req, Resp, _, _, _>(route, move |ctx, request| {
            let fut = handler(ctx, request);
            async move {
                fut.await
                    .map(|response| futures::stream::once(futures::future::ready(Ok(response))))
            }
        })
    }

    /// Find the handler for `route`.
    pub fn resolve(&self, route: &str) -> Result<RouteHandler, RouteNotFoundError> {
        self.handlers
            .get(route)
            .map(|handler| RouteHandler::new(route.to_string(), Arc::clone(handler)))
            .ok_or_else(|| RouteNotFoundError(route.to_string()))
    }

    /// Check if a handler is registered for the given route.
    pub fn has_route(&self, route: &str) -> bool {
        self.handlers.contains_key(route)
    }

    /// Registered route names, in no particular order.
    pub fn routes(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for RouteDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut routes: Vec<&str> = self.routes().collect();
        routes.sort_unstable();
        f.debug_struct("RouteDispatcher")
            .field("routes", &routes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, PartialEq, prost::Message)]
    struct Echo {
        #[prost(string, tag = "1")]
        text: String,
    }

    fn dispatcher() -> RouteDispatcher {
        let mut dispatcher = RouteDispatcher::new();
        dispatcher
            .register_unary::<Echo, Echo, _, _>("echo", |_ctx, request| async move { Ok(request) })
            .unwrap();
        dispatcher
    }

    #[test]
    fn test_resolve_registered_route() {
        let dispatcher = dispatcher();
        assert!(dispatcher.has_route("echo"));
        assert_eq!(dispatcher.resolve("echo").unwrap().route(), "echo");
    }

    #[test]
    fn test_resolve_unknown_route() {
        let dispatcher = dispatcher();
        let err = dispatcher.resolve("missing").unwrap_err();
        assert_eq!(err, RouteNotFoundError("missing".to_string()));
    }

    #[test]
    fn test_duplicate_route_rejected() {
        let mut dispatcher = dispatcher();
        let result = dispatcher
            .register_unary::<Echo, Echo, _, _>("echo", |_ctx, request| async move { Ok(request) });
        assert!(matches!(result, Err(RegistrationError::DuplicateRoute(route)) if route == "echo"));
    }

    #[test]
    fn test_routes_lists_every_registration() {
        let mut dispatcher = dispatcher();
        dispatcher
            .register::<Echo, Echo, _, _, _>("echo-many", |_ctx, request| async move {
                Ok(futures::stream::iter(vec![Ok(request.clone()), Ok(request)]))
            })
            .unwrap();

        let mut routes: Vec<&str> = dispatcher.routes().collect();
        routes.sort_unstable();
        assert_eq!(routes, ["echo", "echo-many"]);
    }
}
