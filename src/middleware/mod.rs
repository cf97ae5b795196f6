//! Middleware pipeline: composable before/after request handler logic.
//!
//! - [`Middleware`]: trait implemented by all middleware.
//! - [`Next`]: cursor into the remaining chain; call [`Next::run`] to advance.
//! - [`MiddlewareHandler`]: type-erased, cheaply-cloneable middleware function.
//! - [`from_middleware`] / [`from_fn`]: build a [`MiddlewareHandler`].
//! - [`LoggerMiddleware`]: request/response logger.
//! - [`IdentityMiddleware`]: lifts a trusted user-id header into the
//!   request extensions so [`ExtensionIdentity`](crate::context::ExtensionIdentity)
//!   can scope search state per user.

use std::{future::Future, pin::Pin, sync::Arc};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::{
    Response,
    context::{Context, UserId},
};

/// A cursor into the remaining middleware chain for a single request.
///
/// `Next` is consumed by [`run`](Self::run), so each middleware can forward a
/// request at most once.
pub struct Next {
    middlewares: Vec<MiddlewareHandler>,
    index: usize,
}

/// A type-erased, reference-counted middleware function.
pub type MiddlewareHandler = Arc<
    dyn Fn(Context, Next) -> Pin<Box<dyn Future<Output = Response> + Send>> + Send + Sync + 'static,
>;

/// Converts a [`Middleware`] implementation into a [`MiddlewareHandler`].
pub fn from_middleware<M>(middleware: Arc<M>) -> MiddlewareHandler
where
    M: Middleware + 'static,
{
    Arc::new(move |ctx: Context, next: Next| middleware.handle(ctx, next))
}

/// Wraps an async closure as a [`MiddlewareHandler`].
///
/// # Examples
///
/// ```rust,no_run
/// use searchstate::middleware::{Next, from_fn};
/// use searchstate::context::Context;
///
/// let passthrough = from_fn(|ctx: Context, next: Next| async move { next.run(ctx).await });
/// ```
pub fn from_fn<F, Fut>(f: F) -> MiddlewareHandler
where
    F: Fn(Context, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    Arc::new(move |ctx: Context, next: Next| -> Pin<Box<dyn Future<Output = Response> + Send>> {
        Box::pin(f(ctx, next))
    })
}

impl Next {
    /// Creates a `Next` positioned at the start of `middlewares`.
    pub fn new(middlewares: Vec<MiddlewareHandler>) -> Self {
        Self {
            middlewares,
            index: 0,
        }
    }

    /// Invokes the next middleware in the chain.
    ///
    /// An exhausted chain yields `500 Internal Server Error`: the last entry is
    /// expected to be the endpoint, which never calls `next`.
    pub async fn run(mut self, ctx: Context) -> Response {
        if self.index < self.middlewares.len() {
            let handler = self.middlewares[self.index].clone();
            self.index += 1;
            handler(ctx, self).await
        } else {
            Response::new(crate::StatusCode::InternalServerError)
                .body("No response generated by middleware pipeline")
        }
    }
}

/// The core trait for all middleware.
///
/// Implementations may pass through (`next.run(ctx).await`), short-circuit by
/// returning a [`Response`] directly, or decorate the downstream response.
pub trait Middleware: Send + Sync {
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>>;
}

/// Logs method, path, route identity, status and duration of each request.
pub struct LoggerMiddleware;

impl Middleware for LoggerMiddleware {
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        Box::pin(async move {
            let start = Instant::now();
            let method = ctx.request().method().as_str().to_string();
            let path = ctx.request().path().to_string();
            let route = ctx.route_identity().to_string();

            let response = next.run(ctx).await;

            info!(
                %method,
                %path,
                %route,
                status = response.status().as_u16(),
                elapsed = ?start.elapsed(),
                "request handled"
            );
            response
        })
    }
}

/// Injects a [`UserId`] read from a trusted header into the request extensions.
///
/// Only deploy this behind a gateway that authenticates the user and sets the
/// header itself; the value is taken as-is.
pub struct IdentityMiddleware {
    header: String,
}

impl IdentityMiddleware {
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
        }
    }
}

impl Middleware for IdentityMiddleware {
    fn handle(&self, mut ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        let user = ctx
            .request()
            .headers()
            .get(&self.header)
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(UserId::from);

        match user {
            Some(user) => {
                debug!(user = %user, "identified request");
                ctx.extensions_mut().insert(user);
            }
            None => debug!("guest request"),
        }

        Box::pin(async move { next.run(ctx).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ExtensionIdentity, IdentityProvider};
    use crate::http::request::Request;
    use crate::{Router, StatusCode};

    fn request(raw: &str) -> Request {
        Request::parse(raw.as_bytes()).unwrap().0
    }

    fn who_am_i_router() -> Router {
        let mut router = Router::new();
        router.layer(from_middleware(Arc::new(LoggerMiddleware)));
        router.layer(from_middleware(Arc::new(IdentityMiddleware::new("x-user-id"))));
        router.get("/me", |ctx: Context| async move {
            let who = ExtensionIdentity
                .current_user(&ctx)
                .map(|u| u.to_string())
                .unwrap_or_else(|| "guest".to_string());
            Response::new(StatusCode::Ok).body(who)
        });
        router
    }

    #[tokio::test]
    async fn identity_header_is_injected() {
        let router = who_am_i_router();
        let res = router
            .route(request("GET /me HTTP/1.1\r\nX-User-Id: 42\r\n\r\n"))
            .await;
        assert_eq!(res.body_ref(), b"42");
    }

    #[tokio::test]
    async fn missing_header_means_guest() {
        let router = who_am_i_router();
        let res = router.route(request("GET /me HTTP/1.1\r\n\r\n")).await;
        assert_eq!(res.body_ref(), b"guest");
    }

    #[tokio::test]
    async fn exhausted_chain_is_500() {
        let ctx = Context::new(request("GET / HTTP/1.1\r\n\r\n"));
        let res = Next::new(Vec::new()).run(ctx).await;
        assert_eq!(res.status(), StatusCode::InternalServerError);
    }

    #[tokio::test]
    async fn short_circuit_skips_rest_of_chain() {
        let chain = vec![
            from_fn(|_ctx: Context, _next: Next| async { Response::new(StatusCode::BadRequest) }),
            from_fn(|_ctx: Context, _next: Next| async { Response::new(StatusCode::Ok) }),
        ];
        let ctx = Context::new(request("GET / HTTP/1.1\r\n\r\n"));
        let res = Next::new(chain).run(ctx).await;
        assert_eq!(res.status(), StatusCode::BadRequest);
    }
}
