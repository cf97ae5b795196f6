//! Request routing: map URL patterns and HTTP methods to handler functions.
//!
//! | Pattern              | Example match              | Captured params              |
//! |----------------------|----------------------------|------------------------------|
//! | `/posts`             | `/posts`                   | *(none)*                     |
//! | `/posts/:id`         | `/posts/42`                | `id → "42"`                  |
//! | `/files/*`           | `/files/docs/readme.txt`   | `wildcard → "/docs/readme.txt"` |
//!
//! Routes can be *named* (`router.get(..).name("posts.index")`). The name is
//! what scopes persisted search state, so renaming a path does not lose a
//! user's saved filters. Unnamed routes are scoped by their path.
//!
//! Routes are matched in registration order; the first route whose method and
//! pattern both match wins. Router-level middleware runs only for matched routes.

use std::pin::Pin;
use std::sync::Arc;

use crate::context::{Context, PathParams};
use crate::middleware::{MiddlewareHandler, Next};
use crate::{Method, Request, Response, StatusCode};

/// Type-erased async handler that processes a [`Context`] and returns a [`Response`].
pub type Handler =
    Arc<dyn Fn(Context) -> Pin<Box<dyn Future<Output = Response> + Send>> + Send + Sync + 'static>;

/// Conversion trait for async handler functions.
///
/// Blanket-implemented for any `Fn(Context) -> impl Future<Output = Response> + Send`.
pub trait IntoHandler: Send + Sync + 'static {
    fn call(&self, ctx: Context) -> Pin<Box<dyn Future<Output = Response> + Send>>;
}

impl<T, F> IntoHandler for T
where
    T: Fn(Context) -> F + Send + Sync + 'static,
    F: Future<Output = Response> + Send + 'static,
{
    fn call(&self, ctx: Context) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        Box::pin((self)(ctx))
    }
}

#[derive(Debug, Clone)]
enum Segment {
    Static(String),
    Parameter(String),
}

#[derive(Debug, Clone)]
enum Pattern {
    Exact(String),
    Parameterized { segments: Vec<Segment> },
    Wildcard(String),
}

fn trim_trailing_slash(path: &str) -> &str {
    if path != "/" && path.ends_with('/') {
        &path[..path.len() - 1]
    } else {
        path
    }
}

impl Pattern {
    /// Compile a pattern string. `/*` suffix → wildcard, any `:` → parameterized,
    /// otherwise exact. Trailing slashes are ignored.
    fn parse(pattern: &str) -> Self {
        let pattern = trim_trailing_slash(pattern);

        if let Some(prefix) = pattern.strip_suffix("/*") {
            return Pattern::Wildcard(prefix.to_string());
        }

        if pattern.contains(':') {
            let segments = pattern
                .split('/')
                .filter(|s| !s.is_empty())
                .map(|s| match s.strip_prefix(':') {
                    Some(p) => Segment::Parameter(p.to_string()),
                    None => Segment::Static(s.to_string()),
                })
                .collect();
            return Pattern::Parameterized { segments };
        }

        Pattern::Exact(pattern.to_string())
    }

    fn matches(&self, path: &str) -> Option<PathParams> {
        let path = trim_trailing_slash(path);

        match self {
            Pattern::Exact(p) => (p == path).then(PathParams::new),
            Pattern::Parameterized { segments } => {
                let path_segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
                if segments.len() != path_segments.len() {
                    return None;
                }

                let mut params = PathParams::new();
                for (seg, path_seg) in segments.iter().zip(path_segments) {
                    match seg {
                        Segment::Static(s) if s != path_seg => return None,
                        Segment::Static(_) => {}
                        Segment::Parameter(name) => {
                            params.insert(name.clone(), path_seg.to_string());
                        }
                    }
                }
                Some(params)
            }
            Pattern::Wildcard(prefix) => path.strip_prefix(prefix.as_str()).map(|suffix| {
                let mut params = PathParams::new();
                params.insert("wildcard".to_string(), suffix.to_string());
                params
            }),
        }
    }
}

struct Route {
    method: Method,
    pattern: Pattern,
    name: Option<String>,
    handler: Handler,
}

/// Handle to a freshly registered route, used to name it.
pub struct RouteRef<'a> {
    route: &'a mut Route,
}

impl RouteRef<'_> {
    /// Name the route. Named routes scope search state by name instead of path.
    pub fn name(self, name: impl Into<String>) {
        self.route.name = Some(name.into());
    }
}

/// HTTP request router.
///
/// # Examples
///
/// ```rust,no_run
/// use searchstate::{Router, Response, StatusCode, context::Context};
///
/// let mut router = Router::new();
/// router
///     .get("/posts", |ctx: Context| async move {
///         Response::new(StatusCode::Ok).body(ctx.route_identity().to_owned())
///     })
///     .name("posts.index");
/// ```
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
    middleware: Vec<MiddlewareHandler>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&mut self, path: &str, handler: impl IntoHandler) -> RouteRef<'_> {
        self.add_route(Method::Get, path, handler)
    }

    pub fn post(&mut self, path: &str, handler: impl IntoHandler) -> RouteRef<'_> {
        self.add_route(Method::Post, path, handler)
    }

    pub fn put(&mut self, path: &str, handler: impl IntoHandler) -> RouteRef<'_> {
        self.add_route(Method::Put, path, handler)
    }

    pub fn patch(&mut self, path: &str, handler: impl IntoHandler) -> RouteRef<'_> {
        self.add_route(Method::Patch, path, handler)
    }

    pub fn delete(&mut self, path: &str, handler: impl IntoHandler) -> RouteRef<'_> {
        self.add_route(Method::Delete, path, handler)
    }

    /// Append middleware. Layers run in the order they were added, before the handler.
    pub fn layer(&mut self, middleware: MiddlewareHandler) {
        self.middleware.push(middleware);
    }

    fn add_route(&mut self, method: Method, path: &str, handler: impl IntoHandler) -> RouteRef<'_> {
        let handler: Handler = Arc::new(move |ctx| handler.call(ctx));
        self.routes.push(Route {
            method,
            pattern: Pattern::parse(path),
            name: None,
            handler,
        });
        let index = self.routes.len() - 1;
        RouteRef {
            route: &mut self.routes[index],
        }
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Dispatch `request` through the middleware chain to the first matching
    /// route, or answer `404 Not Found`.
    pub async fn route(&self, request: Request) -> Response {
        let matched = self.routes.iter().find_map(|route| {
            if &route.method != request.method() {
                return None;
            }
            route
                .pattern
                .matches(request.path())
                .map(|params| (route, params))
        });

        let Some((route, params)) = matched else {
            return Response::new(StatusCode::NotFound);
        };

        let ctx = Context::with_params(request, params).with_route_name(route.name.clone());

        let endpoint = Arc::clone(&route.handler);
        let mut chain = self.middleware.clone();
        chain.push(Arc::new(move |ctx: Context, _next: Next| endpoint(ctx)));
        Next::new(chain).run(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::request::Request;
    use crate::middleware::from_fn;

    fn make_request(method: &str, path: &str) -> Request {
        let raw = format!("{method} {path} HTTP/1.1\r\nHost: localhost\r\n\r\n");
        let (req, _) = Request::parse(raw.as_bytes()).unwrap();
        req
    }

    fn body_text(res: &Response) -> String {
        String::from_utf8(res.body_ref().to_vec()).unwrap()
    }

    #[test]
    fn pattern_parse_variants() {
        assert!(matches!(Pattern::parse("/"), Pattern::Exact(s) if s == "/"));
        assert!(matches!(Pattern::parse("/posts/"), Pattern::Exact(s) if s == "/posts"));
        assert!(matches!(Pattern::parse("/files/*"), Pattern::Wildcard(s) if s == "/files"));
        match Pattern::parse("/users/:id/posts/:post_id") {
            Pattern::Parameterized { segments } => {
                assert_eq!(segments.len(), 4);
                assert!(matches!(&segments[1], Segment::Parameter(s) if s == "id"));
            }
            other => panic!("expected Parameterized, got {other:?}"),
        }
    }

    #[test]
    fn pattern_matching() {
        assert!(Pattern::parse("/posts").matches("/posts/").is_some());
        assert!(Pattern::parse("/posts").matches("/pages").is_none());

        let params = Pattern::parse("/users/:id").matches("/users/42").unwrap();
        assert_eq!(params.get("id"), Some("42"));
        assert!(Pattern::parse("/users/:id").matches("/users/42/extra").is_none());

        let params = Pattern::parse("/files/*").matches("/files/a/b.txt").unwrap();
        assert_eq!(params.get("wildcard"), Some("/a/b.txt"));
    }

    #[tokio::test]
    async fn unmatched_returns_404() {
        let mut router = Router::new();
        router.get("/hello", |_ctx| async { Response::new(StatusCode::Ok) });
        let res = router.route(make_request("POST", "/hello")).await;
        assert_eq!(res.status(), StatusCode::NotFound);
        let res = router.route(make_request("GET", "/world")).await;
        assert_eq!(res.status(), StatusCode::NotFound);
    }

    #[tokio::test]
    async fn named_route_exposes_name_to_handler() {
        let mut router = Router::new();
        router
            .get("/posts", |ctx: Context| async move {
                Response::new(StatusCode::Ok).body(ctx.route_identity().to_owned())
            })
            .name("posts.index");
        router.get("/pages", |ctx: Context| async move {
            Response::new(StatusCode::Ok).body(ctx.route_identity().to_owned())
        });

        let res = router.route(make_request("GET", "/posts")).await;
        assert_eq!(body_text(&res), "posts.index");
        let res = router.route(make_request("GET", "/pages")).await;
        assert_eq!(body_text(&res), "/pages");
    }

    #[tokio::test]
    async fn first_matching_route_wins() {
        let mut router = Router::new();
        router.patch("/path", |_ctx| async { Response::new(StatusCode::Ok) });
        router.patch("/path", |_ctx| async { Response::new(StatusCode::Created) });
        assert_eq!(router.len(), 2);
        let res = router.route(make_request("PATCH", "/path")).await;
        assert_eq!(res.status(), StatusCode::Ok);
    }

    #[tokio::test]
    async fn middleware_runs_before_handler() {
        let mut router = Router::new();
        router.layer(from_fn(|mut ctx: Context, next: Next| async move {
            ctx.extensions_mut().insert(String::from("from-layer"));
            next.run(ctx).await
        }));
        router.delete("/r", |ctx: Context| async move {
            let seen = ctx.extensions().get::<String>().cloned().unwrap_or_default();
            Response::new(StatusCode::Ok).body(seen)
        });

        let res = router.route(make_request("DELETE", "/r")).await;
        assert_eq!(body_text(&res), "from-layer");
    }
}
