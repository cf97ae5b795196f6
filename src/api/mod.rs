//! JSON endpoints for reading and editing saved search state.
//!
//! | Method   | Path               | Operation                         |
//! |----------|--------------------|-----------------------------------|
//! | `POST`   | `{base}/store`     | replace with the request params   |
//! | `GET`    | `{base}`           | read, backfilling defaults        |
//! | `PATCH`  | `{base}`           | merge the request params          |
//! | `POST`   | `{base}/defaults`  | fill blanks from the given params |
//! | `DELETE` | `{base}`           | forget                            |
//!
//! The `route` query parameter names the listing whose state is addressed
//! (`?route=posts.index`) and is never stored itself. Without it the
//! endpoints share one scope, the base path.

use std::fmt;
use std::sync::Arc;

use serde_json::{Value, json};
use tracing::{info, warn};

use crate::cache::{CacheKey, CacheStore};
use crate::context::Context;
use crate::http::{Response, StatusCode};
use crate::params::SearchParameters;
use crate::router::Router;
use crate::search::{SearchError, Searcher};

/// Query parameter selecting the listing scope.
pub const ROUTE_PARAM: &str = "route";

/// Handlers behind [`mount`].
pub struct SearchApi<C> {
    searcher: Searcher<C>,
    defaults: SearchParameters,
    base_path: String,
}

impl<C: CacheStore> SearchApi<C> {
    /// `defaults` backfill `GET` reads and are stored by `POST {base}/defaults`
    /// when the request carries none of its own.
    pub fn new(searcher: Searcher<C>, defaults: SearchParameters, base_path: impl Into<String>) -> Self {
        Self {
            searcher,
            defaults,
            base_path: base_path.into(),
        }
    }

    pub fn searcher(&self) -> &Searcher<C> {
        &self.searcher
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    fn key(&self, ctx: &Context) -> CacheKey {
        let route = ctx
            .request()
            .query_param(ROUTE_PARAM)
            .filter(|route| !route.trim().is_empty())
            .unwrap_or(self.base_path.as_str());
        self.searcher.key_for(ctx, route)
    }

    fn params(ctx: &Context) -> Result<SearchParameters, SearchError> {
        let mut params = SearchParameters::from_request(ctx.request())?;
        params.remove(ROUTE_PARAM);
        Ok(params)
    }

    pub async fn store(&self, ctx: Context) -> Response {
        let result = async {
            let key = self.key(&ctx);
            let params = Self::params(&ctx)?;
            self.searcher.store().put(&key, &params).await?;
            info!(key = %key, "search state replaced");
            Ok::<_, SearchError>(params)
        }
        .await;
        respond(result)
    }

    pub async fn show(&self, ctx: Context) -> Response {
        let key = self.key(&ctx);
        let result = self.searcher.store().get(&key, &self.defaults).await;
        respond(result.map_err(SearchError::from))
    }

    pub async fn update(&self, ctx: Context) -> Response {
        let result = async {
            let key = self.key(&ctx);
            let partial = Self::params(&ctx)?;
            let merged = self.searcher.store().update(&key, &partial).await?;
            info!(key = %key, changed = partial.len(), "search state updated");
            Ok::<_, SearchError>(merged)
        }
        .await;
        respond(result)
    }

    pub async fn store_defaults(&self, ctx: Context) -> Response {
        let result = async {
            let key = self.key(&ctx);
            let supplied = Self::params(&ctx)?;
            let defaults = if supplied.is_empty() { &self.defaults } else { &supplied };
            Ok::<_, SearchError>(self.searcher.store().store_defaults(&key, defaults).await?)
        }
        .await;
        respond(result)
    }

    pub async fn clear(&self, ctx: Context) -> Response {
        let key = self.key(&ctx);
        match self.searcher.store().clear(&key).await {
            Ok(()) => {
                info!(key = %key, "search state cleared");
                Response::json(StatusCode::Ok, &json!({"success": true}))
            }
            Err(e) => failure(StatusCode::ServiceUnavailable, &e),
        }
    }
}

/// Registers the endpoints under `base` with route names `search.*`.
pub fn mount<C>(router: &mut Router, api: Arc<SearchApi<C>>)
where
    C: CacheStore + 'static,
{
    let base = api.base_path().trim_end_matches('/').to_owned();
    let root = if base.is_empty() { "/".to_owned() } else { base.clone() };

    let handler = Arc::clone(&api);
    router
        .post(&format!("{base}/store"), move |ctx: Context| {
            let api = Arc::clone(&handler);
            async move { api.store(ctx).await }
        })
        .name("search.store");

    let handler = Arc::clone(&api);
    router
        .get(&root, move |ctx: Context| {
            let api = Arc::clone(&handler);
            async move { api.show(ctx).await }
        })
        .name("search.show");

    let handler = Arc::clone(&api);
    router
        .patch(&root, move |ctx: Context| {
            let api = Arc::clone(&handler);
            async move { api.update(ctx).await }
        })
        .name("search.update");

    let handler = Arc::clone(&api);
    router
        .post(&format!("{base}/defaults"), move |ctx: Context| {
            let api = Arc::clone(&handler);
            async move { api.store_defaults(ctx).await }
        })
        .name("search.defaults");

    let handler = api;
    router
        .delete(&root, move |ctx: Context| {
            let api = Arc::clone(&handler);
            async move { api.clear(ctx).await }
        })
        .name("search.clear");
}

/// Status for a failed search: bad input is 400, an unusable sort 422 and
/// a cache outage 503.
pub fn status_for(error: &SearchError) -> StatusCode {
    match error {
        SearchError::Params(_) => StatusCode::BadRequest,
        SearchError::Sort(_) => StatusCode::UnprocessableEntity,
        SearchError::Cache(_) => StatusCode::ServiceUnavailable,
    }
}

/// `{"success": false, "error": ...}` with the status from [`status_for`].
pub fn error_response(error: &SearchError) -> Response {
    failure(status_for(error), error)
}

fn respond(result: Result<SearchParameters, SearchError>) -> Response {
    match result {
        Ok(data) => Response::json(
            StatusCode::Ok,
            &json!({"success": true, "data": Value::from(data)}),
        ),
        Err(e) => error_response(&e),
    }
}

fn failure(status: StatusCode, error: &dyn fmt::Display) -> Response {
    warn!(status = status.as_u16(), error = %error, "search endpoint failed");
    Response::json(status, &json!({"success": false, "error": error.to_string()}))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheError, MemoryCache, ParameterStore};
    use crate::context::HeaderIdentity;
    use crate::http::Request;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::time::Duration;

    fn api_with<C: CacheStore + 'static>(cache: C) -> Router {
        let searcher = Searcher::new(ParameterStore::new(cache), HeaderIdentity::new("x-user-id"));
        let defaults: SearchParameters = [("pagination", json!(15))].into_iter().collect();
        let api = Arc::new(SearchApi::new(searcher, defaults, "/search"));
        let mut router = Router::new();
        mount(&mut router, api);
        router
    }

    async fn call(router: &Router, method: &str, target: &str, body: Option<Value>) -> (StatusCode, Value) {
        let body = body.map(|b| b.to_string()).unwrap_or_default();
        let raw = format!(
            "{method} {target} HTTP/1.1\r\nX-User-Id: 9\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
            body.len()
        );
        let (request, _) = Request::parse(raw.as_bytes()).unwrap();
        let response = router.route(request).await;
        let json = serde_json::from_slice(response.body_ref()).unwrap();
        (response.status(), json)
    }

    #[tokio::test]
    async fn full_lifecycle() {
        let router = api_with(MemoryCache::new());

        let (status, body) = call(&router, "GET", "/search?route=posts", None).await;
        assert_eq!(status, StatusCode::Ok);
        assert_eq!(body, json!({"success": true, "data": {"pagination": 15}}));

        let (_, body) = call(
            &router,
            "POST",
            "/search/store?route=posts",
            Some(json!({"status": "draft", "year": ""})),
        )
        .await;
        assert_eq!(body["data"], json!({"status": "draft", "year": ""}));

        let (_, body) = call(&router, "PATCH", "/search?route=posts", Some(json!({"q": "rust"}))).await;
        assert_eq!(body["data"], json!({"status": "draft", "year": "", "q": "rust"}));

        let (_, body) = call(
            &router,
            "POST",
            "/search/defaults?route=posts",
            Some(json!({"status": "published", "year": 2024})),
        )
        .await;
        assert_eq!(body["data"], json!({"status": "draft", "year": 2024, "q": "rust"}));

        let (_, body) = call(&router, "DELETE", "/search?route=posts", None).await;
        assert_eq!(body, json!({"success": true}));

        let (_, body) = call(&router, "GET", "/search?route=posts", None).await;
        assert_eq!(body["data"], json!({"pagination": 15}));
    }

    #[tokio::test]
    async fn route_param_is_not_stored_and_scopes_state() {
        let router = api_with(MemoryCache::new());
        call(&router, "POST", "/search/store?route=posts", Some(json!({"a": 1}))).await;

        let (_, other) = call(&router, "GET", "/search?route=users", None).await;
        assert_eq!(other["data"], json!({"pagination": 15}));

        let (_, posts) = call(&router, "PATCH", "/search?route=posts", None).await;
        assert_eq!(posts["data"], json!({"a": 1}));
    }

    #[tokio::test]
    async fn defaults_endpoint_uses_configured_defaults_when_body_is_empty() {
        let router = api_with(MemoryCache::new());
        let (_, body) = call(&router, "POST", "/search/defaults?route=posts", None).await;
        assert_eq!(body["data"], json!({"pagination": 15}));
    }

    #[tokio::test]
    async fn malformed_body_is_a_400() {
        let router = api_with(MemoryCache::new());
        let (status, body) = call(&router, "PATCH", "/search", Some(json!([1, 2]))).await;
        assert_eq!(status, StatusCode::BadRequest);
        assert_eq!(body["success"], json!(false));
    }

    #[test]
    fn error_statuses() {
        use crate::params::ParamsError;
        use crate::sort::SortError;

        let cases = [
            (SearchError::from(CacheError::unavailable("down")), StatusCode::ServiceUnavailable),
            (SearchError::from(ParamsError::NotAnObject { kind: "array" }), StatusCode::BadRequest),
            (
                SearchError::from(SortError::InvalidIdentifier { key: "a b".into() }),
                StatusCode::UnprocessableEntity,
            ),
        ];
        for (error, status) in cases {
            let response = error_response(&error);
            assert_eq!(response.status(), status, "{error}");
            let body: Value = serde_json::from_slice(response.body_ref()).unwrap();
            assert_eq!(body["success"], json!(false));
        }
    }

    struct DownCache;

    #[async_trait]
    impl CacheStore for DownCache {
        async fn get(&self, _key: &str) -> Result<Option<Bytes>, CacheError> {
            Err(CacheError::unavailable("redis down"))
        }

        async fn put(&self, _key: &str, _value: Bytes, _ttl: Duration) -> Result<(), CacheError> {
            Err(CacheError::unavailable("redis down"))
        }

        async fn forget(&self, _key: &str) -> Result<(), CacheError> {
            Err(CacheError::unavailable("redis down"))
        }
    }

    #[tokio::test]
    async fn cache_outage_is_a_503() {
        let router = api_with(DownCache);
        for (method, target) in [("GET", "/search"), ("DELETE", "/search"), ("POST", "/search/store")] {
            let (status, body) = call(&router, method, target, None).await;
            assert_eq!(status, StatusCode::ServiceUnavailable, "{method} {target}");
            assert_eq!(body["error"], json!("cache backend unavailable: redis down"));
        }
    }
}
