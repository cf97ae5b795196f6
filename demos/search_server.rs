//! Search-state server over an in-memory cache.
//!
//! ```text
//! cargo run --example search_server
//! curl -H 'x-user-id: 1' 'localhost:8080/posts?status=draft&sort=newest&direction=asc'
//! curl -H 'x-user-id: 1' 'localhost:8080/posts'            # remembers status=draft
//! curl -H 'x-user-id: 1' 'localhost:8080/search?route=posts.index'
//! curl -X DELETE -H 'x-user-id: 1' 'localhost:8080/search?route=posts.index'
//! ```

use std::path::Path;
use std::sync::Arc;

use serde_json::json;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use searchstate::api::{self, SearchApi};
use searchstate::config::SearchConfig;
use searchstate::context::{Context, ExtensionIdentity};
use searchstate::middleware::{IdentityMiddleware, LoggerMiddleware, from_middleware};
use searchstate::query::{Direction, Predicate, Relation, SqlQuery};
use searchstate::schema::Callbacks;
use searchstate::{
    MemoryCache, Response, Router, SearchError, SearchResource, Searcher, Server, StatusCode,
};

const POSTS_CONFIG: &str = r#"
[resources.posts]
defaults = { status = "published" }

[resources.posts.filters]
status = "exact"
q = { type = "text", columns = ["title", "author.name"], case_insensitive = true }
published = { type = "date", column = "published_at", year = "year", month = "month" }
tag = { type = "relation", relation = "tags", field = "slug" }
min_votes = { type = "custom", callback = "min_votes" }

[resources.posts.sorts]
default = { callback = "pinned_first" }

[resources.posts.sorts.fields]
newest = "published_at"
title = "title"
"#;

fn callbacks() -> Callbacks {
    Callbacks::new()
        .filter("min_votes", |query, value, _| {
            query.push(Predicate::equals("votes", value.clone()));
        })
        .sort("pinned_first", |query, direction, _| {
            query.order_by("pinned", Direction::Desc);
            query.order_by("published_at", direction);
        })
}

async fn list_posts(
    ctx: Context,
    searcher: Arc<Searcher<Arc<MemoryCache>>>,
    resource: Arc<SearchResource>,
) -> Response {
    let resolved = match searcher.resolve(&ctx, &resource).await {
        Ok(resolved) => resolved,
        Err(e) => {
            error!(error = %e, "failed to resolve search");
            return api::error_response(&e);
        }
    };

    let mut query = SqlQuery::new("posts")
        .with_relation("author", Relation::new("users", "id").local_key("user_id"))
        .with_relation("tags", Relation::new("post_tags", "post_id"));
    if let Err(e) = resolved.apply(&mut query, &resource) {
        return api::error_response(&SearchError::from(e));
    }

    match query.to_sql() {
        Ok(built) => Response::json(
            StatusCode::Ok,
            &json!({
                "params": resolved.params(),
                "per_page": resolved.per_page(&resource),
                "query": built,
            }),
        ),
        Err(e) => Response::json(StatusCode::UnprocessableEntity, &json!({"success": false, "error": e.to_string()})),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,searchstate=debug")),
        )
        .init();

    let mut config = SearchConfig::load(std::env::args().nth(1).as_deref().map(Path::new))?;
    if config.resources.is_empty() {
        config.resources = SearchConfig::from_toml_str(POSTS_CONFIG)?.resources;
    }

    let mut resources = config.resources(&callbacks())?;
    let posts = Arc::new(
        resources
            .shift_remove("posts")
            .ok_or("no `posts` resource configured")?,
    );

    let cache = Arc::new(config.memory_cache());
    let searcher = Arc::new(
        Searcher::new(config.store(Arc::clone(&cache)), ExtensionIdentity)
            .with_prefix(config.cache.prefix.clone())
            .persist_request(config.persist_request),
    );
    let search_api = Arc::new(SearchApi::new(
        Searcher::new(config.store(Arc::clone(&cache)), ExtensionIdentity)
            .with_prefix(config.cache.prefix.clone()),
        config.default_parameters(),
        config.http.base_path.clone(),
    ));

    let mut router = Router::new();
    router.layer(from_middleware(Arc::new(LoggerMiddleware)));
    router.layer(from_middleware(Arc::new(IdentityMiddleware::new(
        config.http.identity_header.clone(),
    ))));

    router
        .get("/posts", move |ctx: Context| {
            let searcher = Arc::clone(&searcher);
            let posts = Arc::clone(&posts);
            async move { list_posts(ctx, searcher, posts).await }
        })
        .name("posts.index");
    api::mount(&mut router, search_api);

    let server = Server::bind(&config.http.bind).await?;
    info!(address = %server.local_addr(), routes = router.len(), "search demo ready");
    server
        .serve_until(router, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}
