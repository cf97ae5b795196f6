//! # searchstate
//!
//! Remembers each user's search, filter and sort choices per listing, and
//! turns them into query predicates.
//!
//! A request's parameters are merged with what the user last used on the
//! same route (kept in a TTL cache) and with the listing's declared defaults.
//! The result drives a declarative filter and sort configuration that emits
//! predicates on any [`Query`](query::Query) implementation.
//!
//! ## Quick Start
//!
//! ```rust
//! use searchstate::cache::{MemoryCache, ParameterStore};
//! use searchstate::context::{ExtensionIdentity, UserId};
//! use searchstate::filter::FilterSpec;
//! use searchstate::params::SearchParameters;
//! use searchstate::query::SqlQuery;
//! use searchstate::search::{SearchResource, Searcher};
//! use searchstate::sort::SortSpec;
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let resource = SearchResource::new(
//!     FilterSpec::new().exact("status").text("title"),
//!     SortSpec::new().field("newest", "created_at"),
//! );
//! let searcher = Searcher::new(ParameterStore::new(MemoryCache::new()), ExtensionIdentity);
//!
//! let request: SearchParameters = [("status", json!("draft"))].into_iter().collect();
//! let resolved = searcher
//!     .resolve_params(Some(&UserId::from(7)), "posts.index", &request, &resource)
//!     .await?;
//!
//! let mut query = SqlQuery::new("posts");
//! resolved.apply(&mut query, &resource)?;
//! assert_eq!(query.to_sql()?.sql, r#"SELECT * FROM "posts" WHERE "status" = $1"#);
//! # Ok(())
//! # }
//! ```

// ── Search engine ─────────────────────────────────────────────────────────────
pub mod cache;
pub mod filter;
pub mod params;
pub mod query;
pub mod schema;
pub mod search;
pub mod sort;

// ── HTTP surface ──────────────────────────────────────────────────────────────
pub mod api;
pub mod context;
pub mod http;
pub mod middleware;
pub mod router;
pub mod server;

pub mod config;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use cache::{CacheError, CacheKey, CacheStore, MemoryCache, ParameterStore};
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use params::SearchParameters;
pub use router::Router;
pub use search::{Resolved, SearchError, SearchResource, Searcher};
pub use server::{Server, ServerError};
