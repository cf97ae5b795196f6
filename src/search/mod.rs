//! Per-request search state: load, persist, resolve, apply.
//!
//! A [`SearchResource`] describes one listing (its filters, sorts, defaults
//! and page size). A [`Searcher`] turns a request against that listing into
//! [`Resolved`] parameters, persisting them per user and route so the next
//! visit starts where the last one ended.

use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::cache::{CacheError, CacheKey, CacheStore, ParameterStore, key::DEFAULT_PREFIX};
use crate::context::{Context, IdentityProvider, UserId};
use crate::filter::{FilterSpec, apply_filters};
use crate::params::{ParamsError, SearchParameters, resolve};
use crate::query::{Direction, Query};
use crate::sort::{AppliedSort, SortError, SortSpec, apply_sort};

/// Rows per page when a resource declares nothing else.
pub const DEFAULT_PER_PAGE: u64 = 15;

/// Parameter carrying the page size.
pub const PAGINATION_PARAM: &str = "pagination";

#[derive(Debug, Error)]
pub enum SearchError {
    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Params(#[from] ParamsError),

    #[error(transparent)]
    Sort(#[from] SortError),
}

/// Everything needed to search one listing.
#[derive(Debug, Clone)]
pub struct SearchResource {
    filters: FilterSpec,
    sorts: SortSpec,
    defaults: SearchParameters,
    per_page: u64,
    pagination_param: String,
}

impl Default for SearchResource {
    fn default() -> Self {
        Self {
            filters: FilterSpec::default(),
            sorts: SortSpec::default(),
            defaults: SearchParameters::default(),
            per_page: DEFAULT_PER_PAGE,
            pagination_param: PAGINATION_PARAM.to_owned(),
        }
    }
}

impl SearchResource {
    pub fn new(filters: FilterSpec, sorts: SortSpec) -> Self {
        Self {
            filters,
            sorts,
            ..Self::default()
        }
    }

    pub fn with_defaults(mut self, defaults: SearchParameters) -> Self {
        self.defaults = defaults;
        self
    }

    /// Page size used when the parameters carry none. Zero is ignored.
    pub fn with_per_page(mut self, per_page: u64) -> Self {
        if per_page > 0 {
            self.per_page = per_page;
        }
        self
    }

    pub fn with_pagination_param(mut self, param: impl Into<String>) -> Self {
        self.pagination_param = param.into();
        self
    }

    pub fn filters(&self) -> &FilterSpec {
        &self.filters
    }

    pub fn sorts(&self) -> &SortSpec {
        &self.sorts
    }

    pub fn per_page(&self) -> u64 {
        self.per_page
    }

    pub fn pagination_param(&self) -> &str {
        &self.pagination_param
    }

    /// The declared defaults, plus the page size unless declared explicitly.
    pub fn defaults(&self) -> SearchParameters {
        let mut defaults = self.defaults.clone();
        if !defaults.contains_key(&self.pagination_param) {
            defaults.insert(self.pagination_param.clone(), self.per_page);
        }
        defaults
    }
}

/// Resolves search parameters for requests, backed by a [`ParameterStore`].
pub struct Searcher<C> {
    store: ParameterStore<C>,
    identity: Arc<dyn IdentityProvider>,
    prefix: String,
    persist_request: bool,
}

impl<C: CacheStore> Searcher<C> {
    pub fn new(store: ParameterStore<C>, identity: impl IdentityProvider + 'static) -> Self {
        Self {
            store,
            identity: Arc::new(identity),
            prefix: DEFAULT_PREFIX.to_owned(),
            persist_request: true,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Whether supplied request parameters are merged into the saved state.
    pub fn persist_request(mut self, persist: bool) -> Self {
        self.persist_request = persist;
        self
    }

    pub fn store(&self) -> &ParameterStore<C> {
        &self.store
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn identity(&self) -> &dyn IdentityProvider {
        self.identity.as_ref()
    }

    /// Key for the current user on `route`.
    pub fn key_for(&self, ctx: &Context, route: &str) -> CacheKey {
        CacheKey::derive(self.identity.current_user(ctx).as_ref(), route, &self.prefix)
    }

    /// Resolves the effective parameters for the matched route.
    pub async fn resolve(
        &self,
        ctx: &Context,
        resource: &SearchResource,
    ) -> Result<Resolved, SearchError> {
        let request = SearchParameters::from_request(ctx.request())?;
        let user = self.identity.current_user(ctx);
        self.resolve_params(user.as_ref(), ctx.route_identity(), &request, resource)
            .await
    }

    /// Like [`resolve`](Self::resolve), with identity and parameters given
    /// explicitly.
    pub async fn resolve_params(
        &self,
        user: Option<&UserId>,
        route: &str,
        request: &SearchParameters,
        resource: &SearchResource,
    ) -> Result<Resolved, SearchError> {
        let key = CacheKey::derive(user, route, &self.prefix);
        let defaults = resource.defaults();

        let mut cached = self.store.get(&key, &defaults).await?;
        if self.persist_request && !request.is_empty() {
            cached = self.store.update(&key, request).await?;
        }

        let params = resolve(request, &cached, &defaults);
        debug!(key = %key, keys = params.len(), "search parameters resolved");
        Ok(Resolved { key, params })
    }
}

/// Effective parameters for one request.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    key: CacheKey,
    params: SearchParameters,
}

impl Resolved {
    pub fn new(key: CacheKey, params: SearchParameters) -> Self {
        Self { key, params }
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn params(&self) -> &SearchParameters {
        &self.params
    }

    pub fn into_params(self) -> SearchParameters {
        self.params
    }

    /// Applies the resource's filters, then its sort.
    pub fn apply(
        &self,
        query: &mut dyn Query,
        resource: &SearchResource,
    ) -> Result<AppliedSort, SortError> {
        let filtered = apply_filters(query, &self.params, resource.filters());
        let sorted = apply_sort(query, &self.params, resource.sorts())?;
        debug!(key = %self.key, filtered, sorted = ?sorted, "search applied");
        Ok(sorted)
    }

    /// Page size from the parameters when it is a positive integer, else the
    /// resource default.
    pub fn per_page(&self, resource: &SearchResource) -> u64 {
        self.params
            .supplied(resource.pagination_param())
            .and_then(|value| match value {
                serde_json::Value::Number(n) => n.as_u64(),
                serde_json::Value::String(s) => s.trim().parse().ok(),
                _ => None,
            })
            .filter(|per_page| *per_page > 0)
            .unwrap_or_else(|| resource.per_page())
    }

    /// The requested sort key and effective direction, if a key is set.
    pub fn sorting(&self, resource: &SearchResource) -> Option<(String, Direction)> {
        let sorts = resource.sorts();
        sorts
            .requested_key(&self.params)
            .map(|key| (key, sorts.direction(&self.params)))
    }
}
