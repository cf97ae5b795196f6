//! Per-request context: the parsed request, matched route, path parameters,
//! and type-erased extensions injected by middleware.
//!
//! Identity is modelled here too. Search state is scoped by *who* is asking
//! ([`IdentityProvider`]) and *where* they are asking from
//! ([`Context::route_identity`]).

use std::{
    any::{Any, TypeId},
    collections::HashMap,
    fmt,
};

use crate::Request;

/// Type-erased request extensions map, used to inject per-request state
/// into handlers without requiring handlers to know about each other's types.
#[derive(Default)]
pub struct Extensions {
    map: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Extensions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value, replacing any previous value of the same type.
    pub fn insert<T>(&mut self, value: T)
    where
        T: Send + Sync + 'static,
    {
        self.map.insert(TypeId::of::<T>(), Box::new(value));
    }

    pub fn get<T>(&self) -> Option<&T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
    }

    pub fn remove<T>(&mut self) -> Option<T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .remove(&TypeId::of::<T>())
            .and_then(|value| value.downcast::<T>().ok())
            .map(|value| *value)
    }
}

impl fmt::Debug for Extensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Extensions")
            .field("len", &self.map.len())
            .finish()
    }
}

/// Path parameters extracted from the matched route pattern.
#[derive(Default, Debug, Clone)]
pub struct PathParams {
    map: HashMap<String, String>,
}

impl PathParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: String, value: String) {
        self.map.insert(key, value);
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Per-request context handed to route handlers and middleware.
#[derive(Debug)]
pub struct Context {
    request: Request,
    params: PathParams,
    route_name: Option<String>,
    extensions: Extensions,
}

impl Context {
    pub fn new(request: Request) -> Self {
        Self::with_params(request, PathParams::new())
    }

    /// Create a context for a request that matched a route pattern.
    pub fn with_params(request: Request, params: PathParams) -> Self {
        Self {
            request,
            params,
            route_name: None,
            extensions: Extensions::new(),
        }
    }

    /// Attach the matched route's name.
    #[must_use]
    pub fn with_route_name(mut self, name: Option<String>) -> Self {
        self.route_name = name;
        self
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn params(&self) -> &PathParams {
        &self.params
    }

    /// The name the matched route was registered under, if any.
    pub fn route_name(&self) -> Option<&str> {
        self.route_name.as_deref()
    }

    /// The route's name, falling back to the request path for unnamed routes.
    pub fn route_identity(&self) -> &str {
        self.route_name().unwrap_or_else(|| self.request.path())
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }
}

/// Opaque identifier of the authenticated user.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<u64> for UserId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

/// Answers "who is making this request". `None` means a guest.
pub trait IdentityProvider: Send + Sync {
    fn current_user(&self, ctx: &Context) -> Option<UserId>;
}

/// Reads the [`UserId`] that authentication middleware put into the
/// request extensions.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExtensionIdentity;

impl IdentityProvider for ExtensionIdentity {
    fn current_user(&self, ctx: &Context) -> Option<UserId> {
        ctx.extensions().get::<UserId>().cloned()
    }
}

/// Trusts a request header (set by an upstream gateway) as the user id.
/// Blank header values count as a guest.
#[derive(Debug, Clone)]
pub struct HeaderIdentity {
    header: String,
}

impl HeaderIdentity {
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
        }
    }
}

impl IdentityProvider for HeaderIdentity {
    fn current_user(&self, ctx: &Context) -> Option<UserId> {
        ctx.request()
            .headers()
            .get(&self.header)
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(UserId::from)
    }
}
