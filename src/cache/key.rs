//! Cache key derivation from (user, route).

use std::fmt;

use crate::context::UserId;

/// Default key prefix.
pub const DEFAULT_PREFIX: &str = "search_";

/// User segment used when the request is anonymous.
///
/// `@` is always percent-encoded in user segments, so no identified user can
/// render as this sentinel.
pub const GUEST_SEGMENT: &str = "@guest";

/// Identifies one user's saved search state on one route.
///
/// Layout: `{prefix}{user}_{route}`. The user segment is percent-encoded with
/// `_` escaped too, so the first `_` after the prefix always separates user
/// from route and distinct pairs never share a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key for `user` on `route`.
    ///
    /// # Examples
    ///
    /// ```
    /// use searchstate::cache::CacheKey;
    /// use searchstate::context::UserId;
    ///
    /// let key = CacheKey::derive(Some(&UserId::from(42)), "posts.index", "search_");
    /// assert_eq!(key.as_str(), "search_42_posts.index");
    ///
    /// let guest = CacheKey::derive(None, "/posts", "search_");
    /// assert_eq!(guest.as_str(), "search_@guest_/posts");
    /// ```
    pub fn derive(user: Option<&UserId>, route: &str, prefix: &str) -> Self {
        let user_segment = match user {
            Some(id) => encode_user(id.as_str()),
            None => GUEST_SEGMENT.to_owned(),
        };
        Self(format!("{prefix}{user_segment}_{route}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn encode_user(id: &str) -> String {
    urlencoding::encode(id).replace('_', "%5F")
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
