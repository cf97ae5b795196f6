//! Declarative sorting: a sort key from the parameters selects a field or a
//! callback.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use thiserror::Error;
use tracing::debug;

use crate::params::{SearchParameters, value_text};
use crate::query::{Direction, OrderBy, Query, is_identifier};

/// Sort key that selects the spec's default ordering.
pub const DEFAULT_SORT_KEY: &str = "default";

pub type SortCallback = Arc<dyn Fn(&mut dyn Query, Direction, &SearchParameters) + Send + Sync>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SortError {
    #[error("`{key}` is not a sortable identifier")]
    InvalidIdentifier { key: String },

    #[error("unknown sort key `{key}`, expected one of: {}", .allowed.join(", "))]
    UnknownSortKey { key: String, allowed: Vec<String> },
}

#[derive(Clone)]
pub enum SortDescriptor {
    /// Order by this column.
    Field(String),
    Callback(SortCallback),
}

impl SortDescriptor {
    pub fn field(column: impl Into<String>) -> Self {
        Self::Field(column.into())
    }

    pub fn callback<F>(callback: F) -> Self
    where
        F: Fn(&mut dyn Query, Direction, &SearchParameters) + Send + Sync + 'static,
    {
        Self::Callback(Arc::new(callback))
    }
}

impl fmt::Debug for SortDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Field(column) => f.debug_tuple("Field").field(column).finish(),
            Self::Callback(_) => f.write_str("Callback(<callback>)"),
        }
    }
}

/// What to do with a sort key the spec does not list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UnlistedSort {
    /// Order by the key itself, provided it is a plain identifier.
    #[default]
    Passthrough,
    Reject,
}

/// The ordering that was applied, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppliedSort {
    None,
    Field(OrderBy),
    /// A callback ran for this key.
    Callback(String),
}

#[derive(Debug, Clone)]
pub struct SortSpec {
    sorts: IndexMap<String, SortDescriptor>,
    default: Option<SortDescriptor>,
    sort_param: String,
    direction_param: String,
    default_direction: Direction,
    unlisted: UnlistedSort,
}

impl Default for SortSpec {
    fn default() -> Self {
        Self {
            sorts: IndexMap::new(),
            default: None,
            sort_param: "sort".to_owned(),
            direction_param: "direction".to_owned(),
            default_direction: Direction::default(),
            unlisted: UnlistedSort::default(),
        }
    }
}

impl SortSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(mut self, key: impl Into<String>, descriptor: SortDescriptor) -> Self {
        self.sorts.insert(key.into(), descriptor);
        self
    }

    pub fn field(self, key: impl Into<String>, column: impl Into<String>) -> Self {
        self.insert(key, SortDescriptor::field(column))
    }

    pub fn callback<F>(self, key: impl Into<String>, callback: F) -> Self
    where
        F: Fn(&mut dyn Query, Direction, &SearchParameters) + Send + Sync + 'static,
    {
        self.insert(key, SortDescriptor::callback(callback))
    }

    /// Ordering used when no sort key is supplied, or the key is `default`.
    pub fn default_sort(mut self, descriptor: SortDescriptor) -> Self {
        self.default = Some(descriptor);
        self
    }

    pub fn params(mut self, sort: impl Into<String>, direction: impl Into<String>) -> Self {
        self.sort_param = sort.into();
        self.direction_param = direction.into();
        self
    }

    pub fn default_direction(mut self, direction: Direction) -> Self {
        self.default_direction = direction;
        self
    }

    pub fn unlisted(mut self, policy: UnlistedSort) -> Self {
        self.unlisted = policy;
        self
    }

    pub fn sort_param(&self) -> &str {
        &self.sort_param
    }

    pub fn direction_param(&self) -> &str {
        &self.direction_param
    }

    pub fn get(&self, key: &str) -> Option<&SortDescriptor> {
        self.sorts.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.sorts.keys()
    }

    /// The supplied sort key, or `None` when blank.
    pub fn requested_key(&self, params: &SearchParameters) -> Option<String> {
        params.supplied(&self.sort_param).and_then(value_text)
    }

    /// The supplied direction; unknown or blank values give the default.
    pub fn direction(&self, params: &SearchParameters) -> Direction {
        params
            .supplied(&self.direction_param)
            .and_then(|value| value.as_str())
            .and_then(Direction::parse)
            .unwrap_or(self.default_direction)
    }
}

/// Applies the ordering selected by `params`.
///
/// # Examples
///
/// ```
/// use searchstate::params::SearchParameters;
/// use searchstate::query::{Direction, OrderBy, SqlQuery};
/// use searchstate::sort::{AppliedSort, SortSpec, apply_sort};
/// use serde_json::json;
///
/// let params: SearchParameters = [("sort", json!("name")), ("direction", json!("asc"))].into_iter().collect();
/// let mut query = SqlQuery::new("posts");
///
/// let applied = apply_sort(&mut query, &params, &SortSpec::new()).unwrap();
/// assert_eq!(applied, AppliedSort::Field(OrderBy::new("name", Direction::Asc)));
/// ```
pub fn apply_sort(
    query: &mut dyn Query,
    params: &SearchParameters,
    spec: &SortSpec,
) -> Result<AppliedSort, SortError> {
    let direction = spec.direction(params);
    let key = spec.requested_key(params);

    let (key, descriptor) = match key.as_deref() {
        None | Some(DEFAULT_SORT_KEY) => match &spec.default {
            Some(descriptor) => (DEFAULT_SORT_KEY.to_owned(), descriptor.clone()),
            None => return Ok(AppliedSort::None),
        },
        Some(key) => match spec.get(key) {
            Some(descriptor) => (key.to_owned(), descriptor.clone()),
            None => (key.to_owned(), unlisted(key, spec)?),
        },
    };

    let applied = match descriptor {
        SortDescriptor::Field(column) => {
            query.order_by(&column, direction);
            AppliedSort::Field(OrderBy::new(column, direction))
        }
        SortDescriptor::Callback(callback) => {
            callback(query, direction, params);
            AppliedSort::Callback(key.clone())
        }
    };
    debug!(key = %key, direction = %direction, "sort applied");
    Ok(applied)
}

fn unlisted(key: &str, spec: &SortSpec) -> Result<SortDescriptor, SortError> {
    match spec.unlisted {
        UnlistedSort::Passthrough if is_identifier(key) => Ok(SortDescriptor::field(key)),
        UnlistedSort::Passthrough => Err(SortError::InvalidIdentifier {
            key: key.to_owned(),
        }),
        UnlistedSort::Reject => Err(SortError::UnknownSortKey {
            key: key.to_owned(),
            allowed: spec.keys().cloned().collect(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::SqlQuery;
    use serde_json::{Value, json};
    use std::sync::atomic::{AtomicBool, Ordering};

    fn params<const N: usize>(pairs: [(&str, Value); N]) -> SearchParameters {
        pairs.into_iter().collect()
    }

    #[test]
    fn unlisted_key_sorts_by_itself() {
        let mut query = SqlQuery::new("posts");
        let applied = apply_sort(
            &mut query,
            &params([("sort", json!("name")), ("direction", json!("asc"))]),
            &SortSpec::new(),
        )
        .unwrap();
        assert_eq!(applied, AppliedSort::Field(OrderBy::new("name", Direction::Asc)));
        assert_eq!(query.orderings(), &[OrderBy::new("name", Direction::Asc)]);
    }

    #[test]
    fn listed_field_and_default_direction() {
        let spec = SortSpec::new().field("newest", "created_at");
        let mut query = SqlQuery::new("posts");
        let applied = apply_sort(&mut query, &params([("sort", json!("newest"))]), &spec).unwrap();
        assert_eq!(applied, AppliedSort::Field(OrderBy::new("created_at", Direction::Desc)));
    }

    #[test]
    fn unknown_direction_falls_back() {
        let spec = SortSpec::new().default_direction(Direction::Asc);
        let direction = spec.direction(&params([("direction", json!("up"))]));
        assert_eq!(direction, Direction::Asc);
        assert_eq!(spec.direction(&params([("direction", json!("DESC"))])), Direction::Desc);
    }

    #[test]
    fn blank_key_without_default_is_a_no_op() {
        let mut query = SqlQuery::new("posts");
        for key in [json!(""), json!("all"), json!(null)] {
            let applied = apply_sort(&mut query, &params([("sort", key)]), &SortSpec::new()).unwrap();
            assert_eq!(applied, AppliedSort::None);
        }
        assert!(query.orderings().is_empty());
    }

    #[test]
    fn default_descriptor_applies_when_key_missing_or_default() {
        let called = Arc::new(AtomicBool::new(false));
        let seen = Arc::clone(&called);
        let spec = SortSpec::new().default_sort(SortDescriptor::callback(move |query, direction, _| {
            seen.store(true, Ordering::SeqCst);
            query.order_by("pinned", direction);
            query.order_by("id", Direction::Desc);
        }));

        let mut query = SqlQuery::new("posts");
        let applied = apply_sort(&mut query, &SearchParameters::new(), &spec).unwrap();
        assert_eq!(applied, AppliedSort::Callback(DEFAULT_SORT_KEY.into()));
        assert!(called.load(Ordering::SeqCst));
        assert_eq!(query.orderings().len(), 2);

        let mut query = SqlQuery::new("posts");
        apply_sort(&mut query, &params([("sort", json!("default"))]), &spec).unwrap();
        assert_eq!(query.orderings().len(), 2);
    }

    #[test]
    fn callback_receives_direction() {
        let spec = SortSpec::new().callback("popular", |query, direction, _| {
            query.order_by("votes", direction);
        });
        let mut query = SqlQuery::new("posts");
        apply_sort(
            &mut query,
            &params([("sort", json!("popular")), ("direction", json!("asc"))]),
            &spec,
        )
        .unwrap();
        assert_eq!(query.orderings(), &[OrderBy::new("votes", Direction::Asc)]);
    }

    #[test]
    fn invalid_identifier_is_rejected() {
        let mut query = SqlQuery::new("posts");
        let err = apply_sort(
            &mut query,
            &params([("sort", json!("name; DROP TABLE posts"))]),
            &SortSpec::new(),
        )
        .unwrap_err();
        assert!(matches!(err, SortError::InvalidIdentifier { .. }));
        assert!(query.orderings().is_empty());
    }

    #[test]
    fn reject_policy_lists_allowed_keys() {
        let spec = SortSpec::new()
            .field("title", "title")
            .field("newest", "created_at")
            .unlisted(UnlistedSort::Reject);
        let mut query = SqlQuery::new("posts");
        let err = apply_sort(&mut query, &params([("sort", json!("votes"))]), &spec).unwrap_err();
        assert_eq!(
            err,
            SortError::UnknownSortKey {
                key: "votes".into(),
                allowed: vec!["title".into(), "newest".into()],
            }
        );
        assert_eq!(
            err.to_string(),
            "unknown sort key `votes`, expected one of: title, newest"
        );
    }

    #[test]
    fn custom_param_names() {
        let spec = SortSpec::new().params("order_by", "order");
        let mut query = SqlQuery::new("posts");
        apply_sort(
            &mut query,
            &params([("order_by", json!("title")), ("order", json!("asc"))]),
            &spec,
        )
        .unwrap();
        assert_eq!(query.orderings(), &[OrderBy::new("title", Direction::Asc)]);
    }
}
