//! Search parameters: the flat, ordered key → value mapping that is resolved
//! per request and persisted between requests.
//!
//! There is exactly one notion of "blank" in this crate, [`is_blank`]. Every
//! place that asks "did the caller supply a value for this key?" (default
//! backfill, filter application, sort application) goes through it.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::http::Request;

pub mod resolve;

pub use resolve::{backfill_defaults, resolve, satisfies_defaults};

/// Sentinel a form sends to mean "no filter on this field".
pub const ALL_SENTINEL: &str = "all";

/// Errors from turning a request into [`SearchParameters`].
#[derive(Debug, Error)]
pub enum ParamsError {
    #[error("request body is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("request body must be a JSON object, got {kind}")]
    NotAnObject { kind: &'static str },
}

/// Returns `true` when `value` counts as "not supplied".
///
/// Blank: `null`, strings that are empty after trimming, the `"all"`
/// sentinel, empty arrays and empty objects. `0` and `false` are real values.
///
/// # Examples
///
/// ```
/// use searchstate::params::is_blank;
/// use serde_json::json;
///
/// assert!(is_blank(&json!(null)));
/// assert!(is_blank(&json!("  ")));
/// assert!(is_blank(&json!("all")));
/// assert!(is_blank(&json!([])));
/// assert!(!is_blank(&json!(0)));
/// assert!(!is_blank(&json!(false)));
/// assert!(!is_blank(&json!("active")));
/// ```
pub fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty() || s == ALL_SENTINEL,
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

/// Renders a scalar as text for pattern matching and identifiers.
/// Arrays and objects have no text form.
pub fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Ordered mapping of search parameter names to JSON values.
///
/// Serializes as a plain JSON object, which is also the cache blob format.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SearchParameters {
    inner: IndexMap<String, Value>,
}

impl SearchParameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collects parameters from a request.
    ///
    /// Query pairs come first; `key[]=a&key[]=b` builds an array, any other
    /// repeated key keeps its last value. Query values stay strings. A JSON
    /// object body is merged on top and wins on conflicts.
    pub fn from_request(request: &Request) -> Result<Self, ParamsError> {
        let mut params = Self::new();

        for (key, value) in request.query_pairs() {
            match key.strip_suffix("[]") {
                Some(list_key) => {
                    let slot = params
                        .inner
                        .entry(list_key.to_owned())
                        .or_insert_with(|| Value::Array(Vec::new()));
                    match slot {
                        Value::Array(items) => items.push(Value::String(value.to_owned())),
                        other => *other = Value::Array(vec![Value::String(value.to_owned())]),
                    }
                }
                None => params.insert(key, value),
            }
        }

        if request.is_json() && !request.body().is_empty() {
            let body: Value = serde_json::from_slice(request.body())?;
            match body {
                Value::Object(members) => params.extend(members),
                other => {
                    return Err(ParamsError::NotAnObject {
                        kind: kind_of(&other),
                    });
                }
            }
        }

        Ok(params)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.inner.get(key)
    }

    /// Returns the value for `key` only when it is present and not blank.
    pub fn supplied(&self, key: &str) -> Option<&Value> {
        self.get(key).filter(|value| !is_blank(value))
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.inner.insert(key.into(), value.into());
    }

    /// Removes `key`, keeping the order of the remaining entries.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.inner.shift_remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.contains_key(key)
    }

    /// Overwrites entries with those of `other`; new keys are appended.
    pub fn merge(&mut self, other: &SearchParameters) {
        for (key, value) in other.iter() {
            self.inner.insert(key.clone(), value.clone());
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.inner.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.inner.iter()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for SearchParameters
where
    K: Into<String>,
    V: Into<Value>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Self::new();
        params.extend(iter);
        params
    }
}

impl<K, V> Extend<(K, V)> for SearchParameters
where
    K: Into<String>,
    V: Into<Value>,
{
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (key, value) in iter {
            self.insert(key, value);
        }
    }
}

impl IntoIterator for SearchParameters {
    type Item = (String, Value);
    type IntoIter = indexmap::map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.inner.into_iter()
    }
}

impl From<SearchParameters> for Value {
    fn from(params: SearchParameters) -> Self {
        Value::Object(params.inner.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(raw: &str) -> Request {
        Request::parse(raw.as_bytes()).unwrap().0
    }

    #[test]
    fn blank_rule() {
        for blank in [json!(null), json!(""), json!(" \t"), json!("all"), json!([]), json!({})] {
            assert!(is_blank(&blank), "{blank} should be blank");
        }
        for supplied in [json!(0), json!(false), json!("All"), json!("x"), json!(["a"])] {
            assert!(!is_blank(&supplied), "{supplied} should not be blank");
        }
    }

    #[test]
    fn supplied_filters_blank_values() {
        let params: SearchParameters = [("status", json!("all")), ("page", json!(0))]
            .into_iter()
            .collect();
        assert_eq!(params.supplied("status"), None);
        assert_eq!(params.supplied("page"), Some(&json!(0)));
        assert_eq!(params.supplied("missing"), None);
    }

    #[test]
    fn from_request_builds_arrays_and_keeps_order() {
        let req = request(
            "GET /posts?status=active&tag%5B%5D=rust&tag%5B%5D=web&status=draft HTTP/1.1\r\n\r\n",
        );
        let params = SearchParameters::from_request(&req).unwrap();
        let keys: Vec<_> = params.keys().cloned().collect();
        assert_eq!(keys, vec!["status", "tag"]);
        assert_eq!(params.get("status"), Some(&json!("draft")));
        assert_eq!(params.get("tag"), Some(&json!(["rust", "web"])));
    }

    #[test]
    fn json_body_wins_over_query() {
        let body = r#"{"status":"archived","year":2024}"#;
        let raw = format!(
            "POST /search?status=active HTTP/1.1\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
            body.len()
        );
        let params = SearchParameters::from_request(&request(&raw)).unwrap();
        assert_eq!(params.get("status"), Some(&json!("archived")));
        assert_eq!(params.get("year"), Some(&json!(2024)));
    }

    #[test]
    fn non_object_body_is_rejected() {
        let raw = "POST / HTTP/1.1\r\nContent-Type: application/json\r\nContent-Length: 3\r\n\r\n[1]";
        let err = SearchParameters::from_request(&request(raw)).unwrap_err();
        assert!(matches!(err, ParamsError::NotAnObject { kind: "an array" }));
    }

    #[test]
    fn remove_preserves_order() {
        let mut params: SearchParameters =
            [("a", json!(1)), ("b", json!(2)), ("c", json!(3))].into_iter().collect();
        params.remove("a");
        let keys: Vec<_> = params.keys().cloned().collect();
        assert_eq!(keys, vec!["b", "c"]);
    }

    #[test]
    fn serializes_as_plain_object() {
        let params: SearchParameters = [("pagination", json!(15))].into_iter().collect();
        assert_eq!(serde_json::to_string(&params).unwrap(), r#"{"pagination":15}"#);
    }
}
