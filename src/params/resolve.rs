//! Default resolution: request > cached > declared defaults.

use serde_json::Value;

use super::{SearchParameters, is_blank};

/// Merges the three parameter sources into the effective parameters.
///
/// For every key in any source, the first non-blank value of request, cached,
/// default wins. When all three are blank the key is still kept, holding the
/// request's raw value if present (so `"all"` survives as an explicit choice),
/// else the cached one, else the default.
///
/// Key order: defaults first, then keys only cached, then keys only in the
/// request.
///
/// # Examples
///
/// ```
/// use searchstate::params::{SearchParameters, resolve};
/// use serde_json::json;
///
/// let request: SearchParameters = [("status", json!("active"))].into_iter().collect();
/// let cached: SearchParameters = [("status", json!("draft")), ("q", json!("rust"))].into_iter().collect();
/// let defaults: SearchParameters = [("status", json!("published"))].into_iter().collect();
///
/// let resolved = resolve(&request, &cached, &defaults);
/// assert_eq!(resolved.get("status"), Some(&json!("active")));
/// assert_eq!(resolved.get("q"), Some(&json!("rust")));
/// ```
pub fn resolve(
    request: &SearchParameters,
    cached: &SearchParameters,
    defaults: &SearchParameters,
) -> SearchParameters {
    let mut resolved = SearchParameters::new();

    for key in defaults.keys().chain(cached.keys()).chain(request.keys()) {
        if resolved.contains_key(key) {
            continue;
        }

        let sources = [request.get(key), cached.get(key), defaults.get(key)];
        let chosen = sources
            .iter()
            .flatten()
            .find(|value| !is_blank(value))
            .or_else(|| sources.iter().flatten().next());

        if let Some(value) = chosen {
            resolved.insert(key.clone(), Value::clone(value));
        }
    }

    resolved
}

/// Returns `true` when every default key is present in `params` with a
/// non-blank value. A default that is itself blank only requires the key.
pub fn satisfies_defaults(params: &SearchParameters, defaults: &SearchParameters) -> bool {
    defaults.iter().all(|(key, default)| {
        params.supplied(key).is_some() || (is_blank(default) && params.contains_key(key))
    })
}

/// Fills every default key that is absent or blank in `params`; non-blank
/// values are left alone. Returns whether anything changed.
pub fn backfill_defaults(params: &mut SearchParameters, defaults: &SearchParameters) -> bool {
    let mut changed = false;
    for (key, value) in defaults.iter() {
        if params.supplied(key).is_none() && params.get(key) != Some(value) {
            params.insert(key.clone(), value.clone());
            changed = true;
        }
    }
    changed
}
