//! Declarative resource definitions, loaded once and validated up front.
//!
//! A [`ResourceSchema`] is the serde shape of a resource in JSON or in the
//! `resources` table of the configuration file. [`ResourceSchema::build`]
//! turns it into a [`SearchResource`], resolving every filter type and
//! callback name; anything malformed is a [`SpecError`] at load time rather
//! than a surprise at request time.
//!
//! ```toml
//! [resources.posts.filters]
//! status = "exact"
//! q = { type = "text", columns = ["title", "author.name"], case_insensitive = true }
//! period = { type = "date", column = "start_date", year = "year", month = "month" }
//!
//! [resources.posts.sorts]
//! default = { callback = "pinned_first" }
//!
//! [resources.posts.sorts.fields]
//! newest = "created_at"
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::filter::{
    DateFilter, FilterCallback, FilterDescriptor, FilterSpec, TextColumn, TextFilter,
};
use crate::params::SearchParameters;
use crate::query::{Direction, Query, is_identifier};
use crate::search::{PAGINATION_PARAM, SearchResource};
use crate::sort::{SortCallback, SortDescriptor, SortSpec, UnlistedSort};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SpecError {
    #[error("filter `{field}` has unknown type `{kind}`")]
    UnknownFilterType { field: String, kind: String },

    #[error("`{name}` is not a registered {kind} callback")]
    UnknownCallback { name: String, kind: &'static str },

    #[error("`{identifier}` in `{entry}` is not a valid column name")]
    InvalidIdentifier { entry: String, identifier: String },

    #[error("`{entry}` requires the `{option}` option")]
    MissingOption { entry: String, option: &'static str },

    #[error("invalid resource definition: {0}")]
    Malformed(String),
}

/// Named callbacks that `custom` filters and callback sorts refer to.
#[derive(Clone, Default)]
pub struct Callbacks {
    filters: HashMap<String, FilterCallback>,
    sorts: HashMap<String, SortCallback>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter<F>(mut self, name: impl Into<String>, callback: F) -> Self
    where
        F: Fn(&mut dyn Query, &Value, &SearchParameters) + Send + Sync + 'static,
    {
        self.filters.insert(name.into(), Arc::new(callback));
        self
    }

    pub fn sort<F>(mut self, name: impl Into<String>, callback: F) -> Self
    where
        F: Fn(&mut dyn Query, Direction, &SearchParameters) + Send + Sync + 'static,
    {
        self.sorts.insert(name.into(), Arc::new(callback));
        self
    }

    fn filter_callback(&self, name: &str) -> Result<FilterCallback, SpecError> {
        self.filters
            .get(name)
            .cloned()
            .ok_or_else(|| SpecError::UnknownCallback {
                name: name.to_owned(),
                kind: "filter",
            })
    }

    fn sort_callback(&self, name: &str) -> Result<SortCallback, SpecError> {
        self.sorts
            .get(name)
            .cloned()
            .ok_or_else(|| SpecError::UnknownCallback {
                name: name.to_owned(),
                kind: "sort",
            })
    }
}

/// A filter entry: a bare type name or a table of options.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum FilterEntry {
    Type(String),
    Detailed(FilterOptions),
}

/// Options for one filter. Which ones apply depends on `type`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FilterOptions {
    #[serde(rename = "type")]
    pub kind: String,
    pub column: Option<String>,
    /// Text: columns searched (`relation.field` for related ones).
    /// Date: columns `column_param` may select.
    pub columns: Vec<String>,
    pub case_insensitive: bool,
    pub year: Option<String>,
    pub month: Option<String>,
    pub date: Option<String>,
    pub column_param: Option<String>,
    pub relation: Option<String>,
    pub field: Option<String>,
    pub callback: Option<String>,
}

/// A sort entry: a column name or a named callback.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SortEntry {
    Field(String),
    Callback { callback: String },
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnlistedPolicy {
    #[default]
    Passthrough,
    Reject,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SortSchema {
    pub fields: IndexMap<String, SortEntry>,
    pub default: Option<SortEntry>,
    pub param: Option<String>,
    pub direction_param: Option<String>,
    pub direction: Option<Direction>,
    pub unlisted: UnlistedPolicy,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResourceSchema {
    pub filters: IndexMap<String, FilterEntry>,
    pub sorts: SortSchema,
    pub defaults: SearchParameters,
    pub pagination: Option<u64>,
    pub pagination_param: Option<String>,
}

impl ResourceSchema {
    pub fn from_json(raw: &str) -> Result<Self, SpecError> {
        serde_json::from_str(raw).map_err(|err| SpecError::Malformed(err.to_string()))
    }

    /// Validates the schema and resolves it into a [`SearchResource`].
    ///
    /// With `strict` off, an unknown filter type becomes an `exact` filter
    /// and a warning is logged instead of failing.
    pub fn build(&self, callbacks: &Callbacks, strict: bool) -> Result<SearchResource, SpecError> {
        let mut filters = FilterSpec::new();
        for (field, entry) in &self.filters {
            let descriptor = filter_descriptor(field, entry, callbacks, strict)?;
            filters = filters.insert(field.clone(), descriptor);
        }

        let sorts = self.sort_spec(callbacks)?;

        let mut resource = SearchResource::new(filters, sorts)
            .with_defaults(self.defaults.clone())
            .with_pagination_param(
                self.pagination_param
                    .clone()
                    .unwrap_or_else(|| PAGINATION_PARAM.to_owned()),
            );
        if let Some(per_page) = self.pagination {
            resource = resource.with_per_page(per_page);
        }
        Ok(resource)
    }

    fn sort_spec(&self, callbacks: &Callbacks) -> Result<SortSpec, SpecError> {
        let schema = &self.sorts;
        let mut spec = SortSpec::new();

        for (key, entry) in &schema.fields {
            spec = spec.insert(key.clone(), sort_descriptor(key, entry, callbacks)?);
        }
        if let Some(entry) = &schema.default {
            spec = spec.default_sort(sort_descriptor("default", entry, callbacks)?);
        }

        let sort_param = schema.param.clone().unwrap_or_else(|| spec.sort_param().to_owned());
        let direction_param = schema
            .direction_param
            .clone()
            .unwrap_or_else(|| spec.direction_param().to_owned());
        spec = spec.params(sort_param, direction_param);

        if let Some(direction) = schema.direction {
            spec = spec.default_direction(direction);
        }
        let policy = match schema.unlisted {
            UnlistedPolicy::Passthrough => UnlistedSort::Passthrough,
            UnlistedPolicy::Reject => UnlistedSort::Reject,
        };
        Ok(spec.unlisted(policy))
    }
}

fn column(entry: &str, identifier: &str) -> Result<String, SpecError> {
    if is_identifier(identifier) {
        Ok(identifier.to_owned())
    } else {
        Err(SpecError::InvalidIdentifier {
            entry: entry.to_owned(),
            identifier: identifier.to_owned(),
        })
    }
}

fn optional_column(entry: &str, identifier: &Option<String>) -> Result<Option<String>, SpecError> {
    identifier.as_deref().map(|id| column(entry, id)).transpose()
}

fn filter_descriptor(
    field: &str,
    entry: &FilterEntry,
    callbacks: &Callbacks,
    strict: bool,
) -> Result<FilterDescriptor, SpecError> {
    let options = match entry {
        FilterEntry::Type(kind) => FilterOptions {
            kind: kind.clone(),
            ..FilterOptions::default()
        },
        FilterEntry::Detailed(options) => options.clone(),
    };

    let descriptor = match options.kind.as_str() {
        "text" => {
            let columns = options
                .columns
                .iter()
                .chain(options.column.iter())
                .map(|raw| column(field, raw).map(|raw| TextColumn::parse(&raw)))
                .collect::<Result<Vec<_>, _>>()?;
            FilterDescriptor::Text(TextFilter {
                columns,
                case_insensitive: options.case_insensitive,
            })
        }
        "exact" => FilterDescriptor::Exact {
            column: optional_column(field, &options.column)?,
        },
        "date" => {
            let allowed = options
                .columns
                .iter()
                .map(|raw| column(field, raw))
                .collect::<Result<Vec<_>, _>>()?;
            if options.column_param.is_some() && allowed.is_empty() {
                return Err(SpecError::MissingOption {
                    entry: field.to_owned(),
                    option: "columns",
                });
            }
            FilterDescriptor::Date(DateFilter {
                column: optional_column(field, &options.column)?,
                year: options.year,
                month: options.month,
                date: options.date,
                column_param: options.column_param,
                columns: allowed,
                relation: optional_column(field, &options.relation)?,
            })
        }
        "relation" => FilterDescriptor::Relation {
            relation: optional_column(field, &options.relation)?,
            field: column(field, options.field.as_deref().unwrap_or("id"))?,
        },
        "custom" => {
            let name = options.callback.as_deref().ok_or_else(|| SpecError::MissingOption {
                entry: field.to_owned(),
                option: "callback",
            })?;
            FilterDescriptor::Custom(callbacks.filter_callback(name)?)
        }
        other if strict => {
            return Err(SpecError::UnknownFilterType {
                field: field.to_owned(),
                kind: other.to_owned(),
            });
        }
        other => {
            warn!(field, kind = other, "unknown filter type, falling back to exact match");
            FilterDescriptor::Exact {
                column: optional_column(field, &options.column)?,
            }
        }
    };

    Ok(descriptor)
}

fn sort_descriptor(
    key: &str,
    entry: &SortEntry,
    callbacks: &Callbacks,
) -> Result<SortDescriptor, SpecError> {
    match entry {
        SortEntry::Field(name) => Ok(SortDescriptor::Field(column(key, name)?)),
        SortEntry::Callback { callback } => {
            Ok(SortDescriptor::Callback(callbacks.sort_callback(callback)?))
        }
    }
}
