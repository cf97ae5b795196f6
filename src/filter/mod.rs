//! Declarative filters: field → [`FilterDescriptor`], applied in declaration
//! order to a [`Query`].

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;
use tracing::debug;

use crate::params::{SearchParameters, value_text};
use crate::query::{Predicate, Query};

/// A caller-supplied filter. Receives the query, the field's value and all
/// resolved parameters; its effect is not interpreted.
pub type FilterCallback = Arc<dyn Fn(&mut dyn Query, &Value, &SearchParameters) + Send + Sync>;

/// One column a text search looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextColumn {
    Local(String),
    Related { relation: String, field: String },
}

impl TextColumn {
    /// `relation.field` names a related column, anything else a local one.
    pub fn parse(raw: &str) -> Self {
        match raw.split_once('.') {
            Some((relation, field)) => Self::Related {
                relation: relation.to_owned(),
                field: field.to_owned(),
            },
            None => Self::Local(raw.to_owned()),
        }
    }
}

/// Substring search over one or more columns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextFilter {
    pub columns: Vec<TextColumn>,
    pub case_insensitive: bool,
}

impl TextFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.columns.push(TextColumn::Local(column.into()));
        self
    }

    pub fn related(mut self, relation: impl Into<String>, field: impl Into<String>) -> Self {
        self.columns.push(TextColumn::Related {
            relation: relation.into(),
            field: field.into(),
        });
        self
    }

    pub fn case_insensitive(mut self) -> Self {
        self.case_insensitive = true;
        self
    }

    fn apply(&self, query: &mut dyn Query, field: &str, text: &str) {
        let predicate_for = |column: &TextColumn| match column {
            TextColumn::Local(name) => Predicate::contains(name.as_str(), text, self.case_insensitive),
            TextColumn::Related { relation, field } => Predicate::related(
                relation.as_str(),
                Predicate::contains(field.as_str(), text, self.case_insensitive),
            ),
        };

        match self.columns.as_slice() {
            [] => query.like_match(field, text, self.case_insensitive),
            [single] => query.push(predicate_for(single)),
            columns => query.push(Predicate::AnyOf(columns.iter().map(predicate_for).collect())),
        }
    }
}

/// Date matching by full date or by year / month components.
///
/// With none of `year`, `month` or `date` set, the field's own parameter is
/// matched as a full date. Otherwise each set option names the parameter
/// holding that component.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DateFilter {
    pub column: Option<String>,
    pub year: Option<String>,
    pub month: Option<String>,
    pub date: Option<String>,
    /// Parameter choosing the column at request time; must name one of `columns`.
    pub column_param: Option<String>,
    pub columns: Vec<String>,
    /// Match through this relation instead of on the queried table.
    pub relation: Option<String>,
}

impl DateFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }

    pub fn year(mut self, param: impl Into<String>) -> Self {
        self.year = Some(param.into());
        self
    }

    pub fn month(mut self, param: impl Into<String>) -> Self {
        self.month = Some(param.into());
        self
    }

    pub fn date(mut self, param: impl Into<String>) -> Self {
        self.date = Some(param.into());
        self
    }

    pub fn column_param<I, S>(mut self, param: impl Into<String>, allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.column_param = Some(param.into());
        self.columns = allowed.into_iter().map(Into::into).collect();
        self
    }

    pub fn relation(mut self, relation: impl Into<String>) -> Self {
        self.relation = Some(relation.into());
        self
    }

    fn has_components(&self) -> bool {
        self.year.is_some() || self.month.is_some() || self.date.is_some()
    }

    fn target_column(&self, field: &str, params: &SearchParameters) -> String {
        let chosen = self
            .column_param
            .as_deref()
            .and_then(|param| params.supplied(param))
            .and_then(Value::as_str)
            .filter(|candidate| self.columns.iter().any(|allowed| allowed == candidate));

        match chosen {
            Some(column) => column.to_owned(),
            None => self.column.clone().unwrap_or_else(|| field.to_owned()),
        }
    }

    fn apply(&self, query: &mut dyn Query, field: &str, params: &SearchParameters) -> usize {
        let column = self.target_column(field, params);
        let mut predicates = Vec::new();

        if !self.has_components() {
            if let Some(value) = params.supplied(field) {
                predicates.push(Predicate::Date {
                    column: column.clone(),
                    value: value.clone(),
                });
            }
        } else {
            let supplied = |param: &Option<String>| {
                param.as_deref().and_then(|name| params.supplied(name)).cloned()
            };
            if let Some(value) = supplied(&self.year) {
                predicates.push(Predicate::Year {
                    column: column.clone(),
                    value,
                });
            }
            if let Some(value) = supplied(&self.month) {
                predicates.push(Predicate::Month {
                    column: column.clone(),
                    value,
                });
            }
            if let Some(value) = supplied(&self.date) {
                predicates.push(Predicate::Date {
                    column: column.clone(),
                    value,
                });
            }
        }

        let applied = predicates.len();
        for predicate in predicates {
            match &self.relation {
                Some(relation) => query.where_relation_exists(relation, predicate),
                None => query.push(predicate),
            }
        }
        applied
    }
}

/// How one field's parameter turns into predicates.
#[derive(Clone)]
pub enum FilterDescriptor {
    Text(TextFilter),
    /// Equality, on `column` when set, else on the field.
    Exact { column: Option<String> },
    Date(DateFilter),
    /// A related row exists whose `field` equals the value.
    Relation { relation: Option<String>, field: String },
    Custom(FilterCallback),
}

impl FilterDescriptor {
    pub fn text() -> Self {
        Self::Text(TextFilter::new())
    }

    pub fn exact() -> Self {
        Self::Exact { column: None }
    }

    pub fn date() -> Self {
        Self::Date(DateFilter::new())
    }

    pub fn relation() -> Self {
        Self::Relation {
            relation: None,
            field: "id".to_owned(),
        }
    }

    pub fn custom<F>(callback: F) -> Self
    where
        F: Fn(&mut dyn Query, &Value, &SearchParameters) + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(callback))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Exact { .. } => "exact",
            Self::Date(_) => "date",
            Self::Relation { .. } => "relation",
            Self::Custom(_) => "custom",
        }
    }

    /// Returns `true` when the parameters carry anything for this filter.
    fn is_supplied(&self, field: &str, params: &SearchParameters) -> bool {
        match self {
            Self::Date(date) if date.has_components() => [&date.year, &date.month, &date.date]
                .into_iter()
                .flatten()
                .any(|param| params.supplied(param).is_some()),
            _ => params.supplied(field).is_some(),
        }
    }
}

impl fmt::Debug for FilterDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Self::Exact { column } => f.debug_struct("Exact").field("column", column).finish(),
            Self::Date(date) => f.debug_tuple("Date").field(date).finish(),
            Self::Relation { relation, field } => f
                .debug_struct("Relation")
                .field("relation", relation)
                .field("field", field)
                .finish(),
            Self::Custom(_) => f.write_str("Custom(<callback>)"),
        }
    }
}

/// Ordered field → descriptor mapping for one resource.
///
/// # Examples
///
/// ```
/// use searchstate::filter::{FilterSpec, apply_filters};
/// use searchstate::params::SearchParameters;
/// use searchstate::query::SqlQuery;
/// use serde_json::json;
///
/// let spec = FilterSpec::new().exact("status").text("name");
/// let params: SearchParameters =
///     [("status", json!("active")), ("name", json!("all"))].into_iter().collect();
///
/// let mut query = SqlQuery::new("posts");
/// assert_eq!(apply_filters(&mut query, &params, &spec), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct FilterSpec {
    filters: IndexMap<String, FilterDescriptor>,
}

impl FilterSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(mut self, field: impl Into<String>, descriptor: FilterDescriptor) -> Self {
        self.filters.insert(field.into(), descriptor);
        self
    }

    pub fn text(self, field: impl Into<String>) -> Self {
        self.insert(field, FilterDescriptor::text())
    }

    pub fn exact(self, field: impl Into<String>) -> Self {
        self.insert(field, FilterDescriptor::exact())
    }

    pub fn date(self, field: impl Into<String>) -> Self {
        self.insert(field, FilterDescriptor::date())
    }

    pub fn relation(self, field: impl Into<String>) -> Self {
        self.insert(field, FilterDescriptor::relation())
    }

    pub fn custom<F>(self, field: impl Into<String>, callback: F) -> Self
    where
        F: Fn(&mut dyn Query, &Value, &SearchParameters) + Send + Sync + 'static,
    {
        self.insert(field, FilterDescriptor::custom(callback))
    }

    pub fn get(&self, field: &str) -> Option<&FilterDescriptor> {
        self.filters.get(field)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FilterDescriptor)> {
        self.filters.iter()
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

/// Applies every filter whose parameter is supplied, in declaration order.
/// Filters without a value are skipped silently. Returns how many filters
/// touched the query.
pub fn apply_filters(query: &mut dyn Query, params: &SearchParameters, spec: &FilterSpec) -> usize {
    let mut applied = 0;

    for (field, descriptor) in spec.iter() {
        if !descriptor.is_supplied(field, params) {
            continue;
        }

        let touched = match descriptor {
            FilterDescriptor::Date(date) => date.apply(query, field, params) > 0,
            other => apply_value(query, field, other, params),
        };

        if touched {
            debug!(field = %field, kind = descriptor.kind(), "filter applied");
            applied += 1;
        }
    }

    applied
}

fn apply_value(
    query: &mut dyn Query,
    field: &str,
    descriptor: &FilterDescriptor,
    params: &SearchParameters,
) -> bool {
    let Some(value) = params.supplied(field) else {
        return false;
    };

    match descriptor {
        FilterDescriptor::Text(text) => match value_text(value) {
            Some(needle) => {
                text.apply(query, field, &needle);
                true
            }
            None => {
                debug!(field = %field, "text filter ignores non-scalar value");
                false
            }
        },
        FilterDescriptor::Exact { column } => {
            query.equals(column.as_deref().unwrap_or(field), value.clone());
            true
        }
        FilterDescriptor::Relation { relation, field: related } => {
            let relation = relation.as_deref().unwrap_or(field);
            query.where_relation_exists(relation, Predicate::equals(related.as_str(), value.clone()));
            true
        }
        FilterDescriptor::Custom(callback) => {
            callback(query, value, params);
            true
        }
        FilterDescriptor::Date(_) => false,
    }
}
