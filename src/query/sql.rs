//! Renders recorded predicates as parameterized SQL. Nothing here executes.

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use super::{Direction, OrderBy, Predicate, Query, is_identifier};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SqlError {
    #[error("relation `{relation}` is not registered on table `{table}`")]
    UnknownRelation { table: String, relation: String },

    #[error("`{identifier}` is not a valid SQL identifier")]
    InvalidIdentifier { identifier: String },
}

/// How a related table joins back to its parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    pub table: String,
    /// Column on the related table pointing at the parent.
    pub foreign_key: String,
    /// Parent column the foreign key references.
    pub local_key: String,
}

impl Relation {
    pub fn new(table: impl Into<String>, foreign_key: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            foreign_key: foreign_key.into(),
            local_key: "id".to_owned(),
        }
    }

    pub fn local_key(mut self, local_key: impl Into<String>) -> Self {
        self.local_key = local_key.into();
        self
    }
}

/// A statement and its positional bind values (`$1`, `$2`, ...).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuiltQuery {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Records predicates and orderings for one table and renders them as a
/// PostgreSQL-flavoured `SELECT`.
///
/// # Examples
///
/// ```
/// use searchstate::query::{Direction, Query, SqlQuery};
/// use serde_json::json;
///
/// let mut query = SqlQuery::new("posts");
/// query.equals("status", json!("active"));
/// query.order_by("title", Direction::Asc);
///
/// let built = query.to_sql().unwrap();
/// assert_eq!(
///     built.sql,
///     r#"SELECT * FROM "posts" WHERE "status" = $1 ORDER BY "title" ASC"#
/// );
/// assert_eq!(built.params, vec![json!("active")]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct SqlQuery {
    table: String,
    relations: IndexMap<String, Relation>,
    predicates: Vec<Predicate>,
    orderings: Vec<OrderBy>,
}

impl SqlQuery {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Self::default()
        }
    }

    /// Registers `name` so relation predicates can be rendered as `EXISTS`.
    pub fn with_relation(mut self, name: impl Into<String>, relation: Relation) -> Self {
        self.relations.insert(name.into(), relation);
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub fn orderings(&self) -> &[OrderBy] {
        &self.orderings
    }

    pub fn to_sql(&self) -> Result<BuiltQuery, SqlError> {
        let mut renderer = Renderer {
            relations: &self.relations,
            params: Vec::new(),
        };

        let mut sql = format!("SELECT * FROM {}", quote(&self.table)?);

        if !self.predicates.is_empty() {
            let clauses = self
                .predicates
                .iter()
                .map(|predicate| renderer.predicate(predicate, &self.table))
                .collect::<Result<Vec<_>, _>>()?;
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }

        if !self.orderings.is_empty() {
            let orderings = self
                .orderings
                .iter()
                .map(|order| -> Result<String, SqlError> {
                    Ok(format!("{} {}", quote(&order.column)?, order.direction.as_sql()))
                })
                .collect::<Result<Vec<_>, _>>()?;
            sql.push_str(" ORDER BY ");
            sql.push_str(&orderings.join(", "));
        }

        Ok(BuiltQuery {
            sql,
            params: renderer.params,
        })
    }
}

impl Query for SqlQuery {
    fn push(&mut self, predicate: Predicate) {
        self.predicates.push(predicate);
    }

    fn order_by(&mut self, column: &str, direction: Direction) {
        self.orderings.push(OrderBy::new(column, direction));
    }
}

struct Renderer<'a> {
    relations: &'a IndexMap<String, Relation>,
    params: Vec<Value>,
}

impl Renderer<'_> {
    fn bind(&mut self, value: &Value) -> String {
        self.params.push(value.clone());
        format!("${}", self.params.len())
    }

    /// `scope` is the table unqualified join columns belong to.
    fn predicate(&mut self, predicate: &Predicate, scope: &str) -> Result<String, SqlError> {
        let sql = match predicate {
            Predicate::Equals { column, value } => {
                let column = quote(column)?;
                if value.is_array() {
                    format!("{column} = ANY({})", self.bind(value))
                } else {
                    format!("{column} = {}", self.bind(value))
                }
            }
            Predicate::Like {
                column,
                pattern,
                case_insensitive,
            } => {
                let op = if *case_insensitive { "ILIKE" } else { "LIKE" };
                let column = quote(column)?;
                let bound = self.bind(&Value::String(pattern.clone()));
                format!(r"{column} {op} {bound} ESCAPE '\'")
            }
            Predicate::Year { column, value } => {
                format!("EXTRACT(YEAR FROM {}) = {}", quote(column)?, self.bind(value))
            }
            Predicate::Month { column, value } => {
                format!("EXTRACT(MONTH FROM {}) = {}", quote(column)?, self.bind(value))
            }
            Predicate::Date { column, value } => {
                format!("CAST({} AS DATE) = {}", quote(column)?, self.bind(value))
            }
            Predicate::RelationExists {
                relation,
                predicate,
            } => {
                let relations = self.relations;
                let joined = relations.get(relation).ok_or_else(|| SqlError::UnknownRelation {
                    table: scope.to_owned(),
                    relation: relation.clone(),
                })?;
                let table = quote(&joined.table)?;
                let foreign = quote(&joined.foreign_key)?;
                let local = quote(&joined.local_key)?;
                let inner = self.predicate(predicate, &joined.table)?;
                format!(
                    "EXISTS (SELECT 1 FROM {table} WHERE {table}.{foreign} = {}.{local} AND {inner})",
                    quote(scope)?
                )
            }
            Predicate::AnyOf(items) => self.group(items, " OR ", "FALSE", scope)?,
            Predicate::AllOf(items) => self.group(items, " AND ", "TRUE", scope)?,
        };
        Ok(sql)
    }

    fn group(
        &mut self,
        items: &[Predicate],
        joiner: &str,
        empty: &str,
        scope: &str,
    ) -> Result<String, SqlError> {
        if items.is_empty() {
            return Ok(empty.to_owned());
        }
        let parts = items
            .iter()
            .map(|item| self.predicate(item, scope))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(format!("({})", parts.join(joiner)))
    }
}

fn quote(identifier: &str) -> Result<String, SqlError> {
    if !is_identifier(identifier) {
        return Err(SqlError::InvalidIdentifier {
            identifier: identifier.to_owned(),
        });
    }
    Ok(identifier
        .split('.')
        .map(|part| format!("\"{part}\""))
        .collect::<Vec<_>>()
        .join("."))
}
