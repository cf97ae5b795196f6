//! The query capability filters and sorts are applied to.
//!
//! [`Query`] is the seam to whatever builds the final statement. Filters only
//! ever call [`Query::push`] and [`Query::order_by`]; everything they emit is
//! a [`Predicate`] value, so a backend decides how to render each variant.
//! [`SqlQuery`] is the bundled PostgreSQL-flavoured renderer.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod sql;

pub use sql::{BuiltQuery, Relation, SqlError, SqlQuery};

/// Sort direction. Descending unless stated otherwise.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Asc,
    #[default]
    Desc,
}

impl Direction {
    /// Parses `asc` / `desc`, ignoring case and surrounding whitespace.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.eq_ignore_ascii_case("asc") {
            Some(Self::Asc)
        } else if raw.eq_ignore_ascii_case("desc") {
            Some(Self::Desc)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A condition on the query. Top-level predicates are AND-ed together.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// `column = value`; an array value means "any of".
    Equals { column: String, value: Value },
    /// `column LIKE pattern`, with `\` escaping wildcards inside `pattern`.
    Like {
        column: String,
        pattern: String,
        case_insensitive: bool,
    },
    Year { column: String, value: Value },
    Month { column: String, value: Value },
    /// Calendar-date match, ignoring any time component.
    Date { column: String, value: Value },
    /// At least one related row satisfies `predicate`.
    RelationExists {
        relation: String,
        predicate: Box<Predicate>,
    },
    AnyOf(Vec<Predicate>),
    AllOf(Vec<Predicate>),
}

impl Predicate {
    pub fn equals(column: impl Into<String>, value: Value) -> Self {
        Self::Equals {
            column: column.into(),
            value,
        }
    }

    /// Substring match on `text`; LIKE wildcards in `text` match literally.
    pub fn contains(column: impl Into<String>, text: &str, case_insensitive: bool) -> Self {
        Self::Like {
            column: column.into(),
            pattern: format!("%{}%", escape_like(text)),
            case_insensitive,
        }
    }

    pub fn related(relation: impl Into<String>, predicate: Predicate) -> Self {
        Self::RelationExists {
            relation: relation.into(),
            predicate: Box::new(predicate),
        }
    }
}

/// Escapes `\`, `%` and `_` for use inside a LIKE pattern.
pub fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

/// An ordering directive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderBy {
    pub column: String,
    pub direction: Direction,
}

impl OrderBy {
    pub fn new(column: impl Into<String>, direction: Direction) -> Self {
        Self {
            column: column.into(),
            direction,
        }
    }
}

/// Returns `true` for `name` or `table.name`, where each part matches
/// `[A-Za-z_][A-Za-z0-9_]*`.
///
/// # Examples
///
/// ```
/// use searchstate::query::is_identifier;
///
/// assert!(is_identifier("created_at"));
/// assert!(is_identifier("posts.title"));
/// assert!(!is_identifier("name; DROP TABLE posts"));
/// assert!(!is_identifier("a.b.c"));
/// ```
pub fn is_identifier(raw: &str) -> bool {
    let mut parts = raw.split('.');
    let valid = |part: &str| {
        let mut chars = part.chars();
        match chars.next() {
            Some(first) if first.is_ascii_alphabetic() || first == '_' => {
                chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
            }
            _ => false,
        }
    };

    match (parts.next(), parts.next(), parts.next()) {
        (Some(name), None, _) => valid(name),
        (Some(table), Some(name), None) => valid(table) && valid(name),
        _ => false,
    }
}

/// Something predicates and orderings can be added to.
pub trait Query {
    fn push(&mut self, predicate: Predicate);

    fn order_by(&mut self, column: &str, direction: Direction);

    fn equals(&mut self, column: &str, value: Value) {
        self.push(Predicate::equals(column, value));
    }

    fn like_match(&mut self, column: &str, text: &str, case_insensitive: bool) {
        self.push(Predicate::contains(column, text, case_insensitive));
    }

    fn where_relation_exists(&mut self, relation: &str, predicate: Predicate) {
        self.push(Predicate::related(relation, predicate));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_parsing() {
        assert_eq!(Direction::parse("ASC"), Some(Direction::Asc));
        assert_eq!(Direction::parse(" desc "), Some(Direction::Desc));
        assert_eq!(Direction::parse("sideways"), None);
        assert_eq!(Direction::default(), Direction::Desc);
    }

    #[test]
    fn like_escaping() {
        assert_eq!(escape_like(r"50%_off\"), r"50\%\_off\\");
        let Predicate::Like { pattern, .. } = Predicate::contains("name", "a_b", false) else {
            panic!("expected a LIKE predicate");
        };
        assert_eq!(pattern, r"%a\_b%");
    }

    #[test]
    fn identifiers() {
        for ok in ["id", "_x", "Posts.created_at", "a1"] {
            assert!(is_identifier(ok), "{ok}");
        }
        for bad in ["", "1a", "a-b", "a.", ".a", "a b", "a.b.c", "name)"] {
            assert!(!is_identifier(bad), "{bad}");
        }
    }
}
