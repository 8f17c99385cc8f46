//! Builders of CQL statements.
//!
//! Builders perform no I/O. Each one is consumed into an immutable [`BuiltStatement`],
//! which converts into a [`Statement`](crate::statement::Statement) and can be executed
//! or prepared like any other.
//!
//! Literal values are never written into the statement text: every literal becomes a
//! bind marker, and its value travels alongside the text. Explicit bind markers
//! ([`bind_marker`], [`named_marker`]) are left for the caller to bind.
//!
//! ```rust
//! use cassia::query_builder::{bind_marker, eq, select};
//!
//! let built = select(["firstname", "age"])
//!     .from("demo", "users")
//!     .where_(eq("lastname", bind_marker()))
//!     .build();
//! assert_eq!(
//!     built.text(),
//!     "SELECT firstname, age FROM demo.users WHERE lastname = ?"
//! );
//! ```

use std::fmt;

use crate::statement::Statement;
use crate::value::{BoundValue, CqlValue};

mod delete;
mod insert;
mod predicate;
mod select;
mod update;

pub use delete::{delete, delete_columns, Delete, DeleteBuilder};
pub use insert::{insert_into, insert_into_table, Insert};
pub use predicate::{eq, gt, gte, in_, lt, lte, Operator, Predicate};
pub use select::{select, select_all, Order, Select, SelectBuilder};
pub use update::{update, update_table, Update};

/// Right-hand side of a predicate or an assignment.
#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    /// A value, sent as a bound value of a generated marker.
    Literal(CqlValue),
    /// `NULL`.
    Null,
    /// A positional marker (`?`) bound by the caller.
    BindMarker,
    /// A named marker (`:name`) bound by the caller.
    NamedMarker(String),
}

/// A positional bind marker, bound later by the caller.
pub fn bind_marker() -> Term {
    Term::BindMarker
}

/// A named bind marker, bound later by the caller.
pub fn named_marker(name: impl Into<String>) -> Term {
    Term::NamedMarker(name.into())
}

/// A literal value.
pub fn literal(value: impl Into<CqlValue>) -> Term {
    Term::Literal(value.into())
}

impl From<CqlValue> for Term {
    fn from(value: CqlValue) -> Self {
        Term::Literal(value)
    }
}

impl<T: Into<Term>> From<Option<T>> for Term {
    fn from(value: Option<T>) -> Self {
        value.map_or(Term::Null, Into::into)
    }
}

macro_rules! impl_term_from_literal {
    ($($t:ty),* $(,)?) => {
        $(
            impl From<$t> for Term {
                fn from(value: $t) -> Self {
                    Term::Literal(value.into())
                }
            }
        )*
    };
}

impl_term_from_literal!(
    bool,
    i8,
    i16,
    i32,
    i64,
    f32,
    f64,
    String,
    &str,
    Vec<u8>,
    uuid::Uuid,
    std::net::IpAddr,
);

/// A statement produced by one of the builders.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltStatement {
    text: String,
    values: Vec<Option<BoundValue>>,
    keyspace: Option<String>,
    table: String,
}

impl BuiltStatement {
    /// The CQL text, with markers in place of all values.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Values of the markers in the text, in order. `None` stands for a marker
    /// the caller has to bind.
    pub fn values(&self) -> &[Option<BoundValue>] {
        &self.values
    }

    /// Number of markers the caller has to bind.
    pub fn bind_marker_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_none()).count()
    }

    /// Keyspace the statement names explicitly, if any.
    pub fn keyspace(&self) -> Option<&str> {
        self.keyspace.as_deref()
    }

    /// Table the statement works on.
    pub fn table(&self) -> &str {
        &self.table
    }
}

impl fmt::Display for BuiltStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl From<BuiltStatement> for Statement {
    fn from(built: BuiltStatement) -> Statement {
        let mut statement = Statement::new(built.text);
        statement.preset_values = built.values;
        statement
    }
}

/// Table named by a statement, with or without its keyspace.
#[derive(Debug, Clone, PartialEq, Eq)]
struct TableRef {
    keyspace: Option<String>,
    table: String,
}

impl TableRef {
    fn new(keyspace: Option<String>, table: String) -> Self {
        Self { keyspace, table }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(keyspace) = &self.keyspace {
            write!(f, "{}.", Identifier(keyspace))?;
        }
        write!(f, "{}", Identifier(&self.table))
    }
}

// Words that cannot be used as unquoted identifiers.
const RESERVED_KEYWORDS: &[&str] = &[
    "add", "allow", "alter", "and", "apply", "asc", "authorize", "batch", "begin", "by",
    "columnfamily", "create", "delete", "desc", "describe", "drop", "entries", "execute",
    "from", "full", "grant", "if", "in", "index", "infinity", "insert", "into", "is",
    "keyspace", "limit", "materialized", "modify", "nan", "norecursive", "not", "null", "of",
    "on", "or", "order", "primary", "rename", "replace", "revoke", "schema", "select", "set",
    "table", "to", "token", "truncate", "unlogged", "update", "use", "using", "view",
    "where", "with",
];

/// Displays an identifier, quoted unless it is a plain lower-case identifier.
struct Identifier<'a>(&'a str);

impl fmt::Display for Identifier<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.0;
        let mut chars = name.chars();
        let is_plain = chars.next().is_some_and(|c| c.is_ascii_lowercase())
            && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
            && !RESERVED_KEYWORDS.contains(&name);
        if is_plain {
            f.write_str(name)
        } else {
            write!(f, "\"{}\"", name.replace('"', "\"\""))
        }
    }
}

enum Segment {
    Text(String),
    Literal,
}

/// Accumulates the text and the marker values of a statement.
///
/// Literal markers are rendered at the end: as `?`, or as generated named markers
/// when the caller used named markers, because the two kinds cannot be mixed.
struct QueryWriter {
    segments: Vec<Segment>,
    values: Vec<Option<BoundValue>>,
    uses_named_markers: bool,
}

impl QueryWriter {
    fn new() -> Self {
        Self {
            segments: Vec::new(),
            values: Vec::new(),
            uses_named_markers: false,
        }
    }

    fn push(&mut self, text: impl fmt::Display) {
        let text = text.to_string();
        match self.segments.last_mut() {
            Some(Segment::Text(last)) => last.push_str(&text),
            _ => self.segments.push(Segment::Text(text)),
        }
    }

    fn push_identifier(&mut self, name: &str) {
        self.push(Identifier(name));
    }

    fn push_term(&mut self, term: &Term) {
        match term {
            Term::Literal(value) => {
                self.segments.push(Segment::Literal);
                self.values.push(Some(BoundValue::Value(value.clone())));
            }
            Term::Null => self.push("NULL"),
            Term::BindMarker => {
                self.push("?");
                self.values.push(None);
            }
            Term::NamedMarker(name) => {
                self.uses_named_markers = true;
                self.push(format_args!(":{}", Identifier(name)));
                self.values.push(None);
            }
        }
    }

    fn push_terms(&mut self, terms: &[Term]) {
        for (i, term) in terms.iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            self.push_term(term);
        }
    }

    fn push_predicates(&mut self, predicates: &[Predicate]) {
        if predicates.is_empty() {
            return;
        }
        self.push(" WHERE ");
        for (i, predicate) in predicates.iter().enumerate() {
            if i > 0 {
                self.push(" AND ");
            }
            predicate.write(self);
        }
    }

    fn finish(self, table: &TableRef) -> BuiltStatement {
        let mut text = String::new();
        let mut literal_count = 0;
        for segment in self.segments {
            match segment {
                Segment::Text(t) => text.push_str(&t),
                Segment::Literal if self.uses_named_markers => {
                    literal_count += 1;
                    text.push_str(&format!(":literal_{}", literal_count));
                }
                Segment::Literal => text.push('?'),
            }
        }

        BuiltStatement {
            text,
            values: self.values,
            keyspace: table.keyspace.clone(),
            table: table.table.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_are_quoted_when_needed() {
        let quoted = |name: &str| Identifier(name).to_string();
        assert_eq!(quoted("users"), "users");
        assert_eq!(quoted("user_2"), "user_2");
        assert_eq!(quoted("Users"), "\"Users\"");
        assert_eq!(quoted("first name"), "\"first name\"");
        assert_eq!(quoted("2fast"), "\"2fast\"");
        assert_eq!(quoted("a\"b"), "\"a\"\"b\"");
        assert_eq!(quoted("select"), "\"select\"");
        assert_eq!(quoted(""), "\"\"");
    }

    #[test]
    fn literals_become_markers_with_values() {
        let built = select_all()
            .from("demo", "users")
            .where_(eq("lastname", "Jones'; DROP TABLE users; --"))
            .build();
        assert_eq!(built.text(), "SELECT * FROM demo.users WHERE lastname = ?");
        assert_eq!(
            built.values(),
            &[Some(BoundValue::from("Jones'; DROP TABLE users; --"))]
        );
        assert_eq!(built.bind_marker_count(), 0);

        let statement: Statement = built.into();
        assert_eq!(statement.serialized_values().unwrap().element_count(), 1);
    }

    #[test]
    fn literals_are_named_next_to_named_markers() {
        let built = update("demo", "users")
            .set("age", 36)
            .where_(eq("lastname", named_marker("ln")))
            .build();
        assert_eq!(
            built.text(),
            "UPDATE demo.users SET age = :literal_1 WHERE lastname = :ln"
        );
        assert_eq!(built.bind_marker_count(), 1);
    }

    #[test]
    fn user_values_fill_bind_markers() {
        let built = insert_into("demo", "users")
            .value("lastname", bind_marker())
            .value("age", 35)
            .value("city", bind_marker())
            .build();
        let statement = Statement::from(built).with_values(("Jones", "Austin"));
        assert_eq!(statement.serialized_values().unwrap().element_count(), 3);
    }
}
