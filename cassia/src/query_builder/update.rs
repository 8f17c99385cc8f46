use super::insert::write_using;
use super::{BuiltStatement, Predicate, QueryWriter, TableRef, Term};

/// Starts an `UPDATE` of `keyspace.table`.
pub fn update(keyspace: impl Into<String>, table: impl Into<String>) -> Update {
    Update::new(TableRef::new(Some(keyspace.into()), table.into()))
}

/// Starts an `UPDATE` of `table` in the session's keyspace.
pub fn update_table(table: impl Into<String>) -> Update {
    Update::new(TableRef::new(None, table.into()))
}

/// An `UPDATE` statement.
#[derive(Debug, Clone)]
pub struct Update {
    table: TableRef,
    assignments: Vec<(String, Term)>,
    predicates: Vec<Predicate>,
    if_exists: bool,
    ttl: Option<i32>,
    timestamp: Option<i64>,
}

impl Update {
    fn new(table: TableRef) -> Self {
        Self {
            table,
            assignments: Vec::new(),
            predicates: Vec::new(),
            if_exists: false,
            ttl: None,
            timestamp: None,
        }
    }

    /// Adds `column = term` to the `SET` clause.
    pub fn set(mut self, column: impl Into<String>, term: impl Into<Term>) -> Self {
        self.assignments.push((column.into(), term.into()));
        self
    }

    /// Adds a condition to the `WHERE` clause.
    pub fn where_(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    /// Adds another condition to the `WHERE` clause.
    pub fn and(self, predicate: Predicate) -> Self {
        self.where_(predicate)
    }

    /// Applies the update only if the row exists.
    pub fn if_exists(mut self) -> Self {
        self.if_exists = true;
        self
    }

    pub fn using_ttl(mut self, seconds: i32) -> Self {
        self.ttl = Some(seconds);
        self
    }

    pub fn using_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn build(self) -> BuiltStatement {
        let mut writer = QueryWriter::new();
        writer.push(format_args!("UPDATE {}", self.table));
        // USING precedes SET in UPDATE.
        write_using(&mut writer, self.ttl, self.timestamp);
        writer.push(" SET ");
        for (i, (column, term)) in self.assignments.iter().enumerate() {
            if i > 0 {
                writer.push(", ");
            }
            writer.push_identifier(column);
            writer.push(" = ");
            writer.push_term(term);
        }
        writer.push_predicates(&self.predicates);
        if self.if_exists {
            writer.push(" IF EXISTS");
        }

        writer.finish(&self.table)
    }
}
