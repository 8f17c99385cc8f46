use super::{BuiltStatement, QueryWriter, TableRef, Term};

/// Starts an `INSERT` into `keyspace.table`.
pub fn insert_into(keyspace: impl Into<String>, table: impl Into<String>) -> Insert {
    Insert::new(TableRef::new(Some(keyspace.into()), table.into()))
}

/// Starts an `INSERT` into `table` in the session's keyspace.
pub fn insert_into_table(table: impl Into<String>) -> Insert {
    Insert::new(TableRef::new(None, table.into()))
}

/// An `INSERT` statement.
#[derive(Debug, Clone)]
pub struct Insert {
    table: TableRef,
    assignments: Vec<(String, Term)>,
    if_not_exists: bool,
    ttl: Option<i32>,
    timestamp: Option<i64>,
}

impl Insert {
    fn new(table: TableRef) -> Self {
        Self {
            table,
            assignments: Vec::new(),
            if_not_exists: false,
            ttl: None,
            timestamp: None,
        }
    }

    /// Sets `column` to `term`.
    pub fn value(mut self, column: impl Into<String>, term: impl Into<Term>) -> Self {
        self.assignments.push((column.into(), term.into()));
        self
    }

    /// Makes the insert a lightweight transaction applied only if the row is absent.
    pub fn if_not_exists(mut self) -> Self {
        self.if_not_exists = true;
        self
    }

    /// Makes the inserted values expire after `seconds`.
    pub fn using_ttl(mut self, seconds: i32) -> Self {
        self.ttl = Some(seconds);
        self
    }

    /// Sets the write timestamp, in microseconds.
    pub fn using_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn build(self) -> BuiltStatement {
        let mut writer = QueryWriter::new();
        writer.push(format_args!("INSERT INTO {} (", self.table));
        for (i, (column, _)) in self.assignments.iter().enumerate() {
            if i > 0 {
                writer.push(", ");
            }
            writer.push_identifier(column);
        }
        writer.push(") VALUES (");
        for (i, (_, term)) in self.assignments.iter().enumerate() {
            if i > 0 {
                writer.push(", ");
            }
            writer.push_term(term);
        }
        writer.push(")");
        if self.if_not_exists {
            writer.push(" IF NOT EXISTS");
        }
        write_using(&mut writer, self.ttl, self.timestamp);

        writer.finish(&self.table)
    }
}

pub(super) fn write_using(writer: &mut QueryWriter, ttl: Option<i32>, timestamp: Option<i64>) {
    match (ttl, timestamp) {
        (Some(ttl), Some(timestamp)) => {
            writer.push(format_args!(" USING TTL {} AND TIMESTAMP {}", ttl, timestamp))
        }
        (Some(ttl), None) => writer.push(format_args!(" USING TTL {}", ttl)),
        (None, Some(timestamp)) => writer.push(format_args!(" USING TIMESTAMP {}", timestamp)),
        (None, None) => {}
    }
}
