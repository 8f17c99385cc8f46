use super::insert::write_using;
use super::{BuiltStatement, Predicate, QueryWriter, TableRef};

/// Starts a `DELETE` of whole rows.
pub fn delete() -> DeleteBuilder {
    DeleteBuilder {
        columns: Vec::new(),
    }
}

/// Starts a `DELETE` of the given columns.
pub fn delete_columns<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> DeleteBuilder {
    DeleteBuilder {
        columns: columns.into_iter().map(Into::into).collect(),
    }
}

/// A `DELETE` waiting for its table.
#[derive(Debug, Clone)]
pub struct DeleteBuilder {
    columns: Vec<String>,
}

impl DeleteBuilder {
    pub fn from(self, keyspace: impl Into<String>, table: impl Into<String>) -> Delete {
        self.delete_from(TableRef::new(Some(keyspace.into()), table.into()))
    }

    pub fn from_table(self, table: impl Into<String>) -> Delete {
        self.delete_from(TableRef::new(None, table.into()))
    }

    fn delete_from(self, table: TableRef) -> Delete {
        Delete {
            columns: self.columns,
            table,
            predicates: Vec::new(),
            if_exists: false,
            timestamp: None,
        }
    }
}

/// A `DELETE` statement.
#[derive(Debug, Clone)]
pub struct Delete {
    columns: Vec<String>,
    table: TableRef,
    predicates: Vec<Predicate>,
    if_exists: bool,
    timestamp: Option<i64>,
}

impl Delete {
    pub fn where_(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn and(self, predicate: Predicate) -> Self {
        self.where_(predicate)
    }

    pub fn if_exists(mut self) -> Self {
        self.if_exists = true;
        self
    }

    pub fn using_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn build(self) -> BuiltStatement {
        let mut writer = QueryWriter::new();
        writer.push("DELETE");
        for (i, column) in self.columns.iter().enumerate() {
            writer.push(if i == 0 { " " } else { ", " });
            writer.push_identifier(column);
        }
        writer.push(format_args!(" FROM {}", self.table));
        write_using(&mut writer, None, self.timestamp);
        writer.push_predicates(&self.predicates);
        if self.if_exists {
            writer.push(" IF EXISTS");
        }

        writer.finish(&self.table)
    }
}
