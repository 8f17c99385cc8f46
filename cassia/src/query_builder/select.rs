use super::{BuiltStatement, Predicate, QueryWriter, TableRef};

/// Ordering of a clustering column in `ORDER BY`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

/// Starts a `SELECT` of the given columns.
pub fn select<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> SelectBuilder {
    SelectBuilder {
        columns: Some(columns.into_iter().map(Into::into).collect()),
    }
}

/// Starts a `SELECT *`.
pub fn select_all() -> SelectBuilder {
    SelectBuilder { columns: None }
}

/// A `SELECT` waiting for its table.
#[derive(Debug, Clone)]
pub struct SelectBuilder {
    columns: Option<Vec<String>>,
}

impl SelectBuilder {
    /// Selects from `keyspace.table`.
    pub fn from(self, keyspace: impl Into<String>, table: impl Into<String>) -> Select {
        self.select_from(TableRef::new(Some(keyspace.into()), table.into()))
    }

    /// Selects from `table` in the session's keyspace.
    pub fn from_table(self, table: impl Into<String>) -> Select {
        self.select_from(TableRef::new(None, table.into()))
    }

    fn select_from(self, table: TableRef) -> Select {
        Select {
            columns: self.columns,
            table,
            predicates: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            allow_filtering: false,
        }
    }
}

/// A `SELECT` statement.
#[derive(Debug, Clone)]
pub struct Select {
    columns: Option<Vec<String>>,
    table: TableRef,
    predicates: Vec<Predicate>,
    order_by: Vec<(String, Order)>,
    limit: Option<u32>,
    allow_filtering: bool,
}

impl Select {
    /// Adds a condition to the `WHERE` clause.
    pub fn where_(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    /// Adds another condition to the `WHERE` clause.
    pub fn and(self, predicate: Predicate) -> Self {
        self.where_(predicate)
    }

    /// Orders the rows by a clustering column.
    pub fn order_by(mut self, column: impl Into<String>, order: Order) -> Self {
        self.order_by.push((column.into(), order));
        self
    }

    /// Returns at most `limit` rows.
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Lets the server filter rows without an index.
    pub fn allow_filtering(mut self) -> Self {
        self.allow_filtering = true;
        self
    }

    pub fn build(self) -> BuiltStatement {
        let mut writer = QueryWriter::new();
        writer.push("SELECT ");
        match &self.columns {
            Some(columns) if !columns.is_empty() => {
                for (i, column) in columns.iter().enumerate() {
                    if i > 0 {
                        writer.push(", ");
                    }
                    writer.push_identifier(column);
                }
            }
            _ => writer.push("*"),
        }
        writer.push(format_args!(" FROM {}", self.table));
        writer.push_predicates(&self.predicates);

        for (i, (column, order)) in self.order_by.iter().enumerate() {
            writer.push(if i == 0 { " ORDER BY " } else { ", " });
            writer.push_identifier(column);
            writer.push(match order {
                Order::Asc => " ASC",
                Order::Desc => " DESC",
            });
        }
        if let Some(limit) = self.limit {
            writer.push(format_args!(" LIMIT {}", limit));
        }
        if self.allow_filtering {
            writer.push(" ALLOW FILTERING");
        }

        writer.finish(&self.table)
    }
}
