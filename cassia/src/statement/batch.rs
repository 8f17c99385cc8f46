//! Batches of statements sent in a single BATCH request.

use std::time::Duration;

use super::StatementConfig;
use super::{BoundStatement, Statement};
use crate::frame::types::{Consistency, SerialConsistency};
use crate::query_builder::BuiltStatement;

pub use cassia_cql::frame::request::batch::BatchType;

/// A statement inside a [`Batch`].
#[derive(Debug, Clone)]
pub enum BatchStatement {
    /// A query string with its values.
    Simple(Statement),
    /// A prepared statement with its values.
    Bound(BoundStatement),
}

impl From<&str> for BatchStatement {
    fn from(s: &str) -> Self {
        BatchStatement::Simple(Statement::from(s))
    }
}

impl From<Statement> for BatchStatement {
    fn from(s: Statement) -> Self {
        BatchStatement::Simple(s)
    }
}

impl From<BoundStatement> for BatchStatement {
    fn from(b: BoundStatement) -> Self {
        BatchStatement::Bound(b)
    }
}

impl From<BuiltStatement> for BatchStatement {
    fn from(b: BuiltStatement) -> Self {
        BatchStatement::Simple(b.into())
    }
}

/// CQL batch statement.
///
/// Statements are applied in the order they were appended. They may target
/// different tables and keyspaces; whether that is wise is up to the caller.
/// The batch is routed using the token of its first bound statement.
#[derive(Debug, Clone)]
pub struct Batch {
    pub(crate) config: StatementConfig,

    pub(crate) statements: Vec<BatchStatement>,
    batch_type: BatchType,
}

impl Batch {
    /// Creates a new, empty `Batch` of `batch_type` type.
    pub fn new(batch_type: BatchType) -> Self {
        Self {
            batch_type,
            statements: Vec::new(),
            config: Default::default(),
        }
    }

    /// Appends a new statement to the batch.
    pub fn append_statement(&mut self, statement: impl Into<BatchStatement>) {
        self.statements.push(statement.into());
    }

    /// Gets type of batch.
    pub fn get_type(&self) -> BatchType {
        self.batch_type
    }

    /// Returns statements contained in the batch.
    pub fn statements(&self) -> &[BatchStatement] {
        &self.statements
    }

    /// Sets the consistency to be used when executing this batch.
    pub fn set_consistency(&mut self, c: Consistency) {
        self.config.consistency = Some(c);
    }

    /// Gets the consistency to be used when executing this batch if it is filled.
    /// If this is empty, the default_consistency of the session will be used.
    pub fn get_consistency(&self) -> Option<Consistency> {
        self.config.consistency
    }

    /// Sets the serial consistency to be used when executing this batch.
    /// (Ignored unless the batch is an LWT)
    pub fn set_serial_consistency(&mut self, sc: Option<SerialConsistency>) {
        self.config.serial_consistency = sc;
    }

    /// Sets the idempotence of this batch.
    ///
    /// Counter batches are never idempotent, whatever is set here.
    pub fn set_is_idempotent(&mut self, is_idempotent: bool) {
        self.config.is_idempotent = is_idempotent;
    }

    /// Gets the idempotence of this batch.
    pub fn get_is_idempotent(&self) -> bool {
        self.config.is_idempotent && self.batch_type != BatchType::Counter
    }

    /// Enable or disable CQL Tracing for this batch.
    pub fn set_tracing(&mut self, should_trace: bool) {
        self.config.tracing = should_trace;
    }

    /// Sets the default timestamp for this batch in microseconds.
    pub fn set_timestamp(&mut self, timestamp: Option<i64>) {
        self.config.timestamp = timestamp;
    }

    /// Sets the client-side timeout for this batch.
    pub fn set_request_timeout(&mut self, timeout: Option<Duration>) {
        self.config.request_timeout = timeout;
    }

    // Routing follows the first statement with a known token.
    pub(crate) fn first_bound(&self) -> Option<&BoundStatement> {
        self.statements.iter().find_map(|s| match s {
            BatchStatement::Bound(b) if b.token().is_some() => Some(b),
            _ => None,
        })
    }
}

impl Default for Batch {
    fn default() -> Self {
        Self {
            statements: Vec::new(),
            batch_type: BatchType::Logged,
            config: Default::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Batch, BatchStatement, BatchType};
    use crate::statement::Statement;

    #[test]
    fn statements_keep_order() {
        let mut batch = Batch::new(BatchType::Unlogged);
        batch.append_statement("INSERT INTO a (k) VALUES (1)");
        batch.append_statement(Statement::new("INSERT INTO other_ks.b (k) VALUES (2)"));
        let texts: Vec<_> = batch
            .statements()
            .iter()
            .map(|s| match s {
                BatchStatement::Simple(s) => s.contents.as_str(),
                BatchStatement::Bound(_) => unreachable!(),
            })
            .collect();
        assert_eq!(
            texts,
            ["INSERT INTO a (k) VALUES (1)", "INSERT INTO other_ks.b (k) VALUES (2)"]
        );
        assert!(batch.first_bound().is_none());
    }

    #[test]
    fn counter_batches_are_never_idempotent() {
        let mut batch = Batch::new(BatchType::Counter);
        batch.set_is_idempotent(true);
        assert!(!batch.get_is_idempotent());

        let mut batch = Batch::default();
        batch.set_is_idempotent(true);
        assert!(batch.get_is_idempotent());
        assert_eq!(batch.get_type(), BatchType::Logged);
    }
}
