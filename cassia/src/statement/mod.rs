//! Statements executed by the [`Session`](crate::Session).
//!
//! * [`Statement`] is a plain query string with optional bound values,
//! * [`PreparedStatement`] is created by [`Session::prepare`](crate::Session::prepare) and
//!   bound with values into a [`BoundStatement`],
//! * [`Batch`] groups simple and bound statements into one request.

use std::time::Duration;

pub mod batch;
pub mod prepared;
pub mod unprepared;

pub use crate::frame::types::{Consistency, SerialConsistency};
pub use batch::{Batch, BatchStatement, BatchType};
pub use prepared::{BoundStatement, PreparedStatement};
pub use unprepared::Statement;

use crate::query_builder::BuiltStatement;
use crate::routing::Token;
use crate::value::BoundValue;

/// Number of rows fetched per page when the statement does not say otherwise.
pub const DEFAULT_PAGE_SIZE: i32 = 5000;

/// Per-statement execution options.
#[derive(Debug, Clone, Default)]
pub struct StatementConfig {
    /// Consistency level; the session default is used when unset.
    pub consistency: Option<Consistency>,
    /// Serial consistency used by conditional updates.
    pub serial_consistency: Option<SerialConsistency>,

    /// Whether the statement may be applied more than once without changing the outcome.
    /// Only idempotent statements are retried after transport failures.
    pub is_idempotent: bool,

    /// Ask the server to trace the statement.
    pub tracing: bool,
    /// Client side timestamp, in microseconds since the epoch.
    pub timestamp: Option<i64>,
    /// Overrides the session's request timeout.
    pub request_timeout: Option<Duration>,
}

impl StatementConfig {
    /// Determines the consistency of a query
    #[must_use]
    pub(crate) fn determine_consistency(&self, default_consistency: Consistency) -> Consistency {
        self.consistency.unwrap_or(default_consistency)
    }
}

/// Anything [`Session::execute`](crate::Session::execute) accepts.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum Executable {
    /// A query string, possibly with values.
    Simple(Statement),
    /// A prepared statement with its values.
    Bound(BoundStatement),
}

impl Executable {
    pub(crate) fn config(&self) -> &StatementConfig {
        match self {
            Executable::Simple(s) => &s.config,
            Executable::Bound(b) => &b.prepared.config,
        }
    }

    pub(crate) fn page_size(&self) -> i32 {
        match self {
            Executable::Simple(s) => s.get_page_size(),
            Executable::Bound(b) => b.prepared.get_page_size(),
        }
    }

    pub(crate) fn contents(&self) -> &str {
        match self {
            Executable::Simple(s) => &s.contents,
            Executable::Bound(b) => b.prepared.get_statement(),
        }
    }

    pub(crate) fn token(&self) -> Option<Token> {
        match self {
            Executable::Simple(_) => None,
            Executable::Bound(b) => b.token(),
        }
    }

    // Keyspace of the table a bound statement works on, known from its metadata.
    pub(crate) fn keyspace(&self) -> Option<&str> {
        match self {
            Executable::Simple(_) => None,
            Executable::Bound(b) => b.prepared.get_keyspace_name(),
        }
    }
}

impl From<Statement> for Executable {
    fn from(s: Statement) -> Self {
        Executable::Simple(s)
    }
}

impl From<&Statement> for Executable {
    fn from(s: &Statement) -> Self {
        Executable::Simple(s.clone())
    }
}

impl From<&str> for Executable {
    fn from(s: &str) -> Self {
        Executable::Simple(Statement::new(s))
    }
}

impl From<String> for Executable {
    fn from(s: String) -> Self {
        Executable::Simple(Statement::new(s))
    }
}

impl From<BoundStatement> for Executable {
    fn from(b: BoundStatement) -> Self {
        Executable::Bound(b)
    }
}

impl From<&BoundStatement> for Executable {
    fn from(b: &BoundStatement) -> Self {
        Executable::Bound(b.clone())
    }
}

impl From<BuiltStatement> for Executable {
    fn from(b: BuiltStatement) -> Self {
        Executable::Simple(b.into())
    }
}

/// Fills the markers without a preset value with `values`, in order.
/// Values left over are appended, so that arity errors are reported by the server.
pub(crate) fn merge_preset_values(
    preset: &[Option<BoundValue>],
    values: Vec<BoundValue>,
) -> Vec<BoundValue> {
    let mut values = values.into_iter();
    let mut merged: Vec<BoundValue> = Vec::with_capacity(preset.len());
    for slot in preset {
        match slot {
            Some(value) => merged.push(value.clone()),
            None => match values.next() {
                Some(value) => merged.push(value),
                None => break,
            },
        }
    }
    merged.extend(values);
    merged
}

pub(crate) fn validate_page_size(page_size: i32) -> Result<i32, crate::errors::BadQuery> {
    if page_size <= 0 {
        return Err(crate::errors::BadQuery::InvalidPageSize(page_size));
    }
    Ok(page_size)
}
