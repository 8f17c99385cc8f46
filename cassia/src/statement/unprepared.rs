//! Defines the [`Statement`] type, which represents an unprepared CQL statement.

use std::time::Duration;

use super::{merge_preset_values, StatementConfig, DEFAULT_PAGE_SIZE};
use crate::errors::RequestSerializationError;
use crate::frame::types::{Consistency, SerialConsistency};
use crate::frame::value::SerializedValues;
use crate::value::{BoundValue, ValueList};

/// **Unprepared** CQL statement.
///
/// The text is sent as-is in a QUERY request. Values for `?` markers can be
/// attached with [`Statement::with_values`]; since the driver knows nothing
/// about their types, they are checked by the server only.
#[derive(Debug, Clone)]
pub struct Statement {
    pub(crate) config: StatementConfig,

    /// The CQL statement text.
    pub contents: String,
    values: Vec<BoundValue>,
    // Values of markers filled in by the query builder. `None` marks a
    // marker left for the user.
    pub(crate) preset_values: Vec<Option<BoundValue>>,
    page_size: i32,
}

impl Statement {
    /// Creates a new [`Statement`] from a CQL statement string.
    pub fn new(query_text: impl Into<String>) -> Self {
        Self {
            contents: query_text.into(),
            values: Vec::new(),
            preset_values: Vec::new(),
            page_size: DEFAULT_PAGE_SIZE,
            config: Default::default(),
        }
    }

    /// Returns self with the given values bound to its markers, in order.
    ///
    /// For statements built with the [query builder](crate::query_builder), the values
    /// fill only the explicit bind markers; literals are bound already.
    pub fn with_values(mut self, values: impl ValueList) -> Self {
        self.values = values.bound_values();
        self
    }

    /// Values bound to the statement's markers.
    pub fn values(&self) -> &[BoundValue] {
        &self.values
    }

    /// Returns self with page size (the number of rows fetched at once) set to the given value.
    pub fn with_page_size(mut self, page_size: i32) -> Self {
        self.set_page_size(page_size);
        self
    }

    /// Sets the page size for this CQL statement.
    ///
    /// Non-positive values are rejected with
    /// [`BadQuery::InvalidPageSize`](crate::errors::BadQuery::InvalidPageSize) when executed.
    pub fn set_page_size(&mut self, page_size: i32) {
        self.page_size = page_size;
    }

    /// Returns the page size for this CQL statement.
    pub fn get_page_size(&self) -> i32 {
        self.page_size
    }

    /// Sets the consistency to be used when executing this statement.
    pub fn set_consistency(&mut self, c: Consistency) {
        self.config.consistency = Some(c);
    }

    /// Gets the consistency to be used when executing this statement if it is filled.
    /// If this is empty, the default_consistency of the session will be used.
    pub fn get_consistency(&self) -> Option<Consistency> {
        self.config.consistency
    }

    /// Sets the serial consistency to be used when executing this statement.
    /// (Ignored unless the statement is an LWT)
    pub fn set_serial_consistency(&mut self, sc: Option<SerialConsistency>) {
        self.config.serial_consistency = sc;
    }

    /// Gets the serial consistency to be used when executing this statement.
    pub fn get_serial_consistency(&self) -> Option<SerialConsistency> {
        self.config.serial_consistency
    }

    /// Sets the idempotence of this statement.
    ///
    /// A statement is idempotent if it can be applied multiple times without changing
    /// the result of the initial application. Only idempotent statements are retried
    /// after timeouts and connection failures, because the driver cannot know whether
    /// the first attempt was applied.
    pub fn set_is_idempotent(&mut self, is_idempotent: bool) {
        self.config.is_idempotent = is_idempotent;
    }

    /// Gets the idempotence of this statement.
    pub fn get_is_idempotent(&self) -> bool {
        self.config.is_idempotent
    }

    /// Enable or disable CQL Tracing for this statement.
    /// If enabled, `QueryResult::tracing_id` will hold the id of the trace.
    pub fn set_tracing(&mut self, should_trace: bool) {
        self.config.tracing = should_trace;
    }

    /// Gets whether tracing is enabled for this statement.
    pub fn get_tracing(&self) -> bool {
        self.config.tracing
    }

    /// Sets the default timestamp for this statement in microseconds.
    /// If not None, it will replace the server side assigned timestamp as default timestamp.
    /// If a statement contains a `USING TIMESTAMP` clause, calling this method won't change
    /// anything.
    pub fn set_timestamp(&mut self, timestamp: Option<i64>) {
        self.config.timestamp = timestamp;
    }

    /// Gets the default timestamp for this statement in microseconds.
    pub fn get_timestamp(&self) -> Option<i64> {
        self.config.timestamp
    }

    /// Sets the client-side timeout for this statement.
    /// If not None, the driver will stop waiting for the request
    /// to finish after `timeout` passed.
    pub fn set_request_timeout(&mut self, timeout: Option<Duration>) {
        self.config.request_timeout = timeout;
    }

    /// Gets client timeout associated with this statement.
    pub fn get_request_timeout(&self) -> Option<Duration> {
        self.config.request_timeout
    }

    pub(crate) fn serialized_values(&self) -> Result<SerializedValues, RequestSerializationError> {
        if self.preset_values.is_empty() {
            return SerializedValues::from_bound_values(&self.values);
        }
        let values = merge_preset_values(&self.preset_values, self.values.clone());
        SerializedValues::from_bound_values(&values)
    }
}

impl From<String> for Statement {
    fn from(s: String) -> Statement {
        Statement::new(s)
    }
}

impl<'a> From<&'a str> for Statement {
    fn from(s: &'a str) -> Statement {
        Statement::new(s.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::Statement;
    use crate::statement::{validate_page_size, DEFAULT_PAGE_SIZE};
    use crate::value::{BoundValue, Unset};

    #[test]
    fn defaults() {
        let stmt = Statement::new("SELECT * FROM users");
        assert_eq!(stmt.get_page_size(), DEFAULT_PAGE_SIZE);
        assert!(!stmt.get_is_idempotent());
        assert_eq!(stmt.get_consistency(), None);
        assert!(stmt.values().is_empty());
    }

    #[test]
    fn values_are_kept_in_order() {
        let stmt = Statement::new("INSERT INTO t (a, b, c) VALUES (?, ?, ?)")
            .with_values(("x", None::<i32>, Unset));
        assert_eq!(
            stmt.values(),
            &[
                BoundValue::Value("x".into()),
                BoundValue::Null,
                BoundValue::Unset
            ]
        );
        assert_eq!(stmt.serialized_values().unwrap().element_count(), 3);
    }

    #[test]
    fn page_size_is_validated() {
        let stmt = Statement::new("SELECT * FROM users").with_page_size(2);
        assert_eq!(validate_page_size(stmt.get_page_size()).unwrap(), 2);
        assert!(validate_page_size(0).is_err());
    }
}
