//! Defines the [`PreparedStatement`] type, which represents a statement
//! that has been prepared in advance on the server, and [`BoundStatement`],
//! a prepared statement together with its values.

use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

use super::{merge_preset_values, StatementConfig};
use crate::errors::{BindError, TypeMismatch};
use crate::frame::response::result::{
    ColumnSpec, PartitionKeyIndex, PreparedMetadata, ResultMetadata, TableSpec,
};
use crate::frame::types::{Consistency, SerialConsistency};
use crate::frame::value::SerializedValues;
use crate::routing::partitioner::calculate_token;
use crate::routing::Token;
use crate::value::{BoundValue, ValueList};

/// Represents a statement prepared on the server.
///
/// Created by [`Session::prepare`](crate::Session::prepare). The server returns an
/// id, the types of the bind markers and the partition key positions among them;
/// [`PreparedStatement::bind`] checks values against those types and computes the
/// routing token.
///
/// # Clone implementation
/// Cloning a prepared statement is cheap: the id and metadata are shared
/// behind an [Arc], only the per-statement options are copied.
///
/// # Statement repreparation
/// When the server forgets a statement (e.g. after a restart) it answers with
/// `Unprepared`. The driver prepares the statement again on that connection
/// and resends the request, so users never see this error.
#[derive(Debug, Clone)]
pub struct PreparedStatement {
    pub(crate) config: StatementConfig,
    /// Tracing ID of the request used to prepare this statement, if it was traced.
    pub prepare_tracing_id: Option<uuid::Uuid>,

    id: Bytes,
    shared: Arc<PreparedStatementSharedData>,
    page_size: i32,
    preset_values: Vec<Option<BoundValue>>,
}

#[derive(Debug)]
struct PreparedStatementSharedData {
    metadata: PreparedMetadata,
    result_metadata: Arc<ResultMetadata>,
    statement: String,
}

impl PreparedStatement {
    pub(crate) fn new(
        id: Bytes,
        metadata: PreparedMetadata,
        result_metadata: Arc<ResultMetadata>,
        statement: String,
        page_size: i32,
        config: StatementConfig,
    ) -> Self {
        Self {
            id,
            shared: Arc::new(PreparedStatementSharedData {
                metadata,
                result_metadata,
                statement,
            }),
            prepare_tracing_id: None,
            page_size,
            config,
            preset_values: Vec::new(),
        }
    }

    // Literal values of a statement built with the query builder.
    pub(crate) fn with_preset_values(mut self, preset_values: Vec<Option<BoundValue>>) -> Self {
        self.preset_values = preset_values;
        self
    }

    /// Returns the id of the statement, as assigned by the server.
    pub fn get_id(&self) -> &Bytes {
        &self.id
    }

    /// Returns the text of the statement.
    pub fn get_statement(&self) -> &str {
        &self.shared.statement
    }

    /// Sets the page size for this CQL statement.
    pub fn set_page_size(&mut self, page_size: i32) {
        self.page_size = page_size;
    }

    /// Returns the page size for this CQL statement.
    pub fn get_page_size(&self) -> i32 {
        self.page_size
    }

    /// Whether binding values computes a routing token, i.e. the server told us
    /// which markers form the partition key.
    pub fn is_token_aware(&self) -> bool {
        !self.shared.metadata.pk_indexes.is_empty()
    }

    /// Types and names of the bind markers.
    pub fn get_variable_col_specs(&self) -> &[ColumnSpec] {
        &self.shared.metadata.col_specs
    }

    /// Positions of the partition key columns among the bind markers.
    pub fn get_variable_pk_indexes(&self) -> &[PartitionKeyIndex] {
        &self.shared.metadata.pk_indexes
    }

    /// Columns returned when the statement is executed, if it returns rows.
    pub fn get_result_set_col_specs(&self) -> &[ColumnSpec] {
        &self.shared.result_metadata.col_specs
    }

    /// Keyspace and table the markers belong to, if the statement has any markers.
    pub fn get_table_spec(&self) -> Option<&TableSpec> {
        self.shared
            .metadata
            .col_specs
            .first()
            .map(|spec| &spec.table_spec)
    }

    /// Keyspace the statement operates on, as reported by the server.
    pub fn get_keyspace_name(&self) -> Option<&str> {
        self.get_table_spec().map(TableSpec::ks_name)
    }

    /// Sets the consistency to be used when executing this statement.
    pub fn set_consistency(&mut self, c: Consistency) {
        self.config.consistency = Some(c);
    }

    /// Gets the consistency to be used when executing this prepared statement if it is filled.
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
    /// See [`Statement::set_is_idempotent`](super::Statement::set_is_idempotent).
    pub fn set_is_idempotent(&mut self, is_idempotent: bool) {
        self.config.is_idempotent = is_idempotent;
    }

    /// Gets the idempotence of this statement.
    pub fn get_is_idempotent(&self) -> bool {
        self.config.is_idempotent
    }

    /// Enable or disable CQL Tracing for this statement.
    pub fn set_tracing(&mut self, should_trace: bool) {
        self.config.tracing = should_trace;
    }

    /// Gets whether tracing is enabled for this statement.
    pub fn get_tracing(&self) -> bool {
        self.config.tracing
    }

    /// Sets the default timestamp for this statement in microseconds.
    pub fn set_timestamp(&mut self, timestamp: Option<i64>) {
        self.config.timestamp = timestamp;
    }

    /// Gets the default timestamp for this statement in microseconds.
    pub fn get_timestamp(&self) -> Option<i64> {
        self.config.timestamp
    }

    /// Sets the client-side timeout for this statement.
    pub fn set_request_timeout(&mut self, timeout: Option<Duration>) {
        self.config.request_timeout = timeout;
    }

    /// Gets client timeout associated with this statement.
    pub fn get_request_timeout(&self) -> Option<Duration> {
        self.config.request_timeout
    }

    pub(crate) fn get_result_metadata(&self) -> &Arc<ResultMetadata> {
        &self.shared.result_metadata
    }

    /// Binds values to the markers of the statement.
    ///
    /// The number of values must match the number of markers, and each value must
    /// match its marker's type. `NULL` (`None`) and [`Unset`](crate::value::Unset)
    /// are accepted for any marker. When every partition key marker is bound to a
    /// value, the token of the partition is computed so that the request can be
    /// routed to a replica.
    pub fn bind(&self, values: impl ValueList) -> Result<BoundStatement, BindError> {
        let values = if self.preset_values.is_empty() {
            values.bound_values()
        } else {
            merge_preset_values(&self.preset_values, values.bound_values())
        };
        let specs = self.get_variable_col_specs();

        if values.len() != specs.len() {
            return Err(BindError::WrongValuesCount {
                expected: specs.len(),
                actual: values.len(),
            });
        }

        let mut serialized = SerializedValues::new();
        for (value, spec) in values.iter().zip(specs) {
            if let BoundValue::Value(v) = value {
                if !v.is_compatible_with(&spec.typ) {
                    return Err(TypeMismatch {
                        target: spec.name.clone(),
                        expected: spec.typ.to_string(),
                        actual: v.kind_name().to_owned(),
                    }
                    .into());
                }
            }
            serialized
                .add_value(value)
                .map_err(|error| BindError::Serialization {
                    marker: spec.name.clone(),
                    error,
                })?;
        }

        let token = self.compute_token(&values);

        Ok(BoundStatement {
            prepared: self.clone(),
            values: serialized,
            token,
        })
    }

    // None when the statement has no partition key markers or one of them is NULL/unset.
    fn compute_token(&self, values: &[BoundValue]) -> Option<Token> {
        let mut pk_indexes = self.get_variable_pk_indexes().to_vec();
        if pk_indexes.is_empty() {
            return None;
        }
        pk_indexes.sort_unstable_by_key(|pk| pk.sequence);

        let mut components: Vec<Vec<u8>> = Vec::with_capacity(pk_indexes.len());
        for pk in &pk_indexes {
            let value = values.get(pk.index as usize)?.as_value()?;
            let mut buf = Vec::new();
            value.serialize(&mut buf).ok()?;
            // Strip the [bytes] length prefix.
            buf.drain(..4);
            components.push(buf);
        }

        calculate_token(components.iter().map(Vec::as_slice)).ok()
    }
}

/// A [`PreparedStatement`] with values bound to all of its markers.
#[derive(Debug, Clone)]
pub struct BoundStatement {
    pub(crate) prepared: PreparedStatement,
    pub(crate) values: SerializedValues,
    token: Option<Token>,
}

impl BoundStatement {
    /// The statement the values are bound to.
    pub fn prepared(&self) -> &PreparedStatement {
        &self.prepared
    }

    /// The serialized values.
    pub fn values(&self) -> &SerializedValues {
        &self.values
    }

    /// Token of the partition the statement targets, if the whole partition key is bound.
    pub fn token(&self) -> Option<Token> {
        self.token
    }

    /// Sets the consistency to be used when executing this statement.
    pub fn set_consistency(&mut self, c: Consistency) {
        self.prepared.set_consistency(c);
    }

    /// Sets the idempotence of this statement.
    pub fn set_is_idempotent(&mut self, is_idempotent: bool) {
        self.prepared.set_is_idempotent(is_idempotent);
    }

    /// Sets the page size for this statement.
    pub fn set_page_size(&mut self, page_size: i32) {
        self.prepared.set_page_size(page_size);
    }

    /// Sets the client-side timeout for this statement.
    pub fn set_request_timeout(&mut self, timeout: Option<Duration>) {
        self.prepared.set_request_timeout(timeout);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use assert_matches::assert_matches;
    use bytes::Bytes;

    use super::PreparedStatement;
    use crate::errors::BindError;
    use crate::frame::response::result::{
        ColumnSpec, ColumnType, PartitionKeyIndex, PreparedMetadata, ResultMetadata, TableSpec,
    };
    use crate::routing::partitioner::Murmur3Partitioner;
    use crate::statement::{StatementConfig, DEFAULT_PAGE_SIZE};
    use crate::value::Unset;

    fn users_insert(pk_indexes: Vec<PartitionKeyIndex>) -> PreparedStatement {
        let table = TableSpec::new("demo", "users");
        let col_specs = vec![
            ColumnSpec::new("lastname", ColumnType::Text, table.clone()),
            ColumnSpec::new("age", ColumnType::Int, table.clone()),
            ColumnSpec::new("city", ColumnType::Text, table),
        ];
        PreparedStatement::new(
            Bytes::from_static(b"\x01\x02"),
            PreparedMetadata {
                col_count: col_specs.len(),
                pk_indexes,
                col_specs,
            },
            Arc::new(ResultMetadata::default()),
            "INSERT INTO users (lastname, age, city) VALUES (?, ?, ?)".to_owned(),
            DEFAULT_PAGE_SIZE,
            StatementConfig::default(),
        )
    }

    #[test]
    fn bind_checks_arity() {
        let prepared = users_insert(vec![]);
        assert_matches!(
            prepared.bind(("Jones", 35)),
            Err(BindError::WrongValuesCount {
                expected: 3,
                actual: 2
            })
        );
    }

    #[test]
    fn bind_checks_types() {
        let prepared = users_insert(vec![]);
        let err = prepared.bind(("Jones", "35", "Austin")).unwrap_err();
        assert_matches!(err, BindError::TypeMismatch(m) if m.target == "age" && m.expected == "int" && m.actual == "text");
    }

    #[test]
    fn null_and_unset_bind_to_any_marker() {
        let prepared = users_insert(vec![]);
        let bound = prepared.bind(("Jones", None::<i32>, Unset)).unwrap();
        assert_eq!(bound.values().element_count(), 3);
    }

    #[test]
    fn token_is_computed_from_partition_key() {
        let prepared = users_insert(vec![PartitionKeyIndex {
            index: 0,
            sequence: 0,
        }]);
        assert!(prepared.is_token_aware());
        let bound = prepared.bind(("Jones", 35, "Austin")).unwrap();
        assert_eq!(bound.token(), Some(Murmur3Partitioner::hash(b"Jones")));
        assert_eq!(prepared.get_keyspace_name(), Some("demo"));
    }

    #[test]
    fn composite_partition_key_uses_sequence_order() {
        let prepared = users_insert(vec![
            PartitionKeyIndex {
                index: 0,
                sequence: 1,
            },
            PartitionKeyIndex {
                index: 1,
                sequence: 0,
            },
        ]);
        let bound = prepared.bind(("ab", 7, "Austin")).unwrap();
        let expected_key = [0, 4, 0, 0, 0, 7, 0, 0, 2, b'a', b'b', 0];
        assert_eq!(bound.token(), Some(Murmur3Partitioner::hash(&expected_key)));
    }

    #[test]
    fn null_partition_key_gives_no_token() {
        let prepared = users_insert(vec![PartitionKeyIndex {
            index: 0,
            sequence: 0,
        }]);
        let bound = prepared.bind((None::<&str>, 35, "Austin")).unwrap();
        assert_eq!(bound.token(), None);
    }
}
