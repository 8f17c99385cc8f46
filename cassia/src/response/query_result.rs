//! Results of requests: [`QueryResult`] and the [`Row`]s it carries.

use std::collections::HashMap;
use std::hash::Hash;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use thiserror::Error;
use uuid::Uuid;

use crate::errors::{ColumnAccessError, TypeMismatch};
use crate::frame::response::result::{ColumnSpec, ResultMetadata, Rows};
use crate::value::{
    Counter, CqlDate, CqlDecimal, CqlDuration, CqlTime, CqlTimestamp, CqlTimeuuid, CqlValue,
    CqlVarint,
};

/// Column specifications of a result, with a lookup by name.
///
/// Built once per received page and shared by all of its rows.
#[derive(Debug)]
pub struct ColumnSpecs {
    specs: Vec<ColumnSpec>,
    by_name: HashMap<String, usize>,
}

impl ColumnSpecs {
    pub(crate) fn new(specs: Vec<ColumnSpec>) -> Self {
        let mut by_name = HashMap::with_capacity(specs.len());
        for (idx, spec) in specs.iter().enumerate() {
            // With duplicated names (e.g. `SELECT a, a`), the first one wins.
            by_name.entry(spec.name.clone()).or_insert(idx);
        }
        Self { specs, by_name }
    }

    pub(crate) fn from_metadata(metadata: &ResultMetadata) -> Self {
        Self::new(metadata.col_specs.clone())
    }

    /// Returns the number of columns.
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    /// Returns `true` if there are no columns.
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Returns the column specification at given index.
    pub fn get_by_index(&self, k: usize) -> Option<&ColumnSpec> {
        self.specs.get(k)
    }

    /// Returns the index and specification of the column with given name.
    pub fn get_by_name(&self, name: &str) -> Option<(usize, &ColumnSpec)> {
        let idx = *self.by_name.get(name)?;
        Some((idx, &self.specs[idx]))
    }

    /// Iterates over the column specifications, in column order.
    pub fn iter(&self) -> impl Iterator<Item = &ColumnSpec> {
        self.specs.iter()
    }
}

/// A single row of a result.
#[derive(Debug, Clone)]
pub struct Row {
    columns: Vec<Option<CqlValue>>,
    specs: Arc<ColumnSpecs>,
}

impl Row {
    pub(crate) fn new(columns: Vec<Option<CqlValue>>, specs: Arc<ColumnSpecs>) -> Self {
        Self { columns, specs }
    }

    /// Column specifications of the row, shared with other rows of the page.
    pub fn column_specs(&self) -> &ColumnSpecs {
        &self.specs
    }

    /// The raw column values, in column order. `None` means NULL.
    pub fn columns(&self) -> &[Option<CqlValue>] {
        &self.columns
    }

    /// Consumes the row, returning its values.
    pub fn into_columns(self) -> Vec<Option<CqlValue>> {
        self.columns
    }

    /// Returns the value of a column, or `None` for NULL.
    pub fn get_value(&self, name: &str) -> Result<Option<&CqlValue>, ColumnAccessError> {
        let (idx, _) = self
            .specs
            .get_by_name(name)
            .ok_or_else(|| ColumnAccessError::NoSuchColumn(name.to_owned()))?;
        Ok(self.columns[idx].as_ref())
    }

    /// Returns whether the column is NULL.
    pub fn is_null(&self, name: &str) -> Result<bool, ColumnAccessError> {
        Ok(self.get_value(name)?.is_none())
    }

    /// Converts the value of a column into `T`.
    ///
    /// Fails with `TypeMismatch` if the column holds a value of another kind,
    /// and with `UnexpectedNull` if it is NULL and `T` is not an `Option`.
    pub fn get<T: FromCqlValue>(&self, name: &str) -> Result<T, ColumnAccessError> {
        let value = self.get_value(name)?;
        T::from_cql(value).map_err(|err| err.into_access_error(name))
    }

    /// Converts the value of the column at `index` into `T`.
    pub fn get_by_index<T: FromCqlValue>(&self, index: usize) -> Result<T, ColumnAccessError> {
        let spec = self
            .specs
            .get_by_index(index)
            .ok_or_else(|| ColumnAccessError::NoSuchColumn(index.to_string()))?;
        T::from_cql(self.columns[index].as_ref()).map_err(|err| err.into_access_error(&spec.name))
    }

    /// Shorthand for `get::<String>`, accepting `text` and `ascii` columns.
    pub fn get_string(&self, name: &str) -> Result<String, ColumnAccessError> {
        self.get(name)
    }

    /// Shorthand for `get::<i32>`.
    pub fn get_int(&self, name: &str) -> Result<i32, ColumnAccessError> {
        self.get(name)
    }

    /// Shorthand for `get::<i64>`.
    pub fn get_bigint(&self, name: &str) -> Result<i64, ColumnAccessError> {
        self.get(name)
    }

    /// Shorthand for `get::<bool>`.
    pub fn get_bool(&self, name: &str) -> Result<bool, ColumnAccessError> {
        self.get(name)
    }

    /// Shorthand for `get::<f64>`.
    pub fn get_double(&self, name: &str) -> Result<f64, ColumnAccessError> {
        self.get(name)
    }

    /// Shorthand for `get::<Uuid>`.
    pub fn get_uuid(&self, name: &str) -> Result<Uuid, ColumnAccessError> {
        self.get(name)
    }
}

impl PartialEq for Row {
    fn eq(&self, other: &Self) -> bool {
        self.columns == other.columns
    }
}

/// Why a CQL value could not be converted into a Rust type.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FromCqlValueError {
    /// The value is NULL but the type is not nullable.
    #[error("Value is null")]
    Null,
    /// The value has another CQL type.
    #[error("Bad CQL type: expected {expected}, got {actual}")]
    BadCqlType {
        /// Type the conversion accepts.
        expected: &'static str,
        /// Kind of the value received.
        actual: &'static str,
    },
}

impl FromCqlValueError {
    fn into_access_error(self, column: &str) -> ColumnAccessError {
        match self {
            FromCqlValueError::Null => ColumnAccessError::UnexpectedNull(column.to_owned()),
            FromCqlValueError::BadCqlType { expected, actual } => TypeMismatch {
                target: column.to_owned(),
                expected: expected.to_owned(),
                actual: actual.to_owned(),
            }
            .into(),
        }
    }
}

/// Conversion of a column value (`None` for NULL) into a Rust type.
pub trait FromCqlValue: Sized {
    /// Performs the conversion.
    fn from_cql(value: Option<&CqlValue>) -> Result<Self, FromCqlValueError>;
}

impl<T: FromCqlValue> FromCqlValue for Option<T> {
    fn from_cql(value: Option<&CqlValue>) -> Result<Self, FromCqlValueError> {
        match value {
            None | Some(CqlValue::Empty) => Ok(None),
            Some(v) => T::from_cql(Some(v)).map(Some),
        }
    }
}

impl FromCqlValue for CqlValue {
    fn from_cql(value: Option<&CqlValue>) -> Result<Self, FromCqlValueError> {
        value.cloned().ok_or(FromCqlValueError::Null)
    }
}

fn non_null(value: Option<&CqlValue>) -> Result<&CqlValue, FromCqlValueError> {
    value.ok_or(FromCqlValueError::Null)
}

macro_rules! impl_from_cql_value {
    ($($t:ty => $expected:literal, $pat:pat => $out:expr;)*) => {
        $(
            impl FromCqlValue for $t {
                fn from_cql(value: Option<&CqlValue>) -> Result<Self, FromCqlValueError> {
                    match non_null(value)? {
                        $pat => Ok($out),
                        other => Err(FromCqlValueError::BadCqlType {
                            expected: $expected,
                            actual: other.kind_name(),
                        }),
                    }
                }
            }
        )*
    };
}

impl_from_cql_value! {
    bool => "boolean", CqlValue::Boolean(v) => *v;
    i8 => "tinyint", CqlValue::TinyInt(v) => *v;
    i16 => "smallint", CqlValue::SmallInt(v) => *v;
    i32 => "int", CqlValue::Int(v) => *v;
    i64 => "bigint", CqlValue::BigInt(v) => *v;
    f32 => "float", CqlValue::Float(v) => *v;
    f64 => "double", CqlValue::Double(v) => *v;
    String => "text", CqlValue::Text(v) | CqlValue::Ascii(v) => v.clone();
    Vec<u8> => "blob", CqlValue::Blob(v) => v.clone();
    Uuid => "uuid", CqlValue::Uuid(v) => *v;
    IpAddr => "inet", CqlValue::Inet(v) => *v;
    Counter => "counter", CqlValue::Counter(v) => *v;
    CqlDecimal => "decimal", CqlValue::Decimal(v) => v.clone();
    CqlVarint => "varint", CqlValue::Varint(v) => v.clone();
    CqlDate => "date", CqlValue::Date(v) => *v;
    CqlTimestamp => "timestamp", CqlValue::Timestamp(v) => *v;
    CqlTime => "time", CqlValue::Time(v) => *v;
    CqlDuration => "duration", CqlValue::Duration(v) => *v;
    CqlTimeuuid => "timeuuid", CqlValue::Timeuuid(v) => *v;
}

impl<T: FromCqlValue> FromCqlValue for Vec<T> {
    fn from_cql(value: Option<&CqlValue>) -> Result<Self, FromCqlValueError> {
        match non_null(value)? {
            CqlValue::List(items) | CqlValue::Set(items) => {
                items.iter().map(|item| T::from_cql(Some(item))).collect()
            }
            other => Err(FromCqlValueError::BadCqlType {
                expected: "list",
                actual: other.kind_name(),
            }),
        }
    }
}

impl<K: FromCqlValue + Eq + Hash, V: FromCqlValue> FromCqlValue for HashMap<K, V> {
    fn from_cql(value: Option<&CqlValue>) -> Result<Self, FromCqlValueError> {
        match non_null(value)? {
            CqlValue::Map(entries) => entries
                .iter()
                .map(|(k, v)| Ok((K::from_cql(Some(k))?, V::from_cql(Some(v))?)))
                .collect(),
            other => Err(FromCqlValueError::BadCqlType {
                expected: "map",
                actual: other.kind_name(),
            }),
        }
    }
}

/// Result of a single request to the database. It represents any kind of Result frame.
///
/// NOTE: this is a result of a single CQL request. If you use paging for your query,
/// this will contain exactly one page.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    rows: Option<Vec<Row>>,
    col_specs: Option<Arc<ColumnSpecs>>,
    request_coordinator: Option<SocketAddr>,
    tracing_id: Option<Uuid>,
    warnings: Vec<String>,
}

impl QueryResult {
    pub(crate) fn new(rows: Option<Rows>, tracing_id: Option<Uuid>, warnings: Vec<String>) -> Self {
        let (rows, col_specs) = match rows {
            Some(rows) => {
                let specs = Arc::new(ColumnSpecs::from_metadata(&rows.metadata));
                let rows = rows
                    .rows
                    .into_iter()
                    .map(|row| Row::new(row.columns, specs.clone()))
                    .collect();
                (Some(rows), Some(specs))
            }
            None => (None, None),
        };
        Self {
            rows,
            col_specs,
            request_coordinator: None,
            tracing_id,
            warnings,
        }
    }

    pub(crate) fn with_coordinator(mut self, coordinator: SocketAddr) -> Self {
        self.request_coordinator = Some(coordinator);
        self
    }

    /// Address of the node that served the request.
    pub fn request_coordinator(&self) -> Option<SocketAddr> {
        self.request_coordinator
    }

    /// Warnings emitted by the database.
    #[inline]
    pub fn warnings(&self) -> impl Iterator<Item = &str> {
        self.warnings.iter().map(String::as_str)
    }

    /// Tracing ID associated with this CQL request.
    #[inline]
    pub fn tracing_id(&self) -> Option<Uuid> {
        self.tracing_id
    }

    /// Returns a bool indicating the current response is of Rows type.
    #[inline]
    pub fn is_rows(&self) -> bool {
        self.rows.is_some()
    }

    /// The rows of the result. Empty for results of another kind (e.g. of an `INSERT`).
    pub fn rows(&self) -> &[Row] {
        self.rows.as_deref().unwrap_or(&[])
    }

    /// Number of rows received.
    pub fn rows_num(&self) -> usize {
        self.rows().len()
    }

    /// The first row, if there is any.
    pub fn first_row(&self) -> Option<&Row> {
        self.rows().first()
    }

    /// Column specifications, if the result is of Rows type.
    pub fn column_specs(&self) -> Option<&ColumnSpecs> {
        self.col_specs.as_deref()
    }

    /// Consumes the result, returning its rows.
    pub fn into_rows(self) -> Vec<Row> {
        self.rows.unwrap_or_default()
    }
}
