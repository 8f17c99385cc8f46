use crate::frame::frame_errors::ParseError;
use crate::frame::response::event::SchemaChangeEvent;
use crate::frame::types;
use crate::value::{
    read_vint, CqlDate, CqlDecimal, CqlDuration, CqlTime, CqlTimestamp, CqlTimeuuid,
    CqlValue, CqlVarint,
};
use bytes::{BufMut, Bytes};
use std::fmt;
use std::net::IpAddr;
use std::result::Result as StdResult;
use std::sync::Arc;

// Rows metadata flags
const FLAG_GLOBAL_TABLES_SPEC: i32 = 0x0001;
const FLAG_HAS_MORE_PAGES: i32 = 0x0002;
const FLAG_NO_METADATA: i32 = 0x0004;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetKeyspace {
    pub keyspace_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Prepared {
    pub id: Bytes,
    pub prepared_metadata: PreparedMetadata,
    pub result_metadata: ResultMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaChange {
    pub event: SchemaChangeEvent,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableSpec {
    ks_name: String,
    table_name: String,
}

impl TableSpec {
    pub fn new(ks_name: impl Into<String>, table_name: impl Into<String>) -> Self {
        Self {
            ks_name: ks_name.into(),
            table_name: table_name.into(),
        }
    }

    pub fn ks_name(&self) -> &str {
        &self.ks_name
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Custom(String),
    Ascii,
    Boolean,
    Blob,
    Counter,
    Date,
    Decimal,
    Double,
    Duration,
    Float,
    Int,
    BigInt,
    Text,
    Timestamp,
    Inet,
    List(Box<ColumnType>),
    Map(Box<ColumnType>, Box<ColumnType>),
    Set(Box<ColumnType>),
    UserDefinedType {
        type_name: String,
        keyspace: String,
        field_types: Vec<(String, ColumnType)>,
    },
    SmallInt,
    TinyInt,
    Time,
    Timeuuid,
    Tuple(Vec<ColumnType>),
    Uuid,
    Varint,
}

impl ColumnType {
    /// Writes the `[option]` describing this type. Used by servers and test doubles.
    pub fn serialize(&self, buf: &mut impl BufMut) -> StdResult<(), std::num::TryFromIntError> {
        use ColumnType::*;
        let id: u16 = match self {
            Custom(_) => 0x0000,
            Ascii => 0x0001,
            BigInt => 0x0002,
            Blob => 0x0003,
            Boolean => 0x0004,
            Counter => 0x0005,
            Decimal => 0x0006,
            Double => 0x0007,
            Float => 0x0008,
            Int => 0x0009,
            Timestamp => 0x000B,
            Uuid => 0x000C,
            Text => 0x000D,
            Varint => 0x000E,
            Timeuuid => 0x000F,
            Inet => 0x0010,
            Date => 0x0011,
            Time => 0x0012,
            SmallInt => 0x0013,
            TinyInt => 0x0014,
            Duration => 0x0015,
            List(_) => 0x0020,
            Map(_, _) => 0x0021,
            Set(_) => 0x0022,
            UserDefinedType { .. } => 0x0030,
            Tuple(_) => 0x0031,
        };
        types::write_short(id, buf);

        match self {
            Custom(name) => types::write_string(name, buf)?,
            List(elem) | Set(elem) => elem.serialize(buf)?,
            Map(key, value) => {
                key.serialize(buf)?;
                value.serialize(buf)?;
            }
            UserDefinedType {
                type_name,
                keyspace,
                field_types,
            } => {
                types::write_string(keyspace, buf)?;
                types::write_string(type_name, buf)?;
                types::write_short(field_types.len().try_into()?, buf);
                for (name, typ) in field_types {
                    types::write_string(name, buf)?;
                    typ.serialize(buf)?;
                }
            }
            Tuple(elems) => {
                types::write_short(elems.len().try_into()?, buf);
                for typ in elems {
                    typ.serialize(buf)?;
                }
            }
            _ => {}
        }
        Ok(())
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use ColumnType::*;
        match self {
            Custom(name) => write!(f, "'{}'", name),
            Ascii => f.write_str("ascii"),
            Boolean => f.write_str("boolean"),
            Blob => f.write_str("blob"),
            Counter => f.write_str("counter"),
            Date => f.write_str("date"),
            Decimal => f.write_str("decimal"),
            Double => f.write_str("double"),
            Duration => f.write_str("duration"),
            Float => f.write_str("float"),
            Int => f.write_str("int"),
            BigInt => f.write_str("bigint"),
            Text => f.write_str("text"),
            Timestamp => f.write_str("timestamp"),
            Inet => f.write_str("inet"),
            List(elem) => write!(f, "list<{}>", elem),
            Map(key, value) => write!(f, "map<{}, {}>", key, value),
            Set(elem) => write!(f, "set<{}>", elem),
            UserDefinedType {
                type_name,
                keyspace,
                ..
            } => write!(f, "frozen<{}.{}>", keyspace, type_name),
            SmallInt => f.write_str("smallint"),
            TinyInt => f.write_str("tinyint"),
            Time => f.write_str("time"),
            Timeuuid => f.write_str("timeuuid"),
            Tuple(elems) => {
                f.write_str("tuple<")?;
                for (i, typ) in elems.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", typ)?;
                }
                f.write_str(">")
            }
            Uuid => f.write_str("uuid"),
            Varint => f.write_str("varint"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub table_spec: TableSpec,
    pub name: String,
    pub typ: ColumnType,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, typ: ColumnType, table_spec: TableSpec) -> Self {
        Self {
            table_spec,
            name: name.into(),
            typ,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResultMetadata {
    pub col_count: usize,
    pub col_specs: Vec<ColumnSpec>,
}

impl ResultMetadata {
    pub fn new(col_specs: Vec<ColumnSpec>) -> Self {
        Self {
            col_count: col_specs.len(),
            col_specs,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PartitionKeyIndex {
    /// index in the serialized values
    pub index: u16,
    /// sequence number in partition key
    pub sequence: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PreparedMetadata {
    pub col_count: usize,
    /// pk_indexes are sorted by `index` and can be reordered in partition key order
    /// using `sequence` field
    pub pk_indexes: Vec<PartitionKeyIndex>,
    pub col_specs: Vec<ColumnSpec>,
}

#[derive(Debug, Default, PartialEq, Clone)]
pub struct Row {
    pub columns: Vec<Option<CqlValue>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rows {
    pub metadata: Arc<ResultMetadata>,
    /// Present when the server has more pages to send.
    pub paging_state: Option<Bytes>,
    pub rows_count: usize,
    pub rows: Vec<Row>,
    /// Original size of the serialized rows.
    pub serialized_size: usize,
}

impl Rows {
    /// Writes the rows body (without the result kind). With `no_metadata` the
    /// column specs are omitted, as requested by `EXECUTE` with skip-metadata.
    pub fn serialize(&self, no_metadata: bool, buf: &mut Vec<u8>) -> StdResult<(), ParseError> {
        let col_specs = &self.metadata.col_specs;
        let global_spec = col_specs
            .first()
            .map(|first| &first.table_spec)
            .filter(|spec| col_specs.iter().all(|c| &c.table_spec == *spec));

        let mut flags = 0;
        if no_metadata {
            flags |= FLAG_NO_METADATA;
        } else if global_spec.is_some() {
            flags |= FLAG_GLOBAL_TABLES_SPEC;
        }
        if self.paging_state.is_some() {
            flags |= FLAG_HAS_MORE_PAGES;
        }
        types::write_int(flags, buf);
        types::write_int(self.metadata.col_count.try_into()?, buf);
        if let Some(paging_state) = &self.paging_state {
            types::write_bytes(paging_state, buf)?;
        }
        if !no_metadata {
            if let Some(spec) = global_spec {
                types::write_string(spec.ks_name(), buf)?;
                types::write_string(spec.table_name(), buf)?;
            }
            for col in col_specs {
                if global_spec.is_none() {
                    types::write_string(col.table_spec.ks_name(), buf)?;
                    types::write_string(col.table_spec.table_name(), buf)?;
                }
                types::write_string(&col.name, buf)?;
                col.typ.serialize(buf)?;
            }
        }

        types::write_int(self.rows.len().try_into()?, buf);
        for row in &self.rows {
            for value in &row.columns {
                match value {
                    Some(v) => v.serialize(buf).map_err(|_| {
                        ParseError::BadIncomingData("Value too big to serialize".to_owned())
                    })?,
                    None => types::write_int(-1, buf),
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Result {
    Void,
    Rows(Rows),
    SetKeyspace(SetKeyspace),
    Prepared(Prepared),
    SchemaChange(SchemaChange),
}

impl Result {
    /// Writes the RESULT body. Used by servers and test doubles.
    pub fn serialize(&self, buf: &mut Vec<u8>) -> StdResult<(), ParseError> {
        match self {
            Result::Void => types::write_int(0x0001, buf),
            Result::Rows(rows) => {
                types::write_int(0x0002, buf);
                rows.serialize(false, buf)?;
            }
            Result::SetKeyspace(set_keyspace) => {
                types::write_int(0x0003, buf);
                types::write_string(&set_keyspace.keyspace_name, buf)?;
            }
            Result::Prepared(prepared) => {
                types::write_int(0x0004, buf);
                types::write_short_bytes(&prepared.id, buf)?;
                ser_prepared_metadata(&prepared.prepared_metadata, buf)?;
                let result_rows = Rows {
                    metadata: Arc::new(prepared.result_metadata.clone()),
                    paging_state: None,
                    rows_count: 0,
                    rows: Vec::new(),
                    serialized_size: 0,
                };
                // Result metadata has the same layout as the rows header.
                let mut tmp = Vec::new();
                result_rows.serialize(false, &mut tmp)?;
                buf.extend_from_slice(&tmp[..tmp.len() - 4]);
            }
            Result::SchemaChange(schema_change) => {
                types::write_int(0x0005, buf);
                schema_change.event.serialize(buf)?;
            }
        }
        Ok(())
    }
}

fn ser_prepared_metadata(
    metadata: &PreparedMetadata,
    buf: &mut Vec<u8>,
) -> StdResult<(), ParseError> {
    let global_spec = metadata
        .col_specs
        .first()
        .map(|first| &first.table_spec)
        .filter(|spec| metadata.col_specs.iter().all(|c| &c.table_spec == *spec));

    let flags = if global_spec.is_some() {
        FLAG_GLOBAL_TABLES_SPEC
    } else {
        0
    };
    types::write_int(flags, buf);
    types::write_int(metadata.col_count.try_into()?, buf);

    let mut pk_indexes = metadata.pk_indexes.clone();
    pk_indexes.sort_unstable_by_key(|pki| pki.sequence);
    types::write_int(pk_indexes.len().try_into()?, buf);
    for pki in &pk_indexes {
        types::write_short(pki.index, buf);
    }

    if let Some(spec) = global_spec {
        types::write_string(spec.ks_name(), buf)?;
        types::write_string(spec.table_name(), buf)?;
    }
    for col in &metadata.col_specs {
        if global_spec.is_none() {
            types::write_string(col.table_spec.ks_name(), buf)?;
            types::write_string(col.table_spec.table_name(), buf)?;
        }
        types::write_string(&col.name, buf)?;
        col.typ.serialize(buf)?;
    }
    Ok(())
}

fn deser_type(buf: &mut &[u8]) -> StdResult<ColumnType, ParseError> {
    use ColumnType::*;
    let id = types::read_short(buf)?;
    Ok(match id {
        0x0000 => {
            let type_str = types::read_string(buf)?;
            match type_str {
                "org.apache.cassandra.db.marshal.DurationType" => Duration,
                _ => Custom(type_str.to_owned()),
            }
        }
        0x0001 => Ascii,
        0x0002 => BigInt,
        0x0003 => Blob,
        0x0004 => Boolean,
        0x0005 => Counter,
        0x0006 => Decimal,
        0x0007 => Double,
        0x0008 => Float,
        0x0009 => Int,
        0x000B => Timestamp,
        0x000C => Uuid,
        0x000D => Text,
        0x000E => Varint,
        0x000F => Timeuuid,
        0x0010 => Inet,
        0x0011 => Date,
        0x0012 => Time,
        0x0013 => SmallInt,
        0x0014 => TinyInt,
        0x0015 => Duration,
        0x0020 => List(Box::new(deser_type(buf)?)),
        0x0021 => Map(Box::new(deser_type(buf)?), Box::new(deser_type(buf)?)),
        0x0022 => Set(Box::new(deser_type(buf)?)),
        0x0030 => {
            let keyspace_name: String = types::read_string(buf)?.to_string();
            let type_name: String = types::read_string(buf)?.to_string();
            let fields_size: usize = types::read_short(buf)?.into();

            let mut field_types: Vec<(String, ColumnType)> = Vec::with_capacity(fields_size);

            for _ in 0..fields_size {
                let field_name: String = types::read_string(buf)?.to_string();
                let field_type: ColumnType = deser_type(buf)?;

                field_types.push((field_name, field_type));
            }

            UserDefinedType {
                type_name,
                keyspace: keyspace_name,
                field_types,
            }
        }
        0x0031 => {
            let len: usize = types::read_short(buf)?.into();
            let mut types = Vec::with_capacity(len);
            for _ in 0..len {
                types.push(deser_type(buf)?);
            }
            Tuple(types)
        }
        id => {
            return Err(ParseError::TypeNotImplemented(id));
        }
    })
}

fn deser_col_specs(
    buf: &mut &[u8],
    global_table_spec: &Option<TableSpec>,
    col_count: usize,
) -> StdResult<Vec<ColumnSpec>, ParseError> {
    let mut col_specs = Vec::with_capacity(col_count);
    for _ in 0..col_count {
        let table_spec = match global_table_spec {
            Some(spec) => spec.clone(),
            None => deser_table_spec(buf)?,
        };
        let name = types::read_string(buf)?.to_owned();
        let typ = deser_type(buf)?;
        col_specs.push(ColumnSpec {
            table_spec,
            name,
            typ,
        });
    }
    Ok(col_specs)
}

fn deser_table_spec(buf: &mut &[u8]) -> StdResult<TableSpec, ParseError> {
    let ks_name = types::read_string(buf)?.to_owned();
    let table_name = types::read_string(buf)?.to_owned();
    Ok(TableSpec::new(ks_name, table_name))
}

fn deser_result_metadata(
    buf: &mut &[u8],
) -> StdResult<(ResultMetadata, Option<Bytes>, bool), ParseError> {
    let flags = types::read_int(buf)?;
    let global_tables_spec = flags & FLAG_GLOBAL_TABLES_SPEC != 0;
    let has_more_pages = flags & FLAG_HAS_MORE_PAGES != 0;
    let no_metadata = flags & FLAG_NO_METADATA != 0;

    let col_count = types::read_int_length(buf)?;

    let paging_state = if has_more_pages {
        Some(Bytes::copy_from_slice(types::read_bytes(buf)?))
    } else {
        None
    };

    if no_metadata {
        return Ok((
            ResultMetadata {
                col_count,
                col_specs: vec![],
            },
            paging_state,
            true,
        ));
    }

    let global_table_spec = if global_tables_spec {
        Some(deser_table_spec(buf)?)
    } else {
        None
    };

    let col_specs = deser_col_specs(buf, &global_table_spec, col_count)?;

    Ok((
        ResultMetadata {
            col_count,
            col_specs,
        },
        paging_state,
        false,
    ))
}

fn deser_prepared_metadata(buf: &mut &[u8]) -> StdResult<PreparedMetadata, ParseError> {
    let flags = types::read_int(buf)?;
    let global_tables_spec = flags & FLAG_GLOBAL_TABLES_SPEC != 0;

    let col_count = types::read_int_length(buf)?;

    let pk_count: usize = types::read_int_length(buf)?;

    let mut pk_indexes = Vec::with_capacity(pk_count);
    for i in 0..pk_count {
        pk_indexes.push(PartitionKeyIndex {
            index: types::read_short(buf)?,
            sequence: i as u16,
        });
    }
    pk_indexes.sort_unstable_by_key(|pki| pki.index);

    let global_table_spec = if global_tables_spec {
        Some(deser_table_spec(buf)?)
    } else {
        None
    };

    let col_specs = deser_col_specs(buf, &global_table_spec, col_count)?;

    Ok(PreparedMetadata {
        col_count,
        pk_indexes,
        col_specs,
    })
}

fn bad_length(typ: &ColumnType, expected: usize, got: usize) -> ParseError {
    ParseError::BadIncomingData(format!(
        "Buffer length should be {} for {}, got {}",
        expected, typ, got
    ))
}

fn fixed<const N: usize>(typ: &ColumnType, buf: &[u8]) -> StdResult<[u8; N], ParseError> {
    buf.try_into().map_err(|_| bad_length(typ, N, buf.len()))
}

/// Deserializes the contents of a single `[bytes]` cell of type `typ`.
///
/// `buf` must contain exactly the cell contents (without the length prefix).
pub fn deser_cql_value(typ: &ColumnType, buf: &mut &[u8]) -> StdResult<CqlValue, ParseError> {
    use ColumnType::*;

    if buf.is_empty() {
        match typ {
            Ascii | Blob | Text => {
                // can't be empty
            }
            _ => return Ok(CqlValue::Empty),
        }
    }

    let contents: &[u8] = buf;
    *buf = &[];

    Ok(match typ {
        Custom(type_str) => {
            return Err(ParseError::BadIncomingData(format!(
                "Support for custom types is not yet implemented: {}",
                type_str
            )));
        }
        Ascii => {
            if !contents.is_ascii() {
                return Err(ParseError::BadIncomingData(format!(
                    "String is not ascii: {:?}",
                    contents
                )));
            }
            CqlValue::Ascii(std::str::from_utf8(contents)?.to_owned())
        }
        Boolean => CqlValue::Boolean(fixed::<1>(typ, contents)?[0] != 0x00),
        Blob => CqlValue::Blob(contents.to_vec()),
        Date => CqlValue::Date(CqlDate(u32::from_be_bytes(fixed(typ, contents)?))),
        Counter => CqlValue::Counter(crate::value::Counter(i64::from_be_bytes(fixed(
            typ, contents,
        )?))),
        Decimal => {
            if contents.len() < 4 {
                return Err(bad_length(typ, 4, contents.len()));
            }
            let (scale, unscaled) = contents.split_at(4);
            let scale = i32::from_be_bytes(fixed(typ, scale)?);
            CqlValue::Decimal(CqlDecimal::from_signed_be_bytes_and_exponent(
                unscaled.to_vec(),
                scale,
            ))
        }
        Double => CqlValue::Double(f64::from_be_bytes(fixed(typ, contents)?)),
        Float => CqlValue::Float(f32::from_be_bytes(fixed(typ, contents)?)),
        Int => CqlValue::Int(i32::from_be_bytes(fixed(typ, contents)?)),
        SmallInt => CqlValue::SmallInt(i16::from_be_bytes(fixed(typ, contents)?)),
        TinyInt => CqlValue::TinyInt(i8::from_be_bytes(fixed(typ, contents)?)),
        BigInt => CqlValue::BigInt(i64::from_be_bytes(fixed(typ, contents)?)),
        Text => CqlValue::Text(std::str::from_utf8(contents)?.to_owned()),
        Timestamp => CqlValue::Timestamp(CqlTimestamp(i64::from_be_bytes(fixed(typ, contents)?))),
        Time => {
            let nanos = i64::from_be_bytes(fixed(typ, contents)?);
            // Valid values are in the range 0 to 86399999999999
            if !(0..=86399999999999).contains(&nanos) {
                return Err(ParseError::BadIncomingData(format!(
                    "Invalid time value only 0 to 86399999999999 allowed: {}.",
                    nanos
                )));
            }
            CqlValue::Time(CqlTime(nanos))
        }
        Timeuuid => CqlValue::Timeuuid(CqlTimeuuid::from(uuid::Uuid::from_bytes(fixed(
            typ, contents,
        )?))),
        Duration => {
            let mut rest = contents;
            let mut next = || {
                read_vint(&mut rest).ok_or_else(|| {
                    ParseError::BadIncomingData("Malformed duration vint".to_owned())
                })
            };
            let months = i32::try_from(next()?)?;
            let days = i32::try_from(next()?)?;
            let nanoseconds = next()?;
            CqlValue::Duration(CqlDuration {
                months,
                days,
                nanoseconds,
            })
        }
        Inet => CqlValue::Inet(match contents.len() {
            4 => IpAddr::from(fixed::<4>(typ, contents)?),
            16 => IpAddr::from(fixed::<16>(typ, contents)?),
            v => {
                return Err(ParseError::BadIncomingData(format!(
                    "Invalid inet bytes length: {}",
                    v
                )));
            }
        }),
        Uuid => CqlValue::Uuid(uuid::Uuid::from_bytes(fixed(typ, contents)?)),
        Varint => CqlValue::Varint(CqlVarint::from_signed_bytes_be(contents.to_vec())),
        List(elem_type) | Set(elem_type) => {
            let mut rest = contents;
            let len = types::read_int_length(&mut rest)?;
            let mut elems = Vec::with_capacity(len);
            for _ in 0..len {
                let mut elem = types::read_bytes(&mut rest)?;
                elems.push(deser_cql_value(elem_type, &mut elem)?);
            }
            if matches!(typ, List(_)) {
                CqlValue::List(elems)
            } else {
                CqlValue::Set(elems)
            }
        }
        Map(key_type, value_type) => {
            let mut rest = contents;
            let len = types::read_int_length(&mut rest)?;
            let mut entries = Vec::with_capacity(len);
            for _ in 0..len {
                let mut key = types::read_bytes(&mut rest)?;
                let mut value = types::read_bytes(&mut rest)?;
                entries.push((
                    deser_cql_value(key_type, &mut key)?,
                    deser_cql_value(value_type, &mut value)?,
                ));
            }
            CqlValue::Map(entries)
        }
        UserDefinedType {
            type_name,
            keyspace,
            field_types,
        } => {
            let mut rest = contents;
            let mut fields: Vec<(String, Option<CqlValue>)> = Vec::with_capacity(field_types.len());

            for (field_name, field_type) in field_types {
                // If a field is added to a UDT and we read an old (frozen ?) version of it,
                // the older value will not contain the new field, so it will be missing
                if rest.is_empty() {
                    fields.push((field_name.clone(), None));
                    continue;
                }
                let value = types::read_bytes_opt(&mut rest)?
                    .map(|mut v| deser_cql_value(field_type, &mut v))
                    .transpose()?;
                fields.push((field_name.clone(), value));
            }

            CqlValue::UserDefinedType {
                keyspace: keyspace.clone(),
                type_name: type_name.clone(),
                fields,
            }
        }
        Tuple(type_names) => {
            let mut rest = contents;
            let t = type_names
                .iter()
                .map(|typ| {
                    types::read_bytes_opt(&mut rest)?
                        .map(|mut v| deser_cql_value(typ, &mut v))
                        .transpose()
                })
                .collect::<StdResult<_, ParseError>>()?;
            CqlValue::Tuple(t)
        }
    })
}

fn deser_rows(
    buf: &mut &[u8],
    cached_metadata: Option<&Arc<ResultMetadata>>,
) -> StdResult<Rows, ParseError> {
    let (server_metadata, paging_state, no_metadata) = deser_result_metadata(buf)?;

    let metadata = match (no_metadata, cached_metadata) {
        (false, _) => Arc::new(server_metadata),
        (true, Some(cached)) => Arc::clone(cached),
        (true, None) => {
            return Err(ParseError::BadIncomingData(
                "Server sent rows without metadata and no cached metadata was provided".to_owned(),
            ));
        }
    };

    let original_size = buf.len();

    let rows_count: usize = types::read_int_length(buf)?;

    let mut rows = Vec::with_capacity(rows_count);
    for _ in 0..rows_count {
        let mut columns = Vec::with_capacity(metadata.col_count);
        for i in 0..metadata.col_count {
            let typ = &metadata
                .col_specs
                .get(i)
                .ok_or_else(|| {
                    ParseError::BadIncomingData(format!(
                        "Column count {} exceeds the number of column specs {}",
                        metadata.col_count,
                        metadata.col_specs.len()
                    ))
                })?
                .typ;
            let v = match types::read_bytes_opt(buf)? {
                Some(mut b) => Some(deser_cql_value(typ, &mut b)?),
                None => None,
            };
            columns.push(v);
        }
        rows.push(Row { columns });
    }

    Ok(Rows {
        metadata,
        paging_state,
        rows_count,
        rows,
        serialized_size: original_size - buf.len(),
    })
}

fn deser_set_keyspace(buf: &mut &[u8]) -> StdResult<SetKeyspace, ParseError> {
    let keyspace_name = types::read_string(buf)?.to_string();

    Ok(SetKeyspace { keyspace_name })
}

fn deser_prepared(buf: &mut &[u8]) -> StdResult<Prepared, ParseError> {
    let id = Bytes::copy_from_slice(types::read_short_bytes(buf)?);
    let prepared_metadata = deser_prepared_metadata(buf)?;
    let (result_metadata, paging_state, _) = deser_result_metadata(buf)?;
    if paging_state.is_some() {
        return Err(ParseError::BadIncomingData(
            "Prepared response carries a paging state".to_owned(),
        ));
    }
    Ok(Prepared {
        id,
        prepared_metadata,
        result_metadata,
    })
}

fn deser_schema_change(buf: &mut &[u8]) -> StdResult<SchemaChange, ParseError> {
    Ok(SchemaChange {
        event: SchemaChangeEvent::deserialize(buf)?,
    })
}

/// Deserializes a RESULT body. `cached_metadata` is used when the server
/// omitted the rows metadata (skip-metadata execution of a prepared statement).
pub fn deserialize(
    buf: &mut &[u8],
    cached_metadata: Option<&Arc<ResultMetadata>>,
) -> StdResult<Result, ParseError> {
    use self::Result::*;
    Ok(match types::read_int(buf)? {
        0x0001 => Void,
        0x0002 => Rows(deser_rows(buf, cached_metadata)?),
        0x0003 => SetKeyspace(deser_set_keyspace(buf)?),
        0x0004 => Prepared(deser_prepared(buf)?),
        0x0005 => SchemaChange(deser_schema_change(buf)?),
        k => {
            return Err(ParseError::BadIncomingData(format!(
                "Unknown query result id: {}",
                k
            )))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::CqlValue;
    use std::net::Ipv4Addr;

    fn cell(v: CqlValue) -> Vec<u8> {
        let mut buf = Vec::new();
        v.serialize(&mut buf).unwrap();
        buf[4..].to_vec()
    }

    #[test]
    fn test_deserialize_text_types() {
        let buf: Vec<u8> = vec![0x41];
        let ascii = deser_cql_value(&ColumnType::Ascii, &mut &buf[..]).unwrap();
        let text = deser_cql_value(&ColumnType::Text, &mut &buf[..]).unwrap();
        assert_eq!(ascii, CqlValue::Ascii("A".to_string()));
        assert_eq!(text, CqlValue::Text("A".to_string()));

        let non_ascii = "Ä".as_bytes();
        deser_cql_value(&ColumnType::Ascii, &mut &non_ascii[..]).unwrap_err();
    }

    #[test]
    fn empty_int_is_empty_value() {
        let buf: [u8; 0] = [];
        let v = deser_cql_value(&ColumnType::Int, &mut &buf[..]).unwrap();
        assert_eq!(v, CqlValue::Empty);
        let v = deser_cql_value(&ColumnType::Text, &mut &buf[..]).unwrap();
        assert_eq!(v, CqlValue::Text(String::new()));
    }

    #[test]
    fn wrong_length_is_rejected() {
        let buf = [0u8; 3];
        deser_cql_value(&ColumnType::Int, &mut &buf[..]).unwrap_err();
    }

    #[test]
    fn collections_and_nested_types() {
        let typ = ColumnType::Map(
            Box::new(ColumnType::Text),
            Box::new(ColumnType::List(Box::new(ColumnType::Int))),
        );
        let value = CqlValue::Map(vec![(
            CqlValue::Text("a".to_owned()),
            CqlValue::List(vec![CqlValue::Int(1), CqlValue::Int(2)]),
        )]);
        let buf = cell(value.clone());
        assert_eq!(deser_cql_value(&typ, &mut &buf[..]).unwrap(), value);

        let tuple_typ = ColumnType::Tuple(vec![ColumnType::Inet, ColumnType::BigInt]);
        let tuple = CqlValue::Tuple(vec![
            Some(CqlValue::Inet(IpAddr::V4(Ipv4Addr::LOCALHOST))),
            None,
        ]);
        let buf = cell(tuple.clone());
        assert_eq!(deser_cql_value(&tuple_typ, &mut &buf[..]).unwrap(), tuple);
    }

    #[test]
    fn duration_and_varint() {
        let d = CqlValue::Duration(CqlDuration {
            months: 1,
            days: -2,
            nanoseconds: 3_000_000_000_000,
        });
        let buf = cell(d.clone());
        assert_eq!(
            deser_cql_value(&ColumnType::Duration, &mut &buf[..]).unwrap(),
            d
        );

        let v = CqlValue::Varint(CqlVarint::from(-129));
        let buf = cell(v.clone());
        assert_eq!(buf, vec![0xff, 0x7f]);
        assert_eq!(deser_cql_value(&ColumnType::Varint, &mut &buf[..]).unwrap(), v);
    }

    #[test]
    fn udt_missing_trailing_field() {
        let typ = ColumnType::UserDefinedType {
            type_name: "address".to_owned(),
            keyspace: "ks".to_owned(),
            field_types: vec![
                ("street".to_owned(), ColumnType::Text),
                ("zip".to_owned(), ColumnType::Int),
            ],
        };
        let mut buf = Vec::new();
        CqlValue::Text("Main".to_owned()).serialize(&mut buf).unwrap();
        let value = deser_cql_value(&typ, &mut &buf[..]).unwrap();
        assert_eq!(
            value,
            CqlValue::UserDefinedType {
                keyspace: "ks".to_owned(),
                type_name: "address".to_owned(),
                fields: vec![
                    ("street".to_owned(), Some(CqlValue::Text("Main".to_owned()))),
                    ("zip".to_owned(), None),
                ],
            }
        );
    }

    fn users_metadata() -> ResultMetadata {
        let spec = TableSpec::new("demo", "users");
        ResultMetadata::new(vec![
            ColumnSpec::new("lastname", ColumnType::Text, spec.clone()),
            ColumnSpec::new("age", ColumnType::Int, spec),
        ])
    }

    #[test]
    fn rows_written_by_server_are_read_back() {
        let rows = Rows {
            metadata: Arc::new(users_metadata()),
            paging_state: Some(Bytes::from_static(b"\x00\x01")),
            rows_count: 2,
            rows: vec![
                Row {
                    columns: vec![Some(CqlValue::Text("Jones".to_owned())), Some(CqlValue::Int(35))],
                },
                Row {
                    columns: vec![Some(CqlValue::Text("Smith".to_owned())), None],
                },
            ],
            serialized_size: 0,
        };
        let mut buf = Vec::new();
        Result::Rows(rows.clone()).serialize(&mut buf).unwrap();

        let Result::Rows(read) = deserialize(&mut &buf[..], None).unwrap() else {
            panic!("expected rows");
        };
        assert_eq!(read.metadata, rows.metadata);
        assert_eq!(read.paging_state, rows.paging_state);
        assert_eq!(read.rows, rows.rows);
    }

    #[test]
    fn rows_without_metadata_use_cached() {
        let metadata = Arc::new(users_metadata());
        let rows = Rows {
            metadata: metadata.clone(),
            paging_state: None,
            rows_count: 1,
            rows: vec![Row {
                columns: vec![Some(CqlValue::Text("Jones".to_owned())), Some(CqlValue::Int(35))],
            }],
            serialized_size: 0,
        };
        let mut buf = Vec::new();
        types::write_int(0x0002, &mut buf);
        rows.serialize(true, &mut buf).unwrap();

        deserialize(&mut &buf[..], None).unwrap_err();
        let Result::Rows(read) = deserialize(&mut &buf[..], Some(&metadata)).unwrap() else {
            panic!("expected rows");
        };
        assert_eq!(read.rows, rows.rows);
    }

    #[test]
    fn prepared_roundtrip_keeps_pk_order() {
        let spec = TableSpec::new("demo", "users");
        let prepared = Prepared {
            id: Bytes::from_static(b"\x01\x02\x03"),
            prepared_metadata: PreparedMetadata {
                col_count: 2,
                pk_indexes: vec![
                    PartitionKeyIndex {
                        index: 0,
                        sequence: 1,
                    },
                    PartitionKeyIndex {
                        index: 1,
                        sequence: 0,
                    },
                ],
                col_specs: vec![
                    ColumnSpec::new("b", ColumnType::Int, spec.clone()),
                    ColumnSpec::new("a", ColumnType::Text, spec),
                ],
            },
            result_metadata: users_metadata(),
        };
        let mut buf = Vec::new();
        Result::Prepared(prepared.clone()).serialize(&mut buf).unwrap();
        let read = deserialize(&mut &buf[..], None).unwrap();
        assert_eq!(read, Result::Prepared(prepared));
    }

    #[test]
    fn column_type_display() {
        let typ = ColumnType::Map(
            Box::new(ColumnType::Text),
            Box::new(ColumnType::Set(Box::new(ColumnType::Uuid))),
        );
        assert_eq!(typ.to_string(), "map<text, set<uuid>>");
    }
}
