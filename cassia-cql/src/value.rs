//! Owned representation of CQL values.
//!
//! [`CqlValue`] is a tagged union covering every native and collection type of
//! protocol v4. Values read from result rows are produced by
//! [`crate::frame::response::result::deser_cql_value`]; values bound to
//! statements are written with [`CqlValue::serialize`].

use std::net::IpAddr;

use bytes::BufMut;
use chrono_04::{DateTime, NaiveDate, NaiveTime, TimeDelta, Timelike, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::frame::response::result::ColumnType;
use crate::frame::types;

/// A value of a `counter` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Counter(pub i64);

/// Native CQL `varint`: a two's complement big-endian integer of arbitrary length.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CqlVarint(Vec<u8>);

impl CqlVarint {
    pub fn from_signed_bytes_be(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_signed_bytes_be_slice(&self) -> &[u8] {
        &self.0
    }
}

impl From<i64> for CqlVarint {
    fn from(v: i64) -> Self {
        // Minimal two's complement encoding
        let bytes = v.to_be_bytes();
        let mut start = 0;
        while start < 7 {
            let (b, next) = (bytes[start], bytes[start + 1]);
            let redundant = (b == 0x00 && next & 0x80 == 0) || (b == 0xff && next & 0x80 != 0);
            if !redundant {
                break;
            }
            start += 1;
        }
        Self(bytes[start..].to_vec())
    }
}

/// Native CQL `decimal`: an unscaled [`CqlVarint`] and a 32-bit scale.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CqlDecimal {
    int_val: CqlVarint,
    scale: i32,
}

impl CqlDecimal {
    pub fn from_signed_be_bytes_and_exponent(bytes: Vec<u8>, scale: i32) -> Self {
        Self {
            int_val: CqlVarint(bytes),
            scale,
        }
    }

    pub fn as_signed_be_bytes_slice_and_exponent(&self) -> (&[u8], i32) {
        (self.int_val.as_signed_bytes_be_slice(), self.scale)
    }
}

/// Native CQL `date`: days since -5877641-06-23, i.e. 2^31 days before the unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, Debug, PartialOrd, Ord, Hash)]
pub struct CqlDate(pub u32);

/// Native CQL `timestamp`: milliseconds since the unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, Debug, PartialOrd, Ord, Hash)]
pub struct CqlTimestamp(pub i64);

/// Native CQL `time`: nanoseconds since midnight.
#[derive(Clone, Copy, PartialEq, Eq, Debug, PartialOrd, Ord, Hash)]
pub struct CqlTime(pub i64);

/// Native CQL `duration`.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub struct CqlDuration {
    pub months: i32,
    pub days: i32,
    pub nanoseconds: i64,
}

/// Native CQL `timeuuid`: a version 1 UUID.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub struct CqlTimeuuid(Uuid);

impl CqlTimeuuid {
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for CqlTimeuuid {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

const DATE_EPOCH_OFFSET_DAYS: i64 = 1 << 31;

impl From<NaiveDate> for CqlDate {
    fn from(value: NaiveDate) -> Self {
        let unix_epoch = DateTime::<Utc>::UNIX_EPOCH.date_naive();
        let days = value.signed_duration_since(unix_epoch).num_days() + DATE_EPOCH_OFFSET_DAYS;
        // Every NaiveDate fits in the u32 range.
        CqlDate(days as u32)
    }
}

impl TryFrom<CqlDate> for NaiveDate {
    type Error = ValueOverflow;

    fn try_from(value: CqlDate) -> Result<Self, Self::Error> {
        let days_since_epoch = TimeDelta::try_days(value.0 as i64 - DATE_EPOCH_OFFSET_DAYS)
            .ok_or(ValueOverflow)?;
        DateTime::<Utc>::UNIX_EPOCH
            .date_naive()
            .checked_add_signed(days_since_epoch)
            .ok_or(ValueOverflow)
    }
}

impl From<DateTime<Utc>> for CqlTimestamp {
    fn from(value: DateTime<Utc>) -> Self {
        Self(value.timestamp_millis())
    }
}

impl TryFrom<CqlTimestamp> for DateTime<Utc> {
    type Error = ValueOverflow;

    fn try_from(value: CqlTimestamp) -> Result<Self, Self::Error> {
        DateTime::from_timestamp_millis(value.0).ok_or(ValueOverflow)
    }
}

impl From<NaiveTime> for CqlTime {
    fn from(value: NaiveTime) -> Self {
        let nanos = value.num_seconds_from_midnight() as i64 * 1_000_000_000
            + value.nanosecond() as i64;
        Self(nanos)
    }
}

impl TryFrom<CqlTime> for NaiveTime {
    type Error = ValueOverflow;

    fn try_from(value: CqlTime) -> Result<Self, Self::Error> {
        let secs = value.0.div_euclid(1_000_000_000);
        let nanos = value.0.rem_euclid(1_000_000_000);
        if !(0..86_400).contains(&secs) {
            return Err(ValueOverflow);
        }
        NaiveTime::from_num_seconds_from_midnight_opt(secs as u32, nanos as u32)
            .ok_or(ValueOverflow)
    }
}

/// A CQL value could not be represented by the requested Rust type.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("Value is out of the representable range")]
pub struct ValueOverflow;

/// A serialized value was longer than the protocol allows (i32::MAX bytes).
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("Value is too big to be sent in a request - max 2GiB allowed")]
pub struct ValueTooBig;

impl From<std::num::TryFromIntError> for ValueTooBig {
    fn from(_: std::num::TryFromIntError) -> Self {
        ValueTooBig
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum CqlValue {
    Ascii(String),
    Boolean(bool),
    Blob(Vec<u8>),
    Counter(Counter),
    Decimal(CqlDecimal),
    Date(CqlDate),
    Double(f64),
    Duration(CqlDuration),
    /// A value of length 0 of a type that normally has content (e.g. an empty `int`).
    Empty,
    Float(f32),
    Int(i32),
    BigInt(i64),
    Text(String),
    Timestamp(CqlTimestamp),
    Inet(IpAddr),
    List(Vec<CqlValue>),
    Map(Vec<(CqlValue, CqlValue)>),
    Set(Vec<CqlValue>),
    UserDefinedType {
        keyspace: String,
        type_name: String,
        /// Order of `fields` vector must match the order of fields as defined in the UDT.
        fields: Vec<(String, Option<CqlValue>)>,
    },
    SmallInt(i16),
    TinyInt(i8),
    Time(CqlTime),
    Timeuuid(CqlTimeuuid),
    Tuple(Vec<Option<CqlValue>>),
    Uuid(Uuid),
    Varint(CqlVarint),
}

impl CqlValue {
    pub fn as_ascii(&self) -> Option<&String> {
        match self {
            Self::Ascii(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_cql_date(&self) -> Option<CqlDate> {
        match self {
            Self::Date(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_cql_timestamp(&self) -> Option<CqlTimestamp> {
        match self {
            Self::Timestamp(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_cql_time(&self) -> Option<CqlTime> {
        match self {
            Self::Time(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_cql_duration(&self) -> Option<CqlDuration> {
        match self {
            Self::Duration(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_counter(&self) -> Option<Counter> {
        match self {
            Self::Counter(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            Self::Boolean(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            Self::Double(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            Self::Uuid(u) => Some(*u),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f32> {
        match self {
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bigint(&self) -> Option<i64> {
        match self {
            Self::BigInt(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_tinyint(&self) -> Option<i8> {
        match self {
            Self::TinyInt(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_smallint(&self) -> Option<i16> {
        match self {
            Self::SmallInt(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&Vec<u8>> {
        match self {
            Self::Blob(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&String> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_timeuuid(&self) -> Option<CqlTimeuuid> {
        match self {
            Self::Timeuuid(u) => Some(*u),
            _ => None,
        }
    }

    pub fn into_string(self) -> Option<String> {
        match self {
            Self::Ascii(s) => Some(s),
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_inet(&self) -> Option<IpAddr> {
        match self {
            Self::Inet(a) => Some(*a),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&Vec<CqlValue>> {
        match self {
            Self::List(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_set(&self) -> Option<&Vec<CqlValue>> {
        match self {
            Self::Set(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Vec<(CqlValue, CqlValue)>> {
        match self {
            Self::Map(s) => Some(s),
            _ => None,
        }
    }

    pub fn into_vec(self) -> Option<Vec<CqlValue>> {
        match self {
            Self::List(s) => Some(s),
            Self::Set(s) => Some(s),
            _ => None,
        }
    }

    /// Short CQL name of the value's kind, used in error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            CqlValue::Ascii(_) => "ascii",
            CqlValue::Boolean(_) => "boolean",
            CqlValue::Blob(_) => "blob",
            CqlValue::Counter(_) => "counter",
            CqlValue::Decimal(_) => "decimal",
            CqlValue::Date(_) => "date",
            CqlValue::Double(_) => "double",
            CqlValue::Duration(_) => "duration",
            CqlValue::Empty => "empty",
            CqlValue::Float(_) => "float",
            CqlValue::Int(_) => "int",
            CqlValue::BigInt(_) => "bigint",
            CqlValue::Text(_) => "text",
            CqlValue::Timestamp(_) => "timestamp",
            CqlValue::Inet(_) => "inet",
            CqlValue::List(_) => "list",
            CqlValue::Map(_) => "map",
            CqlValue::Set(_) => "set",
            CqlValue::UserDefinedType { .. } => "udt",
            CqlValue::SmallInt(_) => "smallint",
            CqlValue::TinyInt(_) => "tinyint",
            CqlValue::Time(_) => "time",
            CqlValue::Timeuuid(_) => "timeuuid",
            CqlValue::Tuple(_) => "tuple",
            CqlValue::Uuid(_) => "uuid",
            CqlValue::Varint(_) => "varint",
        }
    }

    /// Checks whether this value may be sent for a column (or bind marker) of type `typ`.
    ///
    /// Matching is strict: integers of different widths do not match each other.
    /// The only conversions accepted are the ones the server performs losslessly:
    /// text into ascii columns (if the string is ASCII), `bigint` into counters, and
    /// version 1 UUIDs into timeuuid columns.
    pub fn is_compatible_with(&self, typ: &ColumnType) -> bool {
        match (self, typ) {
            (CqlValue::Empty, _) => true,
            (CqlValue::Ascii(_), ColumnType::Ascii | ColumnType::Text) => true,
            (CqlValue::Text(s), ColumnType::Ascii) => s.is_ascii(),
            (CqlValue::Text(_), ColumnType::Text) => true,
            (CqlValue::Boolean(_), ColumnType::Boolean) => true,
            (CqlValue::Blob(_), ColumnType::Blob) => true,
            (CqlValue::Counter(_) | CqlValue::BigInt(_), ColumnType::Counter) => true,
            (CqlValue::Decimal(_), ColumnType::Decimal) => true,
            (CqlValue::Date(_), ColumnType::Date) => true,
            (CqlValue::Double(_), ColumnType::Double) => true,
            (CqlValue::Duration(_), ColumnType::Duration) => true,
            (CqlValue::Float(_), ColumnType::Float) => true,
            (CqlValue::Int(_), ColumnType::Int) => true,
            (CqlValue::BigInt(_), ColumnType::BigInt) => true,
            (CqlValue::Timestamp(_), ColumnType::Timestamp) => true,
            (CqlValue::Inet(_), ColumnType::Inet) => true,
            (CqlValue::SmallInt(_), ColumnType::SmallInt) => true,
            (CqlValue::TinyInt(_), ColumnType::TinyInt) => true,
            (CqlValue::Time(_), ColumnType::Time) => true,
            (CqlValue::Timeuuid(_), ColumnType::Timeuuid | ColumnType::Uuid) => true,
            (CqlValue::Uuid(u), ColumnType::Timeuuid) => u.get_version_num() == 1,
            (CqlValue::Uuid(_), ColumnType::Uuid) => true,
            (CqlValue::Varint(_), ColumnType::Varint) => true,
            (CqlValue::List(elems), ColumnType::List(elem_type))
            | (CqlValue::Set(elems), ColumnType::Set(elem_type)) => {
                elems.iter().all(|e| e.is_compatible_with(elem_type))
            }
            // A list literal is accepted for a set column and vice versa.
            (CqlValue::List(elems), ColumnType::Set(elem_type))
            | (CqlValue::Set(elems), ColumnType::List(elem_type)) => {
                elems.iter().all(|e| e.is_compatible_with(elem_type))
            }
            (CqlValue::Map(entries), ColumnType::Map(key_type, value_type)) => entries
                .iter()
                .all(|(k, v)| k.is_compatible_with(key_type) && v.is_compatible_with(value_type)),
            (CqlValue::Tuple(elems), ColumnType::Tuple(elem_types)) => {
                elems.len() <= elem_types.len()
                    && elems.iter().zip(elem_types).all(|(e, t)| match e {
                        Some(e) => e.is_compatible_with(t),
                        None => true,
                    })
            }
            (
                CqlValue::UserDefinedType { fields, .. },
                ColumnType::UserDefinedType { field_types, .. },
            ) => fields.iter().all(|(name, value)| {
                let Some((_, field_type)) = field_types.iter().find(|(n, _)| n == name) else {
                    return false;
                };
                value
                    .as_ref()
                    .map_or(true, |v| v.is_compatible_with(field_type))
            }),
            _ => false,
        }
    }

    /// Writes the value in `[bytes]` notation: a 4-byte length followed by the contents.
    pub fn serialize(&self, buf: &mut Vec<u8>) -> Result<(), ValueTooBig> {
        let len_pos = buf.len();
        buf.put_i32(0);
        self.serialize_contents(buf)?;
        let written: i32 = (buf.len() - len_pos - 4).try_into()?;
        buf[len_pos..len_pos + 4].copy_from_slice(&written.to_be_bytes());
        Ok(())
    }

    fn serialize_contents(&self, buf: &mut Vec<u8>) -> Result<(), ValueTooBig> {
        match self {
            CqlValue::Ascii(s) | CqlValue::Text(s) => buf.put_slice(s.as_bytes()),
            CqlValue::Boolean(b) => buf.put_u8(u8::from(*b)),
            CqlValue::Blob(b) => buf.put_slice(b),
            CqlValue::Counter(c) => buf.put_i64(c.0),
            CqlValue::Decimal(d) => {
                let (bytes, scale) = d.as_signed_be_bytes_slice_and_exponent();
                buf.put_i32(scale);
                buf.put_slice(bytes);
            }
            CqlValue::Date(d) => buf.put_u32(d.0),
            CqlValue::Double(d) => buf.put_f64(*d),
            CqlValue::Duration(d) => {
                put_vint(buf, d.months as i64);
                put_vint(buf, d.days as i64);
                put_vint(buf, d.nanoseconds);
            }
            CqlValue::Empty => {}
            CqlValue::Float(f) => buf.put_f32(*f),
            CqlValue::Int(i) => buf.put_i32(*i),
            CqlValue::BigInt(i) => buf.put_i64(*i),
            CqlValue::Timestamp(t) => buf.put_i64(t.0),
            CqlValue::Inet(addr) => match addr {
                IpAddr::V4(v4) => buf.put_slice(&v4.octets()),
                IpAddr::V6(v6) => buf.put_slice(&v6.octets()),
            },
            CqlValue::List(elems) | CqlValue::Set(elems) => {
                buf.put_i32(elems.len().try_into()?);
                for elem in elems {
                    elem.serialize(buf)?;
                }
            }
            CqlValue::Map(entries) => {
                buf.put_i32(entries.len().try_into()?);
                for (k, v) in entries {
                    k.serialize(buf)?;
                    v.serialize(buf)?;
                }
            }
            CqlValue::UserDefinedType { fields, .. } => {
                for (_, value) in fields {
                    serialize_opt(value.as_ref(), buf)?;
                }
            }
            CqlValue::SmallInt(i) => buf.put_i16(*i),
            CqlValue::TinyInt(i) => buf.put_i8(*i),
            CqlValue::Time(t) => buf.put_i64(t.0),
            CqlValue::Timeuuid(u) => types::write_uuid(u.as_uuid(), buf),
            CqlValue::Tuple(elems) => {
                for elem in elems {
                    serialize_opt(elem.as_ref(), buf)?;
                }
            }
            CqlValue::Uuid(u) => types::write_uuid(u, buf),
            CqlValue::Varint(v) => buf.put_slice(v.as_signed_bytes_be_slice()),
        }
        Ok(())
    }
}

fn serialize_opt(value: Option<&CqlValue>, buf: &mut Vec<u8>) -> Result<(), ValueTooBig> {
    match value {
        Some(v) => v.serialize(buf),
        None => {
            buf.put_i32(-1);
            Ok(())
        }
    }
}

// Zig-zag encoded unsigned vint, as used by the duration type.
fn put_vint(buf: &mut Vec<u8>, v: i64) {
    let mut zigzag = ((v << 1) ^ (v >> 63)) as u64;
    let bits = 64 - zigzag.leading_zeros().min(63) as usize;
    let extra_bytes = (bits.saturating_sub(1)) / 7;
    let extra_bytes = extra_bytes.min(8);
    let mut out = [0u8; 9];
    for i in (0..=extra_bytes).rev() {
        out[i] = (zigzag & 0xff) as u8;
        zigzag >>= 8;
    }
    out[0] |= !(0xff_u16 >> extra_bytes) as u8;
    buf.put_slice(&out[..=extra_bytes]);
}

pub(crate) fn read_vint(buf: &mut &[u8]) -> Option<i64> {
    let (&first, rest) = buf.split_first()?;
    let extra_bytes = first.leading_ones() as usize;
    if rest.len() < extra_bytes {
        return None;
    }
    let mut v: u64 = if extra_bytes == 8 {
        0
    } else {
        (first & (0xff_u8 >> extra_bytes)) as u64
    };
    for b in &rest[..extra_bytes] {
        v = (v << 8) | *b as u64;
    }
    *buf = &rest[extra_bytes..];
    Some(((v >> 1) as i64) ^ -((v & 1) as i64))
}

macro_rules! impl_from_native {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$t> for CqlValue {
                fn from(v: $t) -> Self {
                    CqlValue::$variant(v.into())
                }
            }
        )*
    };
}

impl_from_native!(
    bool => Boolean,
    i8 => TinyInt,
    i16 => SmallInt,
    i32 => Int,
    i64 => BigInt,
    f32 => Float,
    f64 => Double,
    String => Text,
    Vec<u8> => Blob,
    Uuid => Uuid,
    IpAddr => Inet,
    Counter => Counter,
    CqlDecimal => Decimal,
    CqlVarint => Varint,
    CqlDate => Date,
    CqlTimestamp => Timestamp,
    CqlTime => Time,
    CqlDuration => Duration,
    CqlTimeuuid => Timeuuid,
    NaiveDate => Date,
    NaiveTime => Time,
    DateTime<Utc> => Timestamp,
);

impl From<&str> for CqlValue {
    fn from(v: &str) -> Self {
        CqlValue::Text(v.to_owned())
    }
}

impl From<&[u8]> for CqlValue {
    fn from(v: &[u8]) -> Self {
        CqlValue::Blob(v.to_vec())
    }
}

impl<T: Into<CqlValue>> From<Vec<T>> for CqlValue
where
    T: NotBytes,
{
    fn from(v: Vec<T>) -> Self {
        CqlValue::List(v.into_iter().map(Into::into).collect())
    }
}

/// Marker for element types of `Vec<T>` that convert into a CQL `list`.
///
/// `Vec<u8>` is a `blob`, so `u8` does not implement it.
pub trait NotBytes {}

macro_rules! impl_not_bytes {
    ($($t:ty),*) => { $(impl NotBytes for $t {})* };
}
impl_not_bytes!(
    bool, i8, i16, i32, i64, f32, f64, String, &str, Uuid, IpAddr, CqlValue, CqlDate,
    CqlTimestamp, CqlTime, CqlTimeuuid, Counter
);

#[cfg(test)]
mod tests {
    use super::*;

    fn serialized(v: &CqlValue) -> Vec<u8> {
        let mut buf = Vec::new();
        v.serialize(&mut buf).unwrap();
        buf
    }

    #[test]
    fn serialize_int_and_text() {
        assert_eq!(serialized(&CqlValue::Int(35)), vec![0, 0, 0, 4, 0, 0, 0, 35]);
        assert_eq!(
            serialized(&CqlValue::Text("Jones".to_owned())),
            vec![0, 0, 0, 5, b'J', b'o', b'n', b'e', b's']
        );
    }

    #[test]
    fn serialize_list_of_ints() {
        let v = CqlValue::from(vec![1_i32, 2]);
        assert_eq!(
            serialized(&v),
            vec![0, 0, 0, 20, 0, 0, 0, 2, 0, 0, 0, 4, 0, 0, 0, 1, 0, 0, 0, 4, 0, 0, 0, 2]
        );
    }

    #[test]
    fn compatibility_is_strict_for_integers() {
        assert!(CqlValue::Int(1).is_compatible_with(&ColumnType::Int));
        assert!(!CqlValue::Int(1).is_compatible_with(&ColumnType::BigInt));
        assert!(!CqlValue::BigInt(1).is_compatible_with(&ColumnType::Int));
        assert!(CqlValue::BigInt(1).is_compatible_with(&ColumnType::Counter));
        assert!(!CqlValue::Text("35".to_owned()).is_compatible_with(&ColumnType::Int));
    }

    #[test]
    fn text_is_accepted_for_ascii_only_when_ascii() {
        assert!(CqlValue::from("abc").is_compatible_with(&ColumnType::Ascii));
        assert!(!CqlValue::from("kremówki").is_compatible_with(&ColumnType::Ascii));
        assert!(CqlValue::from("kremówki").is_compatible_with(&ColumnType::Text));
    }

    #[test]
    fn collection_compatibility_checks_elements() {
        let list_type = ColumnType::List(Box::new(ColumnType::Text));
        assert!(CqlValue::from(vec!["a", "b"]).is_compatible_with(&list_type));
        assert!(!CqlValue::from(vec![1_i32]).is_compatible_with(&list_type));

        let map_type = ColumnType::Map(Box::new(ColumnType::Text), Box::new(ColumnType::Int));
        let map = CqlValue::Map(vec![(CqlValue::from("a"), CqlValue::Int(1))]);
        assert!(map.is_compatible_with(&map_type));
    }

    #[test]
    fn timeuuid_requires_version_one() {
        let v4 = Uuid::from_u128(0x0000_0000_0000_4000_8000_0000_0000_0000);
        assert!(!CqlValue::Uuid(v4).is_compatible_with(&ColumnType::Timeuuid));
        let v1 = Uuid::parse_str("8e14e760-7fa8-11eb-bc66-000000000001").unwrap();
        assert!(CqlValue::Uuid(v1).is_compatible_with(&ColumnType::Timeuuid));
    }

    #[test]
    fn varint_minimal_encoding() {
        assert_eq!(CqlVarint::from(0).as_signed_bytes_be_slice(), &[0x00]);
        assert_eq!(CqlVarint::from(127).as_signed_bytes_be_slice(), &[0x7f]);
        assert_eq!(CqlVarint::from(128).as_signed_bytes_be_slice(), &[0x00, 0x80]);
        assert_eq!(CqlVarint::from(-1).as_signed_bytes_be_slice(), &[0xff]);
        assert_eq!(CqlVarint::from(-129).as_signed_bytes_be_slice(), &[0xff, 0x7f]);
    }

    #[test]
    fn vint_roundtrip() {
        for v in [0_i64, 1, -1, 63, -64, 64, 1_000_000, i64::MAX, i64::MIN] {
            let mut buf = Vec::new();
            put_vint(&mut buf, v);
            let mut slice = &buf[..];
            assert_eq!(read_vint(&mut slice), Some(v), "value {}", v);
            assert!(slice.is_empty());
        }
    }

    #[test]
    fn date_conversion() {
        let date = NaiveDate::from_ymd_opt(1970, 1, 2).unwrap();
        let cql: CqlDate = date.into();
        assert_eq!(cql.0, (1 << 31) + 1);
        assert_eq!(NaiveDate::try_from(cql).unwrap(), date);
    }

    #[test]
    fn time_conversion_rejects_out_of_range() {
        assert!(NaiveTime::try_from(CqlTime(86_400 * 1_000_000_000)).is_err());
        let t = NaiveTime::from_hms_nano_opt(13, 14, 15, 16).unwrap();
        assert_eq!(NaiveTime::try_from(CqlTime::from(t)).unwrap(), t);
    }
}
