//! Values bound to statements and their serialized form.

use bytes::BufMut;

use crate::frame::frame_errors::RequestSerializationError;
use crate::frame::types::{self, RawValue};
use crate::value::CqlValue;

/// A single value bound to a bind marker.
#[derive(Debug, Clone, PartialEq)]
pub enum BoundValue {
    /// A non-null value.
    Value(CqlValue),
    /// CQL `NULL`.
    Null,
    /// The marker is left unset: the column keeps its current value.
    Unset,
}

impl BoundValue {
    pub fn as_value(&self) -> Option<&CqlValue> {
        match self {
            BoundValue::Value(v) => Some(v),
            BoundValue::Null | BoundValue::Unset => None,
        }
    }
}

/// Convenience type for leaving a marker unset: `bind((1, Unset))`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unset;

impl From<Unset> for BoundValue {
    fn from(_: Unset) -> Self {
        BoundValue::Unset
    }
}

impl From<CqlValue> for BoundValue {
    fn from(v: CqlValue) -> Self {
        BoundValue::Value(v)
    }
}

impl From<Option<CqlValue>> for BoundValue {
    fn from(v: Option<CqlValue>) -> Self {
        v.map_or(BoundValue::Null, BoundValue::Value)
    }
}

macro_rules! impl_bound_value_from {
    ($($t:ty),* $(,)?) => {
        $(
            impl From<$t> for BoundValue {
                fn from(v: $t) -> Self {
                    BoundValue::Value(v.into())
                }
            }

            impl From<Option<$t>> for BoundValue {
                fn from(v: Option<$t>) -> Self {
                    v.map_or(BoundValue::Null, |v| BoundValue::Value(v.into()))
                }
            }
        )*
    };
}

impl_bound_value_from!(
    bool,
    i8,
    i16,
    i32,
    i64,
    f32,
    f64,
    String,
    &str,
    Vec<u8>,
    &[u8],
    uuid::Uuid,
    std::net::IpAddr,
    crate::value::Counter,
    crate::value::CqlDecimal,
    crate::value::CqlVarint,
    crate::value::CqlDate,
    crate::value::CqlTimestamp,
    crate::value::CqlTime,
    crate::value::CqlDuration,
    crate::value::CqlTimeuuid,
    Vec<String>,
    Vec<&str>,
    Vec<i32>,
    Vec<i64>,
    Vec<CqlValue>,
);

/// A list of values which can be bound to a statement.
///
/// Implemented for tuples of up to 16 elements, slices, vectors and `()`.
pub trait ValueList {
    fn bound_values(self) -> Vec<BoundValue>;
}

impl ValueList for () {
    fn bound_values(self) -> Vec<BoundValue> {
        Vec::new()
    }
}

impl ValueList for Vec<BoundValue> {
    fn bound_values(self) -> Vec<BoundValue> {
        self
    }
}

impl ValueList for Vec<CqlValue> {
    fn bound_values(self) -> Vec<BoundValue> {
        self.into_iter().map(BoundValue::Value).collect()
    }
}

impl ValueList for &[CqlValue] {
    fn bound_values(self) -> Vec<BoundValue> {
        self.iter().cloned().map(BoundValue::Value).collect()
    }
}

macro_rules! impl_value_list_for_tuple {
    ($($ti:ident),+) => {
        impl<$($ti),+> ValueList for ($($ti,)+)
        where
            $($ti: Into<BoundValue>),+
        {
            #[allow(non_snake_case)]
            fn bound_values(self) -> Vec<BoundValue> {
                let ($($ti,)+) = self;
                vec![$($ti.into()),+]
            }
        }
    };
}

impl_value_list_for_tuple!(T0);
impl_value_list_for_tuple!(T0, T1);
impl_value_list_for_tuple!(T0, T1, T2);
impl_value_list_for_tuple!(T0, T1, T2, T3);
impl_value_list_for_tuple!(T0, T1, T2, T3, T4);
impl_value_list_for_tuple!(T0, T1, T2, T3, T4, T5);
impl_value_list_for_tuple!(T0, T1, T2, T3, T4, T5, T6);
impl_value_list_for_tuple!(T0, T1, T2, T3, T4, T5, T6, T7);
impl_value_list_for_tuple!(T0, T1, T2, T3, T4, T5, T6, T7, T8);
impl_value_list_for_tuple!(T0, T1, T2, T3, T4, T5, T6, T7, T8, T9);
impl_value_list_for_tuple!(T0, T1, T2, T3, T4, T5, T6, T7, T8, T9, T10);
impl_value_list_for_tuple!(T0, T1, T2, T3, T4, T5, T6, T7, T8, T9, T10, T11);
impl_value_list_for_tuple!(T0, T1, T2, T3, T4, T5, T6, T7, T8, T9, T10, T11, T12);
impl_value_list_for_tuple!(T0, T1, T2, T3, T4, T5, T6, T7, T8, T9, T10, T11, T12, T13);
impl_value_list_for_tuple!(T0, T1, T2, T3, T4, T5, T6, T7, T8, T9, T10, T11, T12, T13, T14);
impl_value_list_for_tuple!(T0, T1, T2, T3, T4, T5, T6, T7, T8, T9, T10, T11, T12, T13, T14, T15);

/// Values serialized in `[value]` notation, ready to be put into a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SerializedValues {
    serialized_values: Vec<u8>,
    element_count: u16,
}

impl SerializedValues {
    /// Constant empty list, for requests without bound values.
    pub const EMPTY: &'static SerializedValues = &SerializedValues::new();

    pub const fn new() -> Self {
        SerializedValues {
            serialized_values: Vec::new(),
            element_count: 0,
        }
    }

    pub fn from_bound_values<'a>(
        values: impl IntoIterator<Item = &'a BoundValue>,
    ) -> Result<Self, RequestSerializationError> {
        let mut result = Self::new();
        for value in values {
            result.add_value(value)?;
        }
        Ok(result)
    }

    pub fn add_value(&mut self, value: &BoundValue) -> Result<(), RequestSerializationError> {
        if self.element_count == u16::MAX {
            return Err(RequestSerializationError::TooManyValues(
                self.element_count as usize + 1,
            ));
        }
        match value {
            BoundValue::Value(v) => v.serialize(&mut self.serialized_values)?,
            BoundValue::Null => self.serialized_values.put_i32(-1),
            BoundValue::Unset => self.serialized_values.put_i32(-2),
        }
        self.element_count += 1;
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.element_count == 0
    }

    pub fn element_count(&self) -> u16 {
        self.element_count
    }

    pub fn buffer_size(&self) -> usize {
        self.serialized_values.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = RawValue<'_>> {
        let mut buf = &self.serialized_values[..];
        std::iter::from_fn(move || {
            if buf.is_empty() {
                return None;
            }
            types::read_value(&mut buf).ok()
        })
    }

    /// Writes the values count followed by the values.
    pub fn write_to_request(&self, buf: &mut impl BufMut) {
        buf.put_u16(self.element_count);
        buf.put_slice(&self.serialized_values[..]);
    }

    /// Reads values written by [`SerializedValues::write_to_request`].
    pub fn new_from_frame(buf: &mut &[u8]) -> Result<Self, crate::frame::frame_errors::ParseError> {
        let element_count = types::read_short(buf)?;
        let start = *buf;
        for _ in 0..element_count {
            types::read_value(buf)?;
        }
        let consumed = start.len() - buf.len();
        Ok(SerializedValues {
            serialized_values: start[..consumed].to_vec(),
            element_count,
        })
    }
}
