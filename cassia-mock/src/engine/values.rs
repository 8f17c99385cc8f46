//! Turning literals and bound values into typed cells, and ordering cells.

use std::cmp::Ordering;
use std::net::IpAddr;

use cassia_cql::frame::response::result::{deser_cql_value, ColumnType};
use cassia_cql::frame::types::RawValue;
use cassia_cql::value::{Counter, CqlDate, CqlDecimal, CqlTimestamp, CqlValue, CqlVarint};

use super::parser::Term;
use super::{invalid, EngineResult};

/// A term evaluated against the type of the column it is assigned or compared to.
#[derive(Debug, Clone, PartialEq)]
pub(super) enum Resolved {
    Value(CqlValue),
    Null,
    /// The marker was bound to "unset"; the column is left untouched.
    Unset,
}

impl Resolved {
    pub(super) fn into_cell(self) -> Option<CqlValue> {
        match self {
            Resolved::Value(v) => Some(v),
            Resolved::Null | Resolved::Unset => None,
        }
    }
}

/// Evaluates `term` as a value of type `typ`. Markers are looked up in `bound` by position.
pub(super) fn resolve(
    term: &Term,
    typ: &ColumnType,
    column: &str,
    bound: &[RawValue<'_>],
) -> EngineResult<Resolved> {
    let mismatch = |what: &str| {
        invalid(format!(
            "Invalid {} constant for \"{}\" of type {}",
            what, column, typ
        ))
    };

    let value = match term {
        Term::Null => return Ok(Resolved::Null),
        Term::Marker { index, .. } => {
            let raw = bound.get(*index).ok_or_else(|| {
                invalid(format!("No value bound for marker {} ({})", index, column))
            })?;
            return match raw {
                RawValue::Null => Ok(Resolved::Null),
                RawValue::Unset => Ok(Resolved::Unset),
                RawValue::Value(bytes) => {
                    let mut contents: &[u8] = bytes;
                    deser_cql_value(typ, &mut contents)
                        .map(|v| Resolved::Value(normalize(v, typ)))
                        .map_err(|err| {
                            invalid(format!("Exception while binding column {}: {}", column, err))
                        })
                }
            };
        }
        Term::Str(s) => match typ {
            ColumnType::Text => CqlValue::Text(s.clone()),
            ColumnType::Ascii if s.is_ascii() => CqlValue::Ascii(s.clone()),
            ColumnType::Inet => CqlValue::Inet(
                s.parse::<IpAddr>()
                    .map_err(|_| mismatch("STRING"))?,
            ),
            ColumnType::Date => CqlValue::Date(parse_date(s).ok_or_else(|| mismatch("STRING"))?),
            _ => return Err(mismatch("STRING")),
        },
        Term::Number(n) => number(n, typ).ok_or_else(|| mismatch("INTEGER or FLOAT"))?,
        Term::Bool(b) => match typ {
            ColumnType::Boolean => CqlValue::Boolean(*b),
            _ => return Err(mismatch("BOOLEAN")),
        },
        Term::Uuid(u) => match typ {
            ColumnType::Uuid => CqlValue::Uuid(*u),
            ColumnType::Timeuuid if u.get_version_num() == 1 => CqlValue::Timeuuid((*u).into()),
            _ => return Err(mismatch("UUID")),
        },
        Term::Blob(b) => match typ {
            ColumnType::Blob => CqlValue::Blob(b.clone()),
            _ => return Err(mismatch("HEX")),
        },
        Term::List(elements) | Term::Set(elements) => match typ {
            ColumnType::List(element_type) => {
                CqlValue::List(resolve_elements(elements, element_type, column, bound)?)
            }
            ColumnType::Set(element_type) => {
                CqlValue::Set(resolve_elements(elements, element_type, column, bound)?)
            }
            _ => return Err(mismatch("collection")),
        },
        Term::Map(entries) => match typ {
            ColumnType::Map(key_type, value_type) => {
                let mut resolved = Vec::with_capacity(entries.len());
                for (key, value) in entries {
                    let key = resolve(key, key_type, column, bound)?
                        .into_cell()
                        .ok_or_else(|| invalid("null is not supported inside collections"))?;
                    let value = resolve(value, value_type, column, bound)?
                        .into_cell()
                        .ok_or_else(|| invalid("null is not supported inside collections"))?;
                    resolved.push((key, value));
                }
                CqlValue::Map(resolved)
            }
            ColumnType::List(_) if entries.is_empty() => CqlValue::List(Vec::new()),
            ColumnType::Set(_) if entries.is_empty() => CqlValue::Set(Vec::new()),
            _ => return Err(mismatch("map")),
        },
    };

    Ok(Resolved::Value(normalize(value, typ)))
}

fn resolve_elements(
    elements: &[Term],
    typ: &ColumnType,
    column: &str,
    bound: &[RawValue<'_>],
) -> EngineResult<Vec<CqlValue>> {
    elements
        .iter()
        .map(|element| {
            resolve(element, typ, column, bound)?
                .into_cell()
                .ok_or_else(|| invalid("null is not supported inside collections"))
        })
        .collect()
}

/// Brings a value into the canonical form the column stores:
/// sets sorted and deduplicated, maps sorted by key.
pub(super) fn normalize(value: CqlValue, typ: &ColumnType) -> CqlValue {
    match (value, typ) {
        (CqlValue::Set(mut elements) | CqlValue::List(mut elements), ColumnType::Set(_)) => {
            elements.sort_by(compare_or_equal);
            elements.dedup();
            CqlValue::Set(elements)
        }
        (CqlValue::Set(elements), ColumnType::List(_)) => CqlValue::List(elements),
        (CqlValue::Map(mut entries), ColumnType::Map(..)) => {
            entries.sort_by(|(a, _), (b, _)| compare_or_equal(a, b));
            entries.dedup_by(|(a, _), (b, _)| a == b);
            CqlValue::Map(entries)
        }
        (CqlValue::BigInt(n), ColumnType::Counter) => CqlValue::Counter(Counter(n)),
        (value, _) => value,
    }
}

fn number(n: &str, typ: &ColumnType) -> Option<CqlValue> {
    let value = match typ {
        ColumnType::Int => CqlValue::Int(n.parse().ok()?),
        ColumnType::BigInt => CqlValue::BigInt(n.parse().ok()?),
        ColumnType::Counter => CqlValue::Counter(Counter(n.parse().ok()?)),
        ColumnType::SmallInt => CqlValue::SmallInt(n.parse().ok()?),
        ColumnType::TinyInt => CqlValue::TinyInt(n.parse().ok()?),
        ColumnType::Varint => CqlValue::Varint(CqlVarint::from(n.parse::<i64>().ok()?)),
        ColumnType::Timestamp => CqlValue::Timestamp(CqlTimestamp(n.parse().ok()?)),
        ColumnType::Float => CqlValue::Float(n.parse().ok()?),
        ColumnType::Double => CqlValue::Double(n.parse().ok()?),
        ColumnType::Decimal => CqlValue::Decimal(decimal(n)?),
        _ => return None,
    };
    Some(value)
}

/// Plain decimal notation only (`-12.50`), no exponent.
fn decimal(n: &str) -> Option<CqlDecimal> {
    let (int_part, frac_part) = n.split_once('.').unwrap_or((n, ""));
    let unscaled: i64 = format!("{}{}", int_part, frac_part).parse().ok()?;
    let scale = i32::try_from(frac_part.len()).ok()?;
    let varint = CqlVarint::from(unscaled);
    Some(CqlDecimal::from_signed_be_bytes_and_exponent(
        varint.as_signed_bytes_be_slice().to_vec(),
        scale,
    ))
}

/// `yyyy-mm-dd` into the CQL date representation (days since the epoch, offset by 2^31).
fn parse_date(s: &str) -> Option<CqlDate> {
    let mut parts = s.splitn(3, '-');
    let year: i64 = parts.next()?.parse().ok()?;
    let month: i64 = parts.next()?.parse().ok()?;
    let day: i64 = parts.next()?.parse().ok()?;
    if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
        return None;
    }

    // Days from civil, proleptic Gregorian calendar.
    let y = if month <= 2 { year - 1 } else { year };
    let era = y.div_euclid(400);
    let yoe = y - era * 400;
    let mp = (month + 9) % 12;
    let doy = (153 * mp + 2) / 5 + day - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    let days = era * 146097 + doe - 719468;

    u32::try_from(days + (1 << 31)).ok().map(CqlDate)
}

/// Orders two cells of the same column. Values of different kinds are unordered.
pub(super) fn compare(a: &CqlValue, b: &CqlValue) -> Option<Ordering> {
    use CqlValue::*;
    match (a, b) {
        (Ascii(a) | Text(a), Ascii(b) | Text(b)) => Some(a.cmp(b)),
        (Boolean(a), Boolean(b)) => Some(a.cmp(b)),
        (Blob(a), Blob(b)) => Some(a.cmp(b)),
        (Counter(a), Counter(b)) => Some(a.cmp(b)),
        (Date(a), Date(b)) => Some(a.cmp(b)),
        (Double(a), Double(b)) => a.partial_cmp(b),
        (Float(a), Float(b)) => a.partial_cmp(b),
        (Int(a), Int(b)) => Some(a.cmp(b)),
        (BigInt(a), BigInt(b)) => Some(a.cmp(b)),
        (SmallInt(a), SmallInt(b)) => Some(a.cmp(b)),
        (TinyInt(a), TinyInt(b)) => Some(a.cmp(b)),
        (Timestamp(a), Timestamp(b)) => Some(a.cmp(b)),
        (Time(a), Time(b)) => Some(a.cmp(b)),
        (Inet(a), Inet(b)) => Some(a.cmp(b)),
        (Uuid(a), Uuid(b)) => Some(a.cmp(b)),
        (Timeuuid(a), Timeuuid(b)) => Some(a.as_uuid().cmp(b.as_uuid())),
        (Varint(a), Varint(b)) => {
            let (a, b) = (a.as_signed_bytes_be_slice(), b.as_signed_bytes_be_slice());
            let sign = |bytes: &[u8]| bytes.first().map_or(false, |first| first & 0x80 != 0);
            // Minimal encodings: among values of one sign, longer means further from zero.
            match (sign(a), sign(b)) {
                (true, false) => Some(Ordering::Less),
                (false, true) => Some(Ordering::Greater),
                (false, false) => Some(a.len().cmp(&b.len()).then_with(|| a.cmp(b))),
                (true, true) => Some(b.len().cmp(&a.len()).then_with(|| a.cmp(b))),
            }
        }
        (List(a) | Set(a), List(b) | Set(b)) => {
            for (x, y) in a.iter().zip(b) {
                match compare(x, y)? {
                    Ordering::Equal => continue,
                    other => return Some(other),
                }
            }
            Some(a.len().cmp(&b.len()))
        }
        _ => None,
    }
}

/// [`compare`] for sorting: unordered pairs are treated as equal.
pub(super) fn compare_or_equal(a: &CqlValue, b: &CqlValue) -> Ordering {
    compare(a, b).unwrap_or(Ordering::Equal)
}

/// Ordering of nullable cells; nulls go first.
pub(super) fn compare_cells(a: &Option<CqlValue>, b: &Option<CqlValue>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => compare_or_equal(a, b),
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use uuid::Uuid;

    use super::*;

    fn literal(term: Term, typ: ColumnType) -> EngineResult<Resolved> {
        resolve(&term, &typ, "c", &[])
    }

    #[test]
    fn literals_take_the_column_type() {
        assert_eq!(
            literal(Term::Number("35".to_owned()), ColumnType::Int).unwrap(),
            Resolved::Value(CqlValue::Int(35))
        );
        assert_eq!(
            literal(Term::Number("-7".to_owned()), ColumnType::BigInt).unwrap(),
            Resolved::Value(CqlValue::BigInt(-7))
        );
        assert_eq!(
            literal(Term::Number("1.5".to_owned()), ColumnType::Double).unwrap(),
            Resolved::Value(CqlValue::Double(1.5))
        );
        assert_eq!(
            literal(Term::Str("10.0.0.1".to_owned()), ColumnType::Inet).unwrap(),
            Resolved::Value(CqlValue::Inet("10.0.0.1".parse().unwrap()))
        );
        assert_eq!(
            literal(Term::Str("1970-01-02".to_owned()), ColumnType::Date).unwrap(),
            Resolved::Value(CqlValue::Date(CqlDate((1 << 31) + 1)))
        );
        assert_eq!(literal(Term::Null, ColumnType::Text).unwrap(), Resolved::Null);

        assert!(literal(Term::Str("x".to_owned()), ColumnType::Int).is_err());
        assert!(literal(Term::Number("3000000000".to_owned()), ColumnType::Int).is_err());
        assert!(literal(Term::Bool(true), ColumnType::Text).is_err());
        assert!(literal(Term::Uuid(Uuid::new_v4()), ColumnType::Timeuuid).is_err());
    }

    #[test]
    fn sets_are_sorted_and_deduplicated() {
        let term = Term::Set(vec![
            Term::Str("b".to_owned()),
            Term::Str("a".to_owned()),
            Term::Str("b".to_owned()),
        ]);
        assert_eq!(
            literal(term, ColumnType::Set(Box::new(ColumnType::Text))).unwrap(),
            Resolved::Value(CqlValue::Set(vec![
                CqlValue::Text("a".to_owned()),
                CqlValue::Text("b".to_owned()),
            ]))
        );
        assert_eq!(
            literal(Term::Map(Vec::new()), ColumnType::Set(Box::new(ColumnType::Int))).unwrap(),
            Resolved::Value(CqlValue::Set(Vec::new()))
        );
    }

    #[test]
    fn bound_values_are_deserialized() {
        let bytes = 42_i32.to_be_bytes();
        let bound = [RawValue::Value(&bytes), RawValue::Null, RawValue::Unset];
        let marker = |index| Term::Marker { index, name: None };

        assert_eq!(
            resolve(&marker(0), &ColumnType::Int, "c", &bound).unwrap(),
            Resolved::Value(CqlValue::Int(42))
        );
        assert_eq!(resolve(&marker(1), &ColumnType::Int, "c", &bound).unwrap(), Resolved::Null);
        assert_eq!(resolve(&marker(2), &ColumnType::Int, "c", &bound).unwrap(), Resolved::Unset);
        assert_matches!(resolve(&marker(3), &ColumnType::Int, "c", &bound), Err(_));
        assert_matches!(resolve(&marker(0), &ColumnType::BigInt, "c", &bound), Err(_));
    }

    #[test]
    fn ordering() {
        assert_eq!(
            compare(&CqlValue::Int(1), &CqlValue::Int(2)),
            Some(Ordering::Less)
        );
        assert_eq!(
            compare(&CqlValue::Text("b".to_owned()), &CqlValue::Text("a".to_owned())),
            Some(Ordering::Greater)
        );
        assert_eq!(
            compare(
                &CqlValue::Varint(CqlVarint::from(-1)),
                &CqlValue::Varint(CqlVarint::from(300))
            ),
            Some(Ordering::Less)
        );
        assert_eq!(compare(&CqlValue::Int(1), &CqlValue::BigInt(1)), None);
        assert_eq!(
            compare_cells(&None, &Some(CqlValue::Int(0))),
            Ordering::Less
        );
    }
}
