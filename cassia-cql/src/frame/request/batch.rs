use bytes::{BufMut, Bytes};

use crate::frame::frame_errors::{ParseError, RequestSerializationError};
use crate::frame::request::{DeserializableRequest, RequestOpcode, SerializableRequest};
use crate::frame::types::{self, SerialConsistency};
use crate::frame::value::SerializedValues;
use crate::Consistency;

// Batch flags
const FLAG_WITH_SERIAL_CONSISTENCY: u8 = 0x10;
const FLAG_WITH_DEFAULT_TIMESTAMP: u8 = 0x20;
const ALL_FLAGS: u8 = FLAG_WITH_SERIAL_CONSISTENCY | FLAG_WITH_DEFAULT_TIMESTAMP;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub statements: Vec<BatchStatement>,
    pub batch_type: BatchType,
    pub consistency: Consistency,
    pub serial_consistency: Option<SerialConsistency>,
    pub timestamp: Option<i64>,
    /// One value list per statement, in the same order.
    pub values: Vec<SerializedValues>,
}

/// The type of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatchType {
    #[default]
    Logged = 0,
    Unlogged = 1,
    Counter = 2,
}

impl TryFrom<u8> for BatchType {
    type Error = ParseError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Logged),
            1 => Ok(Self::Unlogged),
            2 => Ok(Self::Counter),
            _ => Err(ParseError::BadIncomingData(format!(
                "Bad BatchType value: {}",
                value
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchStatement {
    Query { text: String },
    Prepared { id: Bytes },
}

impl BatchStatement {
    fn serialize(&self, buf: &mut impl BufMut) -> Result<(), RequestSerializationError> {
        match self {
            Self::Query { text } => {
                buf.put_u8(0);
                types::write_long_string(text, buf)?;
            }
            Self::Prepared { id } => {
                buf.put_u8(1);
                types::write_short_bytes(id, buf)?;
            }
        }

        Ok(())
    }

    fn deserialize(buf: &mut &[u8]) -> Result<Self, ParseError> {
        let kind = types::read_byte(buf)?;
        match kind {
            0 => Ok(Self::Query {
                text: types::read_long_string(buf)?.to_owned(),
            }),
            1 => Ok(Self::Prepared {
                id: Bytes::copy_from_slice(types::read_short_bytes(buf)?),
            }),
            _ => Err(ParseError::BadIncomingData(format!(
                "Unexpected batch statement kind: {}",
                kind
            ))),
        }
    }
}

impl SerializableRequest for Batch {
    const OPCODE: RequestOpcode = RequestOpcode::Batch;

    fn serialize(&self, buf: &mut Vec<u8>) -> Result<(), RequestSerializationError> {
        // Serializing type of batch
        buf.put_u8(self.batch_type as u8);

        // Serializing queries
        let statements_count: u16 = self
            .statements
            .len()
            .try_into()
            .map_err(|_| RequestSerializationError::TooManyStatements(self.statements.len()))?;
        types::write_short(statements_count, buf);

        let empty = SerializedValues::new();
        for (idx, statement) in self.statements.iter().enumerate() {
            statement.serialize(buf)?;
            self.values.get(idx).unwrap_or(&empty).write_to_request(buf);
        }

        // Serializing consistency
        types::write_consistency(self.consistency, buf);

        // Serializing flags
        let mut flags = 0;
        if self.serial_consistency.is_some() {
            flags |= FLAG_WITH_SERIAL_CONSISTENCY;
        }
        if self.timestamp.is_some() {
            flags |= FLAG_WITH_DEFAULT_TIMESTAMP;
        }

        buf.put_u8(flags);

        if let Some(serial_consistency) = self.serial_consistency {
            types::write_serial_consistency(serial_consistency, buf);
        }
        if let Some(timestamp) = self.timestamp {
            types::write_long(timestamp, buf);
        }

        Ok(())
    }
}

impl DeserializableRequest for Batch {
    fn deserialize(buf: &mut &[u8]) -> Result<Self, ParseError> {
        let batch_type = BatchType::try_from(types::read_byte(buf)?)?;

        let statements_count = types::read_short(buf)? as usize;
        let mut statements = Vec::with_capacity(statements_count);
        let mut values = Vec::with_capacity(statements_count);
        for _ in 0..statements_count {
            statements.push(BatchStatement::deserialize(buf)?);
            values.push(SerializedValues::new_from_frame(buf)?);
        }

        let consistency = types::read_consistency(buf)?;

        let flags = types::read_byte(buf)?;
        let unknown_flags = flags & !ALL_FLAGS;
        if unknown_flags != 0 {
            return Err(ParseError::BadIncomingData(format!(
                "Specified flags are not recognised: {:02x}",
                unknown_flags
            )));
        }

        let serial_consistency = if flags & FLAG_WITH_SERIAL_CONSISTENCY != 0 {
            let raw = types::read_short(buf)? as i16;
            Some(SerialConsistency::try_from(raw).map_err(|err| {
                ParseError::BadIncomingData(format!("Bad serial consistency: {}", err))
            })?)
        } else {
            None
        };
        let timestamp = if flags & FLAG_WITH_DEFAULT_TIMESTAMP != 0 {
            Some(types::read_long(buf)?)
        } else {
            None
        };

        Ok(Self {
            statements,
            batch_type,
            consistency,
            serial_consistency,
            timestamp,
            values,
        })
    }
}
