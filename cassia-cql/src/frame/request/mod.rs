//! Requests sent by the client, one module per opcode.

pub mod auth_response;
pub mod batch;
pub mod execute;
pub mod options;
pub mod prepare;
pub mod query;
pub mod register;
pub mod startup;

use std::convert::TryFrom;

use crate::frame::frame_errors::{ParseError, RequestSerializationError};
use crate::frame::TryFromPrimitiveError;
use crate::Consistency;

pub use auth_response::AuthResponse;
pub use batch::Batch;
pub use execute::Execute;
pub use options::Options;
pub use prepare::Prepare;
pub use query::Query;
pub use register::Register;
pub use startup::Startup;

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum RequestOpcode {
    Startup = 0x01,
    Options = 0x05,
    Query = 0x07,
    Prepare = 0x09,
    Execute = 0x0A,
    Register = 0x0B,
    Batch = 0x0D,
    AuthResponse = 0x0F,
}

impl TryFrom<u8> for RequestOpcode {
    type Error = TryFromPrimitiveError<u8>;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::Startup),
            0x05 => Ok(Self::Options),
            0x07 => Ok(Self::Query),
            0x09 => Ok(Self::Prepare),
            0x0A => Ok(Self::Execute),
            0x0B => Ok(Self::Register),
            0x0D => Ok(Self::Batch),
            0x0F => Ok(Self::AuthResponse),
            _ => Err(TryFromPrimitiveError::new("RequestOpcode", value)),
        }
    }
}

pub trait SerializableRequest {
    const OPCODE: RequestOpcode;

    fn serialize(&self, buf: &mut Vec<u8>) -> Result<(), RequestSerializationError>;

    fn to_bytes(&self) -> Result<Vec<u8>, RequestSerializationError> {
        let mut v = Vec::new();
        self.serialize(&mut v)?;
        Ok(v)
    }
}

/// Not intended for driver's direct usage (as driver has no interest in deserialising CQL requests),
/// but very useful for testing (e.g. asserting that the sent requests have proper parameters set).
pub trait DeserializableRequest: SerializableRequest + Sized {
    fn deserialize(buf: &mut &[u8]) -> Result<Self, ParseError>;
}

/// A request of any kind, as read by a server.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Startup(Startup),
    Options,
    Query(Query),
    Prepare(Prepare),
    Execute(Execute),
    Register(Register),
    Batch(Batch),
    AuthResponse(AuthResponse),
}

impl Request {
    pub fn deserialize(buf: &mut &[u8], opcode: RequestOpcode) -> Result<Self, ParseError> {
        match opcode {
            RequestOpcode::Startup => Startup::deserialize(buf).map(Self::Startup),
            RequestOpcode::Options => Ok(Self::Options),
            RequestOpcode::Query => Query::deserialize(buf).map(Self::Query),
            RequestOpcode::Prepare => Prepare::deserialize(buf).map(Self::Prepare),
            RequestOpcode::Execute => Execute::deserialize(buf).map(Self::Execute),
            RequestOpcode::Register => Register::deserialize(buf).map(Self::Register),
            RequestOpcode::Batch => Batch::deserialize(buf).map(Self::Batch),
            RequestOpcode::AuthResponse => AuthResponse::deserialize(buf).map(Self::AuthResponse),
        }
    }

    /// Retrieves consistency from request frame, if present.
    pub fn get_consistency(&self) -> Option<Consistency> {
        match self {
            Request::Query(q) => Some(q.parameters.consistency),
            Request::Execute(e) => Some(e.parameters.consistency),
            Request::Batch(b) => Some(b.consistency),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use crate::frame::request::batch::{Batch, BatchStatement, BatchType};
    use crate::frame::request::execute::Execute;
    use crate::frame::request::query::{Query, QueryParameters};
    use crate::frame::request::{DeserializableRequest, Request, RequestOpcode, SerializableRequest};
    use crate::frame::types::{self, SerialConsistency};
    use crate::frame::value::{SerializedValues, ValueList};
    use crate::Consistency;

    fn values(list: impl ValueList) -> SerializedValues {
        SerializedValues::from_bound_values(&list.bound_values()).unwrap()
    }

    #[test]
    fn request_ser_de_identity() {
        // Query
        let parameters = QueryParameters {
            consistency: Consistency::All,
            serial_consistency: Some(SerialConsistency::Serial),
            timestamp: None,
            page_size: Some(323),
            paging_state: Some(Bytes::from_static(&[2, 1, 3, 7])),
            skip_metadata: false,
            values: values((2137_i32,)),
        };
        let query = Query {
            contents: "SELECT host_id from system.peers".to_owned(),
            parameters,
        };
        let mut buf = Vec::new();
        query.serialize(&mut buf).unwrap();
        assert_eq!(Query::deserialize(&mut &buf[..]).unwrap(), query);

        // Execute
        let parameters = QueryParameters {
            consistency: Consistency::Any,
            timestamp: Some(3423434),
            skip_metadata: true,
            values: values((42_i32, 2137_i32)),
            ..Default::default()
        };
        let execute = Execute {
            id: vec![2, 4, 5, 2, 6, 7, 3, 1].into(),
            parameters,
        };
        let mut buf = Vec::new();
        execute.serialize(&mut buf).unwrap();
        assert_eq!(Execute::deserialize(&mut &buf[..]).unwrap(), execute);

        // Batch
        let batch = Batch {
            statements: vec![
                BatchStatement::Query {
                    text: query.contents.clone(),
                },
                BatchStatement::Prepared {
                    id: execute.id.clone(),
                },
            ],
            batch_type: BatchType::Logged,
            consistency: Consistency::EachQuorum,
            serial_consistency: Some(SerialConsistency::LocalSerial),
            timestamp: Some(32432),
            values: vec![query.parameters.values.clone(), values(())],
        };
        let mut buf = Vec::new();
        batch.serialize(&mut buf).unwrap();
        let deserialized = Request::deserialize(&mut &buf[..], RequestOpcode::Batch).unwrap();
        assert_eq!(deserialized.get_consistency(), Some(Consistency::EachQuorum));
        assert_eq!(deserialized, Request::Batch(batch));
    }

    #[test]
    fn deser_rejects_unknown_flags() {
        let query = Query {
            contents: "SELECT host_id from system.peers".to_owned(),
            parameters: QueryParameters::default(),
        };
        let mut buf = Vec::new();
        query.serialize(&mut buf).unwrap();

        let mut buf_ptr = buf.as_slice();
        types::read_long_string(&mut buf_ptr).unwrap();
        types::read_consistency(&mut buf_ptr).unwrap();
        let flags_idx = buf.len() - buf_ptr.len();
        buf[flags_idx] |= 0x80;

        Query::deserialize(&mut &buf[..]).unwrap_err();
    }
}
