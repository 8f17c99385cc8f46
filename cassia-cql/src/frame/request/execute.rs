use bytes::Bytes;

use crate::frame::frame_errors::{ParseError, RequestSerializationError};
use crate::frame::request::query::QueryParameters;
use crate::frame::request::{DeserializableRequest, RequestOpcode, SerializableRequest};
use crate::frame::types;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execute {
    pub id: Bytes,
    pub parameters: QueryParameters,
}

impl SerializableRequest for Execute {
    const OPCODE: RequestOpcode = RequestOpcode::Execute;

    fn serialize(&self, buf: &mut Vec<u8>) -> Result<(), RequestSerializationError> {
        // Serializing statement id
        types::write_short_bytes(&self.id[..], buf)?;

        // Serializing params
        self.parameters.serialize(buf)?;
        Ok(())
    }
}

impl DeserializableRequest for Execute {
    fn deserialize(buf: &mut &[u8]) -> Result<Self, ParseError> {
        let id = Bytes::copy_from_slice(types::read_short_bytes(buf)?);
        let parameters = QueryParameters::deserialize(buf)?;

        Ok(Self { id, parameters })
    }
}
