use bytes::BufMut;

use crate::frame::frame_errors::ParseError;
use crate::frame::types;
use std::collections::HashMap;

/// Options the server supports, e.g. `COMPRESSION: [lz4, snappy]`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Supported {
    pub options: HashMap<String, Vec<String>>,
}

impl Supported {
    pub fn deserialize(buf: &mut &[u8]) -> Result<Self, ParseError> {
        let options = types::read_string_multimap(buf)?;

        Ok(Supported { options })
    }

    pub fn serialize(&self, buf: &mut impl BufMut) -> Result<(), ParseError> {
        types::write_string_multimap(&self.options, buf)?;
        Ok(())
    }
}
