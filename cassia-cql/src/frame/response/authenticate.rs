use bytes::BufMut;

use crate::frame::frame_errors::ParseError;
use crate::frame::types;

// Implements Authenticate message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authenticate {
    pub authenticator_name: String,
}

impl Authenticate {
    pub fn deserialize(buf: &mut &[u8]) -> Result<Self, ParseError> {
        let authenticator_name = types::read_string(buf)?.to_string();

        Ok(Authenticate { authenticator_name })
    }

    pub fn serialize(&self, buf: &mut impl BufMut) -> Result<(), ParseError> {
        types::write_string(&self.authenticator_name, buf)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSuccess {
    pub success_message: Option<Vec<u8>>,
}

impl AuthSuccess {
    pub fn deserialize(buf: &mut &[u8]) -> Result<Self, ParseError> {
        let success_message = types::read_bytes_opt(buf)?.map(ToOwned::to_owned);

        Ok(AuthSuccess { success_message })
    }

    pub fn serialize(&self, buf: &mut impl BufMut) -> Result<(), ParseError> {
        types::write_bytes_opt(self.success_message.as_ref(), buf)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChallenge {
    pub authenticate_message: Option<Vec<u8>>,
}

impl AuthChallenge {
    pub fn deserialize(buf: &mut &[u8]) -> Result<Self, ParseError> {
        let authenticate_message = types::read_bytes_opt(buf)?.map(|b| b.to_owned());

        Ok(AuthChallenge {
            authenticate_message,
        })
    }

    pub fn serialize(&self, buf: &mut impl BufMut) -> Result<(), ParseError> {
        types::write_bytes_opt(self.authenticate_message.as_ref(), buf)?;
        Ok(())
    }
}
