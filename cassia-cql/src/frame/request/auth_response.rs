use crate::frame::frame_errors::{ParseError, RequestSerializationError};
use crate::frame::request::{DeserializableRequest, RequestOpcode, SerializableRequest};
use crate::frame::types;

// Implements Authenticate Response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthResponse {
    pub response: Option<Vec<u8>>,
}

impl AuthResponse {
    /// Builds the SASL PLAIN token: `\0username\0password`.
    pub fn plain_text(username: &str, password: &str) -> Self {
        let mut response = Vec::with_capacity(username.len() + password.len() + 2);
        response.push(0);
        response.extend_from_slice(username.as_bytes());
        response.push(0);
        response.extend_from_slice(password.as_bytes());
        Self {
            response: Some(response),
        }
    }
}

impl SerializableRequest for AuthResponse {
    const OPCODE: RequestOpcode = RequestOpcode::AuthResponse;

    fn serialize(&self, buf: &mut Vec<u8>) -> Result<(), RequestSerializationError> {
        types::write_bytes_opt(self.response.as_ref(), buf)?;
        Ok(())
    }
}

impl DeserializableRequest for AuthResponse {
    fn deserialize(buf: &mut &[u8]) -> Result<Self, ParseError> {
        let response = types::read_bytes_opt(buf)?.map(|b| b.to_vec());
        Ok(Self { response })
    }
}

#[cfg(test)]
mod tests {
    use super::AuthResponse;

    #[test]
    fn plain_text_token_layout() {
        let resp = AuthResponse::plain_text("cassandra", "pw");
        assert_eq!(resp.response.unwrap(), b"\0cassandra\0pw".to_vec());
    }
}
