//! SASL authentication performed during the connection handshake.
//!
//! When the server answers STARTUP with AUTHENTICATE, the connection asks the
//! configured [`AuthenticatorProvider`] for an initial token and an
//! [`AuthenticatorSession`] which then handles the AUTH_CHALLENGE and
//! AUTH_SUCCESS messages of the exchange.

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};

pub use crate::frame::Authenticator;

/// Type to represent an authentication error message.
pub type AuthError = String;

/// One authentication exchange on one connection.
#[async_trait]
pub trait AuthenticatorSession: Send + Sync {
    /// Answers a challenge sent by the server.
    /// The token is mechanism specific and may be absent.
    async fn evaluate_challenge(
        &mut self,
        token: Option<&[u8]>,
    ) -> Result<Option<Vec<u8>>, AuthError>;

    /// Called once the server reports success.
    async fn success(&mut self, token: Option<&[u8]>) -> Result<(), AuthError>;
}

/// Factory of [`AuthenticatorSession`]s, one per opened connection.
///
/// Set with `SessionBuilder::authenticator_provider`, or use
/// `SessionBuilder::user("user", "pass")` for [`PlainTextAuthenticator`].
#[async_trait]
pub trait AuthenticatorProvider: Sync + Send {
    /// Returns the initial response and the session handling the rest of the exchange.
    async fn start_authentication_session(
        &self,
        authenticator_name: &str,
    ) -> Result<(Option<Vec<u8>>, Box<dyn AuthenticatorSession>), AuthError>;
}

struct PlainTextAuthenticatorSession;

#[async_trait]
impl AuthenticatorSession for PlainTextAuthenticatorSession {
    async fn evaluate_challenge(
        &mut self,
        _token: Option<&[u8]>,
    ) -> Result<Option<Vec<u8>>, AuthError> {
        Err("SASL PLAIN does not expect any challenge".to_string())
    }

    async fn success(&mut self, _token: Option<&[u8]>) -> Result<(), AuthError> {
        Ok(())
    }
}

/// Username and password authentication (SASL PLAIN).
#[derive(Clone)]
pub struct PlainTextAuthenticator {
    username: String,
    password: String,
}

impl std::fmt::Debug for PlainTextAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlainTextAuthenticator")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl PlainTextAuthenticator {
    /// Creates an authenticator sending the given credentials.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        PlainTextAuthenticator {
            username: username.into(),
            password: password.into(),
        }
    }

    // `\0user\0password`, with an empty authorization identity.
    fn initial_response(&self) -> Vec<u8> {
        let mut response =
            BytesMut::with_capacity(2 + self.username.len() + self.password.len());
        response.put_u8(0);
        response.put_slice(self.username.as_bytes());
        response.put_u8(0);
        response.put_slice(self.password.as_bytes());
        response.to_vec()
    }
}

#[async_trait]
impl AuthenticatorProvider for PlainTextAuthenticator {
    async fn start_authentication_session(
        &self,
        authenticator_name: &str,
    ) -> Result<(Option<Vec<u8>>, Box<dyn AuthenticatorSession>), AuthError> {
        if let Authenticator::Other(name) = Authenticator::from(authenticator_name) {
            tracing::debug!(
                "Server uses authenticator {}, trying plain text credentials anyway",
                name
            );
        }

        Ok((
            Some(self.initial_response()),
            Box::new(PlainTextAuthenticatorSession),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::{AuthenticatorProvider, PlainTextAuthenticator};

    #[tokio::test]
    async fn plain_text_initial_response() {
        let auth = PlainTextAuthenticator::new("cassandra", "secret");
        let (response, mut session) = auth
            .start_authentication_session("org.apache.cassandra.auth.PasswordAuthenticator")
            .await
            .unwrap();
        assert_eq!(response.unwrap(), b"\0cassandra\0secret");
        assert!(session.evaluate_challenge(None).await.is_err());
        session.success(None).await.unwrap();
    }

    #[test]
    fn debug_hides_password() {
        let auth = PlainTextAuthenticator::new("user", "hunter2");
        assert!(!format!("{:?}", auth).contains("hunter2"));
    }
}
