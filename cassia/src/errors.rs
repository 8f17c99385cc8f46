//! Errors returned by the driver.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

pub use crate::frame::frame_errors::{FrameError, ParseError, RequestSerializationError};
pub use crate::frame::response::error::{DbError, WriteType};
use crate::frame::response;

/// Error that occurred during query execution
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum QueryError {
    /// Database sent a response containing some error with a message
    #[error("Database returned an error: {0}, Error message: {1}")]
    DbError(DbError, String),

    /// Caller passed an invalid query
    #[error(transparent)]
    BadQuery(#[from] BadQuery),

    /// Connection to the node failed or could not be used.
    #[error("Connection error: {0}")]
    ConnectionError(#[from] ConnectionError),

    /// Unexpected or malformed message received
    #[error("Protocol Error: {0}")]
    ProtocolError(String),

    /// Client timeout occurred before any response arrived
    #[error("Request timeout: no response within {0:?}")]
    RequestTimeout(Duration),

    /// Every node in the query plan failed.
    #[error(transparent)]
    NoHostAvailable(#[from] NoHostAvailable),

    /// A value did not match the type the server declared for it.
    #[error(transparent)]
    TypeMismatch(#[from] TypeMismatch),

    /// The session can no longer be used.
    #[error(transparent)]
    InvalidState(#[from] InvalidState),
}

impl From<response::Error> for QueryError {
    fn from(error: response::Error) -> QueryError {
        QueryError::DbError(error.error, error.reason)
    }
}

impl From<BadKeyspaceName> for QueryError {
    fn from(keyspace_err: BadKeyspaceName) -> QueryError {
        QueryError::BadQuery(BadQuery::BadKeyspaceName(keyspace_err))
    }
}

impl From<RequestSerializationError> for QueryError {
    fn from(err: RequestSerializationError) -> QueryError {
        QueryError::BadQuery(BadQuery::SerializeValues(err))
    }
}

impl From<BindError> for QueryError {
    fn from(err: BindError) -> QueryError {
        match err {
            BindError::TypeMismatch(mismatch) => QueryError::TypeMismatch(mismatch),
            other => QueryError::BadQuery(BadQuery::Bind(other)),
        }
    }
}

impl From<ParseError> for QueryError {
    fn from(err: ParseError) -> QueryError {
        QueryError::ProtocolError(err.to_string())
    }
}

impl QueryError {
    /// Whether the error happened before or while talking to a node, as opposed
    /// to the node answering with an error.
    pub fn is_transport_error(&self) -> bool {
        matches!(
            self,
            QueryError::ConnectionError(_) | QueryError::RequestTimeout(_)
        )
    }
}

/// The load balancing plan was exhausted without a successful response.
#[derive(Error, Debug, Clone)]
#[error("No host available to handle the request: [{}]", format_node_errors(.errors))]
pub struct NoHostAvailable {
    /// The error returned by each node that was tried, in plan order.
    pub errors: Vec<(SocketAddr, QueryError)>,
}

fn format_node_errors(errors: &[(SocketAddr, QueryError)]) -> String {
    if errors.is_empty() {
        return "query plan was empty".to_owned();
    }
    errors
        .iter()
        .map(|(addr, err)| format!("{}: {}", addr, err))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Error caused by the caller misusing the API, detected before sending anything.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum BadQuery {
    /// Keyspace name did not pass validation.
    #[error("Invalid keyspace name: {0}")]
    BadKeyspaceName(#[from] BadKeyspaceName),

    /// Values could not be serialized into the request.
    #[error("Serializing values failed: {0}")]
    SerializeValues(RequestSerializationError),

    /// Values could not be bound to the prepared statement.
    #[error(transparent)]
    Bind(BindError),

    /// The statement needs a keyspace, but neither the statement nor the session has one.
    #[error("No keyspace given for table {0} and the session has no current keyspace")]
    NoKeyspace(String),

    /// Page size must be positive.
    #[error("Invalid page size: {0}")]
    InvalidPageSize(i32),

    /// Prepared statement ids returned by different nodes were not equal.
    #[error("Prepared statement ids differ between nodes")]
    PreparedStatementIdsMismatch,

    /// Batch is empty.
    #[error("Batch contains no statements")]
    EmptyBatch,
}

/// Invalid keyspace name given to `Session::use_keyspace()`
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BadKeyspaceName {
    /// Keyspace name is empty
    #[error("Keyspace name is empty")]
    Empty,

    /// Keyspace name too long, must be up to 48 characters
    #[error("Keyspace name too long, must be up to 48 characters, found {1} characters. Bad keyspace name: '{0}'")]
    TooLong(String, usize),

    /// Illegal character - only alphanumeric and underscores allowed.
    #[error("Illegal character found: '{1}', only alphanumeric and underscores allowed. Bad keyspace name: '{0}'")]
    IllegalCharacter(String, char),
}

/// A value of one CQL type was given or requested where another type was expected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Type mismatch for {target}: expected {expected}, got {actual}")]
pub struct TypeMismatch {
    /// Column or bind marker that was being accessed.
    pub target: String,
    /// The type required by the target.
    pub expected: String,
    /// The type actually found.
    pub actual: String,
}

/// Error returned by `PreparedStatement::bind`.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum BindError {
    /// The number of values differs from the number of bind markers.
    #[error("Wrong number of bound values: the statement has {expected} bind markers, got {actual} values")]
    WrongValuesCount { expected: usize, actual: usize },

    /// A value's type does not match its marker.
    #[error(transparent)]
    TypeMismatch(#[from] TypeMismatch),

    /// A value could not be serialized.
    #[error("Serializing value for {marker} failed: {error}")]
    Serialization {
        marker: String,
        error: RequestSerializationError,
    },
}

/// Error returned when accessing a column of a [`Row`](crate::response::query_result::Row).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ColumnAccessError {
    /// The result has no column of that name.
    #[error("No column named {0} in the result")]
    NoSuchColumn(String),

    /// The column holds a value of another type.
    #[error(transparent)]
    TypeMismatch(#[from] TypeMismatch),

    /// The column is NULL, but a non-optional value was requested.
    #[error("Column {0} is null")]
    UnexpectedNull(String),
}

/// The object cannot be used in its current state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum InvalidState {
    /// `Session::close` was called before.
    #[error("The session has been closed")]
    SessionClosed,
}

/// Error related to a single connection.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum ConnectionError {
    /// Establishing the TCP connection took longer than the connect timeout.
    #[error("Connect timeout elapsed")]
    ConnectTimeout,

    /// Input/Output error has occurred
    #[error(transparent)]
    IoError(Arc<std::io::Error>),

    /// The connection was closed by the driver.
    #[error("Connection was closed")]
    ConnectionClosed,

    /// The connection broke while the request was in flight or queued.
    #[error(transparent)]
    Broken(#[from] BrokenConnectionError),

    /// All stream ids of the connection are in use.
    #[error("Unable to allocate stream id")]
    UnableToAllocStreamId,

    /// The node's pool has no usable connection.
    #[error("No working connection to the node{}", format_last_error(.last_error))]
    NoWorkingConnection {
        /// The error that broke the last connection attempt, if any.
        last_error: Option<Box<ConnectionError>>,
    },

    /// The OPTIONS/STARTUP/AUTH/REGISTER handshake failed.
    #[error("Connection handshake failed: {0}")]
    Handshake(#[from] HandshakeError),
}

fn format_last_error(last_error: &Option<Box<ConnectionError>>) -> String {
    match last_error {
        Some(err) => format!(" (last error: {})", err),
        None => String::new(),
    }
}

impl From<std::io::Error> for ConnectionError {
    fn from(value: std::io::Error) -> Self {
        ConnectionError::IoError(Arc::new(value))
    }
}

/// Failure of one of the connection setup requests.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum HandshakeError {
    /// The request could not be sent or the server answered with an error.
    #[error("{request} request failed: {error}")]
    RequestFailed {
        request: &'static str,
        error: Box<QueryError>,
    },

    /// The server answered with an unexpected response.
    #[error("Unexpected response to {request}: {response}")]
    UnexpectedResponse {
        request: &'static str,
        response: &'static str,
    },

    /// The server requires authentication but no authenticator was configured.
    #[error("Server requires authentication ({0}), but no authenticator was configured")]
    MissingAuthentication(String),

    /// The authenticator rejected the exchange.
    #[error("Authentication failed: {0}")]
    Authentication(String),
}

/// An error that broke a connection: every request in flight fails with it.
#[derive(Error, Debug, Clone)]
#[error("Connection broken, reason: {0}")]
pub struct BrokenConnectionError(Arc<BrokenConnectionErrorKind>);

impl BrokenConnectionError {
    /// The reason the connection broke.
    pub fn kind(&self) -> &BrokenConnectionErrorKind {
        &self.0
    }
}

impl From<BrokenConnectionErrorKind> for BrokenConnectionError {
    fn from(value: BrokenConnectionErrorKind) -> Self {
        BrokenConnectionError(Arc::new(value))
    }
}

/// The reason a connection broke.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum BrokenConnectionErrorKind {
    /// Reading a frame from the socket failed.
    #[error("Failed to read a frame: {0}")]
    FrameError(FrameError),

    /// Writing to the socket failed.
    #[error("Failed to write data: {0}")]
    WriteError(std::io::Error),

    /// Keepalive request timed out.
    #[error("Timed out while waiting for response to keepalive request on connection to node {0}")]
    KeepaliveTimeout(SocketAddr),

    /// Keepalive request failed.
    #[error("Failed to execute keepalive request: {0}")]
    KeepaliveRequestError(QueryError),

    /// A response arrived on a stream no request was waiting on.
    #[error("Received a response with unexpected stream id {0}")]
    UnexpectedStreamId(i16),

    /// Too many requests were abandoned and never answered.
    #[error("Too many orphaned stream ids: {0}")]
    TooManyOrphanedStreamIds(u16),

    /// A server event could not be parsed or delivered.
    #[error("Failed to handle server event: {0}")]
    EventHandlingError(String),

    /// The router task of the connection is gone.
    #[error("Connection router is not running")]
    ChannelError,
}

/// Error that occurred during session creation
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum NewSessionError {
    /// Failed to resolve hostname passed in Session creation
    #[error("Couldn't resolve any hostname: {0:?}")]
    FailedToResolveAnyHostname(Vec<String>),

    /// List of known nodes passed to Session constructor is empty
    #[error("Empty known nodes list")]
    EmptyKnownNodesList,

    /// Fetching the initial cluster metadata failed.
    #[error("Failed to fetch cluster metadata: {0}")]
    Metadata(#[from] MetadataError),

    /// Keyspace given to the builder could not be used.
    #[error("Failed to use keyspace: {0}")]
    UseKeyspace(QueryError),
}

/// Error while reading the cluster topology and schema.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum MetadataError {
    /// None of the known nodes accepted a control connection.
    #[error("Could not open a control connection to any known node: {0}")]
    NoControlConnection(ConnectionError),

    /// A metadata query failed.
    #[error("Metadata query failed: {0}")]
    Query(QueryError),

    /// A row of `system.peers`/`system.local` could not be interpreted.
    #[error("Bad peer row: {0}")]
    BadPeer(String),

    /// A replication map in `system_schema.keyspaces` could not be interpreted.
    #[error("Bad replication for keyspace {keyspace}: {error}")]
    BadKeyspaceReplication { keyspace: String, error: String },
}

/// Error returned by [`QueryPager`](crate::client::pager::QueryPager).
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum PagerError {
    /// Fetching a page failed.
    #[error(transparent)]
    RequestFailure(#[from] QueryError),

    /// The task fetching pages stopped before delivering the last page.
    #[error("The page fetching task stopped unexpectedly")]
    WorkerStopped,
}

impl From<PagerError> for QueryError {
    fn from(err: PagerError) -> QueryError {
        match err {
            PagerError::RequestFailure(err) => err,
            PagerError::WorkerStopped => {
                QueryError::ProtocolError("The page fetching task stopped unexpectedly".to_owned())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{BindError, ConnectionError, NoHostAvailable, QueryError, TypeMismatch};
    use crate::frame::types::Consistency;
    use crate::frame::response::error::DbError;
    use assert_matches::assert_matches;

    #[test]
    fn dberror_full_info() {
        // Test that DbError::Unavailable is displayed correctly
        let db_error = DbError::Unavailable {
            consistency: Consistency::Three,
            required: 3,
            alive: 2,
        };

        let db_error_displayed: String = format!("{}", db_error);

        let mut expected_dberr_msg =
            "Not enough nodes are alive to satisfy required consistency level ".to_string();
        expected_dberr_msg += "(consistency: Three, required: 3, alive: 2)";

        assert_eq!(db_error_displayed, expected_dberr_msg);

        let query_error =
            QueryError::DbError(db_error, "a message about unavailable error".to_string());
        let query_error_displayed: String = format!("{}", query_error);

        let mut expected_querr_msg = "Database returned an error: ".to_string();
        expected_querr_msg += &expected_dberr_msg;
        expected_querr_msg += ", Error message: a message about unavailable error";

        assert_eq!(query_error_displayed, expected_querr_msg);
    }

    #[test]
    fn no_host_available_lists_every_node() {
        let err = NoHostAvailable {
            errors: vec![
                (
                    "127.0.0.1:9042".parse().unwrap(),
                    ConnectionError::ConnectTimeout.into(),
                ),
                (
                    "127.0.0.2:9042".parse().unwrap(),
                    ConnectionError::NoWorkingConnection { last_error: None }.into(),
                ),
            ],
        };
        let displayed = err.to_string();
        assert!(displayed.contains("127.0.0.1:9042: Connection error: Connect timeout elapsed"));
        assert!(displayed.contains("127.0.0.2:9042: Connection error: No working connection"));

        let empty = NoHostAvailable { errors: vec![] };
        assert!(empty.to_string().contains("query plan was empty"));
    }

    #[test]
    fn bind_type_mismatch_surfaces_as_type_mismatch() {
        let mismatch = TypeMismatch {
            target: "age".to_owned(),
            expected: "int".to_owned(),
            actual: "text".to_owned(),
        };
        let err: QueryError = BindError::TypeMismatch(mismatch.clone()).into();
        assert_matches!(err, QueryError::TypeMismatch(m) if m == mismatch);

        let err: QueryError = BindError::WrongValuesCount {
            expected: 2,
            actual: 1,
        }
        .into();
        assert_matches!(err, QueryError::BadQuery(_));
    }
}
