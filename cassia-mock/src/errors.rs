use std::net::SocketAddr;

use cassia_cql::frame::frame_errors::{FrameError, ParseError};
use thiserror::Error;

/// Errors of starting and running fake nodes.
#[derive(Debug, Error)]
pub enum MockError {
    #[error("Listen on {0} failed with {1}")]
    Listen(SocketAddr, std::io::Error),
    #[error("Node {0} is already running")]
    AlreadyRunning(SocketAddr),
    #[error("A cluster needs at least one node")]
    NoNodes,
}

/// Reasons a single driver connection is dropped by a node.
#[derive(Debug, Error)]
pub(crate) enum ConnectionError {
    #[error("Reading a request frame failed: {0}")]
    Read(#[from] FrameError),
    #[error("Compressed frame received before compression was negotiated")]
    NoCompressionNegotiated,
    #[error("Writing a response frame failed: {0}")]
    Write(std::io::Error),
    #[error("Serializing a response failed: {0}")]
    Serialize(#[from] ParseError),
    #[error("Driver closed the connection")]
    Closed,
}
