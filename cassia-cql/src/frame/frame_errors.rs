//! Errors that can occur while reading, writing or parsing protocol frames.

use std::sync::Arc;

use super::TryFromPrimitiveError;
use thiserror::Error;

/// An error that occurred while reading or decoding a whole frame.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum FrameError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("Frame is compressed, but no compression negotiated for connection.")]
    NoCompressionNegotiated,
    #[error("Received frame marked as coming from a client")]
    FrameFromClient,
    #[error("Received frame marked as coming from the server")]
    FrameFromServer,
    #[error("Received a frame from version {0}, but only 4 is supported")]
    VersionNotSupported(u8),
    #[error("Frame body of {0} bytes exceeds the maximum allowed size")]
    FrameTooLarge(usize),
    #[error("Connection was closed before body was read: missing {0} out of {1}")]
    ConnectionClosed(usize, usize),
    #[error(transparent)]
    RequestSerialization(#[from] RequestSerializationError),
    #[error("Frame decompression failed.")]
    FrameDecompression,
    #[error("Frame compression failed.")]
    FrameCompression,
    #[error(transparent)]
    StdIoError(#[from] std::io::Error),
    #[error("Unrecognized opcode: {0}")]
    TryFromPrimitiveError(#[from] TryFromPrimitiveError<u8>),
    #[error("Error decompressing lz4 data {0}")]
    Lz4DecompressError(#[from] lz4_flex::block::DecompressError),
}

/// An error that occurred while parsing the body of a frame.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum ParseError {
    #[error("Could not deserialize frame: {0}")]
    BadIncomingData(String),
    #[error("Type not yet implemented, id: {0}")]
    TypeNotImplemented(u16),
    #[error(transparent)]
    LowLevel(#[from] LowLevelDeserializationError),
    #[error(transparent)]
    IoError(Arc<std::io::Error>),
}

impl From<std::io::Error> for ParseError {
    fn from(err: std::io::Error) -> Self {
        ParseError::IoError(Arc::new(err))
    }
}

impl From<std::num::TryFromIntError> for ParseError {
    fn from(err: std::num::TryFromIntError) -> Self {
        ParseError::LowLevel(err.into())
    }
}

impl From<std::str::Utf8Error> for ParseError {
    fn from(err: std::str::Utf8Error) -> Self {
        ParseError::LowLevel(err.into())
    }
}

/// A low level deserialization error.
///
/// Returned by the primitive readers in [`super::types`].
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum LowLevelDeserializationError {
    #[error(transparent)]
    IoError(Arc<std::io::Error>),
    #[error(transparent)]
    TryFromIntError(#[from] std::num::TryFromIntError),
    #[error(transparent)]
    TryFromSliceError(#[from] std::array::TryFromSliceError),
    #[error("Not enough bytes! expected: {expected}, received: {received}")]
    TooFewBytesReceived { expected: usize, received: usize },
    #[error("Invalid value length: {0}")]
    InvalidValueLength(i32),
    #[error("Unknown consistency: {0}")]
    UnknownConsistency(#[from] TryFromPrimitiveError<u16>),
    #[error("Invalid inet bytes length: {0}. Accepted lengths are 4 and 16 bytes.")]
    InvalidInetLength(u8),
    #[error("UTF8 deserialization failed: {0}")]
    UTF8DeserializationError(#[from] std::str::Utf8Error),
}

impl From<std::io::Error> for LowLevelDeserializationError {
    fn from(value: std::io::Error) -> Self {
        Self::IoError(Arc::new(value))
    }
}

/// An error that occurred while serializing a request.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum RequestSerializationError {
    #[error("Length of a serialized field exceeds the protocol limit: {0}")]
    SizeOverflow(#[from] std::num::TryFromIntError),
    #[error(transparent)]
    ValueTooBig(#[from] crate::value::ValueTooBig),
    #[error("Too many values in the request: {0}, the protocol allows at most 65535")]
    TooManyValues(usize),
    #[error("Too many statements in the batch: {0}, the protocol allows at most 65535")]
    TooManyStatements(usize),
    #[error("Frame compression failed")]
    Compression,
}
