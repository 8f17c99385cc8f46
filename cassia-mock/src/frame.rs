use bytes::{BufMut, Bytes};
use cassia_cql::frame::frame_errors::ParseError;
pub use cassia_cql::frame::request::RequestOpcode;
use cassia_cql::frame::request::Request;
use cassia_cql::frame::response::error::{DbError, Error};
use cassia_cql::frame::response::event::Event;
pub use cassia_cql::frame::response::ResponseOpcode;
use cassia_cql::frame::response::Response;
use cassia_cql::frame::{
    self, types, Compression, FrameParams, FLAG_COMPRESSION, FLAG_TRACING, FLAG_WARNING,
    HEADER_SIZE,
};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

use crate::errors::ConnectionError;

/// Stream id the server pushes events on.
const EVENT_STREAM_ID: i16 = -1;

/// A request as received by a node, with its body already decompressed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestFrame {
    pub params: FrameParams,
    pub opcode: RequestOpcode,
    pub body: Bytes,
}

impl RequestFrame {
    pub(crate) async fn read(
        reader: &mut (impl AsyncRead + Unpin),
        compression: Option<Compression>,
    ) -> Result<Self, ConnectionError> {
        Self::read_raw(reader).await?.decompressed(compression)
    }

    /// Reads a frame leaving its body as sent.
    pub(crate) async fn read_raw(
        reader: &mut (impl AsyncRead + Unpin),
    ) -> Result<Self, ConnectionError> {
        let (params, opcode, body) = frame::read_request_frame(reader).await?;
        Ok(Self {
            params,
            opcode,
            body,
        })
    }

    pub(crate) fn decompressed(
        self,
        compression: Option<Compression>,
    ) -> Result<Self, ConnectionError> {
        if self.params.flags & FLAG_COMPRESSION == 0 {
            return Ok(self);
        }
        let compression = compression.ok_or(ConnectionError::NoCompressionNegotiated)?;
        let body = frame::decompress(&self.body, compression)?.into();
        Ok(Self {
            params: FrameParams {
                flags: self.params.flags & !FLAG_COMPRESSION,
                ..self.params
            },
            body,
            ..self
        })
    }

    pub fn deserialize(&self) -> Result<Request, ParseError> {
        Request::deserialize(&mut &self.body[..], self.opcode)
    }

    pub fn is_traced(&self) -> bool {
        self.params.flags & FLAG_TRACING != 0
    }
}

/// A response about to be sent by a node. The body is not compressed yet;
/// compression is applied on write, according to what the connection negotiated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResponseFrame {
    pub params: FrameParams,
    pub opcode: ResponseOpcode,
    pub body: Bytes,
}

impl ResponseFrame {
    /// Creates a response frame that signifies the given DbError type.
    /// Useful for testing server-side error handling in drivers.
    pub fn forged_error(
        request_params: FrameParams,
        error: DbError,
        msg: Option<&str>,
    ) -> Result<Self, ParseError> {
        let response = Response::Error(Error {
            error,
            reason: msg.unwrap_or("Mock-triggered error.").to_owned(),
        });
        Self::from_response(request_params, &response, None, &[])
    }

    /// Wraps `response` into a frame answering a request sent with `request_params`.
    /// The tracing id and the warnings go into the body extensions.
    pub(crate) fn from_response(
        request_params: FrameParams,
        response: &Response,
        tracing_id: Option<Uuid>,
        warnings: &[String],
    ) -> Result<Self, ParseError> {
        let mut flags = 0;
        let mut body = Vec::new();
        if let Some(tracing_id) = tracing_id {
            flags |= FLAG_TRACING;
            types::write_uuid(&tracing_id, &mut body);
        }
        if !warnings.is_empty() {
            flags |= FLAG_WARNING;
            types::write_string_list(warnings, &mut body)?;
        }
        response.serialize(&mut body)?;

        Ok(Self {
            params: FrameParams {
                flags,
                ..request_params.for_response()
            },
            opcode: response.opcode(),
            body: body.into(),
        })
    }

    pub(crate) fn event(event: &Event) -> Result<Self, ParseError> {
        let params = FrameParams {
            stream: EVENT_STREAM_ID,
            ..FrameParams::default()
        };
        Self::from_response(params, &Response::Event(event.clone()), None, &[])
    }

    pub(crate) async fn write(
        &self,
        writer: &mut (impl AsyncWrite + Unpin),
        compression: Option<Compression>,
    ) -> Result<(), ConnectionError> {
        let mut flags = self.params.flags;
        let compressed;
        let body: &[u8] = match compression {
            Some(compression) => {
                flags |= FLAG_COMPRESSION;
                let mut buf = Vec::with_capacity(self.body.len());
                frame::compress_append(&self.body, compression, &mut buf)?;
                compressed = buf;
                &compressed
            }
            None => &self.body,
        };

        let mut frame = Vec::with_capacity(HEADER_SIZE + body.len());
        frame.put_u8(self.params.version);
        frame.put_u8(flags);
        frame.put_i16(self.params.stream);
        frame.put_u8(self.opcode as u8);
        frame.put_u32(body.len() as u32);
        frame.extend_from_slice(body);

        writer
            .write_all(&frame)
            .await
            .map_err(ConnectionError::Write)?;
        writer.flush().await.map_err(ConnectionError::Write)
    }
}
