//! Frame layer of the CQL native protocol, version 4.
//!
//! A frame is a 9-byte header (version, flags, stream id, opcode, body length)
//! followed by the body. Requests are serialized into a [`SerializedRequest`]
//! which already contains the header; the stream id is patched in by the
//! connection right before the frame is written.

pub mod frame_errors;
pub mod request;
pub mod response;
pub mod server_event_type;
pub mod types;
pub mod value;

use crate::frame::frame_errors::FrameError;
use bytes::{Buf, BufMut, Bytes};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use uuid::Uuid;

use std::fmt::Display;
use std::{collections::HashMap, convert::TryFrom};

use request::SerializableRequest;
use response::ResponseOpcode;

/// Size of the frame header in protocol v4.
pub const HEADER_SIZE: usize = 9;

/// Protocol version spoken by this crate.
pub const PROTOCOL_VERSION: u8 = 0x04;

/// Frames with bodies larger than this are refused (256 MB, the server's default limit).
pub const MAX_FRAME_BODY_SIZE: usize = 256 * 1024 * 1024;

// Frame flags
pub const FLAG_COMPRESSION: u8 = 0x01;
pub const FLAG_TRACING: u8 = 0x02;
pub const FLAG_CUSTOM_PAYLOAD: u8 = 0x04;
pub const FLAG_WARNING: u8 = 0x08;

/// Authenticators a server may announce in an AUTHENTICATE response.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Authenticator {
    AllowAllAuthenticator,
    PasswordAuthenticator,
    Other(String),
}

impl From<&str> for Authenticator {
    fn from(name: &str) -> Self {
        match name {
            "org.apache.cassandra.auth.AllowAllAuthenticator" => Authenticator::AllowAllAuthenticator,
            "org.apache.cassandra.auth.PasswordAuthenticator"
            | "com.scylladb.auth.TransitionalAuthenticator" => Authenticator::PasswordAuthenticator,
            other => Authenticator::Other(other.to_owned()),
        }
    }
}

/// The wire protocol compression algorithm.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum Compression {
    /// LZ4 compression algorithm.
    Lz4,
    /// Snappy compression algorithm.
    Snappy,
}

impl Compression {
    /// Name of the algorithm as used in the STARTUP options and SUPPORTED response.
    pub fn as_str(&self) -> &'static str {
        match self {
            Compression::Lz4 => "lz4",
            Compression::Snappy => "snappy",
        }
    }
}

impl Display for Compression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request frame ready to be written to the socket, except for its stream id.
#[derive(Debug, Clone)]
pub struct SerializedRequest {
    data: Vec<u8>,
}

impl SerializedRequest {
    pub fn make<R: SerializableRequest>(
        req: &R,
        compression: Option<Compression>,
        tracing: bool,
    ) -> Result<SerializedRequest, FrameError> {
        let mut flags = 0;
        let mut data = vec![0; HEADER_SIZE];

        if let Some(compression) = compression {
            flags |= FLAG_COMPRESSION;
            let body = req.to_bytes()?;
            compress_append(&body, compression, &mut data)?;
        } else {
            req.serialize(&mut data)?;
        }

        if tracing {
            flags |= FLAG_TRACING;
        }

        data[0] = PROTOCOL_VERSION;
        data[1] = flags;
        // Leave space for the stream number
        data[4] = R::OPCODE as u8;

        let req_size = (data.len() - HEADER_SIZE) as u32;
        data[5..9].copy_from_slice(&req_size.to_be_bytes());

        Ok(Self { data })
    }

    pub fn set_stream(&mut self, stream: i16) {
        self.data[2..4].copy_from_slice(&stream.to_be_bytes());
    }

    pub fn get_data(&self) -> &[u8] {
        &self.data[..]
    }
}

/// Parts of the frame header which are not determined by the request/response type.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FrameParams {
    pub version: u8,
    pub flags: u8,
    pub stream: i16,
}

impl FrameParams {
    pub const fn for_request(&self) -> FrameParams {
        Self {
            version: self.version & 0x7F,
            ..*self
        }
    }

    pub const fn for_response(&self) -> FrameParams {
        Self {
            version: 0x80 | (self.version & 0x7F),
            ..*self
        }
    }
}

impl Default for FrameParams {
    fn default() -> Self {
        Self {
            version: PROTOCOL_VERSION,
            flags: 0x00,
            stream: 0,
        }
    }
}

/// Reads one response frame (header and raw, possibly compressed, body).
pub async fn read_response_frame(
    reader: &mut (impl AsyncRead + Unpin),
) -> Result<(FrameParams, ResponseOpcode, Bytes), FrameError> {
    let (params, opcode, body) = read_frame(reader, true).await?;
    Ok((params, ResponseOpcode::try_from(opcode)?, body))
}

/// Reads one request frame. Used by servers and test doubles.
pub async fn read_request_frame(
    reader: &mut (impl AsyncRead + Unpin),
) -> Result<(FrameParams, request::RequestOpcode, Bytes), FrameError> {
    let (params, opcode, body) = read_frame(reader, false).await?;
    Ok((params, request::RequestOpcode::try_from(opcode)?, body))
}

async fn read_frame(
    reader: &mut (impl AsyncRead + Unpin),
    expect_response: bool,
) -> Result<(FrameParams, u8, Bytes), FrameError> {
    let mut raw_header = [0u8; HEADER_SIZE];
    reader.read_exact(&mut raw_header[..]).await?;

    let mut buf = &raw_header[..];

    let version = buf.get_u8();
    match (version & 0x80 == 0x80, expect_response) {
        (false, true) => return Err(FrameError::FrameFromClient),
        (true, false) => return Err(FrameError::FrameFromServer),
        _ => {}
    }
    if version & 0x7F != PROTOCOL_VERSION {
        return Err(FrameError::VersionNotSupported(version & 0x7f));
    }

    let flags = buf.get_u8();
    let stream = buf.get_i16();

    let frame_params = FrameParams {
        version,
        flags,
        stream,
    };

    let opcode = buf.get_u8();

    let length = buf.get_u32() as usize;
    if length > MAX_FRAME_BODY_SIZE {
        return Err(FrameError::FrameTooLarge(length));
    }

    let mut raw_body = Vec::with_capacity(length).limit(length);
    while raw_body.has_remaining_mut() {
        let n = reader.read_buf(&mut raw_body).await?;
        if n == 0 {
            // EOF, too early
            return Err(FrameError::ConnectionClosed(
                raw_body.remaining_mut(),
                length,
            ));
        }
    }

    Ok((frame_params, opcode, raw_body.into_inner().into()))
}

/// A response body with the optional extensions (tracing id, warnings, custom payload)
/// stripped off its front.
#[derive(Debug)]
pub struct ResponseBodyWithExtensions {
    pub trace_id: Option<Uuid>,
    pub warnings: Vec<String>,
    pub body: Bytes,
    pub custom_payload: Option<HashMap<String, Bytes>>,
}

pub fn parse_response_body_extensions(
    flags: u8,
    compression: Option<Compression>,
    mut body: Bytes,
) -> Result<ResponseBodyWithExtensions, FrameError> {
    if flags & FLAG_COMPRESSION != 0 {
        if let Some(compression) = compression {
            body = decompress(&body, compression)?.into();
        } else {
            return Err(FrameError::NoCompressionNegotiated);
        }
    }

    let trace_id = if flags & FLAG_TRACING != 0 {
        let buf = &mut &*body;
        let trace_id = types::read_uuid(buf).map_err(frame_errors::ParseError::from)?;
        body.advance(16);
        Some(trace_id)
    } else {
        None
    };

    let warnings = if flags & FLAG_WARNING != 0 {
        let body_len = body.len();
        let buf = &mut &*body;
        let warnings = types::read_string_list(buf).map_err(frame_errors::ParseError::from)?;
        let buf_len = buf.len();
        body.advance(body_len - buf_len);
        warnings
    } else {
        Vec::new()
    };

    let custom_payload = if flags & FLAG_CUSTOM_PAYLOAD != 0 {
        let body_len = body.len();
        let buf = &mut &*body;
        let payload_map = types::read_bytes_map(buf).map_err(frame_errors::ParseError::from)?;
        let buf_len = buf.len();
        body.advance(body_len - buf_len);
        Some(payload_map)
    } else {
        None
    };

    Ok(ResponseBodyWithExtensions {
        trace_id,
        warnings,
        body,
        custom_payload,
    })
}

/// Compresses `uncomp_body` with the given algorithm and appends the result to `out`.
pub fn compress_append(
    uncomp_body: &[u8],
    compression: Compression,
    out: &mut Vec<u8>,
) -> Result<(), FrameError> {
    match compression {
        Compression::Lz4 => {
            let uncomp_len = uncomp_body.len() as u32;
            let tmp = lz4_flex::compress(uncomp_body);
            out.reserve_exact(std::mem::size_of::<u32>() + tmp.len());
            out.put_u32(uncomp_len);
            out.extend_from_slice(&tmp[..]);
            Ok(())
        }
        Compression::Snappy => {
            let old_size = out.len();
            out.resize(old_size + snap::raw::max_compress_len(uncomp_body.len()), 0);
            let compressed_size = snap::raw::Encoder::new()
                .compress(uncomp_body, &mut out[old_size..])
                .map_err(|_| FrameError::FrameCompression)?;
            out.truncate(old_size + compressed_size);
            Ok(())
        }
    }
}

/// Reverses [`compress_append`].
pub fn decompress(mut comp_body: &[u8], compression: Compression) -> Result<Vec<u8>, FrameError> {
    match compression {
        Compression::Lz4 => {
            if comp_body.len() < std::mem::size_of::<u32>() {
                return Err(FrameError::FrameDecompression);
            }
            let uncomp_len = comp_body.get_u32() as usize;
            let uncomp_body = lz4_flex::decompress(comp_body, uncomp_len)?;
            Ok(uncomp_body)
        }
        Compression::Snappy => snap::raw::Decoder::new()
            .decompress_vec(comp_body)
            .map_err(|_| FrameError::FrameDecompression),
    }
}

/// An error type for parsing an enum value from a primitive.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("No discrimant in enum `{enum_name}` matches the value `{primitive:?}`")]
pub struct TryFromPrimitiveError<T: Copy + std::fmt::Debug> {
    enum_name: &'static str,
    primitive: T,
}

impl<T: Copy + std::fmt::Debug> TryFromPrimitiveError<T> {
    pub(crate) fn new(enum_name: &'static str, primitive: T) -> Self {
        Self {
            enum_name,
            primitive,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::frame::request::options::Options;

    #[test]
    fn test_lz4_compress() {
        let mut out = Vec::from(&b"Hello"[..]);
        let uncomp_body = b", World!";
        let compression = Compression::Lz4;
        let expect = vec![
            72, 101, 108, 108, 111, 0, 0, 0, 8, 128, 44, 32, 87, 111, 114, 108, 100, 33,
        ];

        compress_append(uncomp_body, compression, &mut out).unwrap();
        assert_eq!(expect, out);
    }

    #[test]
    fn test_lz4_decompress() {
        let mut comp_body = Vec::new();
        let uncomp_body = "Hello, World!".repeat(100);
        let compression = Compression::Lz4;
        compress_append(uncomp_body.as_bytes(), compression, &mut comp_body).unwrap();
        let result = decompress(&comp_body[..], compression).unwrap();
        assert_eq!(32, comp_body.len());
        assert_eq!(uncomp_body.as_bytes(), result);
    }

    #[test]
    fn test_snappy_decompress_garbage_fails() {
        let garbage = [0xff_u8; 7];
        assert!(matches!(
            decompress(&garbage, Compression::Snappy),
            Err(FrameError::FrameDecompression)
        ));
    }

    #[test]
    fn serialized_request_header_layout() {
        let mut req = SerializedRequest::make(&Options, None, true).unwrap();
        req.set_stream(0x0102);
        let data = req.get_data();
        assert_eq!(data.len(), HEADER_SIZE);
        assert_eq!(data[0], 0x04);
        assert_eq!(data[1], FLAG_TRACING);
        assert_eq!(&data[2..4], &[0x01, 0x02]);
        assert_eq!(data[4], 0x05);
        assert_eq!(&data[5..9], &[0, 0, 0, 0]);
    }

    #[tokio::test]
    async fn read_response_frame_rejects_request_frames() {
        let req = SerializedRequest::make(&Options, None, false).unwrap();
        let mut reader = req.get_data();
        let res = read_response_frame(&mut reader).await;
        assert!(matches!(res, Err(FrameError::FrameFromClient)));
    }

    #[tokio::test]
    async fn read_request_frame_roundtrip() {
        let mut req = SerializedRequest::make(&Options, None, false).unwrap();
        req.set_stream(17);
        let mut reader = req.get_data();
        let (params, opcode, body) = read_request_frame(&mut reader).await.unwrap();
        assert_eq!(params.stream, 17);
        assert_eq!(opcode, request::RequestOpcode::Options);
        assert!(body.is_empty());
    }

    #[test]
    fn body_extensions_are_stripped() {
        let trace_id = Uuid::from_u128(0x1234);
        let mut body = Vec::new();
        types::write_uuid(&trace_id, &mut body);
        types::write_string_list(&["careful".to_owned()], &mut body).unwrap();
        body.extend_from_slice(b"rest");

        let parsed =
            parse_response_body_extensions(FLAG_TRACING | FLAG_WARNING, None, body.into())
                .unwrap();
        assert_eq!(parsed.trace_id, Some(trace_id));
        assert_eq!(parsed.warnings, vec!["careful".to_owned()]);
        assert_eq!(&parsed.body[..], b"rest");
        assert!(parsed.custom_payload.is_none());
    }
}
