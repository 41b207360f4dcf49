//! Bytecode protocol requests & responses.
//!
//! This module implements the client side of the bytecode protocol outlined
//! in the [Kafka Documentation](https://kafka.apache.org/protocol.html).
//!
//! Each per-API module pairs a request struct (created and encoded here,
//! sent to the broker) with response parsing (for the bytes coming back).
//! Request structs implement [`ClientRequest`], the small capability every
//! API carries: its key, its version, whether the broker answers, and how to
//! render the payload. [`encode_request`] wraps the payload in the common
//! header; [`decode_response`] strips the correlation id and hands the rest
//! to the per-API parser.

pub mod list_offsets;
pub mod offset_commit;
pub mod offset_fetch;

use bytes::{BufMut, Bytes, BytesMut};
use nom::{IResult, number::complete::be_i32};
use nombytes::NomBytes;

use crate::encode::ToByte;
use crate::error::{Error, Result};

pub use self::list_offsets::{ListOffsetsRequest, ListOffsetsResponse, OffsetTime};
pub use self::offset_commit::{OffsetCommitRequest, OffsetCommitResponse};
pub use self::offset_fetch::{OffsetFetchRequest, OffsetFetchResponse};

/// API keys of the operations this client speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiKey {
    ListOffsets = 2,
    OffsetCommit = 8,
    OffsetFetch = 9,
}

impl From<ApiKey> for i16 {
    fn from(key: ApiKey) -> Self {
        key as i16
    }
}

/// The capability every request type provides.
pub trait ClientRequest {
    /// The API key of this request.
    fn api_key(&self) -> ApiKey;

    /// The API version of this request.
    fn api_version(&self) -> i16 {
        0
    }

    /// Whether the broker sends a response for this request.
    fn has_response(&self) -> bool {
        true
    }

    /// Render the payload (everything after the header) to `buffer`.
    fn encode_payload<W: BufMut>(&self, buffer: &mut W) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct HeaderRequest<'a> {
    /// The API key of this request.
    pub api_key: ApiKey,
    /// The API version of this request.
    pub api_version: i16,
    /// The correlation ID of this request.
    pub correlation_id: i32,
    /// The client ID string.
    pub client_id: &'a str,
}

impl<'a> HeaderRequest<'a> {
    /// Create new header request.
    ///
    /// This goes at the beginning of every single request.
    pub fn new(
        api_key: ApiKey,
        api_version: i16,
        correlation_id: i32,
        client_id: &'a str,
    ) -> HeaderRequest<'a> {
        HeaderRequest {
            api_key,
            api_version,
            correlation_id,
            client_id,
        }
    }
}

impl ToByte for HeaderRequest<'_> {
    fn encode<W: BufMut>(&self, buffer: &mut W) -> Result<()> {
        i16::from(self.api_key).encode(buffer)?;
        self.api_version.encode(buffer)?;
        self.correlation_id.encode(buffer)?;
        self.client_id.encode(buffer)?;
        Ok(())
    }
}

#[derive(Debug, Default, PartialEq)]
pub struct HeaderResponse {
    /// The correlation ID of this response.
    pub correlation_id: i32,
}

pub fn parse_header_response(s: NomBytes) -> IResult<NomBytes, HeaderResponse> {
    let (s, correlation_id) = be_i32(s)?;
    Ok((s, HeaderResponse { correlation_id }))
}

/// Render a complete request frame: common header followed by the payload.
pub fn encode_request<R: ClientRequest>(
    client_id: &str,
    correlation_id: i32,
    request: &R,
) -> Result<Bytes> {
    let mut buffer = BytesMut::with_capacity(64);
    HeaderRequest::new(
        request.api_key(),
        request.api_version(),
        correlation_id,
        client_id,
    )
    .encode(&mut buffer)?;
    request.encode_payload(&mut buffer)?;
    Ok(buffer.freeze())
}

/// Strip the correlation id off a response frame and parse the body.
///
/// Returns the correlation id alongside the parsed body so callers that do
/// their own correlation tracking can check it.
pub fn decode_response<T, F>(frame: Bytes, parse_body: F) -> Result<(i32, T)>
where
    F: FnOnce(NomBytes) -> IResult<NomBytes, T>,
{
    let s = NomBytes::new(frame.clone());
    let (s, header) = parse_header_response(s).map_err(|_| Error::ParsingError(frame.clone()))?;
    let (_, body) = parse_body(s).map_err(|_| Error::ParsingError(frame))?;
    Ok((header.correlation_id, body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_key_values() {
        assert_eq!(i16::from(ApiKey::ListOffsets), 2);
        assert_eq!(i16::from(ApiKey::OffsetCommit), 8);
        assert_eq!(i16::from(ApiKey::OffsetFetch), 9);
    }

    #[test]
    fn test_header_request_encode() {
        let header = HeaderRequest::new(ApiKey::ListOffsets, 0, 7, "rdr");
        let mut buf = Vec::new();
        header.encode(&mut buf).unwrap();
        let expected = vec![
            0x00, 0x02, // api_key
            0x00, 0x00, // api_version
            0x00, 0x00, 0x00, 0x07, // correlation_id
            0x00, 0x03, b'r', b'd', b'r', // client_id
        ];
        assert_eq!(buf, expected);
    }

    #[test]
    fn test_parse_header_response() {
        let data = 99i32.to_be_bytes();
        let input = NomBytes::new(Bytes::from(data.to_vec()));
        let (_, header) = parse_header_response(input).unwrap();
        assert_eq!(header.correlation_id, 99);
    }

    #[test]
    fn test_decode_response_strips_correlation_id() {
        let mut frame = Vec::new();
        frame.extend_from_slice(&42i32.to_be_bytes());
        frame.extend_from_slice(&7i16.to_be_bytes());

        let (correlation_id, value) = decode_response(Bytes::from(frame), |s| {
            nom::number::complete::be_i16(s)
        })
        .unwrap();
        assert_eq!(correlation_id, 42);
        assert_eq!(value, 7);
    }

    #[test]
    fn test_decode_response_short_frame_is_parsing_error() {
        let frame = Bytes::from_static(&[0x00, 0x01]);
        let result = decode_response(frame, parse_header_response);
        assert!(matches!(result, Err(Error::ParsingError(_))));
    }
}
