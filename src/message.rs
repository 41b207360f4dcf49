//! Kafka v0 message and message-set codec.
//!
//! # Record Layout
//!
//! ```text
//! Offset  Size  Field
//! 0       8     offset
//! 8       4     size (bytes after this field)
//! 12      4     crc (IEEE CRC32 of bytes 16..end)
//! 16      1     magic
//! 17      1     attributes
//! 18      ...   key (BYTES, nullable)
//! ...     ...   value (BYTES, nullable)
//! ```
//!
//! A message set is a plain concatenation of records with no outer length.
//! Brokers fill fetch responses up to a byte budget and cut the final record
//! wherever the budget lands, so the set decoder treats a short tail as the
//! end of input rather than an error.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use nom::number::complete::be_i8;
use nombytes::NomBytes;

use crate::constants::{MSG_CRC_SIZE, MSG_HEADER_SIZE, MSG_MIN_BODY_SIZE};
use crate::encode::ToByte;
use crate::error::{Error, KafkaCode, Result};
use crate::parser::parse_nullable_bytes;

/// A single Kafka record.
///
/// `key` and `value` are nullable; the encoder writes an empty payload as
/// NULL, so only `None` and non-empty `Some` survive a round trip.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Message {
    pub offset: i64,
    pub magic: i8,
    pub attributes: i8,
    pub key: Option<Bytes>,
    pub value: Option<Bytes>,
}

impl Message {
    /// Create a record carrying `value` and no key.
    pub fn new(value: impl Into<Bytes>) -> Self {
        Message {
            value: Some(value.into()),
            ..Message::default()
        }
    }

    /// Create a keyed record.
    pub fn with_key(key: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Message {
            key: Some(key.into()),
            value: Some(value.into()),
            ..Message::default()
        }
    }
}

impl ToByte for Message {
    fn encode<T: BufMut>(&self, buffer: &mut T) -> Result<()> {
        // The crc covers everything after itself, so the covered region is
        // rendered first and hashed before the header goes out.
        let mut body = BytesMut::with_capacity(
            2 + 4
                + self.key.as_deref().map_or(0, <[u8]>::len)
                + 4
                + self.value.as_deref().map_or(0, <[u8]>::len),
        );
        self.magic.encode(&mut body)?;
        self.attributes.encode(&mut body)?;
        self.key.encode(&mut body)?;
        self.value.encode(&mut body)?;

        let crc = crc32fast::hash(&body);

        buffer.put_i64(self.offset);
        buffer.put_i32((MSG_CRC_SIZE + body.len()) as i32);
        buffer.put_u32(crc);
        buffer.put(body);
        Ok(())
    }
}

/// Decode a single record from the front of `data`.
///
/// Returns `Ok(Some((message, rest)))` on success, or `Ok(None)` when the
/// buffer is too short to hold the whole record (a truncated fetch tail).
/// With `strict` set, a crc mismatch fails with
/// [`KafkaCode::CorruptMessage`].
pub fn decode_message(data: &Bytes, strict: bool) -> Result<Option<(Message, Bytes)>> {
    let mut cursor = data.clone();
    if cursor.remaining() < MSG_HEADER_SIZE {
        return Ok(None);
    }

    let offset = cursor.get_i64();
    let size = cursor.get_i32();
    if size < MSG_MIN_BODY_SIZE as i32 {
        return Err(Error::ParsingError(data.clone()));
    }
    let size = size as usize;
    if cursor.remaining() < size {
        // Truncated tail: the declared size runs past the buffer.
        return Ok(None);
    }

    let body = cursor.copy_to_bytes(size);
    let rest = cursor.copy_to_bytes(cursor.remaining());

    let crc = u32::from_be_bytes([body[0], body[1], body[2], body[3]]);
    let covered = body.slice(MSG_CRC_SIZE..);
    if strict && crc32fast::hash(&covered) != crc {
        return Err(Error::KafkaError(KafkaCode::CorruptMessage));
    }

    let s = NomBytes::new(covered);
    let (message, leftover) = parse_message_body(s, offset)
        .map_err(|_| Error::ParsingError(data.clone()))?;
    if !leftover.is_empty() {
        // Key/value lengths must account for exactly the declared size.
        return Err(Error::ParsingError(data.clone()));
    }

    Ok(Some((message, rest)))
}

fn parse_message_body(
    s: NomBytes,
    offset: i64,
) -> std::result::Result<(Message, Bytes), nom::Err<nom::error::Error<NomBytes>>> {
    let (s, magic) = be_i8(s)?;
    let (s, attributes) = be_i8(s)?;
    let (s, key) = parse_nullable_bytes(s)?;
    let (s, value) = parse_nullable_bytes(s)?;
    Ok((
        Message {
            offset,
            magic,
            attributes,
            key,
            value,
        },
        s.into_bytes(),
    ))
}

/// Encode a slice of records as a message set (plain concatenation).
pub fn encode_message_set(messages: &[Message]) -> Result<Bytes> {
    let mut buffer = BytesMut::new();
    for message in messages {
        message.encode(&mut buffer)?;
    }
    Ok(buffer.freeze())
}

/// Decode a message set, accepting a truncated final record.
///
/// Crc verification is skipped; see [`decode_message_set_strict`].
pub fn decode_message_set(data: Bytes) -> Result<Vec<Message>> {
    decode_set(data, false)
}

/// Decode a message set, verifying the crc of every complete record.
pub fn decode_message_set_strict(data: Bytes) -> Result<Vec<Message>> {
    decode_set(data, true)
}

fn decode_set(data: Bytes, strict: bool) -> Result<Vec<Message>> {
    let mut messages = Vec::new();
    let mut rest = data;
    while let Some((message, tail)) = decode_message(&rest, strict)? {
        messages.push(message);
        rest = tail;
    }
    Ok(messages)
}
