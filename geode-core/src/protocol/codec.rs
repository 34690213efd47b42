//! Codecs for encoding and decoding Geode messages over tokio framed I/O.

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::chunk::Chunk;
use super::constants::*;
use super::message::Message;
use super::part::Part;
use crate::error::{GeodeError, Result};

fn peek_i32(src: &[u8], offset: usize) -> i32 {
    i32::from_be_bytes([src[offset], src[offset + 1], src[offset + 2], src[offset + 3]])
}

fn check_len(len: i32, what: &str) -> Result<usize> {
    if len < 0 || len as usize > MAX_MESSAGE_SIZE {
        return Err(GeodeError::Protocol(format!("invalid {} length {}", what, len)));
    }
    Ok(len as usize)
}

/// Codec for non-chunked messages.
///
/// Implements the `tokio_util::codec::{Encoder, Decoder}` traits for use
/// with tokio's framed I/O.
#[derive(Debug, Default, Clone, Copy)]
pub struct MessageCodec;

impl MessageCodec {
    /// Creates a new codec instance.
    pub fn new() -> Self {
        Self
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = GeodeError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<()> {
        item.write_to(dst);
        Ok(())
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = GeodeError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if src.len() < MESSAGE_HEADER_SIZE {
            return Ok(None);
        }

        let payload_len = check_len(peek_i32(src, 4), "message")?;
        let num_parts = peek_i32(src, 8);
        if num_parts < 0 || num_parts as usize > payload_len / PART_HEADER_SIZE {
            return Err(GeodeError::Protocol(format!(
                "invalid part count {} for a {} byte payload",
                num_parts, payload_len
            )));
        }

        let total = MESSAGE_HEADER_SIZE + payload_len;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        let message_type = src.get_i32();
        src.advance(8);
        let transaction_id = src.get_i32();
        let flags = src.get_u8();
        let mut payload = src.split_to(payload_len).freeze();

        let mut parts = Vec::with_capacity(num_parts as usize);
        for _ in 0..num_parts {
            parts.push(Part::read_from(&mut payload)?);
        }
        if !payload.is_empty() {
            return Err(GeodeError::Protocol(format!(
                "{} bytes left after {} parts of {}",
                payload.len(),
                num_parts,
                message_type_name(message_type)
            )));
        }

        Ok(Some(Message::from_parts(
            message_type,
            transaction_id,
            flags,
            parts,
        )))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    /// Waiting for the 17-byte header that opens a response.
    FirstHeader,
    /// Waiting for a 5-byte header of a continuation chunk.
    NextHeader,
    /// Waiting for `len` payload bytes.
    Payload { len: usize, flags: u8 },
}

/// Decoder for chunked responses.
///
/// The first chunk of a response carries the message type, part count and
/// transaction id; later chunks only carry their length and flags. After
/// the chunk flagged as last the decoder expects a new response.
#[derive(Debug, Clone)]
pub struct ChunkedResponseDecoder {
    state: ChunkState,
    message_type: i32,
    num_parts: i32,
    transaction_id: i32,
}

impl Default for ChunkedResponseDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkedResponseDecoder {
    /// Creates a decoder waiting for the first chunk of a response.
    pub fn new() -> Self {
        Self {
            state: ChunkState::FirstHeader,
            message_type: 0,
            num_parts: 0,
            transaction_id: NO_TRANSACTION,
        }
    }

    /// Returns true if the decoder is between responses.
    pub fn is_idle(&self) -> bool {
        self.state == ChunkState::FirstHeader
    }

    /// Message type of the response being decoded.
    pub fn message_type(&self) -> i32 {
        self.message_type
    }
}

impl Decoder for ChunkedResponseDecoder {
    type Item = Chunk;
    type Error = GeodeError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            match self.state {
                ChunkState::FirstHeader => {
                    if src.len() < CHUNK_FIRST_HEADER_SIZE {
                        return Ok(None);
                    }
                    self.message_type = src.get_i32();
                    self.num_parts = src.get_i32();
                    self.transaction_id = src.get_i32();
                    let len = check_len(src.get_i32(), "chunk")?;
                    let flags = src.get_u8();
                    self.state = ChunkState::Payload { len, flags };
                }
                ChunkState::NextHeader => {
                    if src.len() < CHUNK_HEADER_SIZE {
                        return Ok(None);
                    }
                    let len = check_len(src.get_i32(), "chunk")?;
                    let flags = src.get_u8();
                    self.state = ChunkState::Payload { len, flags };
                }
                ChunkState::Payload { len, flags } => {
                    if src.len() < len {
                        src.reserve(len - src.len());
                        return Ok(None);
                    }
                    let payload = src.split_to(len).freeze();
                    let last = flags & LAST_CHUNK_FLAG != 0;
                    self.state = if last {
                        ChunkState::FirstHeader
                    } else {
                        ChunkState::NextHeader
                    };
                    return Ok(Some(Chunk {
                        message_type: self.message_type,
                        num_parts: self.num_parts,
                        transaction_id: self.transaction_id,
                        flags,
                        last,
                        payload,
                    }));
                }
            }
        }
    }
}

/// Encoder producing chunked responses, used by servers and test harnesses.
#[derive(Debug, Default, Clone, Copy)]
pub struct ChunkedResponseEncoder;

impl ChunkedResponseEncoder {
    /// Writes one chunk. `first` selects the 17-byte opening header.
    pub fn write_chunk(
        dst: &mut BytesMut,
        first: bool,
        message_type: i32,
        transaction_id: i32,
        parts: &[Part],
        last: bool,
    ) {
        let len: usize = parts.iter().map(Part::wire_size).sum();
        let flags = if last { LAST_CHUNK_FLAG } else { 0 };
        if first {
            dst.reserve(CHUNK_FIRST_HEADER_SIZE + len);
            dst.extend_from_slice(&message_type.to_be_bytes());
            dst.extend_from_slice(&(parts.len() as i32).to_be_bytes());
            dst.extend_from_slice(&transaction_id.to_be_bytes());
        } else {
            dst.reserve(CHUNK_HEADER_SIZE + len);
        }
        dst.extend_from_slice(&(len as i32).to_be_bytes());
        dst.extend_from_slice(&[flags]);
        for part in parts {
            part.write_to(dst);
        }
    }
}
