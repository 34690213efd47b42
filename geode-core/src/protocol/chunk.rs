//! Chunks of streamed responses and chunk part header classification.

use bytes::Bytes;

use super::constants::{message_type_name, EXCEPTION, REFRESH_METADATA_FLAG};
use super::message::ServerException;
use super::part::Part;
use crate::error::{GeodeError, Result};
use crate::serialization::{ds_code, modified_utf8, DataInput, ObjectDataInput};

/// One chunk of a chunked response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Message type from the response's first header.
    pub message_type: i32,
    /// Part count from the response's first header.
    pub num_parts: i32,
    /// Transaction id from the response's first header.
    pub transaction_id: i32,
    /// Raw chunk flags.
    pub flags: u8,
    /// True for the final chunk of the response.
    pub last: bool,
    /// Concatenated parts of this chunk.
    pub payload: Bytes,
}

impl Chunk {
    /// Splits the payload into parts.
    pub fn parts(&self) -> Result<Vec<Part>> {
        Part::read_all(self.payload.clone())
    }

    /// Returns true if the response is an exception.
    pub fn is_exception(&self) -> bool {
        self.message_type == EXCEPTION
    }

    /// Returns true if the server asked for a metadata refresh.
    pub fn refresh_metadata_requested(&self) -> bool {
        self.flags & REFRESH_METADATA_FLAG != 0
    }
}

/// Classification of the next part of a chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkObjectType {
    /// A regular object; the input is positioned at its type code.
    Object,
    /// The chunk carries a server exception; the input is positioned after
    /// the exception parts.
    Exception(ServerException),
    /// A null object or zero-length part; the input is positioned after it.
    NullObject,
}

/// Reads the header of the next part of a chunk and classifies it.
///
/// Every part of a chunked result must be an object. Anything else means
/// the stream is desynchronized, which is reported as a protocol error so
/// the connection is discarded rather than read further. `expected_type`,
/// when given, is the type code the object must carry.
pub fn read_chunk_part_header(
    input: &mut ObjectDataInput<'_>,
    method: &str,
    expected_type: Option<i8>,
) -> Result<ChunkObjectType> {
    let part_len = input.read_int()?;
    let is_object = input.read_bool()?;
    if part_len == 0 {
        return Ok(ChunkObjectType::NullObject);
    }
    if part_len < 0 || part_len as usize > input.remaining() {
        return Err(GeodeError::Protocol(format!(
            "{}: invalid chunk part length {}",
            method, part_len
        )));
    }
    if !is_object {
        return Err(GeodeError::Protocol(format!(
            "{}: part is not an object",
            method
        )));
    }

    let type_code = input.remaining_slice()[0] as i8;
    if type_code == ds_code::JAVA_SERIALIZABLE {
        return match read_exception_part(input, part_len as usize) {
            Some(exception) => Ok(ChunkObjectType::Exception(exception)),
            None => Err(GeodeError::Protocol(format!(
                "{}: unreadable exception in chunk",
                method
            ))),
        };
    }
    if type_code == ds_code::NULL_OBJ {
        input.skip(part_len as usize)?;
        return Ok(ChunkObjectType::NullObject);
    }
    if let Some(expected) = expected_type {
        if type_code != expected {
            return Err(GeodeError::Protocol(format!(
                "{}: unexpected data type {}, expected {}",
                method, type_code, expected
            )));
        }
    }
    Ok(ChunkObjectType::Object)
}

/// Reads the serialized throwable part (already positioned at its payload)
/// and the message part that follows it.
fn read_exception_part(input: &mut ObjectDataInput<'_>, blob_len: usize) -> Option<ServerException> {
    input.skip(blob_len).ok()?;
    let text_len = input.read_int().ok()?;
    input.read_bool().ok()?;
    if text_len < 0 {
        return None;
    }
    let text = if text_len == 0 {
        String::new()
    } else {
        let bytes = input.read_bytes(text_len as usize).ok()?;
        modified_utf8::decode(&bytes).ok()?
    };
    Some(ServerException::parse(&text))
}

/// Returns the exception carried by an exception chunk, if any.
pub fn chunk_exception(chunk: &Chunk) -> Result<Option<ServerException>> {
    if !chunk.is_exception() {
        return Ok(None);
    }
    let mut input = ObjectDataInput::new(&chunk.payload);
    match read_chunk_part_header(&mut input, message_type_name(chunk.message_type), None)? {
        ChunkObjectType::Exception(e) => Ok(Some(e)),
        _ => Err(GeodeError::Protocol(
            "exception chunk without exception part".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    fn encode(parts: &[Part]) -> BytesMut {
        let mut buf = BytesMut::new();
        for part in parts {
            part.write_to(&mut buf);
        }
        buf
    }

    #[test]
    fn test_raw_part_is_framing_error() {
        let buf = encode(&[Part::int(5)]);
        let mut input = ObjectDataInput::new(&buf);
        let err = read_chunk_part_header(&mut input, "keySet", None).unwrap_err();
        assert!(matches!(err, GeodeError::Protocol(_)));
    }

    #[test]
    fn test_exception_with_empty_trailing_part() {
        let blob = Part::object_bytes(vec![ds_code::JAVA_SERIALIZABLE as u8, 0xAC, 0xED]);
        let buf = encode(&[blob, Part::raw(Vec::new())]);
        let mut input = ObjectDataInput::new(&buf);
        let kind = read_chunk_part_header(&mut input, "query", None).unwrap();
        match kind {
            ChunkObjectType::Exception(e) => {
                assert!(e.class_name.is_empty());
                assert!(e.message.is_empty());
            }
            other => panic!("expected exception, got {:?}", other),
        }
        assert_eq!(input.remaining(), 0);
    }

    #[test]
    fn test_exception_with_message() {
        let exception = ServerException {
            class_name: "org.apache.geode.cache.query.QueryExecutionLowMemoryException".into(),
            message: "critical heap".into(),
        };
        let buf = encode(&exception.to_parts());
        let mut input = ObjectDataInput::new(&buf);
        assert_eq!(
            read_chunk_part_header(&mut input, "query", None).unwrap(),
            ChunkObjectType::Exception(exception)
        );
    }

    #[test]
    fn test_exception_without_message_part_is_framing_error() {
        let blob = Part::object_bytes(vec![ds_code::JAVA_SERIALIZABLE as u8]);
        let buf = encode(&[blob]);
        let mut input = ObjectDataInput::new(&buf);
        assert!(matches!(
            read_chunk_part_header(&mut input, "query", None),
            Err(GeodeError::Protocol(_))
        ));
    }

    #[test]
    fn test_zero_length_part_is_null() {
        let buf = encode(&[Part::raw(Vec::new())]);
        let mut input = ObjectDataInput::new(&buf);
        assert_eq!(
            read_chunk_part_header(&mut input, "getAll", None).unwrap(),
            ChunkObjectType::NullObject
        );
    }

    #[test]
    fn test_null_object_part() {
        let buf = encode(&[Part::null_object(), Part::int(1)]);
        let mut input = ObjectDataInput::new(&buf);
        assert_eq!(
            read_chunk_part_header(&mut input, "getAll", None).unwrap(),
            ChunkObjectType::NullObject
        );
        assert_eq!(input.read_int().unwrap(), 4);
    }

    #[test]
    fn test_object_positioned_at_type_code() {
        let buf = encode(&[Part::object(&11i32).unwrap()]);
        let mut input = ObjectDataInput::new(&buf);
        assert_eq!(
            read_chunk_part_header(&mut input, "keySet", Some(ds_code::CACHEABLE_INT32)).unwrap(),
            ChunkObjectType::Object
        );
        assert_eq!(input.read_byte().unwrap(), ds_code::CACHEABLE_INT32);
        assert_eq!(input.read_int().unwrap(), 11);
    }

    #[test]
    fn test_unexpected_type_is_framing_error() {
        let buf = encode(&[Part::object(&"k".to_string()).unwrap()]);
        let mut input = ObjectDataInput::new(&buf);
        assert!(matches!(
            read_chunk_part_header(&mut input, "keySet", Some(ds_code::CACHEABLE_INT32)),
            Err(GeodeError::Protocol(_))
        ));
    }

    #[test]
    fn test_chunk_exception() {
        let exception = ServerException {
            class_name: "org.apache.geode.cache.execute.FunctionException".into(),
            message: "no such function".into(),
        };
        let chunk = Chunk {
            message_type: EXCEPTION,
            num_parts: 2,
            transaction_id: -1,
            flags: 1,
            last: true,
            payload: encode(&exception.to_parts()).freeze(),
        };
        assert_eq!(chunk_exception(&chunk).unwrap(), Some(exception));
    }
}
