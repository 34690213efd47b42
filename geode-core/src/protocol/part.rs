//! A single length-prefixed part of a message.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::constants::PART_HEADER_SIZE;
use crate::error::{GeodeError, Result};
use crate::serialization::{
    ds_code, modified_utf8, DataOutput, Deserializable, ObjectDataInput, ObjectDataOutput,
    Serializable,
};

/// A part of a message: `len i32, is_object u8, bytes[len]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    data: Bytes,
    is_object: bool,
}

impl Part {
    /// Creates a raw (non-object) part.
    pub fn raw(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            is_object: false,
        }
    }

    /// Creates an object part from already serialized bytes.
    pub fn object_bytes(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            is_object: true,
        }
    }

    /// Serializes `value` into an object part.
    pub fn object<T: Serializable>(value: &T) -> Result<Self> {
        let mut output = ObjectDataOutput::new();
        value.serialize(&mut output)?;
        Ok(Self::object_bytes(output.freeze()))
    }

    /// Creates an object part holding the null object.
    pub fn null_object() -> Self {
        Self::object_bytes(Bytes::from_static(&[ds_code::NULL_OBJ as u8]))
    }

    /// Creates a raw part holding a big-endian `i32`.
    pub fn int(value: i32) -> Self {
        Self::raw(Bytes::copy_from_slice(&value.to_be_bytes()))
    }

    /// Creates a raw part holding a big-endian `i64`.
    pub fn long(value: i64) -> Self {
        Self::raw(Bytes::copy_from_slice(&value.to_be_bytes()))
    }

    /// Creates a raw single-byte part.
    pub fn byte(value: u8) -> Self {
        Self::raw(Bytes::copy_from_slice(&[value]))
    }

    /// Creates a raw part holding modified UTF-8 text, as used for region
    /// names and query strings.
    pub fn string(value: &str) -> Self {
        Self::raw(modified_utf8::encode(value))
    }

    /// Returns the part's bytes.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Returns true if the part carries a serialized object.
    pub fn is_object(&self) -> bool {
        self.is_object
    }

    /// Returns the payload length.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns true if the part is empty or holds the null object.
    pub fn is_null(&self) -> bool {
        self.data.is_empty() || (self.is_object && self.data[0] as i8 == ds_code::NULL_OBJ)
    }

    /// Returns the size on the wire, header included.
    pub fn wire_size(&self) -> usize {
        PART_HEADER_SIZE + self.data.len()
    }

    /// Interprets the part as a big-endian `i32`.
    pub fn as_int(&self) -> Result<i32> {
        let bytes: [u8; 4] = self.data[..].try_into().map_err(|_| {
            GeodeError::Protocol(format!("expected 4 byte int part, found {} bytes", self.len()))
        })?;
        Ok(i32::from_be_bytes(bytes))
    }

    /// Interprets the part as a big-endian `i64`.
    pub fn as_long(&self) -> Result<i64> {
        let bytes: [u8; 8] = self.data[..].try_into().map_err(|_| {
            GeodeError::Protocol(format!("expected 8 byte long part, found {} bytes", self.len()))
        })?;
        Ok(i64::from_be_bytes(bytes))
    }

    /// Interprets the part as a single byte.
    pub fn as_byte(&self) -> Result<u8> {
        match self.data.first() {
            Some(b) if self.len() == 1 => Ok(*b),
            _ => Err(GeodeError::Protocol(format!(
                "expected 1 byte part, found {} bytes",
                self.len()
            ))),
        }
    }

    /// Interprets a raw part as modified UTF-8 text.
    pub fn as_string(&self) -> Result<String> {
        modified_utf8::decode(&self.data)
    }

    /// Deserializes the object held by this part.
    pub fn deserialize<T: Deserializable>(&self) -> Result<T> {
        if !self.is_object {
            return Err(GeodeError::Protocol(
                "cannot deserialize a raw part as an object".to_string(),
            ));
        }
        T::from_bytes(&self.data)
    }

    /// Deserializes the object held by this part, mapping null to `None`.
    pub fn deserialize_opt<T: Deserializable>(&self) -> Result<Option<T>> {
        if self.is_null() {
            Ok(None)
        } else {
            self.deserialize().map(Some)
        }
    }

    /// Writes the part, header included, to `dst`.
    pub fn write_to(&self, dst: &mut BytesMut) {
        dst.reserve(self.wire_size());
        dst.put_i32(self.data.len() as i32);
        dst.put_u8(u8::from(self.is_object));
        dst.put_slice(&self.data);
    }

    /// Writes the part, header included, to a data output.
    pub fn write_to_output<W: DataOutput>(&self, output: &mut W) -> Result<()> {
        output.write_int(self.data.len() as i32)?;
        output.write_bool(self.is_object)?;
        output.write_bytes(&self.data)
    }

    /// Reads one part from the front of `src`.
    ///
    /// Fails with a protocol error if the part header is malformed or the
    /// payload is truncated.
    pub fn read_from(src: &mut Bytes) -> Result<Self> {
        if src.remaining() < PART_HEADER_SIZE {
            return Err(GeodeError::Protocol(format!(
                "truncated part header: {} bytes left",
                src.remaining()
            )));
        }
        let len = src.get_i32();
        let is_object = src.get_u8() != 0;
        if len < 0 || len as usize > src.remaining() {
            return Err(GeodeError::Protocol(format!(
                "invalid part length {} with {} bytes left",
                len,
                src.remaining()
            )));
        }
        let data = src.split_to(len as usize);
        Ok(Self { data, is_object })
    }

    /// Reads parts until `src` is exhausted.
    pub fn read_all(mut src: Bytes) -> Result<Vec<Self>> {
        let mut parts = Vec::new();
        while src.has_remaining() {
            parts.push(Self::read_from(&mut src)?);
        }
        Ok(parts)
    }

    /// Returns a data input over the part payload.
    pub fn input(&self) -> ObjectDataInput<'_> {
        ObjectDataInput::new(&self.data)
    }
}
