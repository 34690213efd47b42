//! Data output traits and implementations for Geode serialization.

use crate::error::{GeodeError, Result};
use bytes::{BufMut, Bytes, BytesMut};

use super::modified_utf8;

/// Trait for writing primitive values in Geode's binary format.
///
/// All multi-byte values are written in big-endian byte order.
pub trait DataOutput {
    /// Writes a single signed byte.
    fn write_byte(&mut self, v: i8) -> Result<()>;

    /// Writes a single unsigned byte.
    fn write_ubyte(&mut self, v: u8) -> Result<()>;

    /// Writes a boolean as a single byte (0 for false, 1 for true).
    fn write_bool(&mut self, v: bool) -> Result<()>;

    /// Writes a 16-bit signed integer.
    fn write_short(&mut self, v: i16) -> Result<()>;

    /// Writes a 16-bit unsigned integer.
    fn write_ushort(&mut self, v: u16) -> Result<()>;

    /// Writes a 32-bit signed integer.
    fn write_int(&mut self, v: i32) -> Result<()>;

    /// Writes a 64-bit signed integer.
    fn write_long(&mut self, v: i64) -> Result<()>;

    /// Writes a 32-bit floating point value.
    fn write_float(&mut self, v: f32) -> Result<()>;

    /// Writes a 64-bit floating point value.
    fn write_double(&mut self, v: f64) -> Result<()>;

    /// Writes raw bytes without length prefix.
    fn write_bytes(&mut self, v: &[u8]) -> Result<()>;

    /// Writes a Geode array length (see [`DataInput::read_array_len`]).
    ///
    /// [`DataInput::read_array_len`]: super::DataInput::read_array_len
    fn write_array_len(&mut self, len: i32) -> Result<()> {
        if len < 0 {
            self.write_ubyte(255)
        } else if len <= 252 {
            self.write_ubyte(len as u8)
        } else if len <= 0xFFFF {
            self.write_ubyte(254)?;
            self.write_ushort(len as u16)
        } else {
            self.write_ubyte(253)?;
            self.write_int(len)
        }
    }

    /// Writes a length-prefixed byte array; `None` writes a null array.
    fn write_byte_array(&mut self, v: Option<&[u8]>) -> Result<()> {
        match v {
            None => self.write_array_len(-1),
            Some(bytes) => {
                self.write_array_len(bytes.len() as i32)?;
                self.write_bytes(bytes)
            }
        }
    }

    /// Writes a string as `u16` length plus modified UTF-8 bytes.
    fn write_utf(&mut self, v: &str) -> Result<()> {
        let encoded = modified_utf8::encode(v);
        if encoded.len() > u16::MAX as usize {
            return Err(GeodeError::Serialization(format!(
                "string of {} encoded bytes exceeds the UTF limit",
                encoded.len()
            )));
        }
        self.write_ushort(encoded.len() as u16)?;
        self.write_bytes(&encoded)
    }
}

/// A buffer-based implementation of `DataOutput`.
#[derive(Debug, Default)]
pub struct ObjectDataOutput {
    buffer: BytesMut,
}

impl ObjectDataOutput {
    /// Creates a new `ObjectDataOutput` with default capacity.
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(256),
        }
    }

    /// Creates a new `ObjectDataOutput` with the specified capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
        }
    }

    /// Returns the written bytes as a slice.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Consumes the output and returns the written bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer.to_vec()
    }

    /// Consumes the output and returns the written bytes without copying.
    pub fn freeze(self) -> Bytes {
        self.buffer.freeze()
    }

    /// Returns the number of bytes written.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Returns true if no bytes have been written.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

impl DataOutput for ObjectDataOutput {
    fn write_byte(&mut self, v: i8) -> Result<()> {
        self.buffer.put_i8(v);
        Ok(())
    }

    fn write_ubyte(&mut self, v: u8) -> Result<()> {
        self.buffer.put_u8(v);
        Ok(())
    }

    fn write_bool(&mut self, v: bool) -> Result<()> {
        self.buffer.put_u8(u8::from(v));
        Ok(())
    }

    fn write_short(&mut self, v: i16) -> Result<()> {
        self.buffer.put_i16(v);
        Ok(())
    }

    fn write_ushort(&mut self, v: u16) -> Result<()> {
        self.buffer.put_u16(v);
        Ok(())
    }

    fn write_int(&mut self, v: i32) -> Result<()> {
        self.buffer.put_i32(v);
        Ok(())
    }

    fn write_long(&mut self, v: i64) -> Result<()> {
        self.buffer.put_i64(v);
        Ok(())
    }

    fn write_float(&mut self, v: f32) -> Result<()> {
        self.buffer.put_f32(v);
        Ok(())
    }

    fn write_double(&mut self, v: f64) -> Result<()> {
        self.buffer.put_f64(v);
        Ok(())
    }

    fn write_bytes(&mut self, v: &[u8]) -> Result<()> {
        self.buffer.put_slice(v);
        Ok(())
    }
}
