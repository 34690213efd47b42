//! Data input traits and implementations for Geode serialization.

use crate::error::{GeodeError, Result};
use bytes::Buf;
use std::io::Cursor;

use super::modified_utf8;

/// Trait for reading primitive values from Geode's binary format.
///
/// All multi-byte values are read in big-endian byte order.
pub trait DataInput {
    /// Reads a single signed byte.
    fn read_byte(&mut self) -> Result<i8>;

    /// Reads a single unsigned byte.
    fn read_ubyte(&mut self) -> Result<u8>;

    /// Reads a boolean from a single byte.
    fn read_bool(&mut self) -> Result<bool>;

    /// Reads a 16-bit signed integer.
    fn read_short(&mut self) -> Result<i16>;

    /// Reads a 16-bit unsigned integer.
    fn read_ushort(&mut self) -> Result<u16>;

    /// Reads a 32-bit signed integer.
    fn read_int(&mut self) -> Result<i32>;

    /// Reads a 64-bit signed integer.
    fn read_long(&mut self) -> Result<i64>;

    /// Reads a 32-bit floating point value.
    fn read_float(&mut self) -> Result<f32>;

    /// Reads a 64-bit floating point value.
    fn read_double(&mut self) -> Result<f64>;

    /// Reads the specified number of raw bytes.
    fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>>;

    /// Returns the number of unread bytes.
    fn remaining(&self) -> usize;

    /// Capacity to reserve for `count` elements read off the wire, each
    /// encoded in at least `min_size` bytes. Never more than the unread
    /// bytes could hold.
    fn capacity_for(&self, count: i32, min_size: usize) -> usize {
        (count.max(0) as usize).min(self.remaining() / min_size.max(1))
    }

    /// Reads a Geode array length.
    ///
    /// Lengths up to 252 take one byte; 254 prefixes an `i16`, 253 prefixes
    /// an `i32` and 255 denotes a null array (`-1`).
    fn read_array_len(&mut self) -> Result<i32> {
        let code = self.read_ubyte()?;
        match code {
            255 => Ok(-1),
            254 => Ok(self.read_ushort()? as i32),
            253 => self.read_int(),
            n => Ok(n as i32),
        }
    }

    /// Reads a length-prefixed byte array; `None` for a null array.
    fn read_byte_array(&mut self) -> Result<Option<Vec<u8>>> {
        let len = self.read_array_len()?;
        if len < 0 {
            return Ok(None);
        }
        self.read_bytes(len as usize).map(Some)
    }

    /// Reads a string prefixed by its `u16` modified UTF-8 byte length.
    fn read_utf(&mut self) -> Result<String> {
        let len = self.read_ushort()? as usize;
        let bytes = self.read_bytes(len)?;
        modified_utf8::decode(&bytes)
    }
}

/// A buffer-based implementation of `DataInput`.
#[derive(Debug)]
pub struct ObjectDataInput<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> ObjectDataInput<'a> {
    /// Creates a new `ObjectDataInput` from the given byte slice.
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            cursor: Cursor::new(data),
        }
    }

    /// Returns the number of bytes remaining to be read.
    pub fn remaining(&self) -> usize {
        self.cursor.remaining()
    }

    /// Returns the current position in the buffer.
    pub fn position(&self) -> u64 {
        self.cursor.position()
    }

    /// Returns the unread tail of the buffer without consuming it.
    pub fn remaining_slice(&self) -> &'a [u8] {
        let data: &'a [u8] = *self.cursor.get_ref();
        let pos = (self.cursor.position() as usize).min(data.len());
        &data[pos..]
    }

    /// Skips `n` bytes.
    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.ensure_remaining(n)?;
        self.cursor.advance(n);
        Ok(())
    }

    fn ensure_remaining(&self, n: usize) -> Result<()> {
        if self.cursor.remaining() < n {
            Err(GeodeError::Serialization(format!(
                "insufficient data: need {} bytes, have {}",
                n,
                self.cursor.remaining()
            )))
        } else {
            Ok(())
        }
    }
}

impl DataInput for ObjectDataInput<'_> {
    fn read_byte(&mut self) -> Result<i8> {
        self.ensure_remaining(1)?;
        Ok(self.cursor.get_i8())
    }

    fn read_ubyte(&mut self) -> Result<u8> {
        self.ensure_remaining(1)?;
        Ok(self.cursor.get_u8())
    }

    fn read_bool(&mut self) -> Result<bool> {
        self.ensure_remaining(1)?;
        Ok(self.cursor.get_u8() != 0)
    }

    fn read_short(&mut self) -> Result<i16> {
        self.ensure_remaining(2)?;
        Ok(self.cursor.get_i16())
    }

    fn read_ushort(&mut self) -> Result<u16> {
        self.ensure_remaining(2)?;
        Ok(self.cursor.get_u16())
    }

    fn read_int(&mut self) -> Result<i32> {
        self.ensure_remaining(4)?;
        Ok(self.cursor.get_i32())
    }

    fn read_long(&mut self) -> Result<i64> {
        self.ensure_remaining(8)?;
        Ok(self.cursor.get_i64())
    }

    fn read_float(&mut self) -> Result<f32> {
        self.ensure_remaining(4)?;
        Ok(self.cursor.get_f32())
    }

    fn read_double(&mut self) -> Result<f64> {
        self.ensure_remaining(8)?;
        Ok(self.cursor.get_f64())
    }

    fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        self.ensure_remaining(len)?;
        let mut buf = vec![0u8; len];
        self.cursor.copy_to_slice(&mut buf);
        Ok(buf)
    }

    fn remaining(&self) -> usize {
        self.cursor.remaining()
    }
}
