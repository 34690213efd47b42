//! Serialization traits and implementations for the built-in cacheable types.
//!
//! Every value written through [`Serializable`] starts with its type code so
//! that servers can decode it without a schema.

use std::hash::Hash;

use super::ds_code::*;
use super::{modified_utf8, DataInput, DataOutput, ObjectDataInput, ObjectDataOutput};
use crate::error::{GeodeError, Result};

/// Trait for types that can be serialized to Geode's binary format.
pub trait Serializable {
    /// Serializes this value, including its type code, to the given output.
    fn serialize<W: DataOutput>(&self, output: &mut W) -> Result<()>;

    /// Convenience method: serializes this value to a byte vector.
    fn to_bytes(&self) -> Result<Vec<u8>>
    where
        Self: Sized,
    {
        let mut output = ObjectDataOutput::new();
        self.serialize(&mut output)?;
        Ok(output.into_bytes())
    }
}

/// Trait for types that can be deserialized from Geode's binary format.
pub trait Deserializable: Sized {
    /// Deserializes a value, starting at its type code.
    fn deserialize<R: DataInput>(input: &mut R) -> Result<Self>;

    /// Convenience method: deserializes a value from a byte slice.
    fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut input = ObjectDataInput::new(data);
        Self::deserialize(&mut input)
    }
}

/// A type usable as a region key.
///
/// `hashcode` must agree with the server's hash of the same key, since it
/// selects the bucket a key lives in.
pub trait CacheableKey:
    Serializable + Deserializable + Eq + Hash + Clone + Send + Sync + std::fmt::Debug + 'static
{
    /// Returns the key's hash as computed by the server.
    fn hashcode(&self) -> i32;
}

/// A type usable as a region value.
pub trait CacheableValue:
    Serializable + Deserializable + Clone + Send + Sync + std::fmt::Debug + 'static
{
}

impl<T> CacheableValue for T where
    T: Serializable + Deserializable + Clone + Send + Sync + std::fmt::Debug + 'static
{
}

fn expect_code<R: DataInput>(input: &mut R, expected: i8, what: &str) -> Result<()> {
    let code = input.read_byte()?;
    if code != expected {
        return Err(GeodeError::Serialization(format!(
            "expected type code {} for {}, found {}",
            expected, what, code
        )));
    }
    Ok(())
}

/// Writes a typed string, or a null string for `None`.
pub fn write_typed_string<W: DataOutput>(output: &mut W, value: Option<&str>) -> Result<()> {
    let Some(s) = value else {
        return output.write_byte(CACHEABLE_NULL_STRING);
    };
    if s.is_ascii() {
        if s.len() <= u16::MAX as usize {
            output.write_byte(CACHEABLE_ASCII_STRING)?;
            output.write_ushort(s.len() as u16)?;
        } else {
            output.write_byte(CACHEABLE_ASCII_STRING_HUGE)?;
            output.write_int(s.len() as i32)?;
        }
        return output.write_bytes(s.as_bytes());
    }
    if modified_utf8::encoded_len(s) <= u16::MAX as usize {
        output.write_byte(CACHEABLE_STRING)?;
        output.write_utf(s)
    } else {
        let units: Vec<u16> = s.encode_utf16().collect();
        output.write_byte(CACHEABLE_STRING_HUGE)?;
        output.write_int(units.len() as i32)?;
        for unit in units {
            output.write_ushort(unit)?;
        }
        Ok(())
    }
}

/// Reads a typed string; `None` for a null string or null object.
pub fn read_typed_string<R: DataInput>(input: &mut R) -> Result<Option<String>> {
    let code = input.read_byte()?;
    match code {
        CACHEABLE_NULL_STRING | NULL_OBJ => Ok(None),
        CACHEABLE_ASCII_STRING | CACHEABLE_STRING => input.read_utf().map(Some),
        CACHEABLE_ASCII_STRING_HUGE => {
            let len = input.read_int()?;
            if len < 0 {
                return Err(GeodeError::Serialization(format!(
                    "invalid string length: {}",
                    len
                )));
            }
            let bytes = input.read_bytes(len as usize)?;
            String::from_utf8(bytes)
                .map(Some)
                .map_err(|e| GeodeError::Serialization(format!("invalid ASCII string: {}", e)))
        }
        CACHEABLE_STRING_HUGE => {
            let len = input.read_int()?;
            if len < 0 {
                return Err(GeodeError::Serialization(format!(
                    "invalid string length: {}",
                    len
                )));
            }
            let mut units = Vec::with_capacity(input.capacity_for(len, 2));
            for _ in 0..len {
                units.push(input.read_ushort()?);
            }
            String::from_utf16(&units)
                .map(Some)
                .map_err(|e| GeodeError::Serialization(format!("invalid UTF-16 string: {}", e)))
        }
        other => Err(GeodeError::Serialization(format!(
            "type code {} is not a string",
            other
        ))),
    }
}

impl Serializable for String {
    fn serialize<W: DataOutput>(&self, output: &mut W) -> Result<()> {
        write_typed_string(output, Some(self.as_str()))
    }
}

impl Deserializable for String {
    fn deserialize<R: DataInput>(input: &mut R) -> Result<Self> {
        read_typed_string(input)?
            .ok_or_else(|| GeodeError::Serialization("unexpected null string".to_string()))
    }
}

impl CacheableKey for String {
    fn hashcode(&self) -> i32 {
        self.encode_utf16()
            .fold(0i32, |h, unit| h.wrapping_mul(31).wrapping_add(unit as i32))
    }
}

impl Serializable for bool {
    fn serialize<W: DataOutput>(&self, output: &mut W) -> Result<()> {
        output.write_byte(CACHEABLE_BOOLEAN)?;
        output.write_bool(*self)
    }
}

impl Deserializable for bool {
    fn deserialize<R: DataInput>(input: &mut R) -> Result<Self> {
        expect_code(input, CACHEABLE_BOOLEAN, "bool")?;
        input.read_bool()
    }
}

impl Serializable for i16 {
    fn serialize<W: DataOutput>(&self, output: &mut W) -> Result<()> {
        output.write_byte(CACHEABLE_INT16)?;
        output.write_short(*self)
    }
}

impl Deserializable for i16 {
    fn deserialize<R: DataInput>(input: &mut R) -> Result<Self> {
        expect_code(input, CACHEABLE_INT16, "i16")?;
        input.read_short()
    }
}

impl CacheableKey for i16 {
    fn hashcode(&self) -> i32 {
        *self as i32
    }
}

impl Serializable for i32 {
    fn serialize<W: DataOutput>(&self, output: &mut W) -> Result<()> {
        output.write_byte(CACHEABLE_INT32)?;
        output.write_int(*self)
    }
}

impl Deserializable for i32 {
    fn deserialize<R: DataInput>(input: &mut R) -> Result<Self> {
        expect_code(input, CACHEABLE_INT32, "i32")?;
        input.read_int()
    }
}

impl CacheableKey for i32 {
    fn hashcode(&self) -> i32 {
        *self
    }
}

impl Serializable for i64 {
    fn serialize<W: DataOutput>(&self, output: &mut W) -> Result<()> {
        output.write_byte(CACHEABLE_INT64)?;
        output.write_long(*self)
    }
}

impl Deserializable for i64 {
    fn deserialize<R: DataInput>(input: &mut R) -> Result<Self> {
        expect_code(input, CACHEABLE_INT64, "i64")?;
        input.read_long()
    }
}

impl CacheableKey for i64 {
    fn hashcode(&self) -> i32 {
        let v = *self as u64;
        (v ^ (v >> 32)) as i32
    }
}

impl Serializable for f64 {
    fn serialize<W: DataOutput>(&self, output: &mut W) -> Result<()> {
        output.write_byte(CACHEABLE_DOUBLE)?;
        output.write_double(*self)
    }
}

impl Deserializable for f64 {
    fn deserialize<R: DataInput>(input: &mut R) -> Result<Self> {
        expect_code(input, CACHEABLE_DOUBLE, "f64")?;
        input.read_double()
    }
}

impl Serializable for Vec<u8> {
    fn serialize<W: DataOutput>(&self, output: &mut W) -> Result<()> {
        output.write_byte(CACHEABLE_BYTES)?;
        output.write_byte_array(Some(self.as_slice()))
    }
}

impl Deserializable for Vec<u8> {
    fn deserialize<R: DataInput>(input: &mut R) -> Result<Self> {
        expect_code(input, CACHEABLE_BYTES, "byte array")?;
        Ok(input.read_byte_array()?.unwrap_or_default())
    }
}

impl CacheableKey for Vec<u8> {
    fn hashcode(&self) -> i32 {
        self.iter()
            .fold(1i32, |h, b| h.wrapping_mul(31).wrapping_add(*b as i8 as i32))
    }
}
