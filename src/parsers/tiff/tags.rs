//! TIFF field types and decoded tag values.

use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::Serialize;

use crate::error::FastHeaderResult;
use crate::reader::EndianAwareReader;

/// Image width in pixels.
pub const IMAGE_WIDTH: u16 = 256;
/// Image height in pixels.
pub const IMAGE_LENGTH: u16 = 257;
/// Bits per sample, one value per sample.
pub const BITS_PER_SAMPLE: u16 = 258;

/// The field type of an IFD entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u16)]
#[allow(clippy::upper_case_acronyms)]
pub enum Type {
    /// 8-bit unsigned integer
    BYTE = 1,
    /// 8-bit byte that contains a 7-bit ASCII code; the last byte must be zero
    ASCII = 2,
    /// 16-bit unsigned integer
    SHORT = 3,
    /// 32-bit unsigned integer
    LONG = 4,
    /// Fraction stored as two 32-bit unsigned integers
    RATIONAL = 5,
    /// 8-bit signed integer
    SBYTE = 6,
    /// 8-bit byte that may contain anything, depending on the field
    UNDEFINED = 7,
    /// 16-bit signed integer
    SSHORT = 8,
    /// 32-bit signed integer
    SLONG = 9,
    /// Fraction stored as two 32-bit signed integers
    SRATIONAL = 10,
    /// 32-bit IEEE floating point
    FLOAT = 11,
    /// 64-bit IEEE floating point
    DOUBLE = 12,
    /// 32-bit unsigned integer (offset)
    IFD = 13,
    /// BigTIFF 64-bit unsigned integer
    LONG8 = 16,
    /// BigTIFF 64-bit signed integer
    SLONG8 = 17,
    /// BigTIFF 64-bit unsigned integer (offset)
    IFD8 = 18,
}

impl Type {
    /// Size in bytes of one value of this type.
    pub fn size(&self) -> u64 {
        match self {
            Type::BYTE | Type::SBYTE | Type::ASCII | Type::UNDEFINED => 1,
            Type::SHORT | Type::SSHORT => 2,
            Type::LONG | Type::SLONG | Type::FLOAT | Type::IFD => 4,
            Type::LONG8
            | Type::SLONG8
            | Type::DOUBLE
            | Type::RATIONAL
            | Type::SRATIONAL
            | Type::IFD8 => 8,
        }
    }
}

/// A decoded tag value.
///
/// Serializes without a type marker: numbers as numbers, ASCII as a string, rationals as
/// `[numerator, denominator]` and multi-valued tags as arrays.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
#[allow(missing_docs)]
pub enum TagValue {
    Byte(u8),
    SignedByte(i8),
    Short(u16),
    SignedShort(i16),
    Unsigned(u32),
    Signed(i32),
    UnsignedBig(u64),
    SignedBig(i64),
    Float(f32),
    Double(f64),
    Rational(u32, u32),
    SRational(i32, i32),
    Ifd(u32),
    IfdBig(u64),
    Ascii(String),
    List(Vec<TagValue>),
}

impl TagValue {
    /// Decode `count` values of type `tag_type` from `data`.
    ///
    /// A single value decodes to a scalar, anything else to a [`TagValue::List`].
    pub(crate) fn decode(
        data: &mut EndianAwareReader,
        tag_type: Type,
        count: u64,
    ) -> FastHeaderResult<Self> {
        if tag_type == Type::ASCII {
            let raw = data.as_ref();
            let raw = &raw[..raw.len().min(count as usize)];
            let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
            let text = String::from_utf8_lossy(&raw[..end]);
            return Ok(TagValue::Ascii(text.trim_end().to_string()));
        }
        if count == 1 {
            return Self::decode_one(data, tag_type);
        }
        let mut values = Vec::with_capacity(count as usize);
        for _ in 0..count {
            values.push(Self::decode_one(data, tag_type)?);
        }
        Ok(TagValue::List(values))
    }

    fn decode_one(data: &mut EndianAwareReader, tag_type: Type) -> FastHeaderResult<Self> {
        Ok(match tag_type {
            Type::BYTE | Type::UNDEFINED | Type::ASCII => TagValue::Byte(data.read_u8()?),
            Type::SBYTE => TagValue::SignedByte(data.read_i8()?),
            Type::SHORT => TagValue::Short(data.read_u16()?),
            Type::SSHORT => TagValue::SignedShort(data.read_i16()?),
            Type::LONG => TagValue::Unsigned(data.read_u32()?),
            Type::SLONG => TagValue::Signed(data.read_i32()?),
            Type::LONG8 => TagValue::UnsignedBig(data.read_u64()?),
            Type::SLONG8 => TagValue::SignedBig(data.read_i64()?),
            Type::FLOAT => TagValue::Float(data.read_f32()?),
            Type::DOUBLE => TagValue::Double(data.read_f64()?),
            Type::RATIONAL => TagValue::Rational(data.read_u32()?, data.read_u32()?),
            Type::SRATIONAL => TagValue::SRational(data.read_i32()?, data.read_i32()?),
            Type::IFD => TagValue::Ifd(data.read_u32()?),
            Type::IFD8 => TagValue::IfdBig(data.read_u64()?),
        })
    }

    /// The value as an unsigned integer, if it is one.
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            TagValue::Byte(v) => Some(v.into()),
            TagValue::Short(v) => Some(v.into()),
            TagValue::Unsigned(v) => Some(v.into()),
            TagValue::UnsignedBig(v) => Some(v),
            _ => None,
        }
    }

    /// The first element of a list, or the value itself.
    pub fn first(&self) -> Option<&TagValue> {
        match self {
            TagValue::List(values) => values.first(),
            value => Some(value),
        }
    }
}
