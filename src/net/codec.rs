//! Binary wire encoding
//!
//! Byte-oriented variable-length encoding shared by state sync and client
//! input packets. Integers use 7-data-bit varints with a continuation bit
//! per byte, signed values are zigzag-folded first, floats are
//! little-endian, strings are NUL-terminated UTF-8, and entity references
//! travel as raw unsigned ids (the codec never dereferences them).
//!
//! Any malformed input (truncated buffer, overlong varint, unknown tag,
//! bad UTF-8) fails the whole packet, not just the field.

use thiserror::Error;

use crate::game::fields::{FieldValue, ScalarType, WireString, WireType};
use crate::game::registry::EntityId;

/// Maximum encoded length of a 64-bit varint
pub const MAX_VARINT_BYTES: usize = 10;

/// Errors that abort decoding of a packet
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("buffer truncated at offset {0}")]
    Truncated(usize),
    #[error("varint longer than {MAX_VARINT_BYTES} bytes")]
    OverlongVarint,
    #[error("unknown packet tag {0:#04x}")]
    UnknownTag(u8),
    #[error("string payload is not valid utf-8")]
    InvalidUtf8,
    #[error("entity reference out of id range")]
    EntityOutOfRange,
    #[error("trailing bytes after packet end")]
    TrailingBytes,
}

// ============================================================================
// Writer
// ============================================================================

/// Append-only encoder over a growable byte buffer
#[derive(Debug, Default)]
pub struct WireWriter {
    buf: Vec<u8>,
}

impl WireWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    #[inline]
    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn write_varuint(&mut self, mut value: u64) {
        loop {
            let byte = (value & 0x7f) as u8;
            value >>= 7;
            if value == 0 {
                self.buf.push(byte);
                return;
            }
            self.buf.push(byte | 0x80);
        }
    }

    pub fn write_varint(&mut self, value: i64) {
        // Zigzag fold so small magnitudes stay short in either sign
        self.write_varuint(((value << 1) ^ (value >> 63)) as u64);
    }

    pub fn write_float(&mut self, value: f32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_double(&mut self, value: f64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Entity reference: the raw id as an unsigned varint. Meaning is
    /// context-dependent and resolved by the consumer.
    pub fn write_entity(&mut self, id: EntityId) {
        self.write_varuint(id as u64);
    }

    pub fn write_string(&mut self, value: &WireString) {
        self.buf.extend_from_slice(value.as_bytes());
        self.buf.push(0);
    }

    /// Encode a field value under its schema wire type
    pub fn write_value(&mut self, ty: WireType, value: &FieldValue) {
        match ty {
            WireType::Scalar(s) => self.write_scalar(s, value),
            WireType::Array(s, len) => match value {
                FieldValue::Array(items) => {
                    debug_assert_eq!(items.len(), len);
                    for item in items.iter() {
                        self.write_scalar(s, item);
                    }
                }
                other => {
                    debug_assert!(false, "array field holds scalar {:?}", other);
                }
            },
        }
    }

    fn write_scalar(&mut self, s: ScalarType, value: &FieldValue) {
        match s {
            ScalarType::VarUint => self.write_varuint(value.as_uint()),
            ScalarType::VarInt => self.write_varint(value.as_int()),
            ScalarType::Float => self.write_float(value.as_float()),
            ScalarType::Double => self.write_double(value.as_double()),
            ScalarType::EntId => self.write_entity(value.as_entity()),
            ScalarType::StringNt => match value {
                FieldValue::Text(s) => self.write_string(s),
                _ => self.write_u8(0),
            },
        }
    }
}

// ============================================================================
// Reader
// ============================================================================

/// Cursor-based decoder over a received packet
#[derive(Debug)]
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_at_end(&self) -> bool {
        self.pos == self.buf.len()
    }

    /// Whole-packet decoders call this last; leftover bytes mean the
    /// packet was malformed
    pub fn expect_end(&self) -> Result<(), CodecError> {
        if self.is_at_end() {
            Ok(())
        } else {
            Err(CodecError::TrailingBytes)
        }
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        let byte = *self
            .buf
            .get(self.pos)
            .ok_or(CodecError::Truncated(self.pos))?;
        self.pos += 1;
        Ok(byte)
    }

    pub fn read_varuint(&mut self) -> Result<u64, CodecError> {
        let mut value: u64 = 0;
        for i in 0..MAX_VARINT_BYTES {
            let byte = self.read_u8()?;
            // The tenth byte may only carry bit 63; anything above that
            // does not fit in a u64
            if i == MAX_VARINT_BYTES - 1 && byte > 0x01 {
                return Err(CodecError::OverlongVarint);
            }
            value |= ((byte & 0x7f) as u64) << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(CodecError::OverlongVarint)
    }

    pub fn read_varint(&mut self) -> Result<i64, CodecError> {
        let n = self.read_varuint()?;
        Ok(((n >> 1) as i64) ^ -((n & 1) as i64))
    }

    pub fn read_float(&mut self) -> Result<f32, CodecError> {
        let bytes = self.read_exact::<4>()?;
        Ok(f32::from_le_bytes(bytes))
    }

    pub fn read_double(&mut self) -> Result<f64, CodecError> {
        let bytes = self.read_exact::<8>()?;
        Ok(f64::from_le_bytes(bytes))
    }

    /// Entity reference: raw id, no existence check (validity is
    /// re-checked by the consumer against the registry)
    pub fn read_entity(&mut self) -> Result<EntityId, CodecError> {
        let raw = self.read_varuint()?;
        if raw > EntityId::MAX as u64 {
            return Err(CodecError::EntityOutOfRange);
        }
        Ok(raw as EntityId)
    }

    pub fn read_string(&mut self) -> Result<WireString, CodecError> {
        let start = self.pos;
        let nul = self.buf[start..]
            .iter()
            .position(|&b| b == 0)
            .ok_or(CodecError::Truncated(self.buf.len()))?;
        let bytes = &self.buf[start..start + nul];
        self.pos = start + nul + 1;
        WireString::from_bytes(bytes).ok_or(CodecError::InvalidUtf8)
    }

    /// Decode a field value of the given schema wire type
    pub fn read_value(&mut self, ty: WireType) -> Result<FieldValue, CodecError> {
        match ty {
            WireType::Scalar(s) => self.read_scalar(s),
            WireType::Array(s, len) => {
                let mut items = Vec::with_capacity(len);
                for _ in 0..len {
                    items.push(self.read_scalar(s)?);
                }
                Ok(FieldValue::Array(items.into_boxed_slice()))
            }
        }
    }

    fn read_scalar(&mut self, s: ScalarType) -> Result<FieldValue, CodecError> {
        Ok(match s {
            ScalarType::VarUint => FieldValue::UInt(self.read_varuint()?),
            ScalarType::VarInt => FieldValue::Int(self.read_varint()?),
            ScalarType::Float => FieldValue::Float(self.read_float()?),
            ScalarType::Double => FieldValue::Double(self.read_double()?),
            ScalarType::EntId => FieldValue::Entity(self.read_entity()?),
            ScalarType::StringNt => FieldValue::Text(self.read_string()?),
        })
    }

    fn read_exact<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let end = self.pos + N;
        if end > self.buf.len() {
            return Err(CodecError::Truncated(self.pos));
        }
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buf[self.pos..end]);
        self.pos = end;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::fields::INLINE_STRING_CAP;
    use crate::game::registry::NULL_ENTITY;

    fn round_trip_value(ty: WireType, value: FieldValue) {
        let mut writer = WireWriter::new();
        writer.write_value(ty, &value);
        let bytes = writer.into_bytes();

        let mut reader = WireReader::new(&bytes);
        let decoded = reader.read_value(ty).expect("decode");
        assert_eq!(decoded, value);
        assert!(reader.expect_end().is_ok());
    }

    #[test]
    fn test_varuint_round_trip_boundaries() {
        // Byte-length boundaries: 7, 14, 21, ... data bits
        for v in [
            0u64,
            1,
            127,
            128,
            16_383,
            16_384,
            2_097_151,
            u32::MAX as u64,
            u64::MAX,
        ] {
            round_trip_value(WireType::Scalar(ScalarType::VarUint), FieldValue::UInt(v));
        }
    }

    #[test]
    fn test_varuint_encoded_lengths() {
        let lengths = [(0u64, 1), (127, 1), (128, 2), (16_383, 2), (16_384, 3)];
        for (value, expected) in lengths {
            let mut writer = WireWriter::new();
            writer.write_varuint(value);
            assert_eq!(writer.len(), expected, "length of {}", value);
        }
    }

    #[test]
    fn test_varint_round_trip_negatives() {
        for v in [0i64, -1, 1, -64, 64, i32::MIN as i64, i64::MAX, i64::MIN] {
            round_trip_value(WireType::Scalar(ScalarType::VarInt), FieldValue::Int(v));
        }
    }

    #[test]
    fn test_zigzag_keeps_small_negatives_short() {
        let mut writer = WireWriter::new();
        writer.write_varint(-1);
        assert_eq!(writer.len(), 1);
    }

    #[test]
    fn test_float_and_double_round_trip() {
        round_trip_value(WireType::Scalar(ScalarType::Float), FieldValue::Float(-123.456));
        round_trip_value(
            WireType::Scalar(ScalarType::Double),
            FieldValue::Double(std::f64::consts::PI),
        );
    }

    #[test]
    fn test_entity_round_trip_including_null() {
        round_trip_value(WireType::Scalar(ScalarType::EntId), FieldValue::Entity(0));
        round_trip_value(WireType::Scalar(ScalarType::EntId), FieldValue::Entity(12345));
        round_trip_value(
            WireType::Scalar(ScalarType::EntId),
            FieldValue::Entity(NULL_ENTITY),
        );
    }

    #[test]
    fn test_entity_out_of_range_rejected() {
        let mut writer = WireWriter::new();
        writer.write_varuint(u16::MAX as u64 + 1);
        let bytes = writer.into_bytes();

        let mut reader = WireReader::new(&bytes);
        assert_eq!(reader.read_entity(), Err(CodecError::EntityOutOfRange));
    }

    #[test]
    fn test_string_round_trip_boundaries() {
        let cases = [
            String::new(),                         // empty
            "x".repeat(INLINE_STRING_CAP),         // at the inline boundary
            "x".repeat(INLINE_STRING_CAP + 1),     // first spilled length
            "unicode: æøå".to_string(),
        ];
        for s in cases {
            round_trip_value(
                WireType::Scalar(ScalarType::StringNt),
                FieldValue::Text(WireString::new(&s)),
            );
        }
    }

    #[test]
    fn test_string_missing_terminator_is_truncated_error() {
        let mut reader = WireReader::new(b"no terminator");
        assert!(matches!(
            reader.read_string(),
            Err(CodecError::Truncated(_))
        ));
    }

    #[test]
    fn test_string_invalid_utf8_rejected() {
        let bytes = [0xff, 0xfe, 0x00];
        let mut reader = WireReader::new(&bytes);
        assert_eq!(reader.read_string(), Err(CodecError::InvalidUtf8));
    }

    #[test]
    fn test_array_round_trip() {
        let value = FieldValue::Array(
            vec![
                FieldValue::Text(WireString::new("alpha")),
                FieldValue::Text(WireString::new("")),
                FieldValue::Text(WireString::new("gamma")),
            ]
            .into_boxed_slice(),
        );
        round_trip_value(WireType::Array(ScalarType::StringNt, 3), value);
    }

    #[test]
    fn test_truncated_varint() {
        let bytes = [0x80, 0x80]; // continuation bits with no terminator
        let mut reader = WireReader::new(&bytes);
        assert!(matches!(
            reader.read_varuint(),
            Err(CodecError::Truncated(_))
        ));
    }

    #[test]
    fn test_overlong_varint() {
        let bytes = [0x80u8; MAX_VARINT_BYTES + 2];
        let mut reader = WireReader::new(&bytes);
        assert_eq!(reader.read_varuint(), Err(CodecError::OverlongVarint));
    }

    #[test]
    fn test_ten_byte_varint_overflow_rejected() {
        // Nine continuation bytes leave only bit 63 for the tenth byte;
        // 0x02 would need bit 64
        let mut bytes = [0x80u8; MAX_VARINT_BYTES];
        bytes[MAX_VARINT_BYTES - 1] = 0x02;
        let mut reader = WireReader::new(&bytes);
        assert_eq!(reader.read_varuint(), Err(CodecError::OverlongVarint));

        // The maximal in-range encoding still decodes
        let mut max_bytes = [0xffu8; MAX_VARINT_BYTES];
        max_bytes[MAX_VARINT_BYTES - 1] = 0x01;
        let mut reader = WireReader::new(&max_bytes);
        assert_eq!(reader.read_varuint(), Ok(u64::MAX));
    }

    #[test]
    fn test_truncated_float() {
        let bytes = [0x00, 0x01];
        let mut reader = WireReader::new(&bytes);
        assert!(matches!(reader.read_float(), Err(CodecError::Truncated(_))));
    }

    #[test]
    fn test_expect_end_flags_trailing_bytes() {
        let bytes = [0x05, 0x01];
        let mut reader = WireReader::new(&bytes);
        reader.read_u8().unwrap();
        assert_eq!(reader.expect_end(), Err(CodecError::TrailingBytes));
    }
}
