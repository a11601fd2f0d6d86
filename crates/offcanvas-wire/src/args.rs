//! Argument codec: heterogeneous argument tuples <-> transfer units.
//!
//! Each value is a tag unit followed by a payload whose width the tag fixes:
//!
//! | tag          | payload                                  |
//! |--------------|------------------------------------------|
//! | `SMALL_INT`  | 1 unit                                   |
//! | `FLOAT`      | 2 units, f32 bits low half then high half |
//! | `STRING`     | 1 unit, interned string id               |
//! | `ARRAY`      | 1 unit element count, then the elements  |
//! | `OPAQUE_REF` | none                                     |
//!
//! The float unit order is part of the wire contract.

use thiserror::Error;

use crate::layout::{arg_tag, MAX_NESTING_DEPTH};
use crate::strings::{StringTable, StringTableError};

/// A single tagged argument.
///
/// Callers pick the variant explicitly; nothing is inferred from the shape of
/// an untyped value at encode time.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    SmallInt(u16),
    /// Single precision is the contract; wider floats must be narrowed by the caller.
    Float32(f32),
    Str(String),
    Array(Vec<Value>),
    /// Refers to the resource addressed by the enclosing instruction.
    OpaqueRef,
}

impl Value {
    pub fn str(value: impl Into<String>) -> Self {
        Self::Str(value.into())
    }

    pub fn floats(values: impl IntoIterator<Item = f32>) -> Self {
        Self::Array(values.into_iter().map(Self::Float32).collect())
    }

    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Self::Float32(v) => Some(*v),
            Self::SmallInt(v) => Some(f32::from(*v)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Whether this value (or anything nested in it) uses the float encoding.
    pub fn contains_float(&self) -> bool {
        match self {
            Self::Float32(_) => true,
            Self::Array(items) => items.iter().any(Self::contains_float),
            _ => false,
        }
    }

    /// Units this value occupies once encoded.
    pub fn encoded_units(&self) -> usize {
        match self {
            Self::SmallInt(_) | Self::Str(_) => 2,
            Self::Float32(_) => 3,
            Self::Array(items) => 2 + items.iter().map(Self::encoded_units).sum::<usize>(),
            Self::OpaqueRef => 1,
        }
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Self::Float32(value)
    }
}

impl From<u16> for Value {
    fn from(value: u16) -> Self {
        Self::SmallInt(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::SmallInt(u16::from(value))
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("array of {len} elements exceeds the {max} element limit")]
    ArrayTooLong { len: usize, max: usize },

    #[error("too many arguments: {0}")]
    TooManyArguments(usize),

    #[error(transparent)]
    Strings(#[from] StringTableError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unexpected end of stream")]
    UnexpectedEof,

    #[error("unknown argument tag {0}")]
    UnknownTag(u16),

    #[error("unknown opcode {0}")]
    UnknownOpcode(u16),

    #[error("unknown message tag {0:#06x}")]
    UnknownMessage(u16),

    #[error("array declares {declared} elements but only {remaining} units remain")]
    ArrayOverrun { declared: usize, remaining: usize },

    #[error("arrays nested deeper than {0} levels")]
    NestingTooDeep(usize),

    /// The peer referenced a string id it never registered.
    #[error("protocol violation: {0}")]
    Strings(#[from] StringTableError),

    #[error("invalid UTF-8")]
    InvalidUtf8,

    #[error("payload too large")]
    OversizedPayload,

    #[error("{0} trailing bytes")]
    TrailingBytes(usize),
}

/// Encode `values` in order, interning strings through `strings` first.
///
/// On error `out` is left untouched; strings interned before the failure stay
/// registered, which is harmless since registration precedes any use.
pub fn encode_values(
    values: &[Value],
    strings: &mut StringTable,
    out: &mut Vec<u16>,
) -> Result<(), EncodeError> {
    let mut scratch = Vec::with_capacity(values.iter().map(Value::encoded_units).sum());
    for value in values {
        encode_value(value, strings, &mut scratch)?;
    }
    out.extend_from_slice(&scratch);
    Ok(())
}

pub fn encode_value(
    value: &Value,
    strings: &mut StringTable,
    out: &mut Vec<u16>,
) -> Result<(), EncodeError> {
    match value {
        Value::SmallInt(v) => {
            out.push(arg_tag::SMALL_INT);
            out.push(*v);
        }
        Value::Float32(v) => {
            let (lo, hi) = split_f32(*v);
            out.push(arg_tag::FLOAT);
            out.push(lo);
            out.push(hi);
        }
        Value::Str(s) => {
            let id = strings.store(s)?;
            out.push(arg_tag::STRING);
            out.push(id);
        }
        Value::Array(items) => {
            let len = u16::try_from(items.len()).map_err(|_| EncodeError::ArrayTooLong {
                len: items.len(),
                max: usize::from(u16::MAX),
            })?;
            out.push(arg_tag::ARRAY);
            out.push(len);
            for item in items {
                encode_value(item, strings, out)?;
            }
        }
        Value::OpaqueRef => out.push(arg_tag::OPAQUE_REF),
    }
    Ok(())
}

/// Decode `count` values starting at `offset`, returning them and the offset
/// just past the last unit consumed.
///
/// Never reads outside `stream`, and rejects unknown tags instead of skipping.
pub fn decode_values(
    stream: &[u16],
    offset: usize,
    count: usize,
    strings: &StringTable,
) -> Result<(Vec<Value>, usize), DecodeError> {
    let mut cursor = UnitReader::at(stream, offset);
    let values = cursor.read_values(count, strings, 0)?;
    Ok((values, cursor.pos))
}

pub(crate) struct UnitReader<'a> {
    units: &'a [u16],
    pub(crate) pos: usize,
}

impl<'a> UnitReader<'a> {
    pub(crate) fn at(units: &'a [u16], pos: usize) -> Self {
        Self { units, pos }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.units.len().saturating_sub(self.pos)
    }

    pub(crate) fn read_unit(&mut self) -> Result<u16, DecodeError> {
        let unit = *self.units.get(self.pos).ok_or(DecodeError::UnexpectedEof)?;
        self.pos += 1;
        Ok(unit)
    }

    pub(crate) fn read_values(
        &mut self,
        count: usize,
        strings: &StringTable,
        depth: usize,
    ) -> Result<Vec<Value>, DecodeError> {
        // Every value needs at least its tag unit.
        if count > self.remaining() {
            return Err(DecodeError::ArrayOverrun {
                declared: count,
                remaining: self.remaining(),
            });
        }
        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            values.push(self.read_value(strings, depth)?);
        }
        Ok(values)
    }

    fn read_value(&mut self, strings: &StringTable, depth: usize) -> Result<Value, DecodeError> {
        let tag = self.read_unit()?;
        Ok(match tag {
            arg_tag::SMALL_INT => Value::SmallInt(self.read_unit()?),
            arg_tag::FLOAT => {
                let lo = self.read_unit()?;
                let hi = self.read_unit()?;
                Value::Float32(join_f32(lo, hi))
            }
            arg_tag::STRING => {
                let id = self.read_unit()?;
                Value::Str(strings.get(id)?.to_string())
            }
            arg_tag::ARRAY => {
                if depth >= MAX_NESTING_DEPTH {
                    return Err(DecodeError::NestingTooDeep(MAX_NESTING_DEPTH));
                }
                let len = usize::from(self.read_unit()?);
                Value::Array(self.read_values(len, strings, depth + 1)?)
            }
            arg_tag::OPAQUE_REF => Value::OpaqueRef,
            other => return Err(DecodeError::UnknownTag(other)),
        })
    }
}

/// Split an f32 into its low and high 16-bit halves.
pub fn split_f32(value: f32) -> (u16, u16) {
    let bits = value.to_bits();
    (bits as u16, (bits >> 16) as u16)
}

pub fn join_f32(lo: u16, hi: u16) -> f32 {
    f32::from_bits(u32::from(lo) | (u32::from(hi) << 16))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(values: &[Value], strings: &mut StringTable) -> Vec<u16> {
        let mut out = Vec::new();
        encode_values(values, strings, &mut out).unwrap();
        out
    }

    #[test]
    fn float_units_are_low_then_high() {
        let mut strings = StringTable::new();
        let units = encode(&[Value::Float32(70.0)], &mut strings);
        // 70.0f32 == 0x428C_0000
        assert_eq!(units, vec![arg_tag::FLOAT, 0x0000, 0x428C]);

        let units = encode(&[Value::Float32(37.5)], &mut strings);
        // 37.5f32 == 0x4216_0000
        assert_eq!(units, vec![arg_tag::FLOAT, 0x0000, 0x4216]);

        let units = encode(&[Value::Float32(0.1)], &mut strings);
        // 0.1f32 == 0x3DCC_CCCD
        assert_eq!(units, vec![arg_tag::FLOAT, 0xCCCD, 0x3DCC]);
    }

    #[test]
    fn float_fidelity_is_single_precision() {
        let mut strings = StringTable::new();
        let units = encode(&[Value::Float32(70.0), Value::Float32(0.1)], &mut strings);
        let (values, _) = decode_values(&units, 0, 2, &strings).unwrap();
        assert_eq!(values[0], Value::Float32(70.0));
        let Value::Float32(tenth) = values[1] else {
            panic!("expected float, got {:?}", values[1]);
        };
        assert_eq!(tenth, 0.1f32);
        assert_ne!(f64::from(tenth), 0.1f64);
    }

    #[test]
    fn strings_are_interned_once() {
        let mut strings = StringTable::new();
        let units = encode(
            &[Value::str("red"), Value::str("blue"), Value::str("red")],
            &mut strings,
        );
        assert_eq!(
            units,
            vec![arg_tag::STRING, 0, arg_tag::STRING, 1, arg_tag::STRING, 0]
        );
    }

    #[test]
    fn nested_arrays_and_opaque_refs() {
        let mut strings = StringTable::new();
        let values = vec![
            Value::OpaqueRef,
            Value::Array(vec![
                Value::SmallInt(3),
                Value::Array(vec![Value::str("inner"), Value::Float32(-1.5)]),
            ]),
            Value::SmallInt(9),
        ];
        let units = encode(&values, &mut strings);
        let expected_len: usize = values.iter().map(Value::encoded_units).sum();
        assert_eq!(units.len(), expected_len);

        let (decoded, end) = decode_values(&units, 0, values.len(), &strings).unwrap();
        assert_eq!(decoded, values);
        assert_eq!(end, units.len());
    }

    #[test]
    fn decode_honours_offset() {
        let mut strings = StringTable::new();
        let mut units = vec![0xAAAA, 0xBBBB];
        encode_values(&[Value::SmallInt(7)], &mut strings, &mut units).unwrap();
        let (values, end) = decode_values(&units, 2, 1, &strings).unwrap();
        assert_eq!(values, vec![Value::SmallInt(7)]);
        assert_eq!(end, 4);
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let strings = StringTable::new();
        let err = decode_values(&[42, 0], 0, 1, &strings).unwrap_err();
        assert_eq!(err, DecodeError::UnknownTag(42));
    }

    #[test]
    fn unknown_string_id_is_a_protocol_violation() {
        let strings = StringTable::new();
        let err = decode_values(&[arg_tag::STRING, 5], 0, 1, &strings).unwrap_err();
        assert_eq!(
            err,
            DecodeError::Strings(StringTableError::UnknownId(5))
        );
    }

    #[test]
    fn array_count_past_end_is_rejected() {
        let strings = StringTable::new();
        let units = [arg_tag::ARRAY, 500, arg_tag::SMALL_INT, 1];
        let err = decode_values(&units, 0, 1, &strings).unwrap_err();
        assert_eq!(
            err,
            DecodeError::ArrayOverrun {
                declared: 500,
                remaining: 2
            }
        );
    }

    #[test]
    fn truncated_float_is_rejected() {
        let strings = StringTable::new();
        let err = decode_values(&[arg_tag::FLOAT, 0], 0, 1, &strings).unwrap_err();
        assert_eq!(err, DecodeError::UnexpectedEof);
    }

    #[test]
    fn nesting_limit_is_enforced() {
        let strings = StringTable::new();
        let mut units = Vec::new();
        for _ in 0..=MAX_NESTING_DEPTH {
            units.extend_from_slice(&[arg_tag::ARRAY, 1]);
        }
        units.extend_from_slice(&[arg_tag::SMALL_INT, 0]);
        let err = decode_values(&units, 0, 1, &strings).unwrap_err();
        assert_eq!(err, DecodeError::NestingTooDeep(MAX_NESTING_DEPTH));
    }

    #[test]
    fn failed_encode_leaves_output_untouched() {
        let mut strings = StringTable::new();
        let mut out = vec![1, 2, 3];
        let huge = Value::Array(vec![Value::SmallInt(0); usize::from(u16::MAX) + 1]);
        let err = encode_values(&[Value::SmallInt(1), huge], &mut strings, &mut out).unwrap_err();
        assert!(matches!(err, EncodeError::ArrayTooLong { .. }));
        assert_eq!(out, vec![1, 2, 3]);
    }
}
