//! Instruction encoding for the mutation channel.
//!
//! Instructions are appended to one flat unit stream in program order and the
//! consumer applies them in exactly that order. Only handles address targets.

use crate::args::{encode_values, DecodeError, EncodeError, UnitReader, Value};
use crate::handles::Handle;
use crate::layout::opcode;
use crate::strings::StringTable;

/// How a forwarded call touches its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    Call,
    Get,
    Set,
}

/// A call forwarded by handle while the real implementation is not local yet.
#[derive(Debug, Clone, PartialEq)]
pub struct LegacyCall {
    pub handle: Handle,
    pub method: String,
    pub is_setter: bool,
    pub args: Vec<Value>,
}

impl LegacyCall {
    pub fn uses_float_encoding(&self) -> bool {
        self.args.iter().any(Value::contains_float)
    }

    /// 1-based position of the first string argument, `0` when there is none.
    pub fn string_arg_index(&self) -> u16 {
        self.args
            .iter()
            .position(|arg| matches!(arg, Value::Str(_)))
            .map_or(0, |i| (i + 1) as u16)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    /// Ask the consumer to hand over the real resource behind `handle`.
    UpgradeRequest { handle: Handle },

    /// Ask the consumer for an image bitmap snapshot of `handle`.
    ImageBitmapRequest { handle: Handle },

    LegacyCall(LegacyCall),
}

impl Instruction {
    pub fn handle(&self) -> Handle {
        match self {
            Self::UpgradeRequest { handle } | Self::ImageBitmapRequest { handle } => *handle,
            Self::LegacyCall(call) => call.handle,
        }
    }

    /// Append this instruction to `out`, interning any strings it carries.
    ///
    /// `out` is only extended when the whole instruction encoded successfully.
    pub fn encode_into(
        &self,
        strings: &mut StringTable,
        out: &mut Vec<u16>,
    ) -> Result<(), EncodeError> {
        match self {
            Self::UpgradeRequest { handle } => {
                out.extend_from_slice(&[opcode::UPGRADE_REQUEST, handle.raw()]);
            }
            Self::ImageBitmapRequest { handle } => {
                out.extend_from_slice(&[opcode::IMAGE_BITMAP_REQUEST, handle.raw()]);
            }
            Self::LegacyCall(call) => {
                let arg_count = u16::try_from(call.args.len())
                    .map_err(|_| EncodeError::TooManyArguments(call.args.len()))?;
                let method_id = strings.store(&call.method)?;
                let mut payload = Vec::new();
                encode_values(&call.args, strings, &mut payload)?;

                out.extend_from_slice(&[
                    opcode::LEGACY_CALL,
                    call.handle.raw(),
                    u16::from(call.uses_float_encoding()),
                    arg_count,
                    method_id,
                    u16::from(call.is_setter),
                    call.string_arg_index(),
                ]);
                out.extend_from_slice(&payload);
            }
        }
        Ok(())
    }
}

/// Sequential parser over an instruction unit stream.
///
/// After any error the reader is finished: framing is tag-driven, so there is
/// no way to find the next instruction boundary.
pub struct InstructionReader<'a> {
    reader: UnitReader<'a>,
    strings: &'a StringTable,
    failed: bool,
}

impl<'a> InstructionReader<'a> {
    pub fn new(units: &'a [u16], strings: &'a StringTable) -> Self {
        Self {
            reader: UnitReader::at(units, 0),
            strings,
            failed: false,
        }
    }

    pub fn offset(&self) -> usize {
        self.reader.pos
    }

    fn read_instruction(&mut self) -> Result<Instruction, DecodeError> {
        let op = self.reader.read_unit()?;
        match op {
            opcode::UPGRADE_REQUEST => Ok(Instruction::UpgradeRequest {
                handle: Handle::from_raw(self.reader.read_unit()?),
            }),
            opcode::IMAGE_BITMAP_REQUEST => Ok(Instruction::ImageBitmapRequest {
                handle: Handle::from_raw(self.reader.read_unit()?),
            }),
            opcode::LEGACY_CALL => {
                let handle = Handle::from_raw(self.reader.read_unit()?);
                let _uses_float = self.reader.read_unit()?;
                let arg_count = usize::from(self.reader.read_unit()?);
                let method_id = self.reader.read_unit()?;
                let is_setter = self.reader.read_unit()? != 0;
                let _string_arg_index = self.reader.read_unit()?;
                let method = self.strings.get(method_id)?.to_string();
                let args = self.reader.read_values(arg_count, self.strings, 0)?;
                Ok(Instruction::LegacyCall(LegacyCall {
                    handle,
                    method,
                    is_setter,
                    args,
                }))
            }
            other => Err(DecodeError::UnknownOpcode(other)),
        }
    }
}

impl Iterator for InstructionReader<'_> {
    type Item = Result<Instruction, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.reader.remaining() == 0 {
            return None;
        }
        let result = self.read_instruction();
        self.failed = result.is_err();
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{arg_tag, LEGACY_CALL_HEADER_UNITS};

    fn legacy(method: &str, is_setter: bool, args: Vec<Value>) -> Instruction {
        Instruction::LegacyCall(LegacyCall {
            handle: Handle::from_raw(3),
            method: method.to_string(),
            is_setter,
            args,
        })
    }

    #[test]
    fn upgrade_request_layout() {
        let mut strings = StringTable::new();
        let mut out = Vec::new();
        Instruction::UpgradeRequest {
            handle: Handle::from_raw(12),
        }
        .encode_into(&mut strings, &mut out)
        .unwrap();
        assert_eq!(out, vec![opcode::UPGRADE_REQUEST, 12]);
    }

    #[test]
    fn legacy_call_header_layout() {
        let mut strings = StringTable::new();
        let mut out = Vec::new();
        legacy("fillStyle", true, vec![Value::str("red")])
            .encode_into(&mut strings, &mut out)
            .unwrap();
        // fillStyle -> 0, red -> 1
        assert_eq!(
            out,
            vec![opcode::LEGACY_CALL, 3, 0, 1, 0, 1, 1, arg_tag::STRING, 1]
        );

        out.clear();
        legacy(
            "fillText",
            false,
            vec![Value::str("hi"), Value::Float32(1.0), Value::Float32(2.0)],
        )
        .encode_into(&mut strings, &mut out)
        .unwrap();
        assert_eq!(&out[..LEGACY_CALL_HEADER_UNITS], &[opcode::LEGACY_CALL, 3, 1, 3, 2, 0, 1]);
    }

    #[test]
    fn reader_yields_instructions_in_order() {
        let mut strings = StringTable::new();
        let sent = vec![
            Instruction::UpgradeRequest {
                handle: Handle::from_raw(3),
            },
            legacy("lineWidth", true, vec![Value::Float32(5.0)]),
            legacy(
                "strokeRect",
                false,
                vec![
                    Value::Float32(37.5),
                    Value::Float32(70.0),
                    Value::Float32(75.0),
                    Value::Float32(55.0),
                ],
            ),
            legacy("setLineDash", false, vec![Value::floats([10.0, 10.0])]),
            Instruction::ImageBitmapRequest {
                handle: Handle::from_raw(3),
            },
        ];
        let mut units = Vec::new();
        for instr in &sent {
            instr.encode_into(&mut strings, &mut units).unwrap();
        }

        let received: Vec<_> = InstructionReader::new(&units, &strings)
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(received, sent);
    }

    #[test]
    fn reader_stops_after_first_error() {
        let mut strings = StringTable::new();
        let mut units = Vec::new();
        legacy("save", false, vec![])
            .encode_into(&mut strings, &mut units)
            .unwrap();
        units.push(0x7777);
        legacy("restore", false, vec![])
            .encode_into(&mut strings, &mut units)
            .unwrap();

        let mut reader = InstructionReader::new(&units, &strings);
        assert!(matches!(reader.next(), Some(Ok(Instruction::LegacyCall(_)))));
        assert_eq!(reader.next(), Some(Err(DecodeError::UnknownOpcode(0x7777))));
        assert_eq!(reader.next(), None);
    }

    #[test]
    fn truncated_header_is_rejected() {
        let strings = StringTable::new();
        let units = [opcode::LEGACY_CALL, 1, 0];
        let mut reader = InstructionReader::new(&units, &strings);
        assert_eq!(reader.next(), Some(Err(DecodeError::UnexpectedEof)));
    }
}
