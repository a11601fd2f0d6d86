//! Wire layout contract shared by the producer and consumer contexts.
//!
//! All instruction traffic is a flat sequence of 16-bit *transfer units*. Every
//! element occupies a number of units that is known from its tag or opcode, so
//! an instruction stream self-frames without a global length prefix.
//!
//! Byte-level framing (mutation frames and resolution events) is little-endian.

/// Width of one transfer unit in bytes.
pub const TRANSFER_UNIT_BYTES: usize = 2;

/// First id handed out by a [`crate::StringTable`].
pub const STRING_ID_BASE: u16 = 0;

/// First handle handed out by a [`crate::HandleRegistry`].
pub const HANDLE_BASE: u16 = 1;

/// Deepest `Array` nesting a decoder accepts.
pub const MAX_NESTING_DEPTH: usize = 64;

/// Argument tags, one unit each, preceding every encoded value.
pub mod arg_tag {
    pub const SMALL_INT: u16 = 0;
    pub const FLOAT: u16 = 1;
    pub const STRING: u16 = 2;
    pub const ARRAY: u16 = 3;
    pub const OPAQUE_REF: u16 = 4;
}

/// Instruction opcodes (first unit of every instruction).
///
/// Numeric values are stable and must not be changed once released.
pub mod opcode {
    /// `[opcode, handle]`
    pub const UPGRADE_REQUEST: u16 = 8;
    /// `[opcode, handle, uses_float, arg_count, method_id, is_setter, string_arg_index, ...args]`
    pub const LEGACY_CALL: u16 = 9;
    /// `[opcode, handle]`
    pub const IMAGE_BITMAP_REQUEST: u16 = 11;
}

/// Number of header units in a `LEGACY_CALL`, opcode included.
pub const LEGACY_CALL_HEADER_UNITS: usize = 7;

/// Message tags for the byte-level framing carried by the transport.
pub mod message_tag {
    /// Producer → consumer: strings registered since the last frame plus instruction units.
    pub const MUTATIONS: u16 = 0x0100;
    /// Consumer → producer: an offscreen surface was handed over for `handle`.
    pub const OFFSCREEN_CANVAS_INSTANCE: u16 = 0x1000;
    /// Consumer → producer: an image bitmap snapshot of `handle` is available.
    pub const IMAGE_BITMAP_INSTANCE: u16 = 0x1001;
}

/// All frame-ring records are aligned to this many bytes.
pub const RECORD_ALIGN: usize = 4;

/// Frame-ring wrap marker stored in the record length field.
///
/// `0xFFFF_FFFF` keeps zero-length payloads legal.
pub const WRAP_MARKER: u32 = 0xFFFF_FFFF;

/// Defensive maximum message size (bytes) for decode.
pub const MAX_MESSAGE_BYTES: usize = 1 << 20; // 1 MiB

pub(crate) const fn align_up(value: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (value + (align - 1)) & !(align - 1)
}
