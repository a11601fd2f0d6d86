//! Wire protocol for driving a resource across two isolated execution contexts.
//!
//! - [`StringTable`]: per-context string interning
//! - [`HandleRegistry`]: handle <-> local object addressing
//! - [`encode_values`] / [`decode_values`]: the tagged argument codec
//! - [`Instruction`] / [`InstructionReader`]: the ordered instruction stream
//! - [`MutationFrame`] / [`Event`]: byte framing per direction
//! - [`Transport`] / [`RingTransport`]: the link the frames travel over
//!
//! The layout is described in [`layout`]; numeric values there are a
//! compatibility contract with the peer context.

pub mod layout;

mod args;
mod handles;
mod mutation;
mod protocol;
mod ring;
mod strings;
mod transport;

pub use args::{
    decode_values, encode_value, encode_values, join_f32, split_f32, DecodeError, EncodeError,
    Value,
};
pub use handles::{Handle, HandleError, HandleRegistry};
pub use mutation::{CallKind, Instruction, InstructionReader, LegacyCall};
pub use protocol::{
    decode_event, decode_frame, encode_event, encode_event_into, encode_frame, encode_frame_into,
    encoded_frame_len, Event, MutationFrame, RemoteRef, ResolutionKind,
};
pub use ring::{record_size, CapacityError, FrameRing, PopError, PushError};
pub use strings::{StringTable, StringTableError};
pub use transport::{RingTransport, Transport, TransportError};
