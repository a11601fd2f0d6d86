//! Byte-level messages carried by the transport.
//!
//! Two directions, one message family each:
//! - producer → consumer: [`MutationFrame`] (new string registrations, then
//!   instruction units)
//! - consumer → producer: [`Event`] (resolution messages correlated by handle)
//!
//! Everything is little-endian. Records are framed by the transport; this
//! module defines the payload.

use crate::args::DecodeError;
use crate::handles::Handle;
use crate::layout::{message_tag, MAX_MESSAGE_BYTES};

/// One batch of producer traffic.
///
/// `strings` are registrations with ids `first_string_id..`, and must be
/// applied before any instruction in `units` is parsed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MutationFrame {
    pub first_string_id: u32,
    pub strings: Vec<String>,
    pub units: Vec<u16>,
}

impl MutationFrame {
    pub fn is_empty(&self) -> bool {
        self.strings.is_empty() && self.units.is_empty()
    }
}

/// Which request a resolution answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResolutionKind {
    /// Answers an upgrade request: the real surface is now available.
    OffscreenCanvas,
    /// Answers an image bitmap request.
    ImageBitmap,
}

/// Opaque token minted by the consumer; the producer turns it into a real
/// implementation without ever looking inside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RemoteRef(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Resolved {
        kind: ResolutionKind,
        handle: Handle,
        remote: RemoteRef,
    },
}

/// Bytes [`encode_frame`] produces for `strings` plus `unit_count` units.
pub fn encoded_frame_len(strings: &[String], unit_count: usize) -> usize {
    // tag, first id, string count, unit count
    let header = 2 + 4 + 4 + 4;
    header + strings.iter().map(|s| 4 + s.len()).sum::<usize>() + unit_count * 2
}

pub fn encode_frame(frame: &MutationFrame) -> Vec<u8> {
    let mut out = Vec::new();
    encode_frame_into(frame, &mut out);
    out
}

pub fn encode_frame_into(frame: &MutationFrame, out: &mut Vec<u8>) {
    push_u16(out, message_tag::MUTATIONS);
    push_u32(out, frame.first_string_id);
    push_u32(out, frame.strings.len() as u32);
    for s in &frame.strings {
        push_u32(out, s.len() as u32);
        out.extend_from_slice(s.as_bytes());
    }
    push_u32(out, frame.units.len() as u32);
    out.reserve(frame.units.len() * 2);
    for unit in &frame.units {
        push_u16(out, *unit);
    }
}

pub fn decode_frame(bytes: &[u8]) -> Result<MutationFrame, DecodeError> {
    if bytes.len() > MAX_MESSAGE_BYTES {
        return Err(DecodeError::OversizedPayload);
    }
    let mut r = Reader::new(bytes);
    let tag = r.read_u16()?;
    if tag != message_tag::MUTATIONS {
        return Err(DecodeError::UnknownMessage(tag));
    }
    let first_string_id = r.read_u32()?;
    let string_count = r.read_u32()? as usize;
    // Each string costs at least its 4-byte length prefix.
    if string_count > r.remaining() / 4 {
        return Err(DecodeError::UnexpectedEof);
    }
    let mut strings = Vec::with_capacity(string_count);
    for _ in 0..string_count {
        let len = r.read_u32()? as usize;
        let bytes = r.read_bytes(len)?;
        let s = core::str::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8)?;
        strings.push(s.to_string());
    }
    let unit_count = r.read_u32()? as usize;
    let raw = r.read_bytes(unit_count.checked_mul(2).ok_or(DecodeError::UnexpectedEof)?)?;
    let units = raw
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    if r.remaining() != 0 {
        return Err(DecodeError::TrailingBytes(r.remaining()));
    }
    Ok(MutationFrame {
        first_string_id,
        strings,
        units,
    })
}

pub fn encode_event(evt: &Event) -> Vec<u8> {
    let mut out = Vec::new();
    encode_event_into(evt, &mut out);
    out
}

pub fn encode_event_into(evt: &Event, out: &mut Vec<u8>) {
    match evt {
        Event::Resolved {
            kind,
            handle,
            remote,
        } => {
            push_u16(
                out,
                match kind {
                    ResolutionKind::OffscreenCanvas => message_tag::OFFSCREEN_CANVAS_INSTANCE,
                    ResolutionKind::ImageBitmap => message_tag::IMAGE_BITMAP_INSTANCE,
                },
            );
            push_u32(out, u32::from(handle.raw()));
            push_u32(out, remote.0);
        }
    }
}

pub fn decode_event(bytes: &[u8]) -> Result<Event, DecodeError> {
    if bytes.len() > MAX_MESSAGE_BYTES {
        return Err(DecodeError::OversizedPayload);
    }
    let mut r = Reader::new(bytes);
    let tag = r.read_u16()?;
    let kind = match tag {
        message_tag::OFFSCREEN_CANVAS_INSTANCE => ResolutionKind::OffscreenCanvas,
        message_tag::IMAGE_BITMAP_INSTANCE => ResolutionKind::ImageBitmap,
        other => return Err(DecodeError::UnknownMessage(other)),
    };
    let raw_handle = r.read_u32()?;
    let handle = u16::try_from(raw_handle)
        .map(Handle::from_raw)
        .map_err(|_| DecodeError::OversizedPayload)?;
    let remote = RemoteRef(r.read_u32()?);
    if r.remaining() != 0 {
        return Err(DecodeError::TrailingBytes(r.remaining()));
    }
    Ok(Event::Resolved {
        kind,
        handle,
        remote,
    })
}

fn push_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn push_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len().saturating_sub(self.pos)
    }

    fn read_u16(&mut self) -> Result<u16, DecodeError> {
        let bytes = self.read_bytes(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn read_u32(&mut self) -> Result<u32, DecodeError> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < len {
            return Err(DecodeError::UnexpectedEof);
        }
        let start = self.pos;
        self.pos += len;
        Ok(&self.bytes[start..start + len])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_layout_is_stable() {
        let frame = MutationFrame {
            first_string_id: 2,
            strings: vec!["red".to_string()],
            units: vec![8, 0x0102],
        };
        let bytes = encode_frame(&frame);
        assert_eq!(
            bytes,
            vec![
                0x00, 0x01, // tag
                2, 0, 0, 0, // first_string_id
                1, 0, 0, 0, // string_count
                3, 0, 0, 0, b'r', b'e', b'd', //
                2, 0, 0, 0, // unit_count
                8, 0, 0x02, 0x01,
            ]
        );
        assert_eq!(decode_frame(&bytes).unwrap(), frame);
        assert_eq!(encoded_frame_len(&frame.strings, frame.units.len()), bytes.len());
    }

    #[test]
    fn frame_rejects_trailing_bytes() {
        let mut bytes = encode_frame(&MutationFrame::default());
        bytes.push(0);
        assert_eq!(decode_frame(&bytes), Err(DecodeError::TrailingBytes(1)));
    }

    #[test]
    fn frame_rejects_truncated_units() {
        let mut bytes = encode_frame(&MutationFrame {
            units: vec![1, 2, 3],
            ..MutationFrame::default()
        });
        bytes.truncate(bytes.len() - 1);
        assert_eq!(decode_frame(&bytes), Err(DecodeError::UnexpectedEof));
    }

    #[test]
    fn frame_rejects_bogus_string_count() {
        let mut bytes = Vec::new();
        push_u16(&mut bytes, message_tag::MUTATIONS);
        push_u32(&mut bytes, 0);
        push_u32(&mut bytes, u32::MAX);
        assert_eq!(decode_frame(&bytes), Err(DecodeError::UnexpectedEof));
    }

    #[test]
    fn frame_rejects_invalid_utf8() {
        let mut bytes = Vec::new();
        push_u16(&mut bytes, message_tag::MUTATIONS);
        push_u32(&mut bytes, 0);
        push_u32(&mut bytes, 1);
        push_u32(&mut bytes, 1);
        bytes.push(0xFF);
        push_u32(&mut bytes, 0);
        assert_eq!(decode_frame(&bytes), Err(DecodeError::InvalidUtf8));
    }

    #[test]
    fn event_roundtrip() {
        for kind in [ResolutionKind::OffscreenCanvas, ResolutionKind::ImageBitmap] {
            let evt = Event::Resolved {
                kind,
                handle: Handle::from_raw(7),
                remote: RemoteRef(0xDEAD_BEEF),
            };
            assert_eq!(decode_event(&encode_event(&evt)).unwrap(), evt);
        }
    }

    #[test]
    fn event_rejects_unknown_tag() {
        let bytes = [0x34, 0x12, 0, 0, 0, 0, 0, 0, 0, 0];
        assert_eq!(decode_event(&bytes), Err(DecodeError::UnknownMessage(0x1234)));
    }
}
