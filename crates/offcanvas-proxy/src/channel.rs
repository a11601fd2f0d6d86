//! Producer side of the mutation channel.
//!
//! Instructions are appended to a pending unit batch in program order. A flush
//! cuts the batch at instruction boundaries into [`MutationFrame`]s no larger
//! than the transport accepts. Each frame carries the strings interned since
//! the previous frame, so every registration travels in the same frame as (and
//! ahead of) the first instruction that references it.

use std::collections::VecDeque;
use std::ops::Range;
use std::rc::Rc;

use offcanvas_wire::layout::{MAX_MESSAGE_BYTES, STRING_ID_BASE};
use offcanvas_wire::{
    encode_frame, encoded_frame_len, Instruction, MutationFrame, StringTable, Transport,
    TransportError,
};

use crate::error::Result;

/// Where one queued instruction ends.
#[derive(Debug, Clone, Copy)]
struct Boundary {
    /// End offset in `pending`.
    units: usize,
    /// String table length once the instruction was encoded.
    strings: usize,
}

pub struct MutationChannel {
    strings: StringTable,
    pending: Vec<u16>,
    boundaries: Vec<Boundary>,
    /// Encoded frames the transport refused with `Full`, oldest first.
    backlog: VecDeque<Vec<u8>>,
    transport: Option<Rc<dyn Transport>>,
    auto_flush: bool,
}

impl MutationChannel {
    pub fn new(transport: Option<Rc<dyn Transport>>, auto_flush: bool) -> Self {
        Self {
            strings: StringTable::new(),
            pending: Vec::new(),
            boundaries: Vec::new(),
            backlog: VecDeque::new(),
            transport,
            auto_flush,
        }
    }

    pub fn is_online(&self) -> bool {
        self.transport.is_some()
    }

    pub fn strings(&self) -> &StringTable {
        &self.strings
    }

    /// Units appended since the last flush.
    pub fn pending_units(&self) -> usize {
        self.pending.len()
    }

    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    /// Largest frame the transport will take.
    fn frame_limit(&self) -> usize {
        self.transport
            .as_ref()
            .and_then(|transport| transport.max_message_bytes())
            .map_or(MAX_MESSAGE_BYTES, |max| max.min(MAX_MESSAGE_BYTES))
    }

    /// Append one instruction to the outgoing stream.
    ///
    /// A rejected instruction leaves no trace: neither units nor the strings
    /// it interned stay behind. That includes instructions too large to ever
    /// fit in one frame.
    pub fn transfer(&mut self, instruction: &Instruction) -> Result<()> {
        let strings_before = self.strings.len();
        let units_before = self.pending.len();
        if let Err(err) = instruction.encode_into(&mut self.strings, &mut self.pending) {
            self.strings.truncate(strings_before);
            return Err(err.into());
        }
        let unit_count = self.pending.len() - units_before;
        let limit = self.frame_limit();
        if !self.fits(limit, strings_before..self.strings.len(), unit_count) {
            self.strings.truncate(strings_before);
            self.pending.truncate(units_before);
            tracing::warn!(
                handle = instruction.handle().raw(),
                units = unit_count,
                limit,
                "instruction too large for one frame"
            );
            return Err(TransportError::TooLarge.into());
        }
        self.boundaries.push(Boundary {
            units: self.pending.len(),
            strings: self.strings.len(),
        });
        tracing::trace!(
            handle = instruction.handle().raw(),
            pending = self.pending.len(),
            "instruction queued"
        );
        if self.auto_flush {
            self.flush()?;
        }
        Ok(())
    }

    /// Send everything queued so far. Returns the number of frames the
    /// transport accepted, backlog included.
    ///
    /// A frame the transport still refuses as too large loses its units and
    /// is reported as [`TransportError::TooLarge`] once the rest of the batch
    /// went out. Its string registrations ship again with the next frame, so
    /// the peer's string table stays in step.
    pub fn flush(&mut self) -> Result<usize> {
        let Some(transport) = self.transport.clone() else {
            if !self.pending.is_empty() {
                tracing::debug!(units = self.pending.len(), "no transport; dropping frame");
                self.pending.clear();
                self.boundaries.clear();
            }
            return Ok(0);
        };

        let mut sent = self.drain_backlog(transport.as_ref())?;

        let limit = self.frame_limit();
        let units = std::mem::take(&mut self.pending);
        let boundaries = std::mem::take(&mut self.boundaries);

        let mut strings = self.strings.unsent_index()..self.strings.unsent_index();
        let mut batch = 0..0;
        let mut dropped = 0usize;

        for end in boundaries {
            let strings_end = strings.end.max(end.strings);
            if self.fits(limit, strings.start..strings_end, end.units - batch.start) {
                strings.end = strings_end;
                batch.end = end.units;
                continue;
            }
            if !batch.is_empty() {
                sent += self.ship(
                    transport.as_ref(),
                    strings.clone(),
                    &units[batch.clone()],
                    &mut dropped,
                )?;
                strings.start = self.strings.unsent_index();
                batch.start = batch.end;
                if self.fits(limit, strings.start..strings_end, end.units - batch.start) {
                    strings.end = strings_end;
                    batch.end = end.units;
                    continue;
                }
            }
            tracing::warn!(
                units = end.units - batch.start,
                limit,
                "instruction no longer fits in one frame; dropped"
            );
            dropped += 1;
            strings.end = strings_end;
            batch = end.units..end.units;
        }
        if !batch.is_empty() {
            sent += self.ship(transport.as_ref(), strings, &units[batch], &mut dropped)?;
        }

        if dropped > 0 {
            return Err(TransportError::TooLarge.into());
        }
        Ok(sent)
    }

    fn fits(&self, limit: usize, strings: Range<usize>, unit_count: usize) -> bool {
        encoded_frame_len(self.strings.registrations(strings), unit_count) <= limit
    }

    /// Encode one frame and hand it to the transport (or the backlog).
    ///
    /// The string cursor only moves past `strings` once the frame is accepted
    /// or queued; a refused frame leaves them for the next one.
    fn ship(
        &mut self,
        transport: &dyn Transport,
        strings: Range<usize>,
        units: &[u16],
        dropped: &mut usize,
    ) -> Result<usize> {
        let frame = MutationFrame {
            first_string_id: u32::from(STRING_ID_BASE) + strings.start as u32,
            strings: self.strings.registrations(strings.clone()).to_vec(),
            units: units.to_vec(),
        };
        let bytes = encode_frame(&frame);

        if !self.backlog.is_empty() {
            self.backlog.push_back(bytes);
            self.strings.set_unsent_index(strings.end);
            tracing::debug!(backlog = self.backlog.len(), "transport still full; frame queued");
            return Ok(0);
        }

        match transport.send(&bytes) {
            Ok(()) => {
                self.strings.set_unsent_index(strings.end);
                tracing::trace!(
                    bytes = bytes.len(),
                    strings = frame.strings.len(),
                    units = frame.units.len(),
                    "frame sent"
                );
                Ok(1)
            }
            Err(TransportError::Full) => {
                self.backlog.push_back(bytes);
                self.strings.set_unsent_index(strings.end);
                tracing::debug!(backlog = self.backlog.len(), "transport full; frame queued");
                Ok(0)
            }
            Err(TransportError::TooLarge) => {
                self.strings.set_unsent_index(strings.start);
                tracing::warn!(bytes = bytes.len(), "frame refused as too large; units dropped");
                *dropped += 1;
                Ok(0)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn drain_backlog(&mut self, transport: &dyn Transport) -> Result<usize> {
        let mut sent = 0;
        while let Some(front) = self.backlog.front() {
            match transport.send(front) {
                Ok(()) => {
                    self.backlog.pop_front();
                    sent += 1;
                }
                Err(TransportError::Full) => break,
                Err(err) => return Err(err.into()),
            }
        }
        if sent > 0 {
            tracing::debug!(sent, remaining = self.backlog.len(), "backlog drained");
        }
        Ok(sent)
    }
}
