//! The consumer context: owns the real surfaces and applies the producer's
//! instruction stream to them.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use offcanvas_wire::{
    decode_frame, encode_event, DecodeError, Event, Handle, HandleRegistry, Instruction,
    InstructionReader, LegacyCall, RemoteRef, ResolutionKind, StringTable, StringTableError,
    Transport, TransportError, Value,
};

use crate::config::ConsumerConfig;
use crate::error::{Error, Result};
use crate::surface::Context2d;

/// Outcome of applying one or more frames.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FrameReport {
    pub frames: usize,
    pub applied: usize,
    /// Decoded instructions that could not be applied and were skipped.
    pub skipped: usize,
}

impl std::ops::AddAssign for FrameReport {
    fn add_assign(&mut self, rhs: Self) {
        self.frames += rhs.frames;
        self.applied += rhs.applied;
        self.skipped += rhs.skipped;
    }
}

pub struct ConsumerContext {
    config: ConsumerConfig,
    strings: StringTable,
    surfaces: HandleRegistry<RefCell<dyn Context2d>>,
    transport: Box<dyn Transport>,
    /// Events the transport refused with `Full`, oldest first.
    outbox: VecDeque<Vec<u8>>,
    transferred: HashMap<RemoteRef, (ResolutionKind, Handle)>,
    next_remote: u32,
    /// Set once the contexts disagree about the string table.
    desynchronized: Option<String>,
}

impl ConsumerContext {
    pub fn new(config: ConsumerConfig, transport: Box<dyn Transport>) -> Self {
        Self {
            config,
            strings: StringTable::new(),
            surfaces: HandleRegistry::new(),
            transport,
            outbox: VecDeque::new(),
            transferred: HashMap::new(),
            next_remote: 1,
            desynchronized: None,
        }
    }

    /// Put `surface` behind `handle`, as the tree-mutation layer would.
    pub fn attach(&mut self, handle: Handle, surface: Rc<RefCell<dyn Context2d>>) -> Result<()> {
        self.surfaces.track(handle, surface)?;
        tracing::debug!(handle = handle.raw(), "surface attached");
        Ok(())
    }

    /// Drop the surface behind `handle` and every reference minted for it.
    pub fn detach(&mut self, handle: Handle) -> Option<Rc<RefCell<dyn Context2d>>> {
        self.transferred.retain(|_, (_, target)| *target != handle);
        self.surfaces.release(handle)
    }

    pub fn surface(&self, handle: Handle) -> Option<Rc<RefCell<dyn Context2d>>> {
        self.surfaces.get(handle).cloned()
    }

    /// What a reference minted by this context points at.
    pub fn remote(&self, remote: RemoteRef) -> Option<(ResolutionKind, Handle)> {
        self.transferred.get(&remote).copied()
    }

    pub fn is_desynchronized(&self) -> bool {
        self.desynchronized.is_some()
    }

    pub fn strings(&self) -> &StringTable {
        &self.strings
    }

    /// Apply every frame waiting on the transport, then push out queued events.
    pub fn poll(&mut self) -> Result<FrameReport> {
        let mut report = FrameReport::default();
        while let Some(bytes) = self.transport.try_recv()? {
            report += self.process_frame(&bytes)?;
        }
        self.flush_events()?;
        Ok(report)
    }

    /// Decode and apply one mutation frame.
    ///
    /// Instructions before a decode error are applied; the rest of the frame
    /// is abandoned and the error returned. An instruction that decodes but
    /// cannot be applied is skipped on its own.
    pub fn process_frame(&mut self, bytes: &[u8]) -> Result<FrameReport> {
        if let Some(reason) = &self.desynchronized {
            return Err(Error::Desynchronized(reason.clone()));
        }
        if bytes.len() > self.config.max_frame_bytes {
            return Err(DecodeError::OversizedPayload.into());
        }

        let frame = decode_frame(bytes)?;
        if let Err(err) = self
            .strings
            .register_batch(frame.first_string_id, frame.strings)
        {
            return Err(self.desynchronize(err));
        }

        let mut instructions = Vec::new();
        let mut failure = None;
        for item in InstructionReader::new(&frame.units, &self.strings) {
            match item {
                Ok(instruction) => instructions.push(instruction),
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }

        let mut report = FrameReport {
            frames: 1,
            ..FrameReport::default()
        };
        for instruction in instructions {
            match self.apply(instruction) {
                Ok(()) => report.applied += 1,
                Err(err) => {
                    report.skipped += 1;
                    tracing::warn!("instruction skipped: {err}");
                }
            }
        }

        match failure {
            None => {
                tracing::trace!(applied = report.applied, skipped = report.skipped, "frame applied");
                Ok(report)
            }
            Some(DecodeError::Strings(err)) => Err(self.desynchronize(err)),
            Some(err) => {
                tracing::warn!(applied = report.applied, "rest of frame abandoned: {err}");
                Err(err.into())
            }
        }
    }

    fn desynchronize(&mut self, err: StringTableError) -> Error {
        let reason = err.to_string();
        tracing::warn!("string table desynchronized: {reason}");
        self.desynchronized = Some(reason.clone());
        Error::Desynchronized(reason)
    }

    fn apply(&mut self, instruction: Instruction) -> Result<()> {
        match instruction {
            Instruction::UpgradeRequest { handle } => {
                self.reply(ResolutionKind::OffscreenCanvas, handle)
            }
            Instruction::ImageBitmapRequest { handle } => {
                self.reply(ResolutionKind::ImageBitmap, handle)
            }
            Instruction::LegacyCall(call) => self.apply_call(call),
        }
    }

    fn apply_call(&mut self, call: LegacyCall) -> Result<()> {
        let surface = self
            .surfaces
            .get(call.handle)
            .ok_or(Error::UnknownHandle(call.handle))?;
        let mut surface = surface.borrow_mut();
        // `OpaqueRef` arguments already mean "this surface"; routing by handle
        // is all the resolution they need.
        if call.is_setter {
            let got = call.args.len();
            match <[Value; 1]>::try_from(call.args) {
                Ok([value]) => surface.set(&call.method, value),
                Err(_) => Err(Error::ArgumentCount {
                    member: "property write",
                    min: 1,
                    max: 1,
                    got,
                }),
            }
        } else {
            surface.call(&call.method, &call.args).map(drop)
        }
    }

    fn reply(&mut self, kind: ResolutionKind, handle: Handle) -> Result<()> {
        if self.surfaces.get(handle).is_none() {
            return Err(Error::UnknownHandle(handle));
        }
        let remote = RemoteRef(self.next_remote);
        self.next_remote = self.next_remote.wrapping_add(1);
        self.transferred.insert(remote, (kind, handle));
        tracing::debug!(handle = handle.raw(), ?kind, remote = remote.0, "resolving");

        self.outbox.push_back(encode_event(&Event::Resolved {
            kind,
            handle,
            remote,
        }));
        self.flush_events()
    }

    /// Send queued resolution events.
    pub fn flush_events(&mut self) -> Result<()> {
        while let Some(front) = self.outbox.front() {
            match self.transport.send(front) {
                Ok(()) => {
                    self.outbox.pop_front();
                }
                Err(TransportError::Full) => {
                    tracing::debug!(queued = self.outbox.len(), "event transport full");
                    break;
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }
}
