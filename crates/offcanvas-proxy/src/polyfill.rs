//! Forwarding surface for producers whose consumer cannot hand over a real
//! surface. Every mutation goes out as a `LEGACY_CALL`; reads and queries are
//! answered from a local shadow of the drawing state.

use std::cell::RefCell;
use std::rc::Rc;

use offcanvas_wire::{CallKind, Handle, Instruction, LegacyCall, Value};

use crate::channel::MutationChannel;
use crate::error::Result;
use crate::members::{self, MemberKind, Returns};
use crate::surface::{Context2d, SoftwareContext};

pub struct Polyfill {
    handle: Handle,
    channel: Rc<RefCell<MutationChannel>>,
    shadow: SoftwareContext,
}

impl Polyfill {
    pub fn new(handle: Handle, channel: Rc<RefCell<MutationChannel>>) -> Self {
        Self {
            handle,
            channel,
            shadow: SoftwareContext::unrecorded(),
        }
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    fn forward(&self, method: &'static str, is_setter: bool, args: Vec<Value>) -> Result<()> {
        self.channel
            .borrow_mut()
            .transfer(&Instruction::LegacyCall(LegacyCall {
                handle: self.handle,
                method: method.to_string(),
                is_setter,
                args,
            }))
    }
}

impl Context2d for Polyfill {
    fn call(&mut self, method: &str, args: &[Value]) -> Result<Option<Value>> {
        let member = members::check(method, CallKind::Call, args)?;
        let is_query = !matches!(
            member.kind,
            MemberKind::Method {
                returns: Returns::Nothing,
                ..
            }
        );
        if !is_query {
            self.forward(member.name, false, args.to_vec())?;
        }
        self.shadow.call(member.name, args)
    }

    fn set(&mut self, property: &str, value: Value) -> Result<()> {
        let member = members::check(property, CallKind::Set, std::slice::from_ref(&value))?;
        self.forward(member.name, true, vec![value.clone()])?;
        self.shadow.set(member.name, value)
    }

    fn get(&self, property: &str) -> Result<Option<Value>> {
        self.shadow.get(property)
    }
}
