//! The resource proxy: a handle-addressed stand-in for a 2D context whose real
//! implementation becomes available later.
//!
//! ```text
//! UNRESOLVED --construction--> RESOLVING --first matching resolution--> READY
//! ```
//!
//! While not `READY`, every call is forwarded over the mutation channel (reads
//! excepted, they have no wire form), applied to a local placeholder, and
//! buffered. The upgrade swaps in the resolved implementation and drains the
//! buffer against it once, in issue order. `READY` is terminal.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use offcanvas_wire::{CallKind, Handle, Instruction, LegacyCall, Value};

use crate::channel::MutationChannel;
use crate::error::{Error, Result};
use crate::members::{self, Member};
use crate::producer::ProducerState;
use crate::surface::Context2d;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyState {
    Unresolved,
    Resolving,
    Ready,
}

#[derive(Debug, Clone)]
struct BufferedCall {
    member: &'static Member,
    args: Vec<Value>,
    kind: CallKind,
}

pub(crate) struct ProxyInner {
    handle: Handle,
    state: ProxyState,
    implementation: Rc<RefCell<dyn Context2d>>,
    buffer: Vec<BufferedCall>,
    channel: Rc<RefCell<MutationChannel>>,
    owner: Weak<RefCell<ProducerState>>,
}

impl Drop for ProxyInner {
    fn drop(&mut self) {
        if !self.buffer.is_empty() {
            tracing::debug!(
                handle = self.handle.raw(),
                discarded = self.buffer.len(),
                "proxy dropped before resolution"
            );
        }
        if let Some(owner) = self.owner.upgrade() {
            if let Ok(mut owner) = owner.try_borrow_mut() {
                owner.forget(self.handle);
            } else {
                tracing::warn!(handle = self.handle.raw(), "producer busy; handle not released");
            }
        }
    }
}

/// A 2D context usable immediately after construction.
///
/// Cloning yields another reference to the same proxy; the handle is released
/// when the last reference is dropped.
#[derive(Clone)]
pub struct ContextProxy(Rc<RefCell<ProxyInner>>);

impl fmt::Debug for ContextProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.0.borrow();
        f.debug_struct("ContextProxy")
            .field("handle", &inner.handle)
            .field("state", &inner.state)
            .field("buffered", &inner.buffer.len())
            .finish()
    }
}

impl ContextProxy {
    pub(crate) fn new(
        handle: Handle,
        placeholder: Rc<RefCell<dyn Context2d>>,
        channel: Rc<RefCell<MutationChannel>>,
        owner: Weak<RefCell<ProducerState>>,
    ) -> Self {
        Self(Rc::new(RefCell::new(ProxyInner {
            handle,
            state: ProxyState::Unresolved,
            implementation: placeholder,
            buffer: Vec::new(),
            channel,
            owner,
        })))
    }

    pub(crate) fn downgrade(&self) -> Weak<RefCell<ProxyInner>> {
        Rc::downgrade(&self.0)
    }

    pub(crate) fn from_inner(inner: Rc<RefCell<ProxyInner>>) -> Self {
        Self(inner)
    }

    pub(crate) fn mark_resolving(&self) {
        let mut inner = self.0.borrow_mut();
        if inner.state == ProxyState::Unresolved {
            inner.state = ProxyState::Resolving;
        }
    }

    /// Construct directly in `READY`, backed by `implementation`.
    pub(crate) fn mark_ready(&self) {
        self.0.borrow_mut().state = ProxyState::Ready;
    }

    pub fn handle(&self) -> Handle {
        self.0.borrow().handle
    }

    pub fn state(&self) -> ProxyState {
        self.0.borrow().state
    }

    pub fn is_ready(&self) -> bool {
        self.state() == ProxyState::Ready
    }

    /// Calls waiting to be replayed on resolution.
    pub fn buffered(&self) -> usize {
        self.0.borrow().buffer.len()
    }

    /// The implementation calls currently land on.
    pub fn implementation(&self) -> Rc<RefCell<dyn Context2d>> {
        self.0.borrow().implementation.clone()
    }

    pub fn call(&self, method: &str, args: &[Value]) -> Result<Option<Value>> {
        let member = members::check(method, CallKind::Call, args)?;
        self.invoke(member, CallKind::Call, args.to_vec())
    }

    pub fn set(&self, property: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let member = members::check(property, CallKind::Set, std::slice::from_ref(&value))?;
        self.invoke(member, CallKind::Set, vec![value]).map(drop)
    }

    /// Read a property. Before `READY` this is the placeholder's value.
    pub fn get(&self, property: &str) -> Result<Option<Value>> {
        let member = members::check(property, CallKind::Get, &[])?;
        self.invoke(member, CallKind::Get, Vec::new())
    }

    fn invoke(
        &self,
        member: &'static Member,
        kind: CallKind,
        args: Vec<Value>,
    ) -> Result<Option<Value>> {
        let mut inner = self.0.borrow_mut();
        let implementation = inner.implementation.clone();

        if inner.state == ProxyState::Ready {
            drop(inner);
            return apply(&implementation, member, kind, &args);
        }

        if kind != CallKind::Get {
            inner
                .channel
                .borrow_mut()
                .transfer(&Instruction::LegacyCall(LegacyCall {
                    handle: inner.handle,
                    method: member.name.to_string(),
                    is_setter: kind == CallKind::Set,
                    args: args.clone(),
                }))?;
        }
        let result = apply(&implementation, member, kind, &args)?;
        inner.buffer.push(BufferedCall { member, args, kind });
        Ok(result)
    }

    /// Transition to `READY` on `implementation` and drain the buffer into it.
    ///
    /// Returns `false` if the proxy was already `READY`; nothing happens then.
    pub(crate) fn upgrade(&self, implementation: Rc<RefCell<dyn Context2d>>) -> bool {
        let buffer = {
            let mut inner = self.0.borrow_mut();
            if inner.state == ProxyState::Ready {
                tracing::trace!(handle = inner.handle.raw(), "proxy already ready");
                return false;
            }
            inner.state = ProxyState::Ready;
            inner.implementation = implementation.clone();
            std::mem::take(&mut inner.buffer)
        };

        let handle = self.handle();
        tracing::debug!(handle = handle.raw(), calls = buffer.len(), "draining proxy");
        for call in buffer {
            if let Err(err) = apply(&implementation, call.member, call.kind, &call.args) {
                tracing::warn!(
                    handle = handle.raw(),
                    method = call.member.name,
                    "replayed call failed: {err}"
                );
            }
        }
        true
    }
}

fn apply(
    implementation: &Rc<RefCell<dyn Context2d>>,
    member: &'static Member,
    kind: CallKind,
    args: &[Value],
) -> Result<Option<Value>> {
    match kind {
        CallKind::Call => implementation.borrow_mut().call(member.name, args),
        CallKind::Get => implementation.borrow().get(member.name),
        CallKind::Set => {
            let [value] = args else {
                return Err(Error::ArgumentCount {
                    member: member.name,
                    min: 1,
                    max: 1,
                    got: args.len(),
                });
            };
            implementation.borrow_mut().set(member.name, value.clone())?;
            Ok(None)
        }
    }
}
