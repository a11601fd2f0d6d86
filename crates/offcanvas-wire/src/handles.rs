//! Handle registry: the only addressing primitive shared by both contexts.
//!
//! Instructions never carry structural references; they name their target by
//! [`Handle`]. Each context keeps its own registry mapping handles to the
//! local object currently standing behind them.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use thiserror::Error;

use crate::layout::HANDLE_BASE;

/// Opaque, stable resource id. Fits in one transfer unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Handle(u16);

impl Handle {
    pub const fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u16 {
        self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandleError {
    #[error("handle space exhausted")]
    Exhausted,

    #[error("handle {0} is already tracked")]
    AlreadyTracked(Handle),

    #[error("handle {0} is not tracked")]
    NotTracked(Handle),

    /// The object already stands behind another handle.
    #[error("object is already tracked as {0}")]
    ObjectAlreadyTracked(Handle),
}

/// Bidirectional `Handle <-> Rc<T>` association, O(1) both ways.
///
/// Objects are identified by allocation address, so `T` may be unsized (e.g.
/// `RefCell<dyn Trait>`). Handles come from a monotonic counter and are never
/// handed out twice.
pub struct HandleRegistry<T: ?Sized> {
    objects: HashMap<Handle, Rc<T>>,
    handles: HashMap<usize, Handle>,
    next: u32,
}

impl<T: ?Sized> Default for HandleRegistry<T> {
    fn default() -> Self {
        Self {
            objects: HashMap::new(),
            handles: HashMap::new(),
            next: u32::from(HANDLE_BASE),
        }
    }
}

impl<T: ?Sized> fmt::Debug for HandleRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleRegistry")
            .field("live", &self.objects.len())
            .field("next", &self.next)
            .finish()
    }
}

fn address<T: ?Sized>(object: &Rc<T>) -> usize {
    Rc::as_ptr(object).cast::<()>() as usize
}

impl<T: ?Sized> HandleRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Reserve a fresh handle without tracking anything behind it yet.
    pub fn allocate(&mut self) -> Result<Handle, HandleError> {
        let raw = u16::try_from(self.next).map_err(|_| HandleError::Exhausted)?;
        self.next += 1;
        Ok(Handle(raw))
    }

    /// Allocate a handle and track `object` behind it.
    pub fn track_new(&mut self, object: Rc<T>) -> Result<Handle, HandleError> {
        let handle = self.allocate()?;
        self.track(handle, object)?;
        Ok(handle)
    }

    /// Track `object` behind a handle assigned elsewhere (e.g. by the peer context).
    pub fn track(&mut self, handle: Handle, object: Rc<T>) -> Result<(), HandleError> {
        if self.objects.contains_key(&handle) {
            return Err(HandleError::AlreadyTracked(handle));
        }
        if let Some(&existing) = self.handles.get(&address(&object)) {
            return Err(HandleError::ObjectAlreadyTracked(existing));
        }
        // Keep locally allocated handles unique even when foreign ones are mixed in.
        self.next = self.next.max(u32::from(handle.0) + 1);
        self.handles.insert(address(&object), handle);
        self.objects.insert(handle, object);
        Ok(())
    }

    /// Swap the object behind `handle`, returning the previous one.
    pub fn replace(&mut self, handle: Handle, object: Rc<T>) -> Result<Rc<T>, HandleError> {
        match self.handles.get(&address(&object)) {
            Some(&existing) if existing != handle => {
                return Err(HandleError::ObjectAlreadyTracked(existing));
            }
            _ => {}
        }
        let slot = self
            .objects
            .get_mut(&handle)
            .ok_or(HandleError::NotTracked(handle))?;
        let previous = std::mem::replace(slot, object);
        self.handles.remove(&address(&previous));
        self.handles.insert(address(slot), handle);
        Ok(previous)
    }

    pub fn get(&self, handle: Handle) -> Option<&Rc<T>> {
        self.objects.get(&handle)
    }

    pub fn handle_of(&self, object: &Rc<T>) -> Option<Handle> {
        self.handles.get(&address(object)).copied()
    }

    pub fn release(&mut self, handle: Handle) -> Option<Rc<T>> {
        let object = self.objects.remove(&handle)?;
        self.handles.remove(&address(&object));
        Some(object)
    }
}
