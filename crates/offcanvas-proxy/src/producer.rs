//! The producer context: where proxies are created and used.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;

use offcanvas_wire::{
    decode_event, Event, Handle, HandleRegistry, Instruction, RemoteRef, ResolutionKind,
    Transport,
};

use crate::channel::MutationChannel;
use crate::config::{OfflinePolicy, ProducerConfig};
use crate::error::{Error, Result};
use crate::polyfill::Polyfill;
use crate::proxy::ContextProxy;
use crate::surface::{Context2d, SoftwareContext};

type Listener = Box<dyn FnOnce(RemoteRef)>;

/// Bookkeeping shared between the context and its proxies.
#[derive(Default)]
pub(crate) struct ProducerState {
    registry: HandleRegistry<RefCell<dyn Context2d>>,
    /// Single-fire continuations, fired in request order per key.
    listeners: HashMap<(ResolutionKind, Handle), VecDeque<Listener>>,
    deferred: HashSet<Handle>,
}

impl ProducerState {
    /// Drop everything known about a proxy that went away.
    pub(crate) fn forget(&mut self, handle: Handle) {
        self.registry.release(handle);
        self.listeners
            .remove(&(ResolutionKind::OffscreenCanvas, handle));
        self.listeners.remove(&(ResolutionKind::ImageBitmap, handle));
        self.deferred.remove(&handle);
        tracing::trace!(handle = handle.raw(), "handle released");
    }

    fn listen(&mut self, kind: ResolutionKind, handle: Handle, listener: Listener) {
        self.listeners
            .entry((kind, handle))
            .or_default()
            .push_back(listener);
    }

    fn take_listener(&mut self, kind: ResolutionKind, handle: Handle) -> Option<Listener> {
        let queue = self.listeners.get_mut(&(kind, handle))?;
        let listener = queue.pop_front();
        if queue.is_empty() {
            self.listeners.remove(&(kind, handle));
        }
        listener
    }
}

/// One producer execution context.
///
/// Create it once at context start; it owns the string table (inside the
/// mutation channel) and the handle registry for the lifetime of the context.
pub struct ProducerContext {
    config: ProducerConfig,
    transport: Option<Rc<dyn Transport>>,
    channel: Rc<RefCell<MutationChannel>>,
    state: Rc<RefCell<ProducerState>>,
}

impl ProducerContext {
    /// `transport` is `None` in offline mode.
    pub fn new(config: ProducerConfig, transport: Option<Rc<dyn Transport>>) -> Self {
        let channel = MutationChannel::new(transport.clone(), config.auto_flush);
        Self {
            config,
            transport,
            channel: Rc::new(RefCell::new(channel)),
            state: Rc::new(RefCell::new(ProducerState::default())),
        }
    }

    pub fn config(&self) -> &ProducerConfig {
        &self.config
    }

    pub fn is_online(&self) -> bool {
        self.transport.is_some()
    }

    /// `getContext(type)`: only `"2d"` is available.
    pub fn get_context<R>(&self, context_type: &str, resolver: R) -> Result<ContextProxy>
    where
        R: FnOnce(RemoteRef) -> Rc<RefCell<dyn Context2d>> + 'static,
    {
        match context_type {
            "2d" | "2D" => self.create_context(resolver),
            other => Err(Error::UnsupportedContextType(other.to_string())),
        }
    }

    /// Allocate a handle and construct a proxy for a new 2D context.
    ///
    /// `resolver` turns the consumer's opaque reference into the real
    /// implementation once the upgrade resolves. It is not used when the
    /// context is built on the polyfill.
    pub fn create_context<R>(&self, resolver: R) -> Result<ContextProxy>
    where
        R: FnOnce(RemoteRef) -> Rc<RefCell<dyn Context2d>> + 'static,
    {
        if !self.is_online() && self.config.offline_policy == OfflinePolicy::FailFast {
            return Err(Error::TransportUnavailable);
        }

        let handle = self.state.borrow_mut().registry.allocate()?;

        if !self.config.offscreen_supported {
            let polyfill: Rc<RefCell<dyn Context2d>> =
                Rc::new(RefCell::new(Polyfill::new(handle, self.channel.clone())));
            self.state
                .borrow_mut()
                .registry
                .track(handle, polyfill.clone())?;
            let proxy = ContextProxy::new(
                handle,
                polyfill,
                self.channel.clone(),
                Rc::downgrade(&self.state),
            );
            proxy.mark_ready();
            tracing::debug!(handle = handle.raw(), "context created on polyfill");
            return Ok(proxy);
        }

        let placeholder: Rc<RefCell<dyn Context2d>> =
            Rc::new(RefCell::new(SoftwareContext::unrecorded()));
        self.state
            .borrow_mut()
            .registry
            .track(handle, placeholder.clone())?;
        let proxy = ContextProxy::new(
            handle,
            placeholder,
            self.channel.clone(),
            Rc::downgrade(&self.state),
        );

        let weak_proxy = proxy.downgrade();
        let weak_state = Rc::downgrade(&self.state);
        let listener: Listener = Box::new(move |remote| {
            let Some(inner) = weak_proxy.upgrade() else {
                tracing::trace!(handle = handle.raw(), "resolution for dropped proxy");
                return;
            };
            let implementation = resolver(remote);
            if let Some(state) = weak_state.upgrade() {
                if let Err(err) = state
                    .borrow_mut()
                    .registry
                    .replace(handle, implementation.clone())
                {
                    tracing::warn!(handle = handle.raw(), "registry out of date: {err}");
                }
            }
            ContextProxy::from_inner(inner).upgrade(implementation);
        });
        self.state
            .borrow_mut()
            .listen(ResolutionKind::OffscreenCanvas, handle, listener);

        if self.is_online() {
            self.channel
                .borrow_mut()
                .transfer(&Instruction::UpgradeRequest { handle })?;
        } else {
            self.state.borrow_mut().deferred.insert(handle);
            tracing::debug!(handle = handle.raw(), "offline; upgrade deferred");
        }
        proxy.mark_resolving();
        Ok(proxy)
    }

    /// Ask the consumer for an image bitmap of `handle`'s surface.
    ///
    /// `callback` fires once with the consumer's reference to the bitmap.
    pub fn request_image_bitmap<F>(&self, handle: Handle, callback: F) -> Result<()>
    where
        F: FnOnce(RemoteRef) + 'static,
    {
        if !self.is_online() {
            return Err(Error::TransportUnavailable);
        }
        if self.state.borrow().registry.get(handle).is_none() {
            return Err(Error::UnknownHandle(handle));
        }
        self.channel
            .borrow_mut()
            .transfer(&Instruction::ImageBitmapRequest { handle })?;
        self.state
            .borrow_mut()
            .listen(ResolutionKind::ImageBitmap, handle, Box::new(callback));
        Ok(())
    }

    /// Route one inbound event. Returns whether a listener consumed it;
    /// unknown, stale and duplicate resolutions are dropped.
    pub fn dispatch(&self, event: Event) -> bool {
        let Event::Resolved {
            kind,
            handle,
            remote,
        } = event;
        // The state borrow ends before the listener runs; it may drop proxies.
        let listener = self.state.borrow_mut().take_listener(kind, handle);
        match listener {
            Some(listener) => {
                tracing::debug!(handle = handle.raw(), ?kind, remote = remote.0, "resolution");
                listener(remote);
                true
            }
            None => {
                tracing::trace!(handle = handle.raw(), ?kind, "ignoring unmatched resolution");
                false
            }
        }
    }

    /// Dispatch every event waiting on the transport. Returns how many were
    /// received.
    pub fn poll(&self) -> Result<usize> {
        let Some(transport) = self.transport.clone() else {
            return Ok(0);
        };
        let mut received = 0;
        while let Some(bytes) = transport.try_recv()? {
            received += 1;
            self.dispatch(decode_event(&bytes)?);
        }
        Ok(received)
    }

    /// Send queued instructions. See [`MutationChannel::flush`].
    pub fn flush(&self) -> Result<usize> {
        self.channel.borrow_mut().flush()
    }

    /// Frames waiting for room on the transport.
    pub fn unsent_frames(&self) -> usize {
        self.channel.borrow().backlog_len()
    }

    /// Handles whose upgrade was recorded while offline.
    pub fn deferred(&self) -> Vec<Handle> {
        let mut handles: Vec<Handle> = self.state.borrow().deferred.iter().copied().collect();
        handles.sort_unstable();
        handles
    }

    /// Complete a deferred upgrade by hand.
    pub fn resolve_deferred(&self, handle: Handle, remote: RemoteRef) -> Result<()> {
        if !self.state.borrow_mut().deferred.remove(&handle) {
            return Err(Error::UnknownHandle(handle));
        }
        self.dispatch(Event::Resolved {
            kind: ResolutionKind::OffscreenCanvas,
            handle,
            remote,
        });
        Ok(())
    }

    /// Abandon a deferred upgrade; the proxy keeps running on its placeholder.
    pub fn reject_deferred(&self, handle: Handle) -> Result<()> {
        let mut state = self.state.borrow_mut();
        if !state.deferred.remove(&handle) {
            return Err(Error::UnknownHandle(handle));
        }
        state.take_listener(ResolutionKind::OffscreenCanvas, handle);
        tracing::debug!(handle = handle.raw(), "deferred upgrade rejected");
        Ok(())
    }

    /// The implementation currently behind `handle`.
    pub fn surface(&self, handle: Handle) -> Option<Rc<RefCell<dyn Context2d>>> {
        self.state.borrow().registry.get(handle).cloned()
    }

    /// Live proxies.
    pub fn live_handles(&self) -> usize {
        self.state.borrow().registry.len()
    }

    pub fn pending_resolutions(&self) -> usize {
        self.state.borrow().listeners.values().map(VecDeque::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::ProxyState;
    use offcanvas_wire::{decode_frame, InstructionReader, RingTransport, StringTable, Value};

    fn software() -> Rc<RefCell<SoftwareContext>> {
        Rc::new(RefCell::new(SoftwareContext::new()))
    }

    fn resolver_for(
        target: &Rc<RefCell<SoftwareContext>>,
    ) -> impl FnOnce(RemoteRef) -> Rc<RefCell<dyn Context2d>> + 'static {
        let target = target.clone();
        move |_| target as Rc<RefCell<dyn Context2d>>
    }

    fn online() -> (ProducerContext, RingTransport) {
        let (producer, consumer) = RingTransport::pair(1 << 14);
        (
            ProducerContext::new(ProducerConfig::default(), Some(Rc::new(producer))),
            consumer,
        )
    }

    fn resolved(handle: Handle, remote: u32) -> Event {
        Event::Resolved {
            kind: ResolutionKind::OffscreenCanvas,
            handle,
            remote: RemoteRef(remote),
        }
    }

    #[test]
    fn construction_sends_upgrade_request_first() {
        let (producer, consumer) = online();
        let real = software();
        let proxy = producer.create_context(resolver_for(&real)).unwrap();
        assert_eq!(proxy.handle(), Handle::from_raw(1));
        assert_eq!(proxy.state(), ProxyState::Resolving);
        proxy.set("fillStyle", "red").unwrap();
        producer.flush().unwrap();

        let frame = decode_frame(&consumer.try_recv().unwrap().unwrap()).unwrap();
        let mut strings = StringTable::new();
        strings
            .register_batch(frame.first_string_id, frame.strings)
            .unwrap();
        let mut reader = InstructionReader::new(&frame.units, &strings);
        assert_eq!(
            reader.next().unwrap().unwrap(),
            Instruction::UpgradeRequest {
                handle: proxy.handle()
            }
        );
        assert!(matches!(
            reader.next(),
            Some(Ok(Instruction::LegacyCall(call))) if call.is_setter && call.method == "fillStyle"
        ));
        assert!(reader.next().is_none());
    }

    #[test]
    fn resolution_fires_once_and_only_for_its_handle() {
        let (producer, _consumer) = online();
        let (a_real, b_real) = (software(), software());
        let a = producer.create_context(resolver_for(&a_real)).unwrap();
        let b = producer.create_context(resolver_for(&b_real)).unwrap();
        a.call("beginPath", &[]).unwrap();

        assert!(producer.dispatch(resolved(b.handle(), 7)));
        assert_eq!(a.state(), ProxyState::Resolving);
        assert!(b.is_ready());

        assert!(producer.dispatch(resolved(a.handle(), 8)));
        assert!(!producer.dispatch(resolved(a.handle(), 8)));
        assert_eq!(a_real.borrow().log().len(), 1);
        assert!(!producer.dispatch(resolved(Handle::from_raw(99), 1)));

        let surface = producer.surface(a.handle()).unwrap();
        assert!(Rc::ptr_eq(&surface, &(a_real as Rc<RefCell<dyn Context2d>>)));
    }

    #[test]
    fn dropping_a_proxy_releases_its_handle_and_listener() {
        let (producer, _consumer) = online();
        let proxy = producer.create_context(resolver_for(&software())).unwrap();
        let handle = proxy.handle();
        let clone = proxy.clone();
        drop(proxy);
        assert_eq!(producer.live_handles(), 1);
        drop(clone);
        assert_eq!(producer.live_handles(), 0);
        assert_eq!(producer.pending_resolutions(), 0);
        assert!(!producer.dispatch(resolved(handle, 1)));

        // Handles are never reused.
        let next = producer.create_context(resolver_for(&software())).unwrap();
        assert_eq!(next.handle(), Handle::from_raw(2));
    }

    #[test]
    fn offline_fail_fast_refuses_construction() {
        let producer = ProducerContext::new(
            ProducerConfig {
                offline_policy: OfflinePolicy::FailFast,
                ..ProducerConfig::default()
            },
            None,
        );
        assert!(matches!(
            producer.create_context(resolver_for(&software())),
            Err(Error::TransportUnavailable)
        ));
        assert_eq!(producer.live_handles(), 0);
    }

    #[test]
    fn offline_defer_records_and_resolves_by_hand() {
        let producer = ProducerContext::new(ProducerConfig::default(), None);
        let real = software();
        let proxy = producer.create_context(resolver_for(&real)).unwrap();
        proxy.set("lineWidth", 3.0f32).unwrap();
        assert_eq!(producer.deferred(), [proxy.handle()]);

        producer.resolve_deferred(proxy.handle(), RemoteRef(0)).unwrap();
        assert!(proxy.is_ready());
        assert_eq!(real.borrow().get("lineWidth").unwrap(), Some(Value::Float32(3.0)));
        assert!(producer.deferred().is_empty());
        assert!(matches!(
            producer.resolve_deferred(proxy.handle(), RemoteRef(0)),
            Err(Error::UnknownHandle(_))
        ));
    }

    #[test]
    fn rejected_deferral_keeps_the_placeholder() {
        let producer = ProducerContext::new(ProducerConfig::default(), None);
        let proxy = producer.create_context(resolver_for(&software())).unwrap();
        producer.reject_deferred(proxy.handle()).unwrap();
        assert_eq!(proxy.state(), ProxyState::Resolving);
        proxy.set("fillStyle", "blue").unwrap();
        assert_eq!(proxy.get("fillStyle").unwrap(), Some(Value::str("blue")));
        assert_eq!(producer.pending_resolutions(), 0);
    }

    #[test]
    fn only_2d_contexts_exist() {
        let (producer, _consumer) = online();
        assert!(producer.get_context("2D", resolver_for(&software())).is_ok());
        assert!(matches!(
            producer.get_context("webgl", resolver_for(&software())),
            Err(Error::UnsupportedContextType(t)) if t == "webgl"
        ));
    }

    #[test]
    fn image_bitmap_callbacks_fire_in_request_order() {
        let (producer, _consumer) = online();
        let proxy = producer.create_context(resolver_for(&software())).unwrap();
        let seen = Rc::new(RefCell::new(Vec::new()));
        for _ in 0..2 {
            let seen = seen.clone();
            producer
                .request_image_bitmap(proxy.handle(), move |remote| seen.borrow_mut().push(remote))
                .unwrap();
        }
        for remote in [10, 11, 12] {
            producer.dispatch(Event::Resolved {
                kind: ResolutionKind::ImageBitmap,
                handle: proxy.handle(),
                remote: RemoteRef(remote),
            });
        }
        assert_eq!(*seen.borrow(), [RemoteRef(10), RemoteRef(11)]);
        assert!(matches!(
            producer.request_image_bitmap(Handle::from_raw(40), |_| {}),
            Err(Error::UnknownHandle(_))
        ));
    }
}
