//! Producer and consumer runtimes for a 2D context driven across contexts.
//!
//! A [`ProducerContext`] hands out [`ContextProxy`] values that are usable
//! straight away. Their calls travel as instructions to a [`ConsumerContext`],
//! which applies them to the real surface and answers the proxy's upgrade
//! request; from then on the proxy delegates to the resolved implementation.

mod channel;
mod config;
mod consumer;
mod error;
pub mod members;
mod polyfill;
mod producer;
mod proxy;
mod surface;

pub use channel::MutationChannel;
pub use config::{ConsumerConfig, OfflinePolicy, ProducerConfig};
pub use consumer::{ConsumerContext, FrameReport};
pub use error::{Error, Result};
pub use polyfill::Polyfill;
pub use producer::ProducerContext;
pub use proxy::{ContextProxy, ProxyState};
pub use surface::{Context2d, Op, SoftwareContext};

pub use offcanvas_wire as wire;
