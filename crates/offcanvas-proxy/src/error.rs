use offcanvas_wire::{CallKind, DecodeError, EncodeError, Handle, HandleError, TransportError};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the producer and consumer runtimes.
///
/// Call-site variants (`UnknownMember` through `Unsupported`) are raised before
/// anything is buffered or sent, so a rejected call leaves no trace on the
/// wire or in any proxy's buffer.
#[derive(Debug, Error)]
pub enum Error {
    #[error("unknown 2d context member `{0}`")]
    UnknownMember(String),

    #[error("`{member}` cannot be used as a {kind:?}")]
    WrongCallKind { member: &'static str, kind: CallKind },

    #[error("`{member}` takes {min}..={max} arguments, got {got}")]
    ArgumentCount {
        member: &'static str,
        min: usize,
        max: usize,
        got: usize,
    },

    #[error("`{member}` argument {index}: expected {expected}")]
    ArgumentShape {
        member: &'static str,
        index: usize,
        expected: &'static str,
    },

    #[error("`{member}` is not supported: {reason}")]
    Unsupported {
        member: &'static str,
        reason: &'static str,
    },

    #[error("context type `{0}` is not supported")]
    UnsupportedContextType(String),

    /// Offline mode with [`crate::OfflinePolicy::FailFast`].
    #[error("no transport available to reach the consumer context")]
    TransportUnavailable,

    #[error("no resource is attached to handle {0}")]
    UnknownHandle(Handle),

    #[error(transparent)]
    Handle(#[from] HandleError),

    #[error("failed to encode instruction: {0}")]
    Encode(#[from] EncodeError),

    #[error("failed to decode message: {0}")]
    Decode(#[from] DecodeError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The contexts disagree about shared state; nothing received afterwards can be trusted.
    #[error("protocol violation: {0}")]
    Desynchronized(String),
}
