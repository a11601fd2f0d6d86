//! Transport seam between the two contexts.
//!
//! The contexts only need a reliable, ordered, non-blocking message pipe per
//! direction. [`RingTransport`] provides one over a pair of [`FrameRing`]s;
//! embedders with a real channel (e.g. `postMessage`) implement [`Transport`].

use std::sync::Arc;

use thiserror::Error;

use crate::ring::{CapacityError, FrameRing, PopError, PushError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The peer has not caught up yet; retry later without reordering.
    #[error("transport is full")]
    Full,

    #[error("message too large for the transport")]
    TooLarge,

    #[error("transport is corrupt")]
    Corrupt,
}

impl From<PushError> for TransportError {
    fn from(value: PushError) -> Self {
        match value {
            PushError::Full => Self::Full,
            PushError::TooLarge => Self::TooLarge,
        }
    }
}

/// One end of a duplex, FIFO, lossless message link.
pub trait Transport {
    /// Queue one message for the peer. Must not block.
    fn send(&self, message: &[u8]) -> Result<(), TransportError>;

    /// Next message from the peer, if any. Must not block.
    fn try_recv(&self) -> Result<Option<Vec<u8>>, TransportError>;

    /// Largest message `send` can ever accept, when the link has a hard limit.
    fn max_message_bytes(&self) -> Option<usize> {
        None
    }
}

/// [`Transport`] over two shared rings, one per direction.
#[derive(Clone)]
pub struct RingTransport {
    outbound: Arc<FrameRing>,
    inbound: Arc<FrameRing>,
}

impl RingTransport {
    /// Build both ends of a link whose rings each hold `capacity_bytes`.
    ///
    /// # Panics
    ///
    /// On a capacity [`RingTransport::try_pair`] rejects.
    pub fn pair(capacity_bytes: usize) -> (Self, Self) {
        match Self::try_pair(capacity_bytes) {
            Ok(pair) => pair,
            Err(err) => panic!("{err}"),
        }
    }

    pub fn try_pair(capacity_bytes: usize) -> Result<(Self, Self), CapacityError> {
        let a_to_b = Arc::new(FrameRing::try_new(capacity_bytes)?);
        let b_to_a = Arc::new(FrameRing::try_new(capacity_bytes)?);
        Ok((
            Self {
                outbound: a_to_b.clone(),
                inbound: b_to_a.clone(),
            },
            Self {
                outbound: b_to_a,
                inbound: a_to_b,
            },
        ))
    }
}

impl Transport for RingTransport {
    fn send(&self, message: &[u8]) -> Result<(), TransportError> {
        Ok(self.outbound.try_push(message)?)
    }

    fn try_recv(&self) -> Result<Option<Vec<u8>>, TransportError> {
        match self.inbound.try_pop() {
            Ok(message) => Ok(Some(message)),
            Err(PopError::Empty) => Ok(None),
            Err(PopError::Corrupt) => Err(TransportError::Corrupt),
        }
    }

    fn max_message_bytes(&self) -> Option<usize> {
        Some(self.outbound.max_payload_bytes())
    }
}
