use std::fmt;
use std::str::FromStr;

/// What proxy construction does when the producer has no transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OfflinePolicy {
    /// Record a deferred upgrade the embedder resolves or rejects by hand.
    #[default]
    Defer,
    /// Refuse to construct the proxy.
    FailFast,
}

impl FromStr for OfflinePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "defer" | "deferred" => Ok(Self::Defer),
            "fail-fast" | "failfast" | "fail" => Ok(Self::FailFast),
            other => Err(format!(
                "unknown offline policy `{other}` (expected `defer` or `fail-fast`)"
            )),
        }
    }
}

impl fmt::Display for OfflinePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Defer => "defer",
            Self::FailFast => "fail-fast",
        })
    }
}

#[derive(Debug, Clone)]
pub struct ProducerConfig {
    /// Whether the consumer can hand over real surfaces.
    ///
    /// When `false`, contexts are built on the forwarding polyfill and are
    /// ready from construction.
    pub offscreen_supported: bool,
    pub offline_policy: OfflinePolicy,
    /// Flush a frame after every instruction instead of waiting for
    /// [`crate::ProducerContext::flush`].
    pub auto_flush: bool,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            offscreen_supported: true,
            offline_policy: OfflinePolicy::Defer,
            auto_flush: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Frames larger than this are refused before decoding.
    pub max_frame_bytes: usize,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: offcanvas_wire::layout::MAX_MESSAGE_BYTES,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offline_policy_parses() {
        assert_eq!("defer".parse(), Ok(OfflinePolicy::Defer));
        assert_eq!(" Fail-Fast ".parse(), Ok(OfflinePolicy::FailFast));
        assert!("sometimes".parse::<OfflinePolicy>().is_err());
        assert_eq!(OfflinePolicy::FailFast.to_string(), "fail-fast");
    }
}
