use clap::{Parser, ValueEnum};
use offcanvas_proxy::wire::layout::RECORD_ALIGN;
use std::{env, time::Duration};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Scenario {
    /// Draw on a canvas the consumer already has.
    Existing,
    /// Create a canvas, then draw on it.
    New,
    /// Create two canvases back to back and draw on both.
    Double,
}

impl Scenario {
    pub fn canvases(self) -> u16 {
        match self {
            Self::Existing | Self::New => 1,
            Self::Double => 2,
        }
    }
}

#[derive(Debug, Clone, Parser)]
#[command(name = "offcanvas-demo", version, about)]
struct Args {
    /// Which drawing scenario to run.
    ///
    /// Environment variable: `OFFCANVAS_SCENARIO`.
    #[arg(long, value_enum, env = "OFFCANVAS_SCENARIO")]
    scenario: Option<Scenario>,

    /// Whether the consumer hands over real surfaces. With `false` every
    /// context runs on the forwarding polyfill.
    ///
    /// Environment variable: `OFFCANVAS_OFFSCREEN`.
    #[arg(long, env = "OFFCANVAS_OFFSCREEN")]
    offscreen: Option<bool>,

    /// Bytes per direction in the shared frame rings.
    ///
    /// Environment variable: `OFFCANVAS_RING_CAPACITY`.
    #[arg(long, env = "OFFCANVAS_RING_CAPACITY")]
    ring_capacity: Option<usize>,

    /// How long to wait for every context to resolve, in milliseconds.
    ///
    /// Environment variable: `OFFCANVAS_TIMEOUT_MS`.
    #[arg(long, env = "OFFCANVAS_TIMEOUT_MS")]
    timeout_ms: Option<u64>,

    /// Log filter (tracing-subscriber EnvFilter syntax).
    ///
    /// Environment variable: `OFFCANVAS_LOG_LEVEL`.
    #[arg(long, env = "OFFCANVAS_LOG_LEVEL")]
    log_level: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub scenario: Scenario,
    pub offscreen: bool,
    pub ring_capacity: usize,
    pub timeout: Duration,
    pub log_level: String,
}

impl Config {
    pub fn load() -> Self {
        Self::from_args(Args::parse())
    }

    fn from_args(args: Args) -> Self {
        // Rings hold whole aligned records; round odd sizes up.
        let ring_capacity = args
            .ring_capacity
            .filter(|&bytes| bytes >= 64)
            .and_then(|bytes| bytes.checked_next_multiple_of(RECORD_ALIGN))
            .unwrap_or(64 * 1024);

        let log_level = args
            .log_level
            .or_else(|| env::var("RUST_LOG").ok())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| "info".to_string());

        Self {
            scenario: args.scenario.unwrap_or(Scenario::Existing),
            offscreen: args.offscreen.unwrap_or(true),
            ring_capacity,
            timeout: Duration::from_millis(args.timeout_ms.unwrap_or(5_000)),
            log_level,
        }
    }
}
