//! Runs the canvas demo scenarios with the producer on the main thread and
//! the consumer on a second thread, linked by a pair of frame rings.

mod config;

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use anyhow::{bail, Context as _};
use offcanvas_proxy::wire::{Handle, RingTransport, Value};
use offcanvas_proxy::{
    Context2d, ConsumerConfig, ConsumerContext, ContextProxy, Op, ProducerConfig,
    ProducerContext, SoftwareContext,
};
use tracing_subscriber::EnvFilter;

use crate::config::{Config, Scenario};

fn main() -> anyhow::Result<()> {
    let config = Config::load();
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!(
        scenario = ?config.scenario,
        offscreen = config.offscreen,
        ring_capacity = config.ring_capacity,
        "starting"
    );

    let (producer_end, consumer_end) =
        RingTransport::try_pair(config.ring_capacity).context("invalid ring capacity")?;
    let stop = Arc::new(AtomicBool::new(false));
    let consumer = {
        let stop = stop.clone();
        let canvases = config.scenario.canvases();
        thread::Builder::new()
            .name("consumer".into())
            .spawn(move || run_consumer(consumer_end, canvases, &stop))
            .context("failed to spawn consumer thread")?
    };

    let resolved = run_producer(&config, producer_end);
    stop.store(true, Ordering::Release);
    let surfaces = consumer
        .join()
        .map_err(|_| anyhow::anyhow!("consumer thread panicked"))??;

    for (handle, log) in &surfaces {
        tracing::info!(handle = handle.raw(), ops = log.len(), "consumer surface");
        for op in log {
            tracing::info!(handle = handle.raw(), "  {}", describe(op));
        }
    }
    for (i, implementation) in resolved?.iter().enumerate() {
        tracing::info!(
            context = i,
            ops = implementation.borrow().log().len(),
            "resolved local implementation"
        );
    }
    Ok(())
}

/// Consumer thread: owns the real surfaces until told to stop.
fn run_consumer(
    transport: RingTransport,
    canvases: u16,
    stop: &AtomicBool,
) -> anyhow::Result<Vec<(Handle, Vec<Op>)>> {
    let mut consumer = ConsumerContext::new(ConsumerConfig::default(), Box::new(transport));
    let mut surfaces = Vec::new();
    // Stands in for the tree-mutation layer creating the canvases.
    for raw in 1..=canvases {
        let handle = Handle::from_raw(raw);
        let surface = Rc::new(RefCell::new(SoftwareContext::new()));
        consumer.attach(handle, surface.clone())?;
        surfaces.push((handle, surface));
    }

    loop {
        let finished = stop.load(Ordering::Acquire);
        let report = consumer.poll()?;
        if report.frames > 0 {
            tracing::debug!(
                frames = report.frames,
                applied = report.applied,
                skipped = report.skipped,
                "consumer applied frames"
            );
        } else if finished {
            break;
        } else {
            thread::yield_now();
        }
    }

    Ok(surfaces
        .into_iter()
        .map(|(handle, surface)| (handle, surface.borrow_mut().take_log()))
        .collect())
}

type Resolved = Rc<RefCell<Vec<Rc<RefCell<SoftwareContext>>>>>;

fn run_producer(
    config: &Config,
    transport: RingTransport,
) -> anyhow::Result<Vec<Rc<RefCell<SoftwareContext>>>> {
    let producer = ProducerContext::new(
        ProducerConfig {
            offscreen_supported: config.offscreen,
            ..ProducerConfig::default()
        },
        Some(Rc::new(transport)),
    );
    let resolved: Resolved = Rc::default();
    let new_context = || {
        let resolved = resolved.clone();
        producer.get_context("2d", move |remote| {
            tracing::debug!(remote = remote.0, "building local implementation");
            let implementation = Rc::new(RefCell::new(SoftwareContext::new()));
            resolved.borrow_mut().push(implementation.clone());
            implementation as Rc<RefCell<dyn Context2d>>
        })
    };

    let contexts = match config.scenario {
        Scenario::Existing => {
            let ctx = new_context()?;
            ctx.set("fillStyle", "blue")?;
            ctx.set("strokeStyle", "blue")?;
            ctx.set("lineWidth", 5.0f32)?;
            ctx.call("setLineDash", &[Value::floats([1.0, 0.0])])?;
            ctx.call("beginPath", &[])?;
            draw_house(&ctx, None)?;
            vec![ctx]
        }
        Scenario::New => {
            let ctx = new_context()?;
            draw_house(&ctx, Some("orange"))?;
            vec![ctx]
        }
        Scenario::Double => {
            let one = new_context()?;
            let two = new_context()?;
            draw_house(&one, Some("red"))?;
            draw_house(&two, Some("green"))?;
            vec![one, two]
        }
    };
    producer.flush()?;

    let started = Instant::now();
    while !contexts.iter().all(ContextProxy::is_ready) {
        if started.elapsed() > config.timeout {
            bail!("contexts did not resolve within {:?}", config.timeout);
        }
        producer.poll()?;
        producer.flush()?;
        thread::yield_now();
    }
    tracing::info!(elapsed = ?started.elapsed(), "all contexts ready");

    // Post-resolution traffic goes straight to the resolved implementation.
    for ctx in &contexts {
        ctx.call("stroke", &[])?;
    }
    while producer.unsent_frames() > 0 {
        producer.flush()?;
        thread::yield_now();
    }

    let resolved = resolved.borrow().clone();
    Ok(resolved)
}

fn draw_house(ctx: &ContextProxy, color: Option<&str>) -> offcanvas_proxy::Result<()> {
    if let Some(color) = color {
        ctx.set("lineWidth", 5.0f32)?;
        ctx.set("fillStyle", color)?;
        ctx.set("strokeStyle", color)?;
    }
    ctx.call("strokeRect", &rect(37.5, 70.0, 75.0, 55.0))?;
    ctx.call("fillRect", &rect(65.0, 95.0, 20.0, 30.0))?;
    ctx.call("moveTo", &[Value::Float32(25.0), Value::Float32(70.0)])?;
    ctx.call("lineTo", &[Value::Float32(75.0), Value::Float32(30.0)])?;
    ctx.call("lineTo", &[Value::Float32(125.0), Value::Float32(70.0)])?;
    ctx.call("closePath", &[])?;
    ctx.call("stroke", &[])?;
    Ok(())
}

fn rect(x: f32, y: f32, w: f32, h: f32) -> [Value; 4] {
    [x, y, w, h].map(Value::Float32)
}

fn describe(op: &Op) -> String {
    match op {
        Op::Call { name, args } => format!("{name}({args:?})"),
        Op::Set { name, value } => format!("{name} = {value:?}"),
    }
}
