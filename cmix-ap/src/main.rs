//! Audio Player (cmix-ap) - Main entry point
//!
//! Plays a timeline through the real-time mixer. Layer queues are fed by the
//! built-in tone producer; a controller task consumes engine events and
//! pauses on underrun (optionally resuming once queues recover).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use cmix_ap::audio::{list_devices, CpalOutput, LoopbackOutput, OutputStream};
use cmix_ap::config::TomlConfig;
use cmix_ap::playback::{AtomProfile, LayerProfile, Timeline, ToneProducer};
use cmix_ap::AudioEngine;
use cmix_common::config::{resolve_config_path, CONFIG_ENV_VAR};
use cmix_common::{CmixEvent, EventBus, PlayState, Rational};
use tokio::signal;
use tokio::sync::{mpsc, Mutex};
use tokio::time::interval;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

/// How far ahead of the clock the producer keeps queues filled
const PRODUCER_LEAD_MS: i64 = 500;
const PRODUCER_TICK: Duration = Duration::from_millis(20);
const RESUME_POLL: Duration = Duration::from_millis(100);

/// Command-line arguments for cmix-ap
#[derive(Parser, Debug)]
#[command(name = "cmix-ap")]
#[command(about = "Real-time timeline audio mixer")]
#[command(version)]
struct Args {
    /// Configuration file (overrides CMIX_CONFIG and the platform default)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Timeline JSON file (a built-in demo timeline is used if omitted)
    #[arg(short, long)]
    timeline: Option<PathBuf>,

    /// Output device name
    #[arg(short, long, env = "CMIX_DEVICE")]
    device: Option<String>,

    /// Print the available output devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Render in real time without an audio device
    #[arg(long)]
    null_output: bool,

    /// Stop after this many seconds instead of waiting for Ctrl-C
    #[arg(long)]
    duration_secs: Option<u64>,

    /// Initial master volume (overrides config)
    #[arg(long)]
    volume: Option<f32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.list_devices {
        for name in list_devices().context("Failed to enumerate output devices")? {
            println!("{}", name);
        }
        return Ok(());
    }

    let config_path = resolve_config_path(args.config.as_deref(), CONFIG_ENV_VAR);
    let mut config =
        TomlConfig::load(config_path.as_deref()).context("Failed to load configuration")?;
    if let Some(device) = args.device.clone() {
        config.audio.device = Some(device);
    }

    init_tracing(&config.logging.level);
    info!("Starting cmix-ap {}", env!("CARGO_PKG_VERSION"));
    match &config_path {
        Some(path) => info!("Configuration: {}", path.display()),
        None => info!("Configuration: built-in defaults"),
    }

    let spec = config.audio.spec()?;
    let timeline = match &args.timeline {
        Some(path) => Timeline::from_json_file(path)
            .with_context(|| format!("Failed to load timeline {}", path.display()))?,
        None => demo_timeline()?,
    };

    let (events, event_rx) = EventBus::new(config.engine.event_channel_capacity);
    let stream: Box<dyn OutputStream> = if args.null_output {
        let (output, _handle) = LoopbackOutput::paced(spec, config.audio.period_frames);
        Box::new(output)
    } else {
        Box::new(CpalOutput::new(
            config.audio.device.clone(),
            spec,
            config.audio.period_frames,
            config.audio.playout_frames,
        ))
    };

    let engine = Arc::new(
        AudioEngine::new(&config.engine, spec, stream, events)
            .context("Failed to initialize audio engine")?,
    );
    if let Some(volume) = args.volume {
        engine.set_volume(volume);
    }
    engine.set_timeline(timeline)?;

    let producer = Arc::new(Mutex::new(ToneProducer::new(
        engine.state(),
        engine.queues(),
        Rational::from_millis(PRODUCER_LEAD_MS),
        config.audio.period_frames as usize,
    )));
    let primed = producer.lock().await.fill();
    debug!("Primed queues with {} bytes", primed);

    let producer_task = {
        let producer = Arc::clone(&producer);
        tokio::spawn(async move {
            let mut tick = interval(PRODUCER_TICK);
            loop {
                tick.tick().await;
                producer.lock().await.fill();
            }
        })
    };
    let controller_task = tokio::spawn(run_controller(
        Arc::clone(&engine),
        Arc::clone(&producer),
        event_rx,
        config.engine.auto_resume,
    ));

    engine.play()?;
    info!("Playing on '{}'", engine.stream_name());

    match args.duration_secs {
        Some(secs) => {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(secs)) => {}
                result = signal::ctrl_c() => result.context("Failed to listen for shutdown signal")?,
            }
        }
        None => signal::ctrl_c()
            .await
            .context("Failed to listen for shutdown signal")?,
    }

    info!("Shutting down");
    producer_task.abort();
    controller_task.abort();

    let teardown = Arc::clone(&engine);
    tokio::task::spawn_blocking(move || teardown.destroy())
        .await
        .context("Engine teardown task failed")?;

    let stats = engine.stats();
    info!(
        "Stopped at {} (loop {}): {} callbacks, {} starved, {} contended, {} corrupted",
        engine.current_time(),
        engine.loop_count(),
        stats.callbacks,
        stats.starved_periods,
        stats.lock_contention,
        stats.corrupted_buffers
    );
    Ok(())
}

fn init_tracing(level: &str) {
    let fallback = if level.contains('=') {
        level.to_string()
    } else {
        format!("cmix_ap={0},cmix_common={0}", level)
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Consume engine events: pause on underrun, keep the producer in step
async fn run_controller(
    engine: Arc<AudioEngine>,
    producer: Arc<Mutex<ToneProducer>>,
    mut events: mpsc::Receiver<CmixEvent>,
    auto_resume: bool,
) {
    let mut paused_for_underrun = false;
    let mut poll = interval(RESUME_POLL);

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    break;
                };
                producer.lock().await.handle_event(&event);

                match event {
                    CmixEvent::UnderrunPause { queued_bytes, threshold_bytes } => {
                        warn!(
                            "Underrun ({} of {} bytes queued), pausing",
                            queued_bytes, threshold_bytes
                        );
                        if engine.play_state() == PlayState::Playing
                            && run_transport(&engine, |e| e.pause()).await
                        {
                            paused_for_underrun = true;
                        }
                    }
                    CmixEvent::ReadyToPlay { queued_bytes } => {
                        debug!("Queues ready ({} bytes)", queued_bytes);
                    }
                    CmixEvent::LoopWrapped { loop_count } => {
                        info!("Loop {}", loop_count);
                    }
                    CmixEvent::AtomChanged { atom_index, loop_count } => {
                        debug!("Atom {} (loop {})", atom_index, loop_count);
                    }
                    CmixEvent::PlaybackStateChanged { new_state, .. } => {
                        if new_state == PlayState::Playing {
                            paused_for_underrun = false;
                        }
                    }
                    CmixEvent::Seeked { .. } => {}
                }
            }
            _ = poll.tick(), if paused_for_underrun && auto_resume => {
                if engine.has_playable_queue() && run_transport(&engine, |e| e.play()).await {
                    info!("Queues recovered, resuming");
                    paused_for_underrun = false;
                }
            }
        }
    }
}

/// Run a blocking transport call off the async workers; true on success
async fn run_transport<F>(engine: &Arc<AudioEngine>, call: F) -> bool
where
    F: FnOnce(&AudioEngine) -> cmix_ap::Result<()> + Send + 'static,
{
    let engine = Arc::clone(engine);
    match tokio::task::spawn_blocking(move || call(&engine)).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            error!("Transport call failed: {}", e);
            false
        }
        Err(e) => {
            error!("Transport task failed: {}", e);
            false
        }
    }
}

/// Three contiguous 4 s atoms with one continuous bed layer and two overlays
fn demo_timeline() -> cmix_ap::Result<Timeline> {
    let secs = Rational::from_integer;
    let bed = LayerProfile::new(Uuid::new_v4(), secs(0), secs(12), 0.6);
    let early = LayerProfile::new(Uuid::new_v4(), secs(2), secs(6), 0.4);
    let late = LayerProfile::new(Uuid::new_v4(), secs(7), secs(12), 0.5);

    Timeline::new(vec![
        AtomProfile::new(secs(0), secs(4), vec![bed.clone(), early.clone()]),
        AtomProfile::new(secs(4), secs(8), vec![bed.clone(), early, late.clone()]),
        AtomProfile::new(secs(8), secs(12), vec![bed, late]),
    ])
}
