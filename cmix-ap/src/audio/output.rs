//! Audio output backends
//!
//! `OutputStream` is the transport boundary between the engine and a device.
//! The engine owns exactly one stream and is the only caller of its transport
//! methods; the backend's own callback is the only writer of sample data.
//!
//! `CpalOutput` drives a real device through cpal. Rendered periods go into
//! a small playout ring (ringbuf) that the device callback drains:
//!
//! - cork/uncork pause and resume the cpal stream (no callbacks while corked)
//! - flush asks the callback to discard the playout ring and waits for it
//! - drain stops rendering and waits until the ring has played out
//!
//! The cpal `Stream` lives on a dedicated owner thread and is controlled
//! through a command channel, so `CpalOutput` itself is `Send`.

use crate::audio::types::AudioSpec;
use crate::error::{Error, Result};
use crate::playback::driver::FrameRenderer;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Stream, StreamConfig};
use ringbuf::{traits::*, HeapCons, HeapProd, HeapRb};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, SyncSender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Poll interval for flush/drain completion
const WAIT_POLL: Duration = Duration::from_millis(2);

/// Transport interface to an audio device
pub trait OutputStream: Send {
    /// Human-readable backend/device name
    fn name(&self) -> &str;

    /// Register the render callback and open the stream corked
    fn start(&mut self, renderer: FrameRenderer) -> Result<()>;

    /// Suspend callback delivery
    fn cork(&mut self) -> Result<()>;

    /// Resume callback delivery
    fn uncork(&mut self) -> Result<()>;

    fn is_corked(&self) -> bool;

    /// Discard rendered-but-unplayed samples, waiting at most `timeout`
    fn flush(&mut self, timeout: Duration) -> Result<()>;

    /// Wait at most `timeout` for rendered samples to finish playing
    fn drain(&mut self, timeout: Duration) -> Result<()>;

    /// Release the stream and any backend resources; idempotent
    fn close(&mut self);
}

/// List available output device names
pub fn list_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();
    let devices: Vec<String> = host
        .output_devices()
        .map_err(|e| Error::AudioOutput(format!("Failed to enumerate devices: {}", e)))?
        .filter_map(|device| device.name().ok())
        .collect();

    debug!("Found {} output devices", devices.len());
    Ok(devices)
}

/// State shared between the control side and the device callback
#[derive(Debug, Default)]
struct StreamShared {
    corked: AtomicBool,
    /// Incremented by `flush()`
    flush_requested: AtomicU64,
    /// Set to the last honoured `flush_requested` by the callback
    flush_done: AtomicU64,
    draining: AtomicBool,
    /// Samples waiting in the playout ring after the last callback
    buffered_samples: AtomicUsize,
    /// Incremented by the error callback
    error_count: AtomicU32,
}

enum StreamCommand {
    Play(SyncSender<Result<()>>),
    Pause(SyncSender<Result<()>>),
    Close,
}

/// Handle to the stream owner thread
struct StreamControl {
    commands: Sender<StreamCommand>,
    thread: Option<JoinHandle<()>>,
}

/// cpal device output
pub struct CpalOutput {
    name: String,
    requested_device: Option<String>,
    spec: AudioSpec,
    period_frames: u32,
    playout_frames: usize,
    shared: Arc<StreamShared>,
    control: Option<StreamControl>,
}

impl CpalOutput {
    /// Configure an output for `device` (None = default device)
    ///
    /// The device is opened by `start()`.
    pub fn new(device: Option<String>, spec: AudioSpec, period_frames: u32, playout_frames: usize) -> Self {
        Self {
            name: device.clone().unwrap_or_else(|| "default".to_string()),
            requested_device: device,
            spec,
            period_frames: period_frames.max(1),
            playout_frames: playout_frames.max(1),
            shared: Arc::new(StreamShared::default()),
            control: None,
        }
    }

    fn send(&self, make: impl FnOnce(SyncSender<Result<()>>) -> StreamCommand) -> Result<()> {
        let control = self
            .control
            .as_ref()
            .ok_or_else(|| Error::AudioOutput("stream not started".to_string()))?;
        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        control
            .commands
            .send(make(reply_tx))
            .map_err(|_| Error::AudioOutput("stream thread exited".to_string()))?;
        reply_rx
            .recv()
            .map_err(|_| Error::AudioOutput("stream thread exited".to_string()))?
    }

    fn wait_until(&self, what: &str, timeout: Duration, done: impl Fn() -> bool) -> Result<()> {
        let deadline = Instant::now() + timeout;
        while !done() {
            if Instant::now() >= deadline {
                return Err(Error::Timeout(what.to_string()));
            }
            std::thread::sleep(WAIT_POLL);
        }
        Ok(())
    }
}

impl OutputStream for CpalOutput {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self, renderer: FrameRenderer) -> Result<()> {
        if self.control.is_some() {
            return Err(Error::AudioOutput("stream already started".to_string()));
        }

        let (commands, command_rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);
        let setup = StreamSetup {
            requested_device: self.requested_device.clone(),
            spec: self.spec,
            period_frames: self.period_frames,
            playout_frames: self.playout_frames,
            shared: Arc::clone(&self.shared),
        };

        let thread = std::thread::Builder::new()
            .name("cmix-output".to_string())
            .spawn(move || run_stream_thread(setup, renderer, command_rx, ready_tx))?;

        match ready_rx.recv() {
            Ok(Ok(name)) => {
                info!("Audio output ready on '{}' ({})", name, self.spec);
                self.name = name;
                self.shared.corked.store(true, Ordering::Release);
                self.control = Some(StreamControl {
                    commands,
                    thread: Some(thread),
                });
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(Error::AudioOutput("stream thread exited during setup".to_string()))
            }
        }
    }

    fn cork(&mut self) -> Result<()> {
        if self.is_corked() {
            return Ok(());
        }
        self.send(StreamCommand::Pause)?;
        self.shared.corked.store(true, Ordering::Release);
        debug!("Output corked");
        Ok(())
    }

    fn uncork(&mut self) -> Result<()> {
        if !self.is_corked() {
            return Ok(());
        }
        self.shared.corked.store(false, Ordering::Release);
        if let Err(e) = self.send(StreamCommand::Play) {
            self.shared.corked.store(true, Ordering::Release);
            return Err(e);
        }
        debug!("Output uncorked");
        Ok(())
    }

    fn is_corked(&self) -> bool {
        self.shared.corked.load(Ordering::Acquire)
    }

    fn flush(&mut self, timeout: Duration) -> Result<()> {
        let target = self.shared.flush_requested.fetch_add(1, Ordering::AcqRel) + 1;
        if self.is_corked() || self.control.is_none() {
            // No callbacks will run; the ring is discarded on the next uncork
            debug!("Flush deferred until output resumes");
            return Ok(());
        }
        let shared = Arc::clone(&self.shared);
        self.wait_until("flush", timeout, || {
            shared.flush_done.load(Ordering::Acquire) >= target
        })
    }

    fn drain(&mut self, timeout: Duration) -> Result<()> {
        if self.is_corked() || self.control.is_none() {
            return Ok(());
        }
        self.shared.draining.store(true, Ordering::Release);
        let shared = Arc::clone(&self.shared);
        let result = self.wait_until("drain", timeout, || {
            shared.buffered_samples.load(Ordering::Acquire) == 0
        });
        self.shared.draining.store(false, Ordering::Release);
        result
    }

    fn close(&mut self) {
        let Some(mut control) = self.control.take() else {
            return;
        };
        let _ = control.commands.send(StreamCommand::Close);
        if let Some(thread) = control.thread.take() {
            if thread.join().is_err() {
                error!("Audio output thread panicked");
            }
        }
        self.shared.corked.store(true, Ordering::Release);
        let errors = self.shared.error_count.load(Ordering::Relaxed);
        if errors > 0 {
            warn!("Audio output '{}' closed after {} stream errors", self.name, errors);
        } else {
            info!("Audio output '{}' closed", self.name);
        }
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.close();
    }
}

struct StreamSetup {
    requested_device: Option<String>,
    spec: AudioSpec,
    period_frames: u32,
    playout_frames: usize,
    shared: Arc<StreamShared>,
}

/// Owns the cpal `Stream` for its whole life
fn run_stream_thread(
    setup: StreamSetup,
    renderer: FrameRenderer,
    commands: Receiver<StreamCommand>,
    ready: SyncSender<Result<String>>,
) {
    let stream = match open_stream(&setup, renderer) {
        Ok((stream, name)) => {
            let _ = ready.send(Ok(name));
            stream
        }
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    while let Ok(command) = commands.recv() {
        match command {
            StreamCommand::Play(reply) => {
                let result = stream
                    .play()
                    .map_err(|e| Error::AudioOutput(format!("Failed to resume stream: {}", e)));
                let _ = reply.send(result);
            }
            StreamCommand::Pause(reply) => {
                let result = stream
                    .pause()
                    .map_err(|e| Error::AudioOutput(format!("Failed to pause stream: {}", e)));
                let _ = reply.send(result);
            }
            StreamCommand::Close => break,
        }
    }

    drop(stream);
    debug!("Audio output thread exiting");
}

fn open_stream(setup: &StreamSetup, renderer: FrameRenderer) -> Result<(Stream, String)> {
    let (device, name) = find_device(setup.requested_device.as_deref())?;

    let config = StreamConfig {
        channels: setup.spec.channels(),
        sample_rate: cpal::SampleRate(setup.spec.sample_rate()),
        buffer_size: cpal::BufferSize::Fixed(setup.period_frames),
    };
    debug!(
        "Audio config: sample_rate={}, channels={}, buffer_size={:?}",
        config.sample_rate.0, config.channels, config.buffer_size
    );

    let channels = setup.spec.channels() as usize;
    let period_samples = setup.period_frames as usize * channels;
    let capacity = (setup.playout_frames * channels).max(period_samples * 2);
    let (producer, consumer) = HeapRb::<f32>::new(capacity).split();
    let mut playout = Playout {
        renderer,
        producer,
        consumer,
        period: vec![0.0; period_samples],
        shared: Arc::clone(&setup.shared),
    };
    playout.renderer.reserve_period(period_samples);

    let error_shared = Arc::clone(&setup.shared);
    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| playout.write(data),
            move |err| {
                error!("Audio stream error: {}", err);
                error_shared.error_count.fetch_add(1, Ordering::Relaxed);
            },
            None,
        )
        .map_err(|e| Error::AudioOutput(format!("Failed to build stream: {}", e)))?;

    // Opened corked
    stream
        .pause()
        .map_err(|e| Error::AudioOutput(format!("Failed to pause new stream: {}", e)))?;

    Ok((stream, name))
}

/// Find the requested device, falling back to the default output device
fn find_device(requested: Option<&str>) -> Result<(Device, String)> {
    let host = cpal::default_host();

    if let Some(name) = requested {
        let mut devices = host
            .output_devices()
            .map_err(|e| Error::AudioOutput(format!("Failed to enumerate devices: {}", e)))?;
        if let Some(device) = devices.find(|d| d.name().ok().as_deref() == Some(name)) {
            info!("Found requested audio device: {}", name);
            return Ok((device, name.to_string()));
        }
        warn!(
            "Requested device '{}' not found, falling back to default device",
            name
        );
    }

    let device = host
        .default_output_device()
        .ok_or_else(|| Error::AudioOutput("No default output device found".to_string()))?;
    let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
    info!("Using default audio device: {}", name);
    Ok((device, name))
}

/// Device-callback side: renders periods into the ring and writes the device buffer
struct Playout {
    renderer: FrameRenderer,
    producer: HeapProd<f32>,
    consumer: HeapCons<f32>,
    period: Vec<f32>,
    shared: Arc<StreamShared>,
}

impl Playout {
    fn write(&mut self, data: &mut [f32]) {
        let requested = self.shared.flush_requested.load(Ordering::Acquire);
        if requested != self.shared.flush_done.load(Ordering::Relaxed) {
            self.consumer.clear();
            self.shared.flush_done.store(requested, Ordering::Release);
        }

        if !self.shared.draining.load(Ordering::Acquire) {
            while self.consumer.occupied_len() < data.len()
                && self.producer.vacant_len() >= self.period.len()
            {
                self.renderer.render_samples(&mut self.period);
                self.producer.push_slice(&self.period);
            }
        }

        let written = self.consumer.pop_slice(data);
        data[written..].fill(0.0);
        self.shared
            .buffered_samples
            .store(self.consumer.occupied_len(), Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::types::SampleFormat;
    use crate::playback::queue::SharedLayerQueues;
    use crate::playback::state::PlaybackState;
    use crate::playback::timeline::TimelineSelector;
    use crate::playback::underrun::UnderrunMonitor;
    use cmix_common::{EventBus, PlayState};

    fn playout(period_samples: usize, capacity: usize) -> (Playout, Arc<StreamShared>) {
        let spec = AudioSpec::new(SampleFormat::F32Le, 1000, 1).unwrap();
        let state = Arc::new(PlaybackState::new(spec, 1.0));
        state.swap_play_state(PlayState::Playing);
        let (bus, _rx) = EventBus::new(16);
        let renderer = FrameRenderer::new(
            state,
            SharedLayerQueues::new(),
            TimelineSelector::new(bus.clone()),
            UnderrunMonitor::new(0, 1, bus),
        );
        let (producer, consumer) = HeapRb::<f32>::new(capacity).split();
        let shared = Arc::new(StreamShared::default());
        (
            Playout {
                renderer,
                producer,
                consumer,
                period: vec![0.0; period_samples],
                shared: Arc::clone(&shared),
            },
            shared,
        )
    }

    #[test]
    fn test_playout_renders_whole_periods_ahead() {
        let (mut playout, shared) = playout(4, 16);
        let mut data = [1.0f32; 6];
        playout.write(&mut data);

        // Two periods rendered, six samples written, two left buffered
        assert_eq!(playout.renderer.stats().snapshot().callbacks, 2);
        assert_eq!(shared.buffered_samples.load(Ordering::Acquire), 2);
        assert!(data.iter().all(|&s| s == 0.0));
        assert_eq!(playout.renderer.state().bytes_played(), 32);
    }

    #[test]
    fn test_flush_request_discards_playout_ring() {
        let (mut playout, shared) = playout(4, 16);
        let mut data = [0.0f32; 6];
        playout.write(&mut data);
        assert_eq!(shared.buffered_samples.load(Ordering::Acquire), 2);

        shared.flush_requested.fetch_add(1, Ordering::AcqRel);
        playout.write(&mut data);

        assert_eq!(shared.flush_done.load(Ordering::Acquire), 1);
        // Ring emptied first, then refilled with two fresh periods
        assert_eq!(playout.renderer.stats().snapshot().callbacks, 4);
        assert_eq!(shared.buffered_samples.load(Ordering::Acquire), 2);
    }

    #[test]
    fn test_draining_plays_out_without_rendering() {
        let (mut playout, shared) = playout(4, 16);
        let mut data = [0.0f32; 6];
        playout.write(&mut data);

        shared.draining.store(true, Ordering::Release);
        let mut data = [1.0f32; 6];
        playout.write(&mut data);

        assert_eq!(playout.renderer.stats().snapshot().callbacks, 2);
        assert_eq!(shared.buffered_samples.load(Ordering::Acquire), 0);
        assert!(data.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_transport_before_start() {
        let spec = AudioSpec::default();
        let mut output = CpalOutput::new(None, spec, 512, 2048);

        // Nothing is running, so flush and drain complete immediately
        assert!(output.flush(Duration::from_millis(10)).is_ok());
        assert!(output.drain(Duration::from_millis(10)).is_ok());
        assert_eq!(output.shared.flush_requested.load(Ordering::Acquire), 1);
        assert!(matches!(output.cork(), Err(Error::AudioOutput(_))));
        assert_eq!(output.name(), "default");
    }

    #[test]
    fn test_list_devices() {
        // Requires audio hardware; only check that enumeration does not panic
        match list_devices() {
            Ok(devices) => println!("Found {} output devices", devices.len()),
            Err(e) => println!("Device enumeration failed (expected without hardware): {}", e),
        }
    }
}
